//! Reading the `def` header of a procedure body.
//!
//! Procedure bodies arrive as text, so the host learns the parameter list
//! by scanning the header instead of introspecting a live function. Only the
//! header is parsed; the body is opaque.

use crate::error::{Error, Result};
use crate::literal::Value;
use crate::rpc::executor::Args;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    /// `*args`
    VarPositional,
    /// After a bare `*` or `*args`.
    KeywordOnly,
    /// `**kwargs`
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    /// Default expression as written in the header.
    pub default: Option<String>,
}

/// A parameter after binding call arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Value(Value),
    /// Not supplied; the header default expression applies.
    Default(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<Param>,
    /// Byte offset just past the header's closing `:`.
    header_end: usize,
}

impl Signature {
    /// Parse the header of `body`, which must define `name`.
    pub fn parse(body: &str, name: &str) -> Result<Self> {
        let def_at = find_def(body).ok_or_else(|| {
            Error::Configuration(format!("body of '{}' does not contain a def statement", name))
        })?;

        let mut pos = def_at;
        let rest = &body[pos..];
        let after_def = rest
            .strip_prefix("async def")
            .or_else(|| rest.strip_prefix("def"))
            .ok_or_else(|| Error::Configuration(format!("malformed header for '{}'", name)))?;
        pos += rest.len() - after_def.len();
        pos += leading_ws(&body[pos..]);

        let ident_len = body[pos..]
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(body.len() - pos);
        let found = &body[pos..pos + ident_len];
        if found != name {
            return Err(Error::Configuration(format!(
                "body defines '{}' but was registered as '{}'",
                found, name
            )));
        }
        pos += ident_len;
        pos += leading_ws(&body[pos..]);

        if !body[pos..].starts_with('(') {
            return Err(Error::Configuration(format!(
                "expected '(' after 'def {}'",
                name
            )));
        }
        let open = pos;
        let close = find_closing(body, open).ok_or_else(|| {
            Error::Configuration(format!("unbalanced parameter list in '{}'", name))
        })?;
        let params = parse_params(&body[open + 1..close], name)?;

        let colon = find_top_level(body, close + 1, ':').ok_or_else(|| {
            Error::Configuration(format!("missing ':' after header of '{}'", name))
        })?;

        Ok(Self {
            name: name.to_string(),
            params,
            header_end: colon + 1,
        })
    }

    /// True when the header declares any parameter at all, defaulted or not.
    pub fn takes_arguments(&self) -> bool {
        !self.params.is_empty()
    }

    /// Bind call arguments to parameters, in declaration order.
    pub fn bind(&self, args: &Args) -> Result<Vec<(String, Bound)>> {
        let mut slots: Vec<Option<Bound>> = vec![None; self.params.len()];
        let mut extra_positional = Vec::new();
        let mut extra_keyword = Vec::new();

        let mut positional = args.positional.iter();
        for (slot, param) in slots.iter_mut().zip(&self.params) {
            if param.kind != ParamKind::Positional {
                break;
            }
            match positional.next() {
                Some(v) => *slot = Some(Bound::Value(v.clone())),
                None => break,
            }
        }
        let leftover: Vec<&Value> = positional.collect();
        if !leftover.is_empty() {
            if self.has(ParamKind::VarPositional) {
                extra_positional.extend(leftover.into_iter().cloned());
            } else {
                let max = self
                    .params
                    .iter()
                    .filter(|p| p.kind == ParamKind::Positional)
                    .count();
                return Err(Error::Configuration(format!(
                    "{}() takes {} positional argument(s) but {} were given",
                    self.name,
                    max,
                    args.positional.len()
                )));
            }
        }

        for (key, value) in &args.keyword {
            // names are written verbatim into the command text
            if !is_identifier(key) {
                return Err(Error::Configuration(format!(
                    "{}() keyword argument name {:?} is not an identifier",
                    self.name, key
                )));
            }
            let target = self.params.iter().position(|p| {
                p.name == *key && matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly)
            });
            match target {
                Some(i) if slots[i].is_some() => {
                    return Err(Error::Configuration(format!(
                        "{}() got multiple values for argument '{}'",
                        self.name, key
                    )));
                }
                Some(i) => slots[i] = Some(Bound::Value(value.clone())),
                None if self.has(ParamKind::VarKeyword) => {
                    extra_keyword.push((Value::from(key.as_str()), value.clone()));
                }
                None => {
                    return Err(Error::Configuration(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        self.name, key
                    )));
                }
            }
        }

        let mut bound = Vec::with_capacity(self.params.len());
        for (param, slot) in self.params.iter().zip(slots) {
            let value = match param.kind {
                ParamKind::VarPositional => Bound::Value(Value::Tuple(extra_positional.clone())),
                ParamKind::VarKeyword => Bound::Value(Value::Dict(extra_keyword.clone())),
                _ => match (slot, &param.default) {
                    (Some(b), _) => b,
                    (None, Some(default)) => Bound::Default(default.clone()),
                    (None, None) => {
                        return Err(Error::Configuration(format!(
                            "{}() missing required argument '{}'",
                            self.name, param.name
                        )));
                    }
                },
            };
            bound.push((param.name.clone(), value));
        }
        Ok(bound)
    }

    fn has(&self, kind: ParamKind) -> bool {
        self.params.iter().any(|p| p.kind == kind)
    }

    /// The body with its header removed, indentation untouched.
    fn strip_header<'b>(&self, body: &'b str) -> &'b str {
        let after = &body[self.header_end..];
        match after.find('\n') {
            // one-line form: `def f(): return 1`
            Some(nl) if !after[..nl].trim().is_empty() => after,
            Some(nl) => &after[nl + 1..],
            None => after,
        }
    }
}

/// Drop the header of a `def`, returning the remaining body and how many
/// lines the header (and anything above it) occupied.
pub fn remove_signature(body: &str, name: &str) -> Result<(String, usize)> {
    let sig = Signature::parse(body, name)?;
    let rest = sig.strip_header(body);
    let consumed = &body[..body.len() - rest.len()];
    let lines_removed = consumed.matches('\n').count();
    let rest = if lines_removed == body[..sig.header_end].matches('\n').count() {
        // body continued on the header line
        format!("{}\n", rest.trim())
    } else {
        rest.to_string()
    };
    Ok((rest, lines_removed.max(1)))
}

/// Remove the common leading indentation of all non-blank lines.
pub fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(leading_ws)
        .min()
        .unwrap_or(0);

    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if line.ends_with('\n') {
                out.push('\n');
            }
        } else {
            out.push_str(&line[indent.min(leading_ws(line))..]);
        }
    }
    out
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start_matches([' ', '\t']).len()
}

/// Offset of the `def` keyword, skipping blank lines, comments and decorators.
fn find_def(body: &str) -> Option<usize> {
    let mut offset = 0;
    let mut decorator_depth = 0i32;
    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let line_start = offset;
        offset += line.len();

        if decorator_depth > 0 {
            decorator_depth += bracket_delta(line);
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with('@') {
            decorator_depth = bracket_delta(line).max(0);
            continue;
        }
        if trimmed.starts_with("def ") || trimmed.starts_with("async def ") {
            return Some(line_start + (line.len() - trimmed.len()));
        }
        return None;
    }
    None
}

fn bracket_delta(line: &str) -> i32 {
    line.chars().fold(0, |acc, c| match c {
        '(' | '[' | '{' => acc + 1,
        ')' | ']' | '}' => acc - 1,
        _ => acc,
    })
}

/// Walk `body` from `start`, skipping string literals, yielding each
/// (offset, char, depth) outside strings.
fn scan(body: &str, start: usize) -> impl Iterator<Item = (usize, char, i32)> + '_ {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    body[start..].char_indices().filter_map(move |(i, c)| {
        let at = start + i;
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            return None;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                None
            }
            '(' | '[' | '{' => {
                depth += 1;
                Some((at, c, depth))
            }
            ')' | ']' | '}' => {
                depth -= 1;
                Some((at, c, depth))
            }
            _ => Some((at, c, depth)),
        }
    })
}

fn find_closing(body: &str, open: usize) -> Option<usize> {
    scan(body, open)
        .find(|&(_, c, depth)| c == ')' && depth == 0)
        .map(|(at, _, _)| at)
}

fn find_top_level(body: &str, start: usize, want: char) -> Option<usize> {
    scan(body, start)
        .find(|&(_, c, depth)| c == want && depth == 0)
        .map(|(at, _, _)| at)
}

fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for (at, c, depth) in scan(text, 0) {
        if c == sep && depth == 0 {
            parts.push(&text[last..at]);
            last = at + c.len_utf8();
        }
    }
    parts.push(&text[last..]);
    parts
}

fn parse_params(list: &str, name: &str) -> Result<Vec<Param>> {
    let mut params = Vec::new();
    let mut keyword_only = false;

    for raw in split_top_level(list, ',') {
        let raw = raw.trim();
        if raw.is_empty() || raw == "/" {
            continue;
        }
        if raw == "*" {
            keyword_only = true;
            continue;
        }

        let (kind, decl) = if let Some(decl) = raw.strip_prefix("**") {
            (ParamKind::VarKeyword, decl)
        } else if let Some(decl) = raw.strip_prefix('*') {
            keyword_only = true;
            (ParamKind::VarPositional, decl)
        } else if keyword_only {
            (ParamKind::KeywordOnly, raw)
        } else {
            (ParamKind::Positional, raw)
        };

        let (target, default) = match find_top_level(decl, 0, '=') {
            Some(eq) => (&decl[..eq], Some(decl[eq + 1..].trim().to_string())),
            None => (decl, None),
        };
        let param_name = match find_top_level(target, 0, ':') {
            Some(colon) => &target[..colon],
            None => target,
        }
        .trim();

        if !is_identifier(param_name) {
            return Err(Error::Configuration(format!(
                "cannot read parameter '{}' of '{}'",
                raw, name
            )));
        }
        params.push(Param {
            name: param_name.to_string(),
            kind,
            default,
        });
    }
    Ok(params)
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}
