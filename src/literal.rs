//! Closed literal grammar shared with the remote interpreter.
//!
//! Values are written the way the remote side's own `repr` prints them and
//! read back with a small recursive-descent parser. Nothing outside the
//! grammar is ever evaluated: names other than `None`/`True`/`False`/`inf`/
//! `nan`, calls, operators, and sets are rejected.
//!
//! Grammar:
//!
//! ```text
//! value  := None | True | False | number | string | bytes | list | tuple | dict
//! number := ['-'] digits ['.' digits] [('e'|'E') ['+'|'-'] digits] | ['-'] inf | nan
//! string := quote chars quote                (single or double quotes)
//! bytes  := 'b' string                       (ASCII only, \xNN escapes)
//! list   := '[' [value (',' value)* [',']] ']'
//! tuple  := '(' ')' | '(' value ',' [value (',' value)* [',']] ')'
//! dict   := '{' [value ':' value (',' value ':' value)* [',']] '}'
//! ```
//!
//! Output is compact: no whitespace after separators.

use crate::error::{Error, Result};
use std::fmt::{self, Write as _};

/// Nesting limit for decoding; corrupted input must not exhaust the stack.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion ordered; keys are any hashable literal.
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a string key in a dict value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Encode as literal text.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }

    fn write_literal(&self, out: &mut String) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            Value::Float(f) => write_float(*f, out),
            Value::Str(s) => write_str(s, out),
            Value::Bytes(b) => write_bytes(b, out),
            Value::List(items) => {
                out.push('[');
                write_items(items, out);
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(items, out);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    k.write_literal(out);
                    out.push(':');
                    v.write_literal(out);
                }
                out.push('}');
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn write_items(items: &[Value], out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        item.write_literal(out);
    }
}

/// Argument lists accepted after `float`, the only call in the grammar.
const NON_FINITE_CALLS: [(&str, f64); 3] = [
    ("('inf')", f64::INFINITY),
    ("('-inf')", f64::NEG_INFINITY),
    ("('nan')", f64::NAN),
];

fn write_float(f: f64, out: &mut String) {
    if f.is_nan() {
        out.push_str("float('nan')");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 {
            "float('inf')"
        } else {
            "float('-inf')"
        });
    } else {
        // Debug keeps a fractional part or exponent, so it never reads back as an int.
        let _ = write!(out, "{:?}", f);
    }
}

fn write_str(s: &str, out: &mut String) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn write_bytes(b: &[u8], out: &mut String) {
    out.push_str("b'");
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", byte);
            }
        }
    }
    out.push('\'');
}

/// Encode a sequence of values as a list literal.
pub fn encode_list<T: AsRef<str>>(items: &[T]) -> String {
    let mut out = String::from("[");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_str(item.as_ref(), &mut out);
    }
    out.push(']');
    out
}

/// Decode one literal; surrounding whitespace is allowed, trailing garbage is not.
pub fn decode(text: &str) -> Result<Value> {
    let mut parser = Parser::new(text);
    parser.skip_ws();
    let value = parser.value(0)?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("trailing characters after literal"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::Decode {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' || c == '\n' || c == '\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('[') => {
                self.pos += 1;
                let (items, _) = self.sequence(']', depth)?;
                Ok(Value::List(items))
            }
            Some('(') => {
                self.pos += 1;
                let (mut items, trailing_comma) = self.sequence(')', depth)?;
                // `(x)` is just a parenthesized value, `(x,)` is a tuple
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Value::Tuple(items))
                }
            }
            Some('{') => {
                self.pos += 1;
                self.dict(depth)
            }
            Some('\'') | Some('"') => Ok(Value::Str(self.string()?)),
            Some('b') if matches!(self.rest().as_bytes().get(1), Some(b'\'') | Some(b'"')) => {
                self.pos += 1;
                Ok(Value::Bytes(self.byte_string()?))
            }
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.keyword(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    /// Comma separated values up to `close`. Returns whether a trailing comma was seen.
    fn sequence(&mut self, close: char, depth: usize) -> Result<(Vec<Value>, bool)> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok((items, trailing_comma));
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(c) if c == close => return Ok((items, false)),
                Some(c) => return Err(self.error(format!("expected ',' or '{}', found '{}'", close, c))),
                None => return Err(self.error(format!("unterminated sequence, expected '{}'", close))),
            }
        }
    }

    fn dict(&mut self, depth: usize) -> Result<Value> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Dict(entries));
            }
            let key = self.value(depth + 1)?;
            if matches!(key, Value::List(_) | Value::Dict(_)) {
                return Err(self.error("unhashable dict key"));
            }
            self.skip_ws();
            if self.peek() != Some(':') {
                // `{1,2}` is a set, which is outside the grammar
                return Err(self.error("expected ':' in dict literal"));
            }
            self.pos += 1;
            self.skip_ws();
            let value = self.value(depth + 1)?;
            entries.push((key, value));
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(Value::Dict(entries)),
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{}'", c))),
                None => return Err(self.error("unterminated dict")),
            }
        }
    }

    fn keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        match &self.src[start..self.pos] {
            "None" => Ok(Value::None),
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            // bare forms are what the remote repr prints
            "inf" => Ok(Value::Float(f64::INFINITY)),
            "nan" => Ok(Value::Float(f64::NAN)),
            // call forms are what the encoder writes
            "float" => {
                for (call, value) in NON_FINITE_CALLS {
                    if let Some(rest) = self.rest().strip_prefix(call) {
                        if !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
                            self.pos += call.len();
                            return Ok(Value::Float(value));
                        }
                    }
                }
                self.pos = start;
                Err(self.error("only float('inf'), float('-inf') and float('nan') are literals"))
            }
            other => {
                self.pos = start;
                Err(self.error(format!("name '{}' is not a literal", other)))
            }
        }
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
            if self.rest().starts_with("inf") {
                self.pos += 3;
                return Ok(Value::Float(f64::NEG_INFINITY));
            }
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => self.pos += 1,
                '.' => {
                    is_float = true;
                    self.pos += 1;
                }
                'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>().map(Value::Float).map_err(|_| {
                self.pos = start;
                self.error(format!("invalid float '{}'", text))
            })
        } else {
            text.parse::<i64>().map(Value::Int).map_err(|_| {
                self.pos = start;
                self.error(format!("invalid or out of range integer '{}'", text))
            })
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\n') => return Err(self.error("newline in string literal")),
                Some('\\') => {
                    let c = self.escape(false)?;
                    out.push(c);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn byte_string(&mut self) -> Result<Vec<u8>> {
        let quote = self.bump().ok_or_else(|| self.error("expected bytes"))?;
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated bytes")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let c = self.escape(true)?;
                    out.push(c as u8);
                }
                Some(c) if c.is_ascii() && c != '\n' => out.push(c as u8),
                Some(c) => return Err(self.error(format!("non-ASCII character '{}' in bytes", c))),
            }
        }
    }

    fn escape(&mut self, bytes: bool) -> Result<char> {
        let c = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
        let decoded = match c {
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            'x' => self.hex_escape(2)?,
            'u' if !bytes => self.hex_escape(4)?,
            'U' if !bytes => self.hex_escape(8)?,
            other => return Err(self.error(format!("unknown escape '\\{}'", other))),
        };
        Ok(decoded)
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char> {
        let text = self
            .rest()
            .get(..digits)
            .ok_or_else(|| self.error("truncated hex escape"))?;
        if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(self.error(format!("invalid hex escape '{}'", text)));
        }
        let code = u32::from_str_radix(text, 16)
            .map_err(|_| self.error(format!("invalid hex escape '{}'", text)))?;
        self.pos += digits;
        char::from_u32(code).ok_or_else(|| self.error(format!("invalid code point {:#x}", code)))
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(Value::None.encode(), "None");
        assert_eq!(Value::Bool(true).encode(), "True");
        assert_eq!(Value::Int(-42).encode(), "-42");
        assert_eq!(Value::Float(1.0).encode(), "1.0");
        assert_eq!(Value::Float(0.25).encode(), "0.25");
        assert_eq!(Value::Float(f64::INFINITY).encode(), "float('inf')");
    }

    #[test]
    fn test_encode_containers_compact() {
        let v = Value::List(vec![Value::from("/a.py"), Value::from("/b.txt")]);
        assert_eq!(v.encode(), "['/a.py','/b.txt']");

        let t = Value::Tuple(vec![Value::Int(1)]);
        assert_eq!(t.encode(), "(1,)");
        assert_eq!(Value::Tuple(vec![]).encode(), "()");

        let d = Value::Dict(vec![(Value::from("bar"), Value::Int(25))]);
        assert_eq!(d.encode(), "{'bar':25}");
    }

    #[test]
    fn test_encode_escapes_quotes_and_control_bytes() {
        assert_eq!(Value::from("it's").encode(), r"'it\'s'");
        assert_eq!(Value::from("a\\b").encode(), r"'a\\b'");
        assert_eq!(Value::from("line\r\n").encode(), r"'line\r\n'");
        assert_eq!(Value::from("\x04").encode(), r"'\x04'");
        assert_eq!(Value::bytes(vec![0u8, b'a', 0xff]).encode(), r"b'\x00a\xff'");
    }

    #[test]
    fn test_encode_list_helper() {
        assert_eq!(encode_list(&["/x", "/y"]), "['/x','/y']");
        assert_eq!(encode_list::<&str>(&[]), "[]");
    }

    #[test]
    fn test_decode_repr_output() {
        // What the remote printer actually emits, including its spacing.
        let v = decode("[b'', b'\\x00', 3214539981]").unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::bytes(Vec::new()),
                Value::bytes(vec![0u8]),
                Value::Int(3214539981),
            ])
        );

        let v = decode("{'bar': 25, 'nested': (1, 'two', None)}").unwrap();
        assert_eq!(v.get("bar"), Some(&Value::Int(25)));
        assert_eq!(
            v.get("nested"),
            Some(&Value::Tuple(vec![
                Value::Int(1),
                Value::from("two"),
                Value::None
            ]))
        );
    }

    #[test]
    fn test_decode_tuple_forms() {
        assert_eq!(decode("()").unwrap(), Value::Tuple(vec![]));
        assert_eq!(decode("(5,)").unwrap(), Value::Tuple(vec![Value::Int(5)]));
        assert_eq!(decode("(5)").unwrap(), Value::Int(5));
        assert_eq!(
            decode("('OSError', 'boom')").unwrap(),
            Value::Tuple(vec![Value::from("OSError"), Value::from("boom")])
        );
    }

    #[test]
    fn test_decode_strings() {
        assert_eq!(decode(r#""double""#).unwrap(), Value::from("double"));
        assert_eq!(decode(r"'it\'s'").unwrap(), Value::from("it's"));
        assert_eq!(decode(r"'é\t'").unwrap(), Value::from("\u{e9}\t"));
        assert_eq!(decode("'caf\u{e9}'").unwrap(), Value::from("caf\u{e9}"));
    }

    #[test]
    fn test_decode_floats() {
        assert_eq!(decode("1.5").unwrap(), Value::Float(1.5));
        assert_eq!(decode("1e+20").unwrap(), Value::Float(1e20));
        assert_eq!(decode("-inf").unwrap(), Value::Float(f64::NEG_INFINITY));
        assert!(matches!(decode("nan").unwrap(), Value::Float(f) if f.is_nan()));
    }

    #[test]
    fn test_non_finite_floats_read_back() {
        assert_eq!(decode("float('inf')").unwrap(), Value::Float(f64::INFINITY));
        assert_eq!(decode("float('-inf')").unwrap(), Value::Float(f64::NEG_INFINITY));
        assert!(matches!(decode("float('nan')").unwrap(), Value::Float(f) if f.is_nan()));
        assert_eq!(
            decode(&Value::List(vec![Value::Float(f64::NEG_INFINITY), Value::Int(1)]).encode())
                .unwrap(),
            Value::List(vec![Value::Float(f64::NEG_INFINITY), Value::Int(1)])
        );

        // no other calls, and no other arguments to float
        assert!(decode("float('1.5')").is_err());
        assert!(decode("float(1)").is_err());
        assert!(decode("float").is_err());
        assert!(decode("float('inf')x").is_err());
        assert!(decode("floaty('inf')").is_err());
    }

    #[test]
    fn test_hex_escape_requires_hex_digits() {
        assert_eq!(decode(r"'\x4f'").unwrap(), Value::from("O"));
        assert!(decode(r"'\x+f'").is_err());
        assert!(decode(r"b'\x+f'").is_err());
        assert!(decode(r"'\u+04f'").is_err());
        assert!(decode(r"'\x-1'").is_err());
    }

    #[test]
    fn test_decode_rejects_code() {
        assert!(decode("__import__('os').remove('/boot.py')").is_err());
        assert!(decode("1 + 2").is_err());
        assert!(decode("foo").is_err());
        assert!(decode("{1, 2}").is_err());
        assert!(decode("[1, 2").is_err());
        assert!(decode("'unterminated").is_err());
        assert!(decode("").is_err());
        assert!(decode("99999999999999999999999").is_err());
    }

    #[test]
    fn test_decode_error_reports_offset() {
        match decode("[1, oops]") {
            Err(Error::Decode { offset, .. }) => assert_eq!(offset, 4),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_depth_limit() {
        let deep = "[".repeat(MAX_DEPTH + 2) + &"]".repeat(MAX_DEPTH + 2);
        assert!(decode(&deep).is_err());
        let ok = "[".repeat(10) + &"]".repeat(10);
        assert!(decode(&ok).is_ok());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::None),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1.0e12f64..1.0e12).prop_map(Value::Float),
            prop_oneof![Just(f64::INFINITY), Just(f64::NEG_INFINITY), Just(f64::NAN)]
                .prop_map(Value::Float),
            ".*".prop_map(Value::Str),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Tuple),
                proptest::collection::vec((".*".prop_map(Value::Str), inner), 0..4)
                    .prop_map(Value::Dict),
            ]
        })
    }

    /// Structural equality where NaN equals NaN.
    fn same(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
            (Value::List(xs), Value::List(ys)) | (Value::Tuple(xs), Value::Tuple(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same(x, y))
            }
            (Value::Dict(xs), Value::Dict(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys)
                        .all(|((kx, vx), (ky, vy))| same(kx, ky) && same(vx, vy))
            }
            _ => a == b,
        }
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(v in arb_value()) {
            let back = decode(&v.encode()).unwrap();
            prop_assert!(same(&back, &v), "{:?} read back as {:?}", v, back);
        }

        #[test]
        fn prop_encoded_text_is_single_line(v in arb_value()) {
            let text = v.encode();
            prop_assert!(!text.contains('\n'));
            prop_assert!(!text.contains('\r'));
            prop_assert!(!text.contains('\x04'));
        }
    }
}
