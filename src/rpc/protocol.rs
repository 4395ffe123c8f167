//! Response markers printed by the remote side.
//!
//! Wire format: one response per line, CR-LF terminated.
//!
//! ```text
//! _REPLINKR<literal>            return value (call result or one generator step)
//! _REPLINKS                     generator exhausted
//! _REPLINKE(<kind>,<message>)   remote exception, both fields are str literals
//! ```
//!
//! A command is the command text followed by [`COMMAND_TERMINATOR`]; the
//! channel reports the command finished with the same byte.

use crate::error::{Error, Result};
use crate::literal::{self, Value};

/// Prefix shared by every response marker.
pub const RESPONSE_PREFIX: &str = "_REPLINK";

/// Tag following the prefix on a return line.
pub const RETURN_TAG: char = 'R';

/// Tag following the prefix on a stop line (no payload).
pub const STOP_TAG: char = 'S';

/// Tag following the prefix on an error line.
pub const ERROR_TAG: char = 'E';

/// Written after each command; also ends each response on the channel.
pub const COMMAND_TERMINATOR: &[u8] = b"\x04";

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    Return(Value),
    StopIteration,
    Error { kind: String, message: String },
}

impl ResponseEvent {
    /// Render as a wire line (without line terminator).
    pub fn to_line(&self) -> String {
        match self {
            ResponseEvent::Return(v) => format!("{}{}{}", RESPONSE_PREFIX, RETURN_TAG, v),
            ResponseEvent::StopIteration => format!("{}{}", RESPONSE_PREFIX, STOP_TAG),
            ResponseEvent::Error { kind, message } => format!(
                "{}{}{}",
                RESPONSE_PREFIX,
                ERROR_TAG,
                Value::Tuple(vec![Value::from(kind.as_str()), Value::from(message.as_str())])
            ),
        }
    }
}

/// Parse one response line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ResponseEvent>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix(RESPONSE_PREFIX) else {
        return Err(Error::Protocol(format!(
            "unexpected output line: {:?}",
            truncate(line)
        )));
    };

    let mut chars = rest.chars();
    let tag = chars.next();
    let payload = chars.as_str();
    match tag {
        Some(RETURN_TAG) => Ok(Some(ResponseEvent::Return(literal::decode(payload)?))),
        Some(STOP_TAG) if payload.is_empty() => Ok(Some(ResponseEvent::StopIteration)),
        Some(STOP_TAG) => Err(Error::Protocol(format!(
            "stop marker carries a payload: {:?}",
            truncate(payload)
        ))),
        Some(ERROR_TAG) => parse_error_payload(payload).map(Some),
        _ => Err(Error::Protocol(format!(
            "unknown response marker: {:?}",
            truncate(line)
        ))),
    }
}

fn parse_error_payload(payload: &str) -> Result<ResponseEvent> {
    match literal::decode(payload)? {
        Value::Tuple(items) if items.len() == 2 => match (&items[0], &items[1]) {
            (Value::Str(kind), Value::Str(message)) => Ok(ResponseEvent::Error {
                kind: kind.clone(),
                message: message.clone(),
            }),
            _ => Err(Error::Protocol(
                "error marker fields must be strings".to_string(),
            )),
        },
        other => Err(Error::Protocol(format!(
            "error marker must carry a (kind, message) pair, got {}",
            other
        ))),
    }
}

/// Split everything read for one command into response events.
pub fn parse_response(buf: &[u8]) -> Result<Vec<ResponseEvent>> {
    let text = std::str::from_utf8(buf)
        .map_err(|e| Error::Protocol(format!("response is not valid UTF-8: {}", e)))?;

    let mut events = Vec::new();
    for line in text.split('\n') {
        if let Some(event) = parse_line(line)? {
            events.push(event);
        }
    }
    Ok(events)
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(80) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
