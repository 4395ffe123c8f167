//! Request/response engine.
//!
//! One host-level operation is exactly one command written to the channel
//! followed by reading everything up to the channel's "finished" signal.
//! Nothing is pipelined and nothing is read speculatively.

use std::collections::HashSet;
use std::fmt::Write as _;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::literal::Value;
use crate::rpc::protocol::{self, ResponseEvent, COMMAND_TERMINATOR};
use crate::rpc::registry::{Procedure, ProcedureKind};
use crate::rpc::signature::{dedent, remove_signature, Bound};
use crate::transport::Channel;

/// Remote helpers every procedure call depends on.
pub const PRELUDE: &str = include_str!("prelude.py");

const PRELUDE_KEY: &str = "prelude";

/// Arguments for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// `a,b,k=v` as it appears inside a call's parentheses.
    fn write_call_args(&self, out: &mut String) {
        for value in &self.positional {
            out.push(',');
            out.push_str(&value.encode());
        }
        for (name, value) in &self.keyword {
            let _ = write!(out, ",{}={}", name, value);
        }
    }
}

/// Owns the channel plus the connection-scoped record of what has already
/// been defined on the remote side.
pub struct Executor<C> {
    channel: C,
    pushed: HashSet<String>,
    next_session: u64,
}

impl<C: Channel> Executor<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            pushed: HashSet::new(),
            next_session: 1,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Write one command and collect every response event it produced.
    pub fn round_trip(&mut self, command: &str) -> Result<Vec<ResponseEvent>> {
        debug!(command = %first_line(command), len = command.len(), "sending command");

        let mut frame = Vec::with_capacity(command.len() + COMMAND_TERMINATOR.len());
        frame.extend_from_slice(command.as_bytes());
        frame.extend_from_slice(COMMAND_TERMINATOR);
        self.channel
            .write(&frame)
            .map_err(|e| Error::transport(format!("sending `{}`", first_line(command)), e))?;

        let raw = self
            .channel
            .read_until(COMMAND_TERMINATOR)
            .map_err(|e| Error::transport(format!("awaiting reply to `{}`", first_line(command)), e))?;
        trace!(response = %String::from_utf8_lossy(&raw), "received");

        protocol::parse_response(&raw)
    }

    /// Run raw statements. Yields the value if the code itself printed a return marker.
    pub fn exec(&mut self, code: &str) -> Result<Option<Value>> {
        let events = self.round_trip(code)?;
        single_value(events, "<exec>")
    }

    /// Evaluate an expression remotely and decode its value.
    pub fn eval(&mut self, expr: &str) -> Result<Value> {
        self.ensure_prelude()?;
        let command = format!("__replink_eval({})", Value::from(expr));
        let events = self.round_trip(&command)?;
        single_value(events, "<eval>")?.ok_or_else(|| {
            Error::Protocol(format!("no value returned for expression `{}`", first_line(expr)))
        })
    }

    /// Execute `code` once per connection, keyed by `key`.
    pub fn ensure_pushed(&mut self, key: &str, code: &str) -> Result<()> {
        if self.pushed.contains(key) {
            return Ok(());
        }
        debug!(key, "defining on remote");
        match self.exec(code)? {
            None => {}
            Some(v) => warn!(key, value = %v, "definition unexpectedly returned a value"),
        }
        self.pushed.insert(key.to_string());
        Ok(())
    }

    pub fn ensure_prelude(&mut self) -> Result<()> {
        self.ensure_pushed(PRELUDE_KEY, PRELUDE)
    }

    fn ensure_defined(&mut self, procedure: &Procedure) -> Result<()> {
        self.ensure_prelude()?;
        if procedure.kind == ProcedureKind::Setup {
            // setup bodies run at global scope on every call; nothing to define
            return Ok(());
        }
        self.ensure_pushed(&format!("proc:{}", procedure.name), &procedure.body)
    }

    /// Invoke a procedure and return its value.
    ///
    /// Setup procedures run their body at the remote global scope after
    /// assigning each parameter as a global, and return `None`.
    pub fn call(&mut self, procedure: &Procedure, args: &Args) -> Result<Value> {
        let bound = procedure.signature.bind(args)?;
        self.ensure_defined(procedure)?;

        let command = match procedure.kind {
            ProcedureKind::Setup => setup_command(procedure, &bound)?,
            ProcedureKind::Task | ProcedureKind::Teardown => {
                let mut command = format!("__replink_call({}", procedure.name);
                args.write_call_args(&mut command);
                command.push(')');
                command
            }
        };

        let events = self.round_trip(&command)?;
        match single_value(events, &procedure.name)? {
            Some(v) => Ok(v),
            None if procedure.kind == ProcedureKind::Setup => Ok(Value::None),
            None => Err(Error::Protocol(format!(
                "'{}' finished without a return marker",
                procedure.name
            ))),
        }
    }

    /// Start a generator procedure and advance it to its first value.
    pub fn open_session(&mut self, procedure: &Procedure, args: &Args) -> Result<Session<'_, C>> {
        if procedure.kind != ProcedureKind::Task {
            return Err(Error::Configuration(format!(
                "'{}' is not a task; only tasks can be resumed",
                procedure.name
            )));
        }
        procedure.signature.bind(args)?;
        self.ensure_defined(procedure)?;

        let id = self.next_session;
        self.next_session += 1;

        let mut command = format!("__replink_open({},{}", id, procedure.name);
        args.write_call_args(&mut command);
        command.push(')');

        let mut session = Session {
            executor: self,
            procedure: procedure.name.clone(),
            id,
            status: SessionStatus::Created,
            last_sent: None,
            current: None,
            first_taken: false,
        };
        session.step(&command)?;
        Ok(session)
    }
}

fn setup_command(procedure: &Procedure, bound: &[(String, Bound)]) -> Result<String> {
    let mut command = String::new();
    for (name, value) in bound {
        match value {
            Bound::Value(v) => {
                let _ = writeln!(command, "{}={}", name, v);
            }
            Bound::Default(expr) => {
                let _ = writeln!(command, "{}={}", name, expr);
            }
        }
    }
    let (body, _) = remove_signature(&procedure.body, &procedure.name)?;
    let _ = write!(command, "__replink_exec({})", Value::from(dedent(&body)));
    Ok(command)
}

/// At most one terminal event is allowed per command.
fn single_value(events: Vec<ResponseEvent>, procedure: &str) -> Result<Option<Value>> {
    let mut events = events.into_iter();
    let first = events.next();
    if let Some(extra) = events.next() {
        return Err(Error::Protocol(format!(
            "'{}' produced more than one response (extra: {})",
            procedure,
            extra.to_line()
        )));
    }
    match first {
        None => Ok(None),
        Some(ResponseEvent::Return(v)) => Ok(Some(v)),
        Some(ResponseEvent::Error { kind, message }) => Err(Error::Remote {
            procedure: procedure.to_string(),
            kind,
            message,
        }),
        Some(ResponseEvent::StopIteration) => Err(Error::Protocol(format!(
            "'{}' signalled end of iteration outside a session",
            procedure
        ))),
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Remote generator not yet advanced.
    Created,
    /// Waiting at a `yield`.
    Suspended,
    Exhausted,
}

/// A remote generator driven one round trip at a time.
///
/// Each [`resume`](Session::resume) sends a value into the suspended
/// generator and returns whatever it yields next. Once the remote side
/// signals the end, further resumes return `None` without touching the wire.
pub struct Session<'a, C: Channel> {
    executor: &'a mut Executor<C>,
    procedure: String,
    id: u64,
    status: SessionStatus,
    last_sent: Option<Value>,
    current: Option<Value>,
    first_taken: bool,
}

impl<'a, C: Channel> Session<'a, C> {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// The most recently yielded value.
    pub fn value(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    pub fn last_sent(&self) -> Option<&Value> {
        self.last_sent.as_ref()
    }

    /// Send `value` to the generator and return the next yielded value,
    /// or `None` once the generator has finished.
    pub fn resume(&mut self, value: impl Into<Value>) -> Result<Option<Value>> {
        if self.status == SessionStatus::Exhausted {
            return Ok(None);
        }
        let value = value.into();
        let command = format!("__replink_send({},{})", self.id, value);
        self.last_sent = Some(value);
        // the value yielded at open is now behind us
        self.first_taken = true;
        self.step(&command)?;
        Ok(self.current.clone())
    }

    fn step(&mut self, command: &str) -> Result<()> {
        let outcome = self
            .executor
            .round_trip(command)
            .and_then(|events| self.apply(events));
        if let Err(err) = &outcome {
            debug!(procedure = %self.procedure, error = %err, "session aborted");
            // the remote side drops its generator on error; a dead transport gets no more traffic
            if matches!(err, Error::Protocol(_) | Error::Decode { .. }) {
                self.close();
            }
            self.status = SessionStatus::Exhausted;
            self.current = None;
        }
        outcome
    }

    fn apply(&mut self, events: Vec<ResponseEvent>) -> Result<()> {
        let mut events = events.into_iter();
        let event = events.next().ok_or_else(|| {
            Error::Protocol(format!("'{}' step produced no response", self.procedure))
        })?;
        if let Some(extra) = events.next() {
            return Err(Error::Protocol(format!(
                "'{}' step produced more than one response (extra: {})",
                self.procedure,
                extra.to_line()
            )));
        }
        match event {
            ResponseEvent::Return(v) => {
                self.status = SessionStatus::Suspended;
                self.current = Some(v);
                Ok(())
            }
            ResponseEvent::StopIteration => {
                self.status = SessionStatus::Exhausted;
                self.current = None;
                Ok(())
            }
            ResponseEvent::Error { kind, message } => Err(Error::Remote {
                procedure: self.procedure.clone(),
                kind,
                message,
            }),
        }
    }

    /// Tell the remote side the generator is abandoned. Idempotent; errors are logged.
    pub fn close(&mut self) {
        if self.status == SessionStatus::Exhausted {
            return;
        }
        self.status = SessionStatus::Exhausted;
        self.current = None;
        let command = format!("__replink_close({})", self.id);
        if let Err(err) = self.executor.round_trip(&command) {
            warn!(procedure = %self.procedure, error = %err, "failed to close session");
        }
    }
}

impl<C: Channel> Iterator for Session<'_, C> {
    type Item = Result<Value>;

    /// Yields the first value, then keeps resuming with `None`.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.first_taken {
            self.first_taken = true;
            if let Some(v) = self.current.clone() {
                return Some(Ok(v));
            }
        }
        self.resume(Value::None).transpose()
    }
}

impl<C: Channel> Drop for Session<'_, C> {
    fn drop(&mut self) {
        self.close();
    }
}
