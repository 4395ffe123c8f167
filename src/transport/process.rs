//! Transport over a child process - its stdin/stdout carry the raw REPL.
//!
//! The child is expected to already speak the raw protocol: it executes
//! each command terminated by `\x04` and answers with the command's output
//! followed by `\x04`. Typical children are a serial bridge, an `ssh` hop to
//! a machine with the device attached, or a host build of the interpreter
//! wrapped to behave that way.

use std::io;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{Channel, StreamChannel};

/// Manages a spawned peer and the channel over its pipes.
pub struct ProcessTransport {
    child: Child,
    channel: StreamChannel<ChildStdout, ChildStdin>,
}

impl ProcessTransport {
    /// Spawn `program` with `args`; stderr is inherited for diagnostics.
    pub fn spawn<S: AsRef<str>>(program: &str, args: &[S]) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| a.as_ref()));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::transport(format!("spawning `{}`", program), e))?;
        debug!(program, pid = child.id(), "spawned transport process");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport("opening stdin", io::Error::other("stdin not piped")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("opening stdout", io::Error::other("stdout not piped")))?;

        Ok(Self {
            child,
            channel: StreamChannel::new(stdout, stdin),
        })
    }

    /// Spawn from a full command line, `[program, args..]`.
    pub fn from_command_line(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            Error::Configuration("transport command is empty".to_string())
        })?;
        Self::spawn(program, args)
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Channel for ProcessTransport {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.channel.write(data)
    }

    fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        self.channel.read_until(terminator)
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
