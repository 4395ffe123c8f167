//! In-memory channel that answers commands from a script.
//!
//! Used by the test suites and handy for exercising higher layers without a
//! device: every command is recorded, and the reply is chosen by the first
//! matching prefix rule, falling back to a responder closure.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use crate::rpc::protocol::COMMAND_TERMINATOR;
use crate::transport::{Channel, Transport};

type Responder = Box<dyn FnMut(&str) -> String>;

struct Rule {
    prefix: String,
    replies: VecDeque<String>,
    /// Static rules keep answering; sequences run dry and fall through.
    repeat: bool,
}

pub struct ScriptedChannel {
    responder: Responder,
    rules: Vec<Rule>,
    sent: Vec<String>,
    pending: Option<String>,
    uploads: Vec<(PathBuf, String)>,
    failing_uploads: Vec<String>,
}

impl ScriptedChannel {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> String + 'static,
    {
        Self {
            responder: Box::new(responder),
            rules: Vec::new(),
            sent: Vec::new(),
            pending: None,
            uploads: Vec::new(),
            failing_uploads: Vec::new(),
        }
    }

    /// Answers every command with no output.
    pub fn silent() -> Self {
        Self::new(|_| String::new())
    }

    /// Always answer commands starting with `prefix` with `reply`.
    pub fn respond_to(&mut self, prefix: &str, reply: &str) -> &mut Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            replies: VecDeque::from([reply.to_string()]),
            repeat: true,
        });
        self
    }

    /// Answer successive commands starting with `prefix` with `replies`, in order.
    pub fn respond_sequence(&mut self, prefix: &str, replies: &[&str]) -> &mut Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            replies: replies.iter().map(|r| r.to_string()).collect(),
            repeat: false,
        });
        self
    }

    /// Make uploads to `remote` fail with an I/O error.
    pub fn fail_upload_to(&mut self, remote: &str) -> &mut Self {
        self.failing_uploads.push(remote.to_string());
        self
    }

    /// Commands written so far, without terminators.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    pub fn uploads(&self) -> &[(PathBuf, String)] {
        &self.uploads
    }

    fn reply_for(&mut self, command: &str) -> String {
        for rule in &mut self.rules {
            if !command.starts_with(&rule.prefix) {
                continue;
            }
            if rule.repeat {
                if let Some(reply) = rule.replies.front() {
                    return reply.clone();
                }
            } else if let Some(reply) = rule.replies.pop_front() {
                return reply;
            }
        }
        (self.responder)(command)
    }
}

impl Channel for ScriptedChannel {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let data = data.strip_suffix(COMMAND_TERMINATOR).unwrap_or(data);
        let command = String::from_utf8_lossy(data).into_owned();
        let reply = self.reply_for(&command);
        self.sent.push(command);
        self.pending = Some(reply);
        Ok(())
    }

    fn read_until(&mut self, _terminator: &[u8]) -> io::Result<Vec<u8>> {
        self.pending
            .take()
            .map(String::into_bytes)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no command pending"))
    }
}

impl Transport for ScriptedChannel {
    fn upload(&mut self, local: &Path, remote: &str) -> io::Result<()> {
        if self.failing_uploads.iter().any(|r| r == remote) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("link dropped while writing {}", remote),
            ));
        }
        self.uploads.push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }
}
