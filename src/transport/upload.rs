//! File upload spoken over the REPL itself.
//!
//! Wraps any [`Channel`] and gives it a [`Transport::upload`] by writing the
//! file through a remote file handle, one byte-literal chunk per command.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;

use crate::literal::Value;
use crate::rpc::protocol::COMMAND_TERMINATOR;
use crate::transport::{Channel, Transport};

/// Raw bytes per write command; escaping can grow a chunk up to 4x on the wire.
pub const UPLOAD_CHUNK_SIZE: usize = 512;

pub struct ChunkedUpload<C> {
    inner: C,
    chunk_size: usize,
}

impl<C: Channel> ChunkedUpload<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            chunk_size: UPLOAD_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Run one command that must print nothing.
    fn run(&mut self, command: &str, remote: &str) -> io::Result<()> {
        let mut frame = command.as_bytes().to_vec();
        frame.extend_from_slice(COMMAND_TERMINATOR);
        self.inner.write(&frame)?;
        let output = self.inner.read_until(COMMAND_TERMINATOR)?;
        let output = String::from_utf8_lossy(&output);
        if output.trim().is_empty() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "remote write to {} failed: {}",
                remote,
                output.trim()
            )))
        }
    }

    fn write_chunks(&mut self, file: &mut File, remote: &str) -> io::Result<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            let command = format!("__replink_f.write({})", Value::bytes(&buf[..n]));
            self.run(&command, remote)?;
            total += n as u64;
        }
    }
}

impl<C: Channel> Channel for ChunkedUpload<C> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write(data)
    }

    fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        self.inner.read_until(terminator)
    }
}

impl<C: Channel> Transport for ChunkedUpload<C> {
    fn upload(&mut self, local: &Path, remote: &str) -> io::Result<()> {
        let mut file = File::open(local)?;
        self.run(
            &format!("__replink_f=open({},'wb')", Value::from(remote)),
            remote,
        )?;

        let written = self.write_chunks(&mut file, remote);
        // always release the remote handle, even after a failed chunk
        let closed = self.run("__replink_f.close()", remote);
        let written = written?;
        closed?;

        debug!(local = %local.display(), remote, bytes = written, "uploaded");
        Ok(())
    }
}
