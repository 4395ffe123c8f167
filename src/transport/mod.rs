//! Collaborator seams: the REPL channel and the file upload primitive.
//!
//! Opening the physical link and entering the interpreter's raw mode happen
//! before a channel is handed to this crate. From here on a channel only
//! needs to move bytes: write a command, then read until the end-of-command
//! signal.

use std::io;
use std::path::Path;

pub mod process;
pub mod scripted;
pub mod stream;
pub mod upload;

pub use process::ProcessTransport;
pub use scripted::ScriptedChannel;
pub use stream::StreamChannel;
pub use upload::ChunkedUpload;

/// A connected, byte-oriented command/response link.
pub trait Channel {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read up to `terminator`, returning the bytes before it.
    fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>>;
}

/// A channel that can also place a local file on the remote filesystem.
pub trait Transport: Channel {
    fn upload(&mut self, local: &Path, remote: &str) -> io::Result<()>;
}

impl<T: Channel + ?Sized> Channel for &mut T {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        (**self).read_until(terminator)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn upload(&mut self, local: &Path, remote: &str) -> io::Result<()> {
        (**self).upload(local, remote)
    }
}

impl<T: Channel + ?Sized> Channel for Box<T> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        (**self).read_until(terminator)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn upload(&mut self, local: &Path, remote: &str) -> io::Result<()> {
        (**self).upload(local, remote)
    }
}
