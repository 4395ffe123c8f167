//! Channel over any blocking reader/writer pair (serial device, pipes).

use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};

use crate::transport::Channel;

/// Maximum bytes buffered while waiting for a terminator.
/// Guards against a peer that never finishes a response.
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

pub struct StreamChannel<R, W> {
    reader: R,
    writer: W,
    buf: BytesMut,
}

impl<R: Read, W: Write> StreamChannel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Bytes read past the last terminator and not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> Channel for StreamChannel<R, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        if terminator.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty terminator",
            ));
        }
        let mut searched = 0;
        loop {
            if let Some(at) = find(&self.buf[searched..], terminator) {
                let out = self.buf.split_to(searched + at);
                self.buf.advance(terminator.len());
                return Ok(out.to_vec());
            }
            // a terminator may straddle two reads
            searched = self.buf.len().saturating_sub(terminator.len() - 1);

            if self.buf.len() > MAX_RESPONSE_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("response exceeds {} bytes without terminator", MAX_RESPONSE_SIZE),
                ));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.reader.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed before end of response",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out data in fixed-size pieces to exercise split terminators.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let end = (self.pos + self.step).min(self.data.len()).min(self.pos + buf.len());
            let n = end - self.pos;
            buf[..n].copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(n)
        }
    }

    #[test]
    fn test_read_until_splits_responses() {
        let reader = Cursor::new(b"_REPLINKR1\r\n\x04_REPLINKR2\r\n\x04".to_vec());
        let mut channel = StreamChannel::new(reader, Vec::new());
        assert_eq!(channel.read_until(b"\x04").unwrap(), b"_REPLINKR1\r\n");
        assert_eq!(channel.read_until(b"\x04").unwrap(), b"_REPLINKR2\r\n");
        assert!(channel.buffered().is_empty());
    }

    #[test]
    fn test_multi_byte_terminator_across_reads() {
        let reader = Trickle {
            data: b"abc>>>def>>>".to_vec(),
            pos: 0,
            step: 2,
        };
        let mut channel = StreamChannel::new(reader, Vec::new());
        assert_eq!(channel.read_until(b">>>").unwrap(), b"abc");
        assert_eq!(channel.read_until(b">>>").unwrap(), b"def");
    }

    #[test]
    fn test_eof_before_terminator() {
        let mut channel = StreamChannel::new(Cursor::new(b"partial".to_vec()), Vec::new());
        let err = channel.read_until(b"\x04").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_write_flushes_to_writer() {
        let mut channel = StreamChannel::new(Cursor::new(Vec::new()), Vec::new());
        channel.write(b"x=1\x04").unwrap();
        let (_, written) = channel.into_inner();
        assert_eq!(written, b"x=1\x04");
    }
}
