//! 32-bit FNV-1a, the content hash shared by host and device.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::hash::Hasher;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
pub const FNV_PRIME: u32 = 0x0100_0193;

/// Read size used for local files; the remote side reads in 512-byte blocks.
pub const HASH_BUFFER_SIZE: usize = 4096;

/// Reference byte-at-a-time implementation.
pub fn fnv1a(data: &[u8]) -> u32 {
    let mut h = FNV_OFFSET_BASIS;
    for &b in data {
        h ^= b as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Incremental FNV-1a. Must agree with [`fnv1a`] for every input and split.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a(u32);

impl Fnv1a {
    pub fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut h = self.0;
        let mut chunks = data.chunks_exact(8);
        for chunk in &mut chunks {
            for &b in chunk {
                h = (h ^ b as u32).wrapping_mul(FNV_PRIME);
            }
        }
        for &b in chunks.remainder() {
            h = (h ^ b as u32).wrapping_mul(FNV_PRIME);
        }
        self.0 = h;
    }

    pub fn finish32(&self) -> u32 {
        self.0
    }
}

impl Default for Fnv1a {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }

    fn finish(&self) -> u64 {
        self.0 as u64
    }
}

pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<u32> {
    let mut hasher = Fnv1a::new();
    let mut buf = [0u8; HASH_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(hasher.finish32()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
}

pub fn hash_file(path: &Path) -> Result<u32> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    hash_reader(file).map_err(|e| Error::io(path, e))
}

/// How the device computes its side of the comparison.
///
/// All three produce identical values; they differ only in which code
/// emitter the remote interpreter uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashStrategy {
    Plain,
    Native,
    #[default]
    Viper,
}

impl HashStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashStrategy::Plain => "plain",
            HashStrategy::Native => "native",
            HashStrategy::Viper => "viper",
        }
    }
}

impl fmt::Display for HashStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(HashStrategy::Plain),
            "native" => Ok(HashStrategy::Native),
            "viper" => Ok(HashStrategy::Viper),
            other => Err(Error::Configuration(format!(
                "unknown hash strategy '{}' (expected plain, native or viper)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_known_values() {
        assert_eq!(fnv1a(b""), 0x811c9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c292c);
        assert_eq!(fnv1a(b"fooba"), 0x39aaa18a);
        assert_eq!(fnv1a(b"foobar"), 0xbf9cf968);
        assert_eq!(fnv1a(b"hello world"), 0xd58b3fa7);
    }

    #[test]
    fn test_hash_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bar.py");
        std::fs::write(&path, "bar contents").unwrap();
        assert_eq!(hash_file(&path).unwrap(), 0x97125654);
    }

    #[test]
    fn test_hash_missing_file() {
        let err = hash_file(Path::new("/nonexistent/replink.py")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_large_input_spans_buffers() {
        let data: Vec<u8> = (0..HASH_BUFFER_SIZE * 3 + 17).map(|i| i as u8).collect();
        assert_eq!(hash_reader(Cursor::new(&data)).unwrap(), fnv1a(&data));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("viper".parse::<HashStrategy>().unwrap(), HashStrategy::Viper);
        assert_eq!(HashStrategy::default(), HashStrategy::Viper);
        assert!("fast".parse::<HashStrategy>().is_err());
    }

    proptest! {
        #[test]
        fn incremental_matches_reference(data in proptest::collection::vec(any::<u8>(), 0..512), split in 0usize..512) {
            let split = split.min(data.len());
            let mut hasher = Fnv1a::new();
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            prop_assert_eq!(hasher.finish32(), fnv1a(&data));
        }
    }
}
