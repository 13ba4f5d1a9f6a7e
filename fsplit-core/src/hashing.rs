//! Streaming SHA-256 helpers shared by the splitter, verifier and merger.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Length of a hex-encoded SHA-256 digest.
pub const HEX_DIGEST_LEN: usize = 64;

/// Incremental SHA-256 accumulator that also counts bytes fed through it.
#[derive(Clone, Default)]
pub struct RollingHash {
    inner: Sha256,
    bytes: u64,
}

impl RollingHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consume the accumulator and return the lowercase hex digest.
    pub fn finish_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Hash everything `reader` yields, `buf_size` bytes at a time.
/// `on_chunk` sees every chunk after it is hashed and may abort the pass.
pub fn hash_reader<R, F, E>(
    mut reader: R,
    buf_size: usize,
    mut on_chunk: F,
) -> Result<(String, u64), E>
where
    R: Read,
    F: FnMut(&[u8]) -> Result<(), E>,
    E: From<io::Error>,
{
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut h = RollingHash::new();
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        h.update(&buf[..n]);
        on_chunk(&buf[..n])?;
    }
    let bytes = h.bytes();
    Ok((h.finish_hex(), bytes))
}

/// Hex digest of an in-memory slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// True for exactly 64 lowercase hex characters.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == HEX_DIGEST_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
