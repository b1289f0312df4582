use sha2::{Digest, Sha256};

/// Hex-encoded `SHA-256` digest of a byte stream.
pub type ContentHash = String;

/// Incremental `SHA-256` hasher fed chunk by chunk while a payload streams.
///
/// The digest depends only on the concatenated bytes, never on how they were
/// split into chunks.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Consume the hasher and return the lowercase hex digest.
    pub fn finalize(self) -> ContentHash {
        hex::encode(self.inner.finalize())
    }
}

/// Hash a complete buffer.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize()
}
