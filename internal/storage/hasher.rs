use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

/// Incremental SHA-256 over a byte stream fed chunk by chunk.
pub struct StreamHasher {
    inner: Sha256,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        self.inner.finalize().into()
    }
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn compute(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = StreamHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Digest a stream without materializing it. Dropping the future
/// between reads abandons the computation cleanly.
pub async fn compute_stream<S, E>(mut stream: S) -> Result<[u8; DIGEST_LEN], E>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    let mut hasher = StreamHasher::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(hasher.finalize())
}

pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}
