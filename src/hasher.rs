//! Content digests used as object keys and dedup keys.
//!
//! SHA-1 is the identity of a resource. MD5 is computed alongside it for
//! catalogs that still carry the legacy digest.

use std::path::Path;

use md5::Context;
use sha1::{Digest, Sha1};
use tokio::{fs::File, io::AsyncReadExt};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digests and size of one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// 40 char lowercase hex.
    pub sha1: String,
    /// 32 char lowercase hex, only when requested.
    pub md5: Option<String>,
    pub size: u64,
}

/// Streaming hasher computing SHA-1 and, optionally, MD5 in one pass.
pub struct ContentHasher {
    sha1: Sha1,
    md5: Option<Context>,
    size: u64,
}

impl ContentHasher {
    pub fn new(with_md5: bool) -> Self {
        Self {
            sha1: Sha1::new(),
            md5: with_md5.then(Context::new),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        if let Some(md5) = self.md5.as_mut() {
            md5.consume(data);
        }
        self.size += data.len() as u64;
    }

    pub fn finish(self) -> ContentDigest {
        ContentDigest {
            sha1: hex::encode(self.sha1.finalize()),
            md5: self.md5.map(|ctx| format!("{:x}", ctx.compute())),
            size: self.size,
        }
    }
}

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8], with_md5: bool) -> ContentDigest {
    let mut hasher = ContentHasher::new(with_md5);
    hasher.update(data);
    hasher.finish()
}

/// Hash a file in fixed-size chunks.
pub async fn hash_file(path: &Path, with_md5: bool) -> std::io::Result<ContentDigest> {
    let mut file = File::open(path).await?;
    let mut hasher = ContentHasher::new(with_md5);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finish())
}

/// True for a 40 char lowercase hex string.
pub fn is_sha1_hex(value: &str) -> bool {
    value.len() == 40 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
