//! Content checksums for deduplication.
//!
//! Archives are identified by the SHA256 of the uncompressed tar stream, so
//! the same content deduplicates regardless of the configured compression.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read size used while hashing.
pub const CHECKSUM_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Calculates the SHA256 checksum of a file, reading it in fixed-size chunks.
pub fn calculate_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHECKSUM_CHUNK_SIZE];

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    let checksum = format!("{:x}", hasher.finalize());
    tracing::debug!("{} sha256 checksum: {}", path.display(), checksum);
    Ok(checksum)
}
