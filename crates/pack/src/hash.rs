//! Streaming SHA-256 helpers.
//!
//! Payload entries are addressed by the SHA-256 of their encoded bytes. The
//! digest is always rendered as lowercase hex, which is also the form stored
//! in the manifest and embedded in payload entry names.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Block size used when streaming data through the hasher.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 of everything `reader` yields until EOF.
///
/// Reads in [`BLOCK_SIZE`] chunks so arbitrarily large payloads hash in
/// constant memory.
///
/// # Errors
///
/// Returns any error produced by the underlying reader.
pub fn sha256_hex<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; BLOCK_SIZE];

    loop {
        let n = reader.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
