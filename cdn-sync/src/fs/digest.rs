//! Content digests.
//!
//! MD5 in lowercase hex, the format the existing manifests were written with
//! and the ETag COS reports for single-part uploads.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 64 * 1024;

/// Stream a file through MD5.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Digest of an in-memory body.
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
