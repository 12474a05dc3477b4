//! Streaming content hashing for ingest.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StreamedFile {
    pub sha256: String,
    pub byte_size: i64,
}

/// Copy `reader` into `dest` while computing a SHA-256 digest and byte
/// count. The file is never buffered whole in memory.
pub fn stream_to_file(reader: &mut dyn Read, dest: &Path) -> Result<StreamedFile> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(dest)?;
    let mut writer = BufWriter::new(file);

    let mut hasher = Sha256::new();
    let mut total: i64 = 0;
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
        total += n as i64;
    }
    writer.flush()?;

    Ok(StreamedFile {
        sha256: format!("{:x}", hasher.finalize()),
        byte_size: total,
    })
}
