/*
 * SHA-256 checksums of files, used to verify that exported files are
 * byte-identical to their sources.
 */
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/* Hex-encoded SHA-256 of a file's contents, read in 64 KiB chunks. */
pub fn calculate_sha256_checksum(file_path: &Path) -> io::Result<String> {
    if !file_path.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Path {file_path:?} is not a file, cannot calculate checksum."),
        ));
    }

    let mut reader = BufReader::new(File::open(file_path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let checksum = format!("{:x}", hasher.finalize());
    log::trace!("ChecksumUtils: {checksum} for {file_path:?}");
    Ok(checksum)
}

/* True if both files exist and have the same SHA-256. */
pub fn files_match(source: &Path, copy: &Path) -> io::Result<bool> {
    Ok(calculate_sha256_checksum(source)? == calculate_sha256_checksum(copy)?)
}
