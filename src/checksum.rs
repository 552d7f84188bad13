//! Checksums captured opportunistically by copy/move (§3).

use std::path::PathBuf;
use std::time::SystemTime;

use md5::{Digest, Md5};

/// An MD5 checksum of a file's content at a point in time, along with
/// the metadata needed to notice if the file has changed since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub path: PathBuf,
    pub md5: String,
    pub size: u64,
    pub modtime: SystemTime,
    pub taken_at: SystemTime,
}

impl ChecksumRecord {
    pub fn compute(path: PathBuf, content: &[u8], size: u64, modtime: SystemTime) -> Self {
        let mut hasher = Md5::new();
        hasher.update(content);
        let md5 = format!("{:x}", hasher.finalize());
        Self { path, md5, size, modtime, taken_at: SystemTime::now() }
    }

    /// Verify `content` still hashes to this record's digest.
    pub fn verify(&self, content: &[u8]) -> Result<(), crate::error::Error> {
        let mut hasher = Md5::new();
        hasher.update(content);
        let actual = format!("{:x}", hasher.finalize());
        if actual == self.md5 {
            Ok(())
        } else {
            Err(crate::error::Error::ChecksumMismatch {
                path: self.path.clone(),
                expected: self.md5.clone(),
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_and_verify_roundtrip() {
        let now = SystemTime::now();
        let record = ChecksumRecord::compute(PathBuf::from("a.txt"), b"hello", 5, now);
        assert!(record.verify(b"hello").is_ok());
        assert!(record.verify(b"world").is_err());
    }
}
