//! Fast, non-cryptographic content hashing used for change detection.
//!
//! Distinct from the SHA-256 the analyzer computes over the whole file
//! (see `vigil-analyzer`): this hash only needs to detect that content
//! changed, not resist deliberate collision.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{VigilError, VigilResult};

/// Files at or under this size are hashed in full.
pub const WHOLE_FILE_THRESHOLD: u64 = 2 * 1024 * 1024;
/// Head/tail segment size used for files above the threshold.
pub const SEGMENT_SIZE: u64 = 1024 * 1024;

fn blake3_u64(data: &[u8]) -> u64 {
    let digest = blake3::hash(data);
    let bytes = digest.as_bytes();
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Hash bytes already resident in memory.
pub fn hash_bytes(data: &[u8]) -> u64 {
    blake3_u64(data)
}

/// Hash a file on disk per the head/tail sampling rule for large files.
pub fn hash_file(path: &Path) -> VigilResult<u64> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| VigilError::PathUnavailable(format!("{}: {e}", path.display())))?;
    let len = file
        .metadata()
        .map_err(|e| VigilError::PathUnavailable(format!("{}: {e}", path.display())))?
        .len();

    if len <= WHOLE_FILE_THRESHOLD {
        let mut buf = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| VigilError::PathUnavailable(format!("{}: {e}", path.display())))?;
        return Ok(blake3_u64(&buf));
    }

    let mut head = vec![0u8; SEGMENT_SIZE as usize];
    file.read_exact(&mut head)
        .map_err(|e| VigilError::PathUnavailable(format!("{}: {e}", path.display())))?;

    file.seek(SeekFrom::End(-(SEGMENT_SIZE as i64)))
        .map_err(|e| VigilError::PathUnavailable(format!("{}: {e}", path.display())))?;
    let mut tail = vec![0u8; SEGMENT_SIZE as usize];
    file.read_exact(&mut tail)
        .map_err(|e| VigilError::PathUnavailable(format!("{}: {e}", path.display())))?;

    head.extend_from_slice(&tail);
    Ok(blake3_u64(&head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn same_bytes_hash_equal() {
        let a = hash_bytes(b"hello world");
        let b = hash_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_hash_differ() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn small_file_hashes_whole_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, b"small file content").unwrap();

        let from_disk = hash_file(&path).unwrap();
        let from_memory = hash_bytes(b"small file content");
        assert_eq!(from_disk, from_memory);
    }

    #[test]
    fn large_file_uses_head_and_tail_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let mut f = std::fs::File::create(&path).unwrap();

        let head = vec![0xAAu8; SEGMENT_SIZE as usize];
        let middle = vec![0xBBu8; 512 * 1024];
        let tail = vec![0xCCu8; SEGMENT_SIZE as usize];
        f.write_all(&head).unwrap();
        f.write_all(&middle).unwrap();
        f.write_all(&tail).unwrap();
        drop(f);

        let mut expected = head.clone();
        expected.extend_from_slice(&tail);

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&expected));
    }

    #[test]
    fn touching_middle_of_large_file_does_not_change_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let head = vec![0xAAu8; SEGMENT_SIZE as usize];
        let tail = vec![0xCCu8; SEGMENT_SIZE as usize];

        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&head).unwrap();
        f.write_all(&vec![0xBBu8; 512 * 1024]).unwrap();
        f.write_all(&tail).unwrap();
        drop(f);
        let before = hash_file(&path).unwrap();

        let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(SEGMENT_SIZE + 10)).unwrap();
        f.write_all(b"changed").unwrap();
        drop(f);
        let after = hash_file(&path).unwrap();

        assert_eq!(before, after);
    }
}
