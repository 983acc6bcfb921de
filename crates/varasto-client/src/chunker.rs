//! Fixed-size chunking.
//!
//! Files are split at 4 MiB boundaries. Each chunk's SHA-256 is its
//! [`BlobRef`], and the same bytes feed a running digest over the whole
//! file. Changing the chunk size is a protocol-breaking change.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use varasto_types::{BlobRef, File};

use crate::Result;

pub const BLOB_SIZE: usize = 4 * 1024 * 1024;

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads the file once, producing its [`File`] record: per-chunk refs, the
/// whole-file digest, sizes and timestamps. A file whose size is an exact
/// multiple of the chunk size gets no trailing zero-length chunk.
pub fn analyze_file(absolute_path: &Path, relative_path: &str) -> Result<File> {
    let metadata = fs::metadata(absolute_path)?;
    let modified: SystemTime = metadata.modified()?;
    // birth time where the filesystem has one, else modification time
    let created = metadata.created().unwrap_or(modified);

    let mut file = fs::File::open(absolute_path)?;
    let mut full_digest = Sha256::new();
    let mut blob_refs = Vec::new();
    let mut buf = vec![0u8; BLOB_SIZE];

    loop {
        let n = read_up_to(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        full_digest.update(&buf[..n]);
        blob_refs.push(BlobRef::of(&buf[..n]));
        if n < BLOB_SIZE {
            break;
        }
    }

    Ok(File {
        path: relative_path.to_string(),
        sha256: hex::encode(full_digest.finalize()),
        created: DateTime::<Utc>::from(created),
        modified: DateTime::<Utc>::from(modified),
        size: metadata.len() as i64,
        blob_refs,
    })
}

/// Re-reads chunk `index` of the file, for uploading.
pub fn read_chunk(path: &Path, index: usize) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    file.seek(SeekFrom::Start((index * BLOB_SIZE) as u64))?;
    let mut buf = vec![0u8; BLOB_SIZE];
    let n = read_up_to(&mut file, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_small_file_is_one_chunk() {
        let tmp = TempDir::new().unwrap();
        let content = b"hello varasto".to_vec();
        let path = write_file(&tmp, "small.txt", &content);

        let file = analyze_file(&path, "small.txt").unwrap();
        assert_eq!(file.size, content.len() as i64);
        assert_eq!(file.blob_refs, vec![BlobRef::of(&content)]);
        assert_eq!(file.sha256, BlobRef::of(&content).as_hex());
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_empty_chunk() {
        let tmp = TempDir::new().unwrap();
        let content = vec![0u8; 2 * BLOB_SIZE];
        let path = write_file(&tmp, "exact.bin", &content);

        let file = analyze_file(&path, "exact.bin").unwrap();
        assert_eq!(file.blob_refs.len(), 2);
        assert_eq!(file.blob_refs[0], BlobRef::of(&content[..BLOB_SIZE]));
        assert_eq!(file.blob_refs[1], BlobRef::of(&content[BLOB_SIZE..]));
    }

    #[test]
    fn test_one_byte_over_boundary_gets_third_chunk() {
        let tmp = TempDir::new().unwrap();
        let mut content = vec![7u8; 2 * BLOB_SIZE];
        content.push(42);
        let path = write_file(&tmp, "over.bin", &content);

        let file = analyze_file(&path, "over.bin").unwrap();
        assert_eq!(file.blob_refs.len(), 3);
        assert_eq!(file.blob_refs[2], BlobRef::of(&[42]));
        assert_eq!(file.size, (2 * BLOB_SIZE + 1) as i64);
    }

    #[test]
    fn test_whole_file_digest_spans_chunks() {
        let tmp = TempDir::new().unwrap();
        let content: Vec<u8> = (0..(BLOB_SIZE + 1000)).map(|i| (i % 251) as u8).collect();
        let path = write_file(&tmp, "spans.bin", &content);

        let file = analyze_file(&path, "spans.bin").unwrap();
        assert_eq!(file.blob_refs.len(), 2);
        assert_eq!(file.sha256, BlobRef::of(&content).as_hex());
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "empty", b"");

        let file = analyze_file(&path, "empty").unwrap();
        assert!(file.blob_refs.is_empty());
        assert_eq!(file.size, 0);
    }

    #[test]
    fn test_read_chunk_matches_analysis() {
        let tmp = TempDir::new().unwrap();
        let mut content = vec![1u8; BLOB_SIZE];
        content.extend_from_slice(b"tail bytes");
        let path = write_file(&tmp, "chunks.bin", &content);

        let file = analyze_file(&path, "chunks.bin").unwrap();
        for (i, blob_ref) in file.blob_refs.iter().enumerate() {
            let chunk = read_chunk(&path, i).unwrap();
            assert_eq!(&BlobRef::of(&chunk), blob_ref);
        }
    }
}
