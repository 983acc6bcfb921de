//! Local-filesystem volume driver.
//!
//! Blobs are placed at `<root>/<c1>/<c2c3>/<rest>` where `c1c2c3<rest>` is
//! the base32 form of the digest. The two-level fan-out keeps any one
//! directory under a few thousand entries for realistic corpora.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use varasto_types::BlobRef;

use crate::{BlobStoreError, PutReceipt, Result, VolumeDriver};

pub struct LocalFsDriver {
    /// Human-readable tag used in log lines, typically the volume UUID.
    label: String,
    root: PathBuf,
}

impl LocalFsDriver {
    pub fn new<P: AsRef<Path>>(label: &str, root: P) -> Result<LocalFsDriver> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(LocalFsDriver {
            label: label.to_string(),
            root,
        })
    }

    fn blob_path(&self, blob_ref: &BlobRef) -> PathBuf {
        let b32 = blob_ref.as_base32();
        self.root
            .join(&b32[..1])
            .join(&b32[1..3])
            .join(&b32[3..])
    }
}

impl VolumeDriver for LocalFsDriver {
    fn put(&self, blob_ref: &BlobRef, on_disk: &[u8]) -> Result<PutReceipt> {
        let receipt = PutReceipt {
            size_on_disk: on_disk.len() as i32,
            crc32: crc32fast::hash(on_disk),
        };

        let path = self.blob_path(blob_ref);

        // content-addressed, so an existing file already holds these bytes
        if path.exists() {
            return Ok(receipt);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // temp file + fsync + rename keeps the write atomic; the unique
        // temp name tolerates concurrent writers of the same blob
        let temp_name = format!(
            "{}.{}.tmp",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            std::process::id()
        );
        let temp_path = path.with_file_name(&temp_name);
        let mut file = File::create(&temp_path)?;
        file.write_all(on_disk)?;
        file.sync_all()?;

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            // a concurrent writer landed the same content first
            if path.exists() {
                return Ok(receipt);
            }
            return Err(BlobStoreError::Io(e));
        }

        debug!(volume = %self.label, blob = %blob_ref, bytes = on_disk.len(), "blob written");

        Ok(receipt)
    }

    fn get(&self, blob_ref: &BlobRef) -> Result<Vec<u8>> {
        let path = self.blob_path(blob_ref);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotOnVolume {
                    blob_ref: blob_ref.as_hex(),
                })
            }
            Err(e) => Err(BlobStoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use varasto_types::verify_digest;

    use crate::codec::encode_blob;
    use crate::BlobSeal;

    #[test]
    fn test_placement_path() {
        let driver = LocalFsDriver::new("APvMjudT4IQ", "/tmp/").unwrap();
        let blob_ref = BlobRef::from_hex(
            "d7a8fbb307d7809469ca9abcb0082e4f8d5651e46d3cdb762d02d0bf37c9e592",
        )
        .unwrap();

        assert_eq!(
            driver.blob_path(&blob_ref),
            PathBuf::from("/tmp/q/uk/fnco7qu098qeajaub021e9u6lckf4dkudmthd0b8budu9sm90")
        );
    }

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let driver = LocalFsDriver::new("vol", tmp.path()).unwrap();

        let plaintext = b"some chunk bytes".to_vec();
        let blob_ref = BlobRef::of(&plaintext);

        let receipt = driver.put(&blob_ref, &plaintext).unwrap();
        assert_eq!(receipt.size_on_disk, plaintext.len() as i32);
        assert_eq!(receipt.crc32, crc32fast::hash(&plaintext));

        let read_back = driver.get(&blob_ref).unwrap();
        assert_eq!(read_back, plaintext);
        verify_digest(&read_back, &blob_ref).unwrap();
    }

    #[test]
    fn test_put_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let driver = LocalFsDriver::new("vol", tmp.path()).unwrap();

        let bytes = b"same bytes".to_vec();
        let blob_ref = BlobRef::of(&bytes);
        let first = driver.put(&blob_ref, &bytes).unwrap();
        let second = driver.put(&blob_ref, &bytes).unwrap();
        assert_eq!(first.crc32, second.crc32);
        assert_eq!(first.size_on_disk, second.size_on_disk);
    }

    #[test]
    fn test_get_missing_is_not_on_volume() {
        let tmp = TempDir::new().unwrap();
        let driver = LocalFsDriver::new("vol", tmp.path()).unwrap();

        let absent = BlobRef::of(b"never stored");
        assert!(matches!(
            driver.get(&absent),
            Err(BlobStoreError::NotOnVolume { .. })
        ));
    }

    #[test]
    fn test_scrub_clean_blob() {
        let tmp = TempDir::new().unwrap();
        let driver = LocalFsDriver::new("vol", tmp.path()).unwrap();

        let plaintext = vec![b'z'; 32 * 1024];
        let blob_ref = BlobRef::of(&plaintext);
        let encoded = encode_blob(&plaintext).unwrap();
        let receipt = driver.put(&blob_ref, &encoded.bytes).unwrap();

        let seal = BlobSeal {
            crc32: receipt.crc32,
            is_compressed: encoded.is_compressed,
        };
        let scanned = driver.scrub(&blob_ref, &seal).unwrap();
        assert_eq!(scanned, encoded.bytes.len() as u64);
    }

    #[test]
    fn test_scrub_detects_flipped_bit() {
        let tmp = TempDir::new().unwrap();
        let driver = LocalFsDriver::new("vol", tmp.path()).unwrap();

        let plaintext = b"rot me".to_vec();
        let blob_ref = BlobRef::of(&plaintext);
        let receipt = driver.put(&blob_ref, &plaintext).unwrap();

        // flip one bit on disk behind the driver's back
        let path = driver.blob_path(&blob_ref);
        let mut on_disk = fs::read(&path).unwrap();
        on_disk[0] ^= 0x01;
        fs::write(&path, &on_disk).unwrap();

        let seal = BlobSeal {
            crc32: receipt.crc32,
            is_compressed: false,
        };
        assert!(matches!(
            driver.scrub(&blob_ref, &seal),
            Err(BlobStoreError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_scrub_detects_digest_mismatch_past_crc() {
        let tmp = TempDir::new().unwrap();
        let driver = LocalFsDriver::new("vol", tmp.path()).unwrap();

        // store the wrong plaintext under a ref, with a crc that matches
        // what is actually on disk: only the digest check can catch this
        let wrong = b"not what the ref says".to_vec();
        let blob_ref = BlobRef::of(b"the real content");
        let receipt = driver.put(&blob_ref, &wrong).unwrap();

        let seal = BlobSeal {
            crc32: receipt.crc32,
            is_compressed: false,
        };
        assert!(matches!(
            driver.scrub(&blob_ref, &seal),
            Err(BlobStoreError::DigestMismatch(_))
        ));
    }
}
