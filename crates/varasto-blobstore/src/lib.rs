//! # varasto-blobstore
//!
//! Storage backends for blob bytes.
//!
//! A [`VolumeDriver`] places, reads and scrubs encoded blobs addressed by
//! their [`BlobRef`]. The codec (compression decision, CRC seal) lives
//! above the drivers so every backend stores identical bytes for a given
//! blob.

pub mod codec;
mod localfs;

pub use codec::{decode_blob, encode_blob, EncodedBlob};
pub use localfs::LocalFsDriver;

use std::io;

use thiserror::Error;

use varasto_types::{verify_digest, BlobDigestMismatch, BlobRef};

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob {blob_ref} not on volume")]
    NotOnVolume { blob_ref: String },

    #[error(transparent)]
    DigestMismatch(#[from] BlobDigestMismatch),

    #[error("blob {blob_ref}: crc32 mismatch; expected={expected:08x} got={actual:08x}")]
    CrcMismatch {
        blob_ref: String,
        expected: u32,
        actual: u32,
    },
}

pub type Result<T> = std::result::Result<T, BlobStoreError>;

/// What a driver reports after a durable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutReceipt {
    pub size_on_disk: i32,
    pub crc32: u32,
}

/// Integrity metadata recorded for a stored blob, needed to verify it.
#[derive(Debug, Clone, Copy)]
pub struct BlobSeal {
    pub crc32: u32,
    pub is_compressed: bool,
}

/// Capability set every storage backend must expose.
pub trait VolumeDriver: Send + Sync {
    /// Durably writes the encoded bytes for `blob_ref`. Must be idempotent
    /// for identical refs and return only after the write is durable.
    fn put(&self, blob_ref: &BlobRef, on_disk: &[u8]) -> Result<PutReceipt>;

    /// Raw on-disk bytes, compressed form included. Fails with
    /// [`BlobStoreError::NotOnVolume`] if the blob is absent.
    fn get(&self, blob_ref: &BlobRef) -> Result<Vec<u8>>;

    /// Re-reads the blob and verifies it end to end: CRC-32 of the on-disk
    /// bytes against the recorded seal, then the digest of the decoded
    /// plaintext against the ref. Returns the number of bytes physically
    /// read.
    fn scrub(&self, blob_ref: &BlobRef, seal: &BlobSeal) -> Result<u64> {
        let on_disk = self.get(blob_ref)?;

        let actual_crc = crc32fast::hash(&on_disk);
        if actual_crc != seal.crc32 {
            return Err(BlobStoreError::CrcMismatch {
                blob_ref: blob_ref.as_hex(),
                expected: seal.crc32,
                actual: actual_crc,
            });
        }

        let plaintext = codec::decode_blob(&on_disk, seal.is_compressed)?;
        verify_digest(&plaintext, blob_ref)?;

        Ok(on_disk.len() as u64)
    }
}
