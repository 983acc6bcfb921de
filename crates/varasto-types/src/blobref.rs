//! Blob addressing.
//!
//! A blob is identified by the SHA-256 of its plaintext. The canonical text
//! form is lowercase hex; filesystem placement uses a base32 form (RFC 4648
//! extended-hex alphabet, lowercase, unpadded) of the same 32 bytes. The two
//! forms convert losslessly in both directions.

use std::fmt;
use std::str::FromStr;

use data_encoding::{Encoding, Specification};
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a blob digest in bytes.
pub const BLOB_REF_LEN: usize = 32;

static BASE32HEX_LOWER: Lazy<Encoding> = Lazy::new(|| {
    let mut spec = Specification::new();
    spec.symbols.push_str("0123456789abcdefghijklmnopqrstuv");
    spec.encoding().expect("static base32hex alphabet")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid blob ref: {0}")]
pub struct InvalidBlobRef(pub String);

/// 32-byte content digest identifying one blob.
///
/// Ordering is over the raw digest bytes, which is also the primary-key
/// order of the blob repository.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobRef([u8; BLOB_REF_LEN]);

impl BlobRef {
    /// Digest of `data`, i.e. the ref the blob with these plaintext bytes
    /// must have.
    pub fn of(data: &[u8]) -> BlobRef {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; BLOB_REF_LEN];
        bytes.copy_from_slice(&digest);
        BlobRef(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<BlobRef, InvalidBlobRef> {
        let arr: [u8; BLOB_REF_LEN] = bytes
            .try_into()
            .map_err(|_| InvalidBlobRef(format!("expected {} bytes, got {}", BLOB_REF_LEN, bytes.len())))?;
        Ok(BlobRef(arr))
    }

    /// Parses the canonical lowercase-hex form. Fails unless the input is
    /// exactly 64 hex characters.
    pub fn from_hex(s: &str) -> Result<BlobRef, InvalidBlobRef> {
        if s.len() != BLOB_REF_LEN * 2 {
            return Err(InvalidBlobRef(format!("expected 64 hex chars, got {}", s.len())));
        }
        let bytes = hex::decode(s).map_err(|e| InvalidBlobRef(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Parses the base32 placement form.
    pub fn from_base32(s: &str) -> Result<BlobRef, InvalidBlobRef> {
        let bytes = BASE32HEX_LOWER
            .decode(s.as_bytes())
            .map_err(|e| InvalidBlobRef(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_base32(&self) -> String {
        BASE32HEX_LOWER.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; BLOB_REF_LEN] {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.as_hex())
    }
}

impl FromStr for BlobRef {
    type Err = InvalidBlobRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlobRef::from_hex(s)
    }
}

// Hex string on the wire and in stored records, same as the canonical form.
impl Serialize for BlobRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for BlobRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlobRef::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
