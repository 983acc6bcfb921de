//! On-disk blob encoding.
//!
//! A blob is stored zstd-compressed iff the compressed form is strictly
//! smaller than the plaintext. The decision is per-blob and recorded in the
//! blob's metadata (`is_compressed`); decoding reverses exactly what was
//! stored.

use crate::Result;

/// zstd level 0 selects the library default.
const ZSTD_LEVEL: i32 = 0;

#[derive(Debug, Clone)]
pub struct EncodedBlob {
    pub bytes: Vec<u8>,
    pub is_compressed: bool,
}

/// Picks the smaller of plaintext and its zstd form.
pub fn encode_blob(plaintext: &[u8]) -> Result<EncodedBlob> {
    let compressed = zstd::encode_all(plaintext, ZSTD_LEVEL)?;
    if compressed.len() < plaintext.len() {
        Ok(EncodedBlob {
            bytes: compressed,
            is_compressed: true,
        })
    } else {
        Ok(EncodedBlob {
            bytes: plaintext.to_vec(),
            is_compressed: false,
        })
    }
}

/// Inverse of [`encode_blob`] given the recorded compression flag.
pub fn decode_blob(on_disk: &[u8], is_compressed: bool) -> Result<Vec<u8>> {
    if is_compressed {
        Ok(zstd::decode_all(on_disk)?)
    } else {
        Ok(on_disk.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressible_data_is_compressed() {
        let plaintext = vec![b'a'; 64 * 1024];
        let encoded = encode_blob(&plaintext).unwrap();
        assert!(encoded.is_compressed);
        assert!(encoded.bytes.len() < plaintext.len());
        assert_eq!(decode_blob(&encoded.bytes, true).unwrap(), plaintext);
    }

    #[test]
    fn test_incompressible_data_stays_plain() {
        // short high-entropy input: zstd framing makes it bigger, so the
        // plaintext must win
        let plaintext: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_blob(&plaintext).unwrap();
        assert!(!encoded.is_compressed);
        assert_eq!(encoded.bytes, plaintext);
        assert_eq!(decode_blob(&encoded.bytes, false).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_blob() {
        let encoded = encode_blob(b"").unwrap();
        assert!(!encoded.is_compressed);
        assert!(encoded.bytes.is_empty());
    }
}
