//! Streaming digest verification.
//!
//! Both ingress (blob upload) and egress (download, scrub) run chunk bytes
//! through [`DigestVerifyingReader`], so a tampered or corrupted stream is
//! rejected at the point the last byte is consumed.

use std::io::{self, Read};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::blobref::BlobRef;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("blob digest mismatch: expected {expected}, got {actual}")]
pub struct BlobDigestMismatch {
    pub expected: String,
    pub actual: String,
}

/// Wraps a byte stream and an expected [`BlobRef`]. Reads pass through
/// untouched; when the inner stream reaches end-of-file the accumulated
/// SHA-256 is compared against the expected digest and the final read fails
/// with [`BlobDigestMismatch`] on disagreement.
pub struct DigestVerifyingReader<R> {
    inner: R,
    expected: BlobRef,
    hasher: Sha256,
    verified: bool,
}

impl<R: Read> DigestVerifyingReader<R> {
    pub fn new(inner: R, expected: BlobRef) -> Self {
        Self {
            inner,
            expected,
            hasher: Sha256::new(),
            verified: false,
        }
    }
}

impl<R: Read> Read for DigestVerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            return Ok(n);
        }
        if !self.verified {
            self.verified = true;
            let actual = self.hasher.clone().finalize();
            if actual.as_slice() != self.expected.as_bytes() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    BlobDigestMismatch {
                        expected: self.expected.as_hex(),
                        actual: hex::encode(actual),
                    },
                ));
            }
        }
        Ok(0)
    }
}

/// One-shot form of the verifier for bytes already in memory.
pub fn verify_digest(data: &[u8], expected: &BlobRef) -> Result<(), BlobDigestMismatch> {
    let actual = BlobRef::of(data);
    if actual != *expected {
        return Err(BlobDigestMismatch {
            expected: expected.as_hex(),
            actual: actual.as_hex(),
        });
    }
    Ok(())
}
