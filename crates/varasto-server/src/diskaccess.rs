//! Orchestrates blob bytes between the wire, the codec and the volumes.

use std::sync::Arc;

use tracing::debug;

use varasto_blobstore::{decode_blob, encode_blob, BlobSeal, BlobStoreError};
use varasto_db::MetaDb;
use varasto_types::{verify_digest, Blob, BlobRef, VolumeId};

use crate::mounts::MountManager;
use crate::volumes::record_blob_placement;
use crate::{Result, ServerError};

/// Re-reads one blob from one volume and verifies it; the seam the
/// integrity controller drives so tests can observe scrub traffic.
pub trait Scrubber: Send + Sync {
    /// Returns the number of bytes physically read.
    fn scrub(&self, blob: &Blob, volume_id: VolumeId) -> Result<u64>;
}

pub struct DiskAccess {
    db: Arc<MetaDb>,
    mounts: Arc<MountManager>,
}

impl DiskAccess {
    pub fn new(db: Arc<MetaDb>, mounts: Arc<MountManager>) -> DiskAccess {
        DiskAccess { db, mounts }
    }

    /// Server half of a chunk upload: verify the incoming digest, pick the
    /// write targets from the collection's desired-volume set (first
    /// mounted volume is the primary, the rest become pending
    /// replication), place the encoded bytes, insert the blob record with
    /// `referenced = false` and bump the primary volume's counters, all in
    /// one metadata transaction.
    ///
    /// Re-uploading an existing blob is a no-op, which makes retry after a
    /// cancelled push safe.
    pub fn write_blob(
        &self,
        collection_id: &str,
        blob_ref: &BlobRef,
        plaintext: &[u8],
    ) -> Result<()> {
        verify_digest(plaintext, blob_ref)?;

        let mut wtxn = self.db.write_txn()?;

        if self.db.blobs.get(&wtxn, blob_ref.as_bytes())?.is_some() {
            debug!(blob = %blob_ref, "blob already stored, skipping");
            return Ok(());
        }

        let collection = self
            .db
            .collections
            .require(&wtxn, collection_id.as_bytes())?;
        let Some((&primary, replicas)) = collection.desired_volumes.split_first() else {
            return Err(ServerError::NoDesiredVolumes(collection_id.to_string()));
        };

        let driver = self.mounts.driver(primary)?;
        let encoded = encode_blob(plaintext)?;
        let receipt = driver.put(blob_ref, &encoded.bytes)?;

        let blob = Blob {
            blob_ref: *blob_ref,
            volumes: vec![primary],
            volumes_pending_replication: replicas.to_vec(),
            referenced: false,
            is_compressed: encoded.is_compressed,
            size: plaintext.len() as i32,
            size_on_disk: receipt.size_on_disk,
            crc32: receipt.crc32,
        };
        self.db.blobs.put(&mut wtxn, &blob)?;
        record_blob_placement(&self.db, &mut wtxn, primary, receipt.size_on_disk as i64)?;

        wtxn.commit().map_err(varasto_db::StoreError::from)?;

        debug!(blob = %blob_ref, volume = primary, compressed = encoded.is_compressed, "blob stored");

        Ok(())
    }

    /// Plaintext of a blob, read from the first of its volumes that is
    /// mounted here and digest-verified on the way out.
    pub fn fetch_blob(&self, blob_ref: &BlobRef) -> Result<Vec<u8>> {
        let blob = {
            let rtxn = self.db.read_txn()?;
            self.db
                .blobs
                .get(&rtxn, blob_ref.as_bytes())?
                .ok_or_else(|| ServerError::BlobNotFound(blob_ref.as_hex()))?
        };

        let volume = blob
            .volumes
            .iter()
            .copied()
            .find(|v| self.mounts.is_mounted(*v))
            .ok_or_else(|| {
                ServerError::BlobStore(BlobStoreError::NotOnVolume {
                    blob_ref: blob_ref.as_hex(),
                })
            })?;

        let on_disk = self.mounts.driver(volume)?.get(blob_ref)?;
        let plaintext = decode_blob(&on_disk, blob.is_compressed)?;
        verify_digest(&plaintext, blob_ref)?;
        Ok(plaintext)
    }

    /// True if a blob record exists (the HEAD-probe answer).
    pub fn blob_exists(&self, blob_ref: &BlobRef) -> Result<bool> {
        let rtxn = self.db.read_txn()?;
        Ok(self.db.blobs.get(&rtxn, blob_ref.as_bytes())?.is_some())
    }
}

impl Scrubber for DiskAccess {
    fn scrub(&self, blob: &Blob, volume_id: VolumeId) -> Result<u64> {
        let driver = self.mounts.driver(volume_id)?;
        let seal = BlobSeal {
            crc32: blob.crc32,
            is_compressed: blob.is_compressed,
        };
        Ok(driver.scrub(&blob.blob_ref, &seal)?)
    }
}
