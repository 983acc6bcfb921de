//! Replication of blobs to their remaining target volumes.
//!
//! `write_blob` lands a blob on one volume and records the rest of the
//! collection's desired volumes as pending. This worker drains that queue:
//! copy the on-disk bytes volume to volume (CRC-checked on the way), move
//! the volume id from pending to placed, bump counters.

use std::ops::ControlFlow;

use tracing::{debug, warn};

use varasto_blobstore::BlobStoreError;
use varasto_db::MetaDb;

use crate::mounts::MountManager;
use crate::volumes::record_blob_placement;
use crate::{Result, ServerError};

/// Replicates up to `max_blobs` queued blobs. Returns how many blobs were
/// fully drained (no pending volumes left). Each blob is handled in its
/// own transaction so one bad blob cannot wedge the queue.
pub fn replicate_pending(db: &MetaDb, mounts: &MountManager, max_blobs: usize) -> Result<usize> {
    let mut queued: Vec<Vec<u8>> = Vec::new();
    {
        let rtxn = db.read_txn()?;
        db.blobs_pending_replication.each(&rtxn, b"", |id| {
            queued.push(id.to_vec());
            if queued.len() >= max_blobs {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
    }

    let mut drained = 0;
    for id in queued {
        let mut wtxn = db.write_txn()?;
        let Some(mut blob) = db.blobs.get(&wtxn, &id)? else {
            continue;
        };

        let source = blob
            .volumes
            .iter()
            .copied()
            .find(|v| mounts.is_mounted(*v))
            .ok_or_else(|| {
                ServerError::BlobStore(BlobStoreError::NotOnVolume {
                    blob_ref: blob.blob_ref.as_hex(),
                })
            })?;
        let on_disk = mounts.driver(source)?.get(&blob.blob_ref)?;

        // refuse to fan out bytes that already rotted at the source
        let crc = crc32fast::hash(&on_disk);
        if crc != blob.crc32 {
            return Err(ServerError::BlobStore(BlobStoreError::CrcMismatch {
                blob_ref: blob.blob_ref.as_hex(),
                expected: blob.crc32,
                actual: crc,
            }));
        }

        let targets: Vec<_> = blob
            .volumes_pending_replication
            .iter()
            .copied()
            .filter(|v| mounts.is_mounted(*v))
            .collect();
        if targets.is_empty() {
            warn!(blob = %blob.blob_ref, "no pending volume mounted here, skipping");
            continue;
        }

        for target in targets {
            let receipt = mounts.driver(target)?.put(&blob.blob_ref, &on_disk)?;
            blob.volumes.push(target);
            blob.volumes_pending_replication.retain(|v| *v != target);
            record_blob_placement(db, &mut wtxn, target, receipt.size_on_disk as i64)?;
            debug!(blob = %blob.blob_ref, from = source, to = target, "blob replicated");
        }

        if blob.volumes_pending_replication.is_empty() {
            drained += 1;
        }
        db.blobs.put(&mut wtxn, &blob)?;
        wtxn.commit().map_err(varasto_db::StoreError::from)?;
    }

    Ok(drained)
}
