//! Volume records and their derived counters.

use std::ops::ControlFlow;

use tracing::info;

use varasto_db::{volume_pk, MetaDb, RwTxn};
use varasto_types::{ids, Volume, VolumeId};

use crate::Result;

/// Registers a new volume. Ids are small integers handed out in order.
pub fn create_volume(db: &MetaDb, label: &str, quota: i64) -> Result<Volume> {
    let mut wtxn = db.write_txn()?;

    let mut max_id: VolumeId = 0;
    db.volumes.each(&wtxn, |_, v: Volume| {
        max_id = max_id.max(v.id);
        ControlFlow::Continue(())
    })?;

    let volume = Volume {
        id: max_id + 1,
        uuid: ids::new_volume_uuid(),
        label: label.to_string(),
        description: String::new(),
        serial_number: String::new(),
        technology: String::new(),
        enclosure: String::new(),
        enclosure_slot: 0,
        manufactured: None,
        warranty_ends: None,
        quota,
        blob_size_total: 0,
        blob_count: 0,
    };
    db.volumes.put(&mut wtxn, &volume)?;
    wtxn.commit().map_err(varasto_db::StoreError::from)?;

    info!(volume = volume.id, label, "volume created");

    Ok(volume)
}

/// Bumps the volume's derived counters for one newly placed blob, inside
/// the caller's transaction so the counters never drift from the placement
/// that caused them.
pub(crate) fn record_blob_placement(
    db: &MetaDb,
    wtxn: &mut RwTxn,
    volume_id: VolumeId,
    size_on_disk: i64,
) -> Result<()> {
    let mut volume = db.volumes.require(wtxn, &volume_pk(volume_id))?;
    volume.blob_size_total += size_on_disk;
    volume.blob_count += 1;
    db.volumes.put(wtxn, &volume)?;
    Ok(())
}
