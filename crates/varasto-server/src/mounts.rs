//! Volume mounts: the binding of volumes to drivers on this node.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::info;

use varasto_blobstore::{LocalFsDriver, VolumeDriver};
use varasto_db::{volume_pk, MetaDb};
use varasto_types::{ids, VolumeDriverKind, VolumeId, VolumeMount};

use crate::{Result, ServerError};

/// Records a mount for `volume`. A volume may be mounted on at most one
/// node at a time, checked through the by-volume index in the same
/// transaction as the insert.
pub fn create_mount(
    db: &MetaDb,
    volume: VolumeId,
    node: &str,
    driver: VolumeDriverKind,
    driver_opts: &str,
) -> Result<VolumeMount> {
    let mut wtxn = db.write_txn()?;

    // the volume must exist
    db.volumes.require(&wtxn, &volume_pk(volume))?;

    let mut already_mounted = false;
    db.volume_mounts_by_volume
        .each(&wtxn, &volume_pk(volume), b"", |_| {
            already_mounted = true;
            ControlFlow::Break(())
        })?;
    if already_mounted {
        return Err(ServerError::VolumeAlreadyMounted(volume));
    }

    let mount = VolumeMount {
        id: ids::new_mount_id(),
        volume,
        node: node.to_string(),
        driver,
        driver_opts: driver_opts.to_string(),
    };
    db.volume_mounts.put(&mut wtxn, &mount)?;
    wtxn.commit().map_err(varasto_db::StoreError::from)?;

    info!(volume, node, "volume mounted");

    Ok(mount)
}

/// Live driver instances for the volumes mounted on this node.
pub struct MountManager {
    drivers: HashMap<VolumeId, Arc<dyn VolumeDriver>>,
}

impl MountManager {
    pub fn new() -> MountManager {
        MountManager {
            drivers: HashMap::new(),
        }
    }

    /// Instantiates a driver for every mount record bound to `node`. For
    /// the local-filesystem driver the opaque driver options are the
    /// storage root path.
    pub fn open_for_node(db: &MetaDb, node: &str) -> Result<MountManager> {
        let rtxn = db.read_txn()?;

        let mut mounts: Vec<VolumeMount> = Vec::new();
        db.volume_mounts.each(&rtxn, |_, mount: VolumeMount| {
            if mount.node == node {
                mounts.push(mount);
            }
            ControlFlow::Continue(())
        })?;

        let mut manager = MountManager::new();
        for mount in mounts {
            let volume = db.volumes.require(&rtxn, &volume_pk(mount.volume))?;
            let driver: Arc<dyn VolumeDriver> = match mount.driver {
                VolumeDriverKind::LocalFs => {
                    Arc::new(LocalFsDriver::new(&volume.uuid, &mount.driver_opts)?)
                }
            };
            manager.insert(mount.volume, driver);
        }

        Ok(manager)
    }

    pub fn insert(&mut self, volume: VolumeId, driver: Arc<dyn VolumeDriver>) {
        self.drivers.insert(volume, driver);
    }

    pub fn driver(&self, volume: VolumeId) -> Result<&Arc<dyn VolumeDriver>> {
        self.drivers
            .get(&volume)
            .ok_or(ServerError::VolumeNotMounted(volume))
    }

    pub fn is_mounted(&self, volume: VolumeId) -> bool {
        self.drivers.contains_key(&volume)
    }
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}
