//! Repository and index definitions for every Varasto record type.

use heed::types::{Bytes, SerdeBincode, Str, Unit};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::debug;

use varasto_types::{
    Blob, Collection, Directory, IntegrityVerificationJob, Volume, VolumeId, VolumeMount,
};

use crate::repo::{IndexDef, Repository, SetIndex, ValueIndex};
use crate::Result;

const MAP_SIZE: usize = 1024 * 1024 * 1024;
const MAX_DBS: u32 = 16;

/// Primary key of a volume record: big-endian so key order is numeric order.
pub fn volume_pk(id: VolumeId) -> [u8; 4] {
    id.to_be_bytes()
}

fn blob_pk(b: &Blob) -> Vec<u8> {
    b.blob_ref.as_bytes().to_vec()
}

fn blob_pending_replication(b: &Blob) -> bool {
    !b.volumes_pending_replication.is_empty()
}

fn collection_pk(c: &Collection) -> Vec<u8> {
    c.id.as_bytes().to_vec()
}

fn collection_directory(c: &Collection) -> Vec<Vec<u8>> {
    if c.directory.is_empty() {
        vec![]
    } else {
        vec![c.directory.as_bytes().to_vec()]
    }
}

fn directory_pk(d: &Directory) -> Vec<u8> {
    d.id.as_bytes().to_vec()
}

fn directory_parent(d: &Directory) -> Vec<Vec<u8>> {
    // the root directory has no parent and therefore no index entry
    if d.parent.is_empty() {
        vec![]
    } else {
        vec![d.parent.as_bytes().to_vec()]
    }
}

fn volume_record_pk(v: &Volume) -> Vec<u8> {
    volume_pk(v.id).to_vec()
}

fn mount_pk(m: &VolumeMount) -> Vec<u8> {
    m.id.as_bytes().to_vec()
}

fn mount_volume(m: &VolumeMount) -> Vec<Vec<u8>> {
    vec![volume_pk(m.volume).to_vec()]
}

fn ivjob_pk(j: &IntegrityVerificationJob) -> Vec<u8> {
    j.id.as_bytes().to_vec()
}

/// The metadata store: one LMDB environment owning all record repositories,
/// their secondary indices, and the config namespace.
///
/// The environment file is owned by a single process; all multi-record
/// consistency comes from doing reads and writes inside one transaction.
pub struct MetaDb {
    env: Env,

    pub blobs: Repository<Blob>,
    /// Blobs with a non-empty `volumes_pending_replication`.
    pub blobs_pending_replication: SetIndex<Blob>,

    pub collections: Repository<Collection>,
    pub collections_by_directory: ValueIndex<Collection>,

    pub directories: Repository<Directory>,
    pub directories_by_parent: ValueIndex<Directory>,

    pub volumes: Repository<Volume>,

    pub volume_mounts: Repository<VolumeMount>,
    pub volume_mounts_by_volume: ValueIndex<VolumeMount>,

    pub ivjobs: Repository<IntegrityVerificationJob>,

    config: Database<Str, Str>,
}

impl MetaDb {
    /// Opens (creating if needed) the store at `path`, a directory that
    /// will contain the LMDB files. All databases are created up front so
    /// later writes cannot fail on namespace creation.
    pub fn open(path: &std::path::Path) -> Result<MetaDb> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;

        let blobs_db: Database<Bytes, SerdeBincode<Blob>> =
            env.create_database(&mut wtxn, Some("blobs"))?;
        let blobs_pending_db: Database<Bytes, Unit> =
            env.create_database(&mut wtxn, Some("blobs:pending_replication"))?;

        let collections_db: Database<Bytes, SerdeBincode<Collection>> =
            env.create_database(&mut wtxn, Some("collections"))?;
        let collections_by_directory_db: Database<Bytes, Unit> =
            env.create_database(&mut wtxn, Some("collections:by_directory"))?;

        let directories_db: Database<Bytes, SerdeBincode<Directory>> =
            env.create_database(&mut wtxn, Some("directories"))?;
        let directories_by_parent_db: Database<Bytes, Unit> =
            env.create_database(&mut wtxn, Some("directories:by_parent"))?;

        let volumes_db: Database<Bytes, SerdeBincode<Volume>> =
            env.create_database(&mut wtxn, Some("volumes"))?;

        let mounts_db: Database<Bytes, SerdeBincode<VolumeMount>> =
            env.create_database(&mut wtxn, Some("volume_mounts"))?;
        let mounts_by_volume_db: Database<Bytes, Unit> =
            env.create_database(&mut wtxn, Some("volume_mounts:by_volume"))?;

        let ivjobs_db: Database<Bytes, SerdeBincode<IntegrityVerificationJob>> =
            env.create_database(&mut wtxn, Some("integrity_verification_jobs"))?;

        let config: Database<Str, Str> = env.create_database(&mut wtxn, Some("config"))?;

        wtxn.commit()?;

        debug!(path = %path.display(), "opened metadata store");

        Ok(MetaDb {
            env,
            blobs: Repository::new(
                "blobs",
                blobs_db,
                blob_pk,
                vec![IndexDef::set(
                    "blobs:pending_replication",
                    blobs_pending_db,
                    blob_pending_replication,
                )],
            ),
            blobs_pending_replication: SetIndex::new(blobs_pending_db),
            collections: Repository::new(
                "collections",
                collections_db,
                collection_pk,
                vec![IndexDef::by_value(
                    "collections:by_directory",
                    collections_by_directory_db,
                    collection_directory,
                )],
            ),
            collections_by_directory: ValueIndex::new(collections_by_directory_db),
            directories: Repository::new(
                "directories",
                directories_db,
                directory_pk,
                vec![IndexDef::by_value(
                    "directories:by_parent",
                    directories_by_parent_db,
                    directory_parent,
                )],
            ),
            directories_by_parent: ValueIndex::new(directories_by_parent_db),
            volumes: Repository::new("volumes", volumes_db, volume_record_pk, vec![]),
            volume_mounts: Repository::new(
                "volume_mounts",
                mounts_db,
                mount_pk,
                vec![IndexDef::by_value(
                    "volume_mounts:by_volume",
                    mounts_by_volume_db,
                    mount_volume,
                )],
            ),
            volume_mounts_by_volume: ValueIndex::new(mounts_by_volume_db),
            ivjobs: Repository::new(
                "integrity_verification_jobs",
                ivjobs_db,
                ivjob_pk,
                vec![],
            ),
            config,
        })
    }

    pub fn read_txn(&self) -> Result<RoTxn<'_>> {
        Ok(self.env.read_txn()?)
    }

    pub fn write_txn(&self) -> Result<RwTxn<'_>> {
        Ok(self.env.write_txn()?)
    }

    /// Read-mostly configuration values (API keys and the like), read
    /// inside a short transaction at call time rather than cached.
    pub fn config_get(&self, rtxn: &RoTxn, key: &str) -> Result<Option<String>> {
        Ok(self.config.get(rtxn, key)?.map(|v| v.to_string()))
    }

    pub fn config_set(&self, wtxn: &mut RwTxn, key: &str, value: &str) -> Result<()> {
        Ok(self.config.put(wtxn, key, value)?)
    }
}
