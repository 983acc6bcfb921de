//! # varasto-server
//!
//! The server half of the Varasto storage engine: receiving and placing
//! blobs on volumes, committing changesets, replicating blobs to their
//! remaining target volumes, and running per-volume integrity-verification
//! (scrub) jobs.
//!
//! The HTTP transport is an external collaborator; this crate exposes the
//! operations it binds to routes (`DiskAccess::write_blob`,
//! `DiskAccess::fetch_blob`, `commit_changeset`, the controller's
//! `resume`/`stop`/`list_running`).

pub mod collections;
pub mod diskaccess;
pub mod integrity;
pub mod mounts;
pub mod replication;
pub mod volumes;

pub use collections::{commit_changeset, create_collection, get_collection};
pub use diskaccess::{DiskAccess, Scrubber};
pub use integrity::{create_job, IntegrityController};
pub use mounts::{create_mount, MountManager};
pub use replication::replicate_pending;
pub use volumes::create_volume;

use thiserror::Error;

use varasto_blobstore::BlobStoreError;
use varasto_db::StoreError;
use varasto_types::{BlobDigestMismatch, VolumeId};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),

    #[error(transparent)]
    DigestMismatch(#[from] BlobDigestMismatch),

    #[error("volume {0} is not mounted")]
    VolumeNotMounted(VolumeId),

    #[error("volume {0} is already mounted")]
    VolumeAlreadyMounted(VolumeId),

    #[error("collection {0} has no desired volumes")]
    NoDesiredVolumes(String),

    #[error("collection {collection}: changeset parent {parent:?} does not match head {head:?}")]
    ParentHeadMismatch {
        collection: String,
        head: String,
        parent: String,
    },

    #[error("changeset mutates path {0} more than once")]
    ChangesetPathsOverlap(String),

    #[error("file {path}: blob sizes sum to {actual}, file says {expected}")]
    FileSizeMismatch {
        path: String,
        expected: i64,
        actual: i64,
    },

    #[error("blob {0} not found")]
    BlobNotFound(String),

    #[error("job {0} is already running")]
    JobAlreadyRunning(String),

    #[error("integrity controller is not running")]
    ControllerUnavailable,
}

pub type Result<T> = std::result::Result<T, ServerError>;
