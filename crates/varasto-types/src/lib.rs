//! # varasto-types
//!
//! Record types shared by every Varasto component: blob addressing,
//! collections with their changeset history, volumes and mounts, and the
//! integrity-verification job record.
//!
//! These are plain data carriers. Storage semantics (indices, transactions)
//! live in `varasto-db`; byte-level blob handling lives in
//! `varasto-blobstore`.

pub mod blobref;
pub mod digest;
pub mod ids;

pub use blobref::{BlobRef, InvalidBlobRef, BLOB_REF_LEN};
pub use digest::{verify_digest, BlobDigestMismatch, DigestVerifyingReader};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel parent id of the first changeset in a collection, and the head
/// value of a collection with no changesets yet.
pub const NO_PARENT_ID: &str = "";

/// Volume identifiers are small integers assigned at volume creation.
pub type VolumeId = u32;

/// One deduplicated chunk, keyed by its [`BlobRef`].
///
/// Created with `referenced = false` when the bytes first land on a volume;
/// flipped to `true` by the changeset commit that references it. Blobs that
/// never get referenced (aborted uploads) are garbage-collectible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub blob_ref: BlobRef,
    /// Volumes currently holding the blob.
    pub volumes: Vec<VolumeId>,
    /// Volumes the blob should be copied to but has not reached yet.
    pub volumes_pending_replication: Vec<VolumeId>,
    pub referenced: bool,
    pub is_compressed: bool,
    /// Plaintext size in bytes.
    pub size: i32,
    /// Stored size after optional compression.
    pub size_on_disk: i32,
    /// CRC-32 of the on-disk bytes. Guards against storage layers that
    /// corrupt content while still returning the right length.
    pub crc32: u32,
}

/// Logical storage target for blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub uuid: String,
    pub label: String,
    pub description: String,
    pub serial_number: String,
    pub technology: String,
    pub enclosure: String,
    /// Slot within the enclosure; 0 = not defined.
    pub enclosure_slot: u32,
    pub manufactured: Option<DateTime<Utc>>,
    pub warranty_ends: Option<DateTime<Utc>>,
    pub quota: i64,
    /// Compressed, deduplicated bytes written. Derived from placement
    /// events, updated in the same transaction.
    pub blob_size_total: i64,
    pub blob_count: i64,
}

/// Driver kinds a volume can be mounted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeDriverKind {
    LocalFs,
}

/// Binding of a volume to a node through a driver. A volume is mounted on
/// at most one node at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub id: String,
    pub volume: VolumeId,
    pub node: String,
    pub driver: VolumeDriverKind,
    pub driver_opts: String,
}

/// Versioned file grouping with a linear changeset history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    /// Parent directory id.
    pub directory: String,
    pub name: String,
    /// Earliest changeset timestamp; set when the first changeset commits.
    pub created: Option<DateTime<Utc>>,
    /// Replication targets for new blobs. The first entry is the primary
    /// write target, the rest are recorded as pending replication.
    pub desired_volumes: Vec<VolumeId>,
    /// Id of the newest changeset, [`NO_PARENT_ID`] while empty.
    pub head: String,
    /// Changesets in commit order, newest at the end. Immutable once
    /// appended.
    pub changesets: Vec<CollectionChangeset>,
    pub metadata: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

impl Collection {
    pub fn changeset(&self, id: &str) -> Option<&CollectionChangeset> {
        self.changesets.iter().find(|cs| cs.id == id)
    }
}

/// Immutable set of file mutations applied to a collection in one commit.
///
/// The created/updated paths and the deleted paths are pairwise disjoint
/// within one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChangeset {
    pub id: String,
    /// Id of the preceding changeset, [`NO_PARENT_ID`] for the first one.
    pub parent: String,
    pub created: DateTime<Utc>,
    pub files_created: Vec<File>,
    pub files_updated: Vec<File>,
    pub files_deleted: Vec<String>,
}

impl CollectionChangeset {
    pub fn new(
        id: String,
        parent: String,
        created: DateTime<Utc>,
        files_created: Vec<File>,
        files_updated: Vec<File>,
        files_deleted: Vec<String>,
    ) -> Self {
        Self {
            id,
            parent,
            created,
            files_created,
            files_updated,
            files_deleted,
        }
    }

    pub fn any_changes(&self) -> bool {
        !self.files_created.is_empty()
            || !self.files_updated.is_empty()
            || !self.files_deleted.is_empty()
    }

    /// Blob refs of every file this changeset creates or updates.
    pub fn referenced_blobs(&self) -> impl Iterator<Item = &BlobRef> {
        self.files_created
            .iter()
            .chain(self.files_updated.iter())
            .flat_map(|f| f.blob_refs.iter())
    }
}

/// One file at one revision. The concatenation of the referenced blobs'
/// plaintexts reconstructs the file; their sizes sum to `size` and the
/// SHA-256 over the concatenation equals `sha256`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Forward-slash path relative to the collection root.
    pub path: String,
    /// Hex SHA-256 of the whole file.
    pub sha256: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub size: i64,
    pub blob_refs: Vec<BlobRef>,
}

/// Node in the directory tree collections hang off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: String,
    /// Parent directory id, empty for the root.
    pub parent: String,
    pub name: String,
    pub dir_type: String,
    pub metadata: BTreeMap<String, String>,
}

impl Directory {
    pub fn new(id: String, parent: String, name: String, dir_type: String) -> Self {
        Self {
            id,
            parent,
            name,
            dir_type,
            metadata: BTreeMap::new(),
        }
    }
}

/// Per-volume scrub run. `last_completed_blob_ref` is the resumption
/// cursor: progress marker, not a success marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityVerificationJob {
    pub id: String,
    pub volume_id: VolumeId,
    pub started: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub last_completed_blob_ref: Option<BlobRef>,
    pub bytes_scanned: u64,
    pub errors_found: u32,
    /// Accumulated error lines, bounded to 20 KiB.
    pub report: String,
}

impl IntegrityVerificationJob {
    pub fn new(id: String, volume_id: VolumeId, started: DateTime<Utc>) -> Self {
        Self {
            id,
            volume_id,
            started,
            completed: None,
            last_completed_blob_ref: None,
            bytes_scanned: 0,
            errors_found: 0,
            report: String::new(),
        }
    }
}
