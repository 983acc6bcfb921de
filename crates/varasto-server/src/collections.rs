//! Collection lifecycle: creation and changeset commits.

use std::collections::{BTreeMap, HashSet};

use tracing::info;

use varasto_db::MetaDb;
use varasto_types::{ids, Collection, CollectionChangeset, VolumeId, NO_PARENT_ID};

use crate::{Result, ServerError};

pub fn create_collection(
    db: &MetaDb,
    directory: &str,
    name: &str,
    desired_volumes: Vec<VolumeId>,
) -> Result<Collection> {
    let collection = Collection {
        id: ids::new_collection_id(),
        directory: directory.to_string(),
        name: name.to_string(),
        created: None,
        desired_volumes,
        head: NO_PARENT_ID.to_string(),
        changesets: vec![],
        metadata: BTreeMap::new(),
        tags: vec![],
    };

    let mut wtxn = db.write_txn()?;
    db.collections.put(&mut wtxn, &collection)?;
    wtxn.commit().map_err(varasto_db::StoreError::from)?;

    info!(collection = %collection.id, name, "collection created");

    Ok(collection)
}

pub fn get_collection(db: &MetaDb, id: &str) -> Result<Collection> {
    let rtxn = db.read_txn()?;
    Ok(db.collections.require(&rtxn, id.as_bytes())?)
}

/// Appends a changeset to the collection in one atomic transaction:
/// validates parent-head linkage and the pairwise disjointness of the
/// mutated path sets, checks every referenced blob exists and sums to the
/// file's size, then appends, advances `head` and flips `referenced = true`
/// on every blob the changeset references.
pub fn commit_changeset(
    db: &MetaDb,
    collection_id: &str,
    changeset: CollectionChangeset,
) -> Result<Collection> {
    let mut wtxn = db.write_txn()?;

    let mut collection = db.collections.require(&wtxn, collection_id.as_bytes())?;

    if changeset.parent != collection.head {
        return Err(ServerError::ParentHeadMismatch {
            collection: collection_id.to_string(),
            head: collection.head.clone(),
            parent: changeset.parent.clone(),
        });
    }

    let mut touched_paths: HashSet<&str> = HashSet::new();
    let mutated = changeset
        .files_created
        .iter()
        .chain(changeset.files_updated.iter())
        .map(|f| f.path.as_str())
        .chain(changeset.files_deleted.iter().map(String::as_str));
    for path in mutated {
        if !touched_paths.insert(path) {
            return Err(ServerError::ChangesetPathsOverlap(path.to_string()));
        }
    }

    for file in changeset
        .files_created
        .iter()
        .chain(changeset.files_updated.iter())
    {
        let mut blob_size_sum: i64 = 0;
        for blob_ref in &file.blob_refs {
            let blob = db
                .blobs
                .get(&wtxn, blob_ref.as_bytes())?
                .ok_or_else(|| ServerError::BlobNotFound(blob_ref.as_hex()))?;
            blob_size_sum += blob.size as i64;
        }
        if blob_size_sum != file.size {
            return Err(ServerError::FileSizeMismatch {
                path: file.path.clone(),
                expected: file.size,
                actual: blob_size_sum,
            });
        }
    }

    // the commit is what turns uploaded bytes into referenced data
    let referenced: HashSet<_> = changeset.referenced_blobs().copied().collect();
    for blob_ref in referenced {
        let mut blob = db
            .blobs
            .get(&wtxn, blob_ref.as_bytes())?
            .ok_or_else(|| ServerError::BlobNotFound(blob_ref.as_hex()))?;
        if !blob.referenced {
            blob.referenced = true;
            db.blobs.put(&mut wtxn, &blob)?;
        }
    }

    if collection.created.is_none() {
        collection.created = Some(changeset.created);
    }
    collection.head = changeset.id.clone();
    collection.changesets.push(changeset);
    db.collections.put(&mut wtxn, &collection)?;

    wtxn.commit().map_err(varasto_db::StoreError::from)?;

    info!(collection = %collection.id, head = %collection.head, "changeset committed");

    Ok(collection)
}
