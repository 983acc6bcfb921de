//! # varasto-resolver
//!
//! Computes the materialized file set of a collection at any revision.
//!
//! A collection's history is a linear chain of changesets, newest at the
//! end. Resolving revision `r` selects the contiguous prefix of the chain
//! ending at `r` and folds it over an empty file map in order. The fold is
//! pure: identical inputs produce identical outputs, including iteration
//! order of the sorted file list.

use std::collections::HashMap;

use thiserror::Error;

use varasto_types::{Collection, File, NO_PARENT_ID};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("changeset not found: {0}")]
    ChangesetNotFound(String),

    #[error("changeset {changeset}: create of already-existing path {path}")]
    DuplicateCreate { changeset: String, path: String },

    #[error("changeset {changeset}: update of missing path {path}")]
    UpdateMissingFile { changeset: String, path: String },

    #[error("changeset {changeset}: delete of missing path {path}")]
    DeleteMissingFile { changeset: String, path: String },
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// The file set of one collection at one revision.
#[derive(Debug, Clone)]
pub struct CollectionState {
    changeset_id: String,
    files: HashMap<String, File>,
}

impl CollectionState {
    pub fn changeset_id(&self) -> &str {
        &self.changeset_id
    }

    /// Path → file mapping at this revision.
    pub fn files(&self) -> &HashMap<String, File> {
        &self.files
    }

    pub fn into_files(self) -> HashMap<String, File> {
        self.files
    }

    /// Files sorted by path, the deterministic listing order.
    pub fn file_list(&self) -> Vec<&File> {
        let mut list: Vec<&File> = self.files.values().collect();
        list.sort_by(|a, b| a.path.cmp(&b.path));
        list
    }
}

/// Folds the changeset chain up to and including `changeset_id`.
///
/// `changeset_id = NO_PARENT_ID` resolves the empty pre-history state.
/// Fails with [`ResolveError::ChangesetNotFound`] when the revision is not
/// in the collection's chain.
pub fn compute_state_at(collection: &Collection, changeset_id: &str) -> Result<CollectionState> {
    let mut files: HashMap<String, File> = HashMap::new();

    if changeset_id == NO_PARENT_ID {
        return Ok(CollectionState {
            changeset_id: changeset_id.to_string(),
            files,
        });
    }

    let prefix_end = collection
        .changesets
        .iter()
        .position(|cs| cs.id == changeset_id)
        .ok_or_else(|| ResolveError::ChangesetNotFound(changeset_id.to_string()))?;

    for changeset in &collection.changesets[..=prefix_end] {
        for created in &changeset.files_created {
            if files.contains_key(&created.path) {
                return Err(ResolveError::DuplicateCreate {
                    changeset: changeset.id.clone(),
                    path: created.path.clone(),
                });
            }
            files.insert(created.path.clone(), created.clone());
        }

        for updated in &changeset.files_updated {
            if !files.contains_key(&updated.path) {
                return Err(ResolveError::UpdateMissingFile {
                    changeset: changeset.id.clone(),
                    path: updated.path.clone(),
                });
            }
            files.insert(updated.path.clone(), updated.clone());
        }

        for deleted in &changeset.files_deleted {
            if files.remove(deleted).is_none() {
                return Err(ResolveError::DeleteMissingFile {
                    changeset: changeset.id.clone(),
                    path: deleted.clone(),
                });
            }
        }
    }

    Ok(CollectionState {
        changeset_id: changeset_id.to_string(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use varasto_types::CollectionChangeset;

    fn empty_collection() -> Collection {
        Collection {
            id: "c1".into(),
            directory: "root".into(),
            name: "test".into(),
            created: None,
            desired_volumes: vec![1],
            head: NO_PARENT_ID.into(),
            changesets: vec![],
            metadata: BTreeMap::new(),
            tags: vec![],
        }
    }

    fn file(path: &str, size: i64) -> File {
        File {
            path: path.into(),
            sha256: String::new(),
            created: Utc::now(),
            modified: Utc::now(),
            size,
            blob_refs: vec![],
        }
    }

    fn push_changeset(
        coll: &mut Collection,
        id: &str,
        created: Vec<File>,
        updated: Vec<File>,
        deleted: Vec<&str>,
    ) {
        let cs = CollectionChangeset::new(
            id.into(),
            coll.head.clone(),
            Utc::now(),
            created,
            updated,
            deleted.into_iter().map(String::from).collect(),
        );
        coll.head = cs.id.clone();
        coll.changesets.push(cs);
    }

    fn dump_state(coll: &Collection, rev: &str) -> Vec<String> {
        compute_state_at(coll, rev)
            .unwrap()
            .file_list()
            .iter()
            .map(|f| format!("{} (size {})", f.path, f.size))
            .collect()
    }

    #[test]
    fn test_empty_collection_resolves_to_empty_state() {
        let coll = empty_collection();
        let state = compute_state_at(&coll, &coll.head).unwrap();
        assert!(state.files().is_empty());
    }

    #[test]
    fn test_linear_history_folds_in_order() {
        let mut coll = empty_collection();

        push_changeset(
            &mut coll,
            "cs1",
            vec![file("a.txt", 11), file("b.txt", 22)],
            vec![],
            vec![],
        );
        assert_eq!(
            dump_state(&coll, &coll.head),
            vec!["a.txt (size 11)", "b.txt (size 22)"]
        );

        push_changeset(
            &mut coll,
            "cs2",
            vec![file("c.txt", 33)],
            vec![file("b.txt", 44)],
            vec![],
        );
        assert_eq!(
            dump_state(&coll, &coll.head),
            vec!["a.txt (size 11)", "b.txt (size 44)", "c.txt (size 33)"]
        );

        push_changeset(&mut coll, "cs3", vec![], vec![], vec!["a.txt"]);
        assert_eq!(
            dump_state(&coll, &coll.head),
            vec!["b.txt (size 44)", "c.txt (size 33)"]
        );

        // going back in time to the second changeset resurrects a.txt
        assert_eq!(
            dump_state(&coll, "cs2"),
            vec!["a.txt (size 11)", "b.txt (size 44)", "c.txt (size 33)"]
        );
    }

    #[test]
    fn test_unknown_revision() {
        let mut coll = empty_collection();
        push_changeset(&mut coll, "cs1", vec![file("a.txt", 1)], vec![], vec![]);

        assert_eq!(
            compute_state_at(&coll, "missing").unwrap_err(),
            ResolveError::ChangesetNotFound("missing".into())
        );
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let mut coll = empty_collection();
        push_changeset(&mut coll, "cs1", vec![file("a.txt", 1)], vec![], vec![]);
        push_changeset(&mut coll, "cs2", vec![file("a.txt", 2)], vec![], vec![]);

        assert!(matches!(
            compute_state_at(&coll, "cs2").unwrap_err(),
            ResolveError::DuplicateCreate { .. }
        ));
    }

    #[test]
    fn test_update_of_missing_file_is_rejected() {
        let mut coll = empty_collection();
        push_changeset(&mut coll, "cs1", vec![], vec![file("ghost.txt", 1)], vec![]);

        assert!(matches!(
            compute_state_at(&coll, "cs1").unwrap_err(),
            ResolveError::UpdateMissingFile { .. }
        ));
    }

    #[test]
    fn test_delete_of_missing_file_is_rejected() {
        let mut coll = empty_collection();
        push_changeset(&mut coll, "cs1", vec![], vec![], vec!["ghost.txt"]);

        assert!(matches!(
            compute_state_at(&coll, "cs1").unwrap_err(),
            ResolveError::DeleteMissingFile { .. }
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut coll = empty_collection();
        push_changeset(
            &mut coll,
            "cs1",
            vec![file("z.txt", 1), file("a.txt", 2), file("m.txt", 3)],
            vec![],
            vec![],
        );

        let first = dump_state(&coll, &coll.head);
        let second = dump_state(&coll, &coll.head);
        assert_eq!(first, second);
        assert_eq!(first, vec!["a.txt (size 2)", "m.txt (size 3)", "z.txt (size 1)"]);
    }
}
