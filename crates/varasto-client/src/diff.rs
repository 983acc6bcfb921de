//! Change detection: working directory vs the parent revision.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use varasto_resolver::compute_state_at;
use varasto_types::{ids, CollectionChangeset};

use crate::chunker::analyze_file;
use crate::workdir::{Workdir, STATE_FILE_NAME};
use crate::Result;

/// Walks the working directory and classifies every regular file against
/// the materialized parent state:
///
/// - present locally, absent in the parent: created
/// - present on both sides with a size or mtime change: rehash, and record
///   as updated only if the content digest actually differs
/// - present in the parent but never seen in the walk: deleted
///
/// Deleted paths come out sorted; created/updated keep walk order. Any
/// walk error aborts the whole computation, so a partial changeset can
/// never escape.
pub fn compute_changeset(wd: &Workdir) -> Result<CollectionChangeset> {
    let parent_state = compute_state_at(&wd.state.collection, &wd.state.changeset_id)?;
    let files_at_parent = parent_state.files();

    // paths removed as the walk sees them; the leftover is what was deleted
    let mut unseen: BTreeSet<&str> = files_at_parent.keys().map(String::as_str).collect();

    let mut created = Vec::new();
    let mut updated = Vec::new();

    for entry in WalkDir::new(wd.path()).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name() == STATE_FILE_NAME {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(wd.path())
            .map_err(|_| walk_escaped(entry.path()))?
            .to_string_lossy()
            .replace('\\', "/");

        unseen.remove(relative.as_str());

        match files_at_parent.get(&relative) {
            None => {
                debug!(path = %relative, "new file");
                created.push(analyze_file(entry.path(), &relative)?);
            }
            Some(before) => {
                let metadata = entry.metadata()?;
                let size_changed = before.size != metadata.len() as i64;
                let mtime_changed =
                    before.modified != DateTime::<Utc>::from(metadata.modified()?);
                if size_changed || mtime_changed {
                    let fresh = analyze_file(entry.path(), &relative)?;
                    if fresh.sha256 != before.sha256 {
                        debug!(path = %relative, "file changed");
                        updated.push(fresh);
                    }
                }
            }
        }
    }

    let deleted: Vec<String> = unseen.into_iter().map(String::from).collect();

    Ok(CollectionChangeset::new(
        ids::new_changeset_id(),
        wd.state.changeset_id.clone(),
        Utc::now(),
        created,
        updated,
        deleted,
    ))
}

fn walk_escaped(path: &std::path::Path) -> crate::ClientError {
    crate::ClientError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("walked path escapes working directory: {}", path.display()),
    ))
}
