//! Cloning a collection into a fresh working directory.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::info;

use varasto_resolver::compute_state_at;
use varasto_types::File;

use crate::api::ApiClient;
use crate::workdir::{Workdir, WorkdirState};
use crate::{ClientError, Result};

/// Fetches the collection, materializes `revision` (empty = head) under
/// `parent_dir/<dir_name or collection name>` and returns the initialized
/// working copy. Refuses to clone into a directory that already exists.
pub async fn clone_collection(
    api: &dyn ApiClient,
    collection_id: &str,
    revision: &str,
    parent_dir: &Path,
    dir_name: Option<&str>,
) -> Result<Workdir> {
    let collection = api.get_collection(collection_id).await?;

    let dir_name = dir_name.unwrap_or(&collection.name);
    let path = parent_dir.join(dir_name);
    if path.exists() {
        return Err(ClientError::WorkdirAlreadyExists(path));
    }
    fs::create_dir_all(&path)?;

    let revision = if revision.is_empty() {
        collection.head.clone()
    } else {
        revision.to_string()
    };

    info!(collection = %collection.id, revision = %revision, path = %path.display(), "cloning");

    let wd = Workdir::initialize(
        &path,
        WorkdirState {
            changeset_id: revision.clone(),
            collection,
        },
    )?;

    let state = compute_state_at(&wd.state.collection, &revision)?;
    for file in state.file_list() {
        download_file(&wd, api, file).await?;
    }

    Ok(wd)
}

/// Downloads one file chunk by chunk into a temp file, restores its
/// recorded modification time, then moves it into place.
async fn download_file(wd: &Workdir, api: &dyn ApiClient, file: &File) -> Result<()> {
    info!(path = %file.path, bytes = file.size, "downloading");

    let final_path = wd.join(&file.path);
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = final_path.with_file_name(format!(
        "{}.temp",
        final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));

    let mut handle = fs::File::create(&temp_path)?;
    for blob_ref in &file.blob_refs {
        // download_blob verifies the digest; a mismatch aborts this file
        let chunk = api.download_blob(blob_ref).await?;
        handle.write_all(&chunk)?;
    }
    handle.set_modified(file.modified.into())?;
    drop(handle);

    fs::rename(&temp_path, &final_path)?;
    Ok(())
}
