//! Pushing local changes to the server.

use tracing::{debug, info};

use varasto_types::File;

use crate::api::ApiClient;
use crate::chunker::read_chunk;
use crate::diff::compute_changeset;
use crate::workdir::Workdir;
use crate::Result;

/// Computes the changeset for the working copy, uploads every chunk the
/// server does not already have, then submits the changeset atomically and
/// fast-forwards the working copy to the returned head.
///
/// Returns false when there was nothing to push. A push interrupted after
/// some uploads leaves only unreferenced blobs behind; retrying is safe
/// because existing chunks are probed away.
pub async fn push(wd: &mut Workdir, api: &dyn ApiClient) -> Result<bool> {
    let changeset = compute_changeset(wd)?;
    if !changeset.any_changes() {
        info!("no files changed");
        return Ok(false);
    }

    for file in changeset
        .files_created
        .iter()
        .chain(changeset.files_updated.iter())
    {
        upload_chunks(wd, api, file).await?;
    }

    let updated = api
        .submit_changeset(&wd.state.collection.id, &changeset)
        .await?;

    info!(
        collection = %updated.id,
        head = %updated.head,
        created = changeset.files_created.len(),
        updated_files = changeset.files_updated.len(),
        deleted = changeset.files_deleted.len(),
        "changeset pushed"
    );

    wd.state.changeset_id = updated.head.clone();
    wd.state.collection = updated;
    wd.save()?;

    Ok(true)
}

async fn upload_chunks(wd: &Workdir, api: &dyn ApiClient, file: &File) -> Result<()> {
    let path = wd.join(&file.path);
    for (index, blob_ref) in file.blob_refs.iter().enumerate() {
        if api.blob_exists(blob_ref).await? {
            debug!(blob = %blob_ref, "deduplicated chunk");
            continue;
        }
        let chunk = read_chunk(&path, index)?;
        api.upload_blob(blob_ref, &wd.state.collection.id, chunk)
            .await?;
    }
    Ok(())
}
