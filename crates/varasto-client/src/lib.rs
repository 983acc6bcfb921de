//! # varasto-client
//!
//! Turns a working directory into changesets and back: chunking, change
//! detection against the parent revision, the upload pipeline with
//! skip-if-exists probing, and cloning a collection to disk.

pub mod api;
pub mod chunker;
pub mod clone;
pub mod config;
pub mod diff;
pub mod push;
pub mod workdir;

pub use api::{ApiClient, HttpApiClient};
pub use chunker::{analyze_file, read_chunk, BLOB_SIZE};
pub use clone::clone_collection;
pub use config::ClientConfig;
pub use diff::compute_changeset;
pub use push::push;
pub use workdir::{Workdir, WorkdirState, STATE_FILE_NAME};

use std::path::PathBuf;

use thiserror::Error;

use varasto_resolver::ResolveError;
use varasto_types::{BlobDigestMismatch, InvalidBlobRef};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    InvalidBlobRef(#[from] InvalidBlobRef),

    #[error(transparent)]
    DigestMismatch(#[from] BlobDigestMismatch),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{url}: unexpected status {status}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("directory to clone into already exists: {0}")]
    WorkdirAlreadyExists(PathBuf),

    #[error("not a working copy (no state file): {0}")]
    NotAWorkdir(PathBuf),

    #[error("state file: {0}")]
    State(#[from] serde_json::Error),

    #[error("config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl ClientError {
    /// Network and local I/O failures are worth retrying; everything else
    /// points at corrupt data or a caller bug.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Http(_) | ClientError::Io(_) | ClientError::Walk(_)
        ) || matches!(self, ClientError::UnexpectedStatus { status, .. } if *status >= 500)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
