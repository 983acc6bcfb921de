//! Working-copy state.
//!
//! A directory is a working copy iff it carries the state file: a small
//! JSON document holding the checked-out changeset id and the collection
//! snapshot from clone time. The file is skipped by directory walks.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use varasto_types::Collection;

use crate::{ClientError, Result};

pub const STATE_FILE_NAME: &str = ".varasto";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkdirState {
    /// The revision this working copy was materialized at.
    pub changeset_id: String,
    /// Collection snapshot, refreshed on every successful push.
    pub collection: Collection,
}

#[derive(Debug)]
pub struct Workdir {
    path: PathBuf,
    pub state: WorkdirState,
}

impl Workdir {
    /// Opens an existing working copy by reading its state file.
    pub fn open(path: &Path) -> Result<Workdir> {
        let state_path = path.join(STATE_FILE_NAME);
        let raw = match fs::read(&state_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::NotAWorkdir(path.to_path_buf()))
            }
            Err(e) => return Err(ClientError::Io(e)),
        };
        let state: WorkdirState = serde_json::from_slice(&raw)?;
        Ok(Workdir {
            path: path.to_path_buf(),
            state,
        })
    }

    /// Writes the state file into `path` (which must already exist) and
    /// returns the opened working copy.
    pub fn initialize(path: &Path, state: WorkdirState) -> Result<Workdir> {
        let wd = Workdir {
            path: path.to_path_buf(),
            state,
        };
        wd.save()?;
        Ok(wd)
    }

    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_vec_pretty(&self.state)?;
        fs::write(self.path.join(STATE_FILE_NAME), raw)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }
}
