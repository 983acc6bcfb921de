//! # varasto-db
//!
//! Typed metadata layer over a transactional embedded key/value store
//! (LMDB via heed).
//!
//! Every record type gets a [`Repository`] in its own primary namespace;
//! queries beyond primary-key lookup go through secondary indices that the
//! repository maintains transactionally on every write. [`MetaDb`] wires up
//! the full set of repositories and indices and owns the environment.

mod records;
mod repo;

pub use records::{volume_pk, MetaDb};
pub use repo::{IndexDef, Repository, SetIndex, ValueIndex};

// transaction types are part of this crate's API surface
pub use heed::{RoTxn, RwTxn};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store: {0}")]
    Heed(#[from] heed::Error),

    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("{repo}: record not found: {key}")]
    NotFound { repo: &'static str, key: String },

    #[error("{index}: cannot index by empty value")]
    EmptyIndexValue { index: &'static str },

    #[error("{repo}: record has empty primary key")]
    EmptyPrimaryKey { repo: &'static str },
}

pub type Result<T> = std::result::Result<T, StoreError>;
