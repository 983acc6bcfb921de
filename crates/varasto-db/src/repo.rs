//! Generic record repository with secondary indices.
//!
//! Each record type lives in one LMDB database keyed by its primary key.
//! Secondary indices are separate databases whose keys encode
//! `(value, primary key)`; maintaining them is the repository's job: every
//! write diffs the old and new extracted index refs inside the caller's
//! transaction and applies the symmetric difference, so the index contents
//! are exactly the union of `extract(record)` over all live records.
//!
//! Two index shapes cover every query the engine needs:
//! - set index: a membership predicate; entries live under the constant
//!   value `" "` (LMDB forbids empty keys), so scanning the index
//!   enumerates the members.
//! - by-value index: an extractor yielding zero or more values per record,
//!   scanned per value.

use std::marker::PhantomData;
use std::ops::{Bound, ControlFlow};

use heed::types::{Bytes, SerdeBincode, Unit};
use heed::{Database, RoTxn, RwTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Result, StoreError};

/// Constant value under which set-index entries are stored.
pub(crate) const SET_INDEX_VALUE: &[u8] = b" ";

/// `[u16 be value-len][value][primary key]`. Entries for one value form a
/// contiguous key range, ordered by primary key.
fn index_entry_key(value: &[u8], id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + value.len() + id.len());
    key.extend_from_slice(&(value.len() as u16).to_be_bytes());
    key.extend_from_slice(value);
    key.extend_from_slice(id);
    key
}

fn index_value_prefix(value: &[u8]) -> Vec<u8> {
    index_entry_key(value, &[])
}

/// Smallest byte string strictly greater than every string with `prefix`.
/// `None` when the prefix is all 0xff (scan to the end instead).
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.last_mut() {
        if *last == 0xff {
            succ.pop();
        } else {
            *last += 1;
            return Some(succ);
        }
    }
    None
}

enum IndexKind<T> {
    /// Membership predicate; one entry under [`SET_INDEX_VALUE`] per member.
    Set(fn(&T) -> bool),
    /// Extractor yielding zero or more index values for the record.
    ByValue(fn(&T) -> Vec<Vec<u8>>),
}

/// One secondary index attached to a [`Repository`].
pub struct IndexDef<T> {
    name: &'static str,
    db: Database<Bytes, Unit>,
    kind: IndexKind<T>,
}

impl<T> IndexDef<T> {
    pub fn set(name: &'static str, db: Database<Bytes, Unit>, member: fn(&T) -> bool) -> Self {
        Self {
            name,
            db,
            kind: IndexKind::Set(member),
        }
    }

    pub fn by_value(
        name: &'static str,
        db: Database<Bytes, Unit>,
        extract: fn(&T) -> Vec<Vec<u8>>,
    ) -> Self {
        Self {
            name,
            db,
            kind: IndexKind::ByValue(extract),
        }
    }

    fn entry_keys(&self, record: &T, id: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.kind {
            IndexKind::Set(member) => Ok(if member(record) {
                vec![index_entry_key(SET_INDEX_VALUE, id)]
            } else {
                vec![]
            }),
            IndexKind::ByValue(extract) => extract(record)
                .into_iter()
                .map(|value| {
                    if value.is_empty() {
                        Err(StoreError::EmptyIndexValue { index: self.name })
                    } else {
                        Ok(index_entry_key(&value, id))
                    }
                })
                .collect(),
        }
    }
}

/// Typed access to one record type: primary-key CRUD, ordered scans, and
/// transparent index maintenance.
pub struct Repository<T> {
    name: &'static str,
    db: Database<Bytes, SerdeBincode<T>>,
    id_of: fn(&T) -> Vec<u8>,
    indices: Vec<IndexDef<T>>,
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    pub fn new(
        name: &'static str,
        db: Database<Bytes, SerdeBincode<T>>,
        id_of: fn(&T) -> Vec<u8>,
        indices: Vec<IndexDef<T>>,
    ) -> Self {
        Self {
            name,
            db,
            id_of,
            indices,
        }
    }

    pub fn get(&self, rtxn: &RoTxn, id: &[u8]) -> Result<Option<T>> {
        Ok(self.db.get(rtxn, id)?)
    }

    /// Like [`get`](Self::get) but a missing record is an error.
    pub fn require(&self, rtxn: &RoTxn, id: &[u8]) -> Result<T> {
        self.get(rtxn, id)?.ok_or_else(|| StoreError::NotFound {
            repo: self.name,
            key: String::from_utf8_lossy(id).into_owned(),
        })
    }

    fn extract_refs(&self, record: &T, id: &[u8]) -> Result<Vec<(usize, Vec<u8>)>> {
        let mut refs = Vec::new();
        for (pos, index) in self.indices.iter().enumerate() {
            for key in index.entry_keys(record, id)? {
                refs.push((pos, key));
            }
        }
        Ok(refs)
    }

    /// Inserts or replaces the record and reconciles every index: stale
    /// entries are removed, new ones added, all inside `wtxn`.
    pub fn put(&self, wtxn: &mut RwTxn, record: &T) -> Result<()> {
        let id = (self.id_of)(record);
        if id.is_empty() {
            return Err(StoreError::EmptyPrimaryKey { repo: self.name });
        }

        let old_refs = match self.db.get(wtxn, &id)? {
            Some(old) => self.extract_refs(&old, &id)?,
            None => Vec::new(),
        };
        let new_refs = self.extract_refs(record, &id)?;

        self.db.put(wtxn, &id, record)?;

        for (pos, key) in &old_refs {
            if !new_refs.iter().any(|(p, k)| p == pos && k == key) {
                self.indices[*pos].db.delete(wtxn, key)?;
            }
        }
        for (pos, key) in &new_refs {
            if !old_refs.iter().any(|(p, k)| p == pos && k == key) {
                self.indices[*pos].db.put(wtxn, key, &())?;
            }
        }

        Ok(())
    }

    /// Removes the record and all its index entries. Returns whether a
    /// record existed.
    pub fn delete(&self, wtxn: &mut RwTxn, id: &[u8]) -> Result<bool> {
        let Some(old) = self.db.get(wtxn, id)? else {
            return Ok(false);
        };
        for (pos, key) in self.extract_refs(&old, id)? {
            self.indices[pos].db.delete(wtxn, &key)?;
        }
        self.db.delete(wtxn, id)?;
        Ok(true)
    }

    /// Scans all records in primary-key order. The callback must not start
    /// nested transactions; returning `ControlFlow::Break` stops the scan
    /// cleanly.
    pub fn each(
        &self,
        rtxn: &RoTxn,
        mut f: impl FnMut(&[u8], T) -> ControlFlow<()>,
    ) -> Result<()> {
        for item in self.db.iter(rtxn)? {
            let (key, record) = item?;
            if f(key, record).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Key-ordered scan starting strictly after `start`; `None` starts from
    /// the first record. The exclusive bound makes this safe to drive with
    /// a persisted "last processed key" cursor without revisiting it.
    pub fn each_after(
        &self,
        rtxn: &RoTxn,
        start: Option<&[u8]>,
        mut f: impl FnMut(&[u8], T) -> ControlFlow<()>,
    ) -> Result<()> {
        let Some(start) = start else {
            return self.each(rtxn, f);
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Excluded(start), Bound::Unbounded);
        for item in self.db.range(rtxn, &range)? {
            let (key, record) = item?;
            if f(key, record).is_break() {
                break;
            }
        }
        Ok(())
    }
}

fn query_index(
    db: Database<Bytes, Unit>,
    rtxn: &RoTxn,
    value: &[u8],
    start: &[u8],
    mut f: impl FnMut(&[u8]) -> ControlFlow<()>,
) -> Result<()> {
    let prefix = index_value_prefix(value);
    let lower = if start.is_empty() {
        prefix.clone()
    } else {
        index_entry_key(value, start)
    };
    let upper = prefix_successor(&prefix);

    let range: (Bound<&[u8]>, Bound<&[u8]>) = (
        Bound::Included(lower.as_slice()),
        match &upper {
            Some(succ) => Bound::Excluded(succ.as_slice()),
            None => Bound::Unbounded,
        },
    );

    for item in db.range(rtxn, &range)? {
        let (key, _) = item?;
        if f(&key[prefix.len()..]).is_break() {
            break;
        }
    }
    Ok(())
}

/// Query handle for a set index: enumerates primary keys of member records.
pub struct SetIndex<T> {
    db: Database<Bytes, Unit>,
    _records: PhantomData<fn(&T)>,
}

impl<T> SetIndex<T> {
    pub fn new(db: Database<Bytes, Unit>) -> Self {
        Self {
            db,
            _records: PhantomData,
        }
    }

    /// Iterates member primary keys in key order, starting at `start`
    /// (inclusive; empty = first).
    pub fn each(
        &self,
        rtxn: &RoTxn,
        start: &[u8],
        f: impl FnMut(&[u8]) -> ControlFlow<()>,
    ) -> Result<()> {
        query_index(self.db, rtxn, SET_INDEX_VALUE, start, f)
    }
}

/// Query handle for a by-value index: enumerates primary keys per value.
pub struct ValueIndex<T> {
    db: Database<Bytes, Unit>,
    _records: PhantomData<fn(&T)>,
}

impl<T> ValueIndex<T> {
    pub fn new(db: Database<Bytes, Unit>) -> Self {
        Self {
            db,
            _records: PhantomData,
        }
    }

    /// Iterates primary keys indexed under `value`, starting at `start`
    /// (inclusive; empty = first).
    pub fn each(
        &self,
        rtxn: &RoTxn,
        value: &[u8],
        start: &[u8],
        f: impl FnMut(&[u8]) -> ControlFlow<()>,
    ) -> Result<()> {
        query_index(self.db, rtxn, value, start, f)
    }
}
