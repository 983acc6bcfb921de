//! Identifier generation for new records.

use rand::distributions::Alphanumeric;
use rand::Rng;

fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn new_collection_id() -> String {
    random_id(8)
}

pub fn new_changeset_id() -> String {
    random_id(8)
}

pub fn new_directory_id() -> String {
    random_id(8)
}

pub fn new_mount_id() -> String {
    random_id(8)
}

pub fn new_integrity_verification_job_id() -> String {
    random_id(8)
}

pub fn new_volume_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
