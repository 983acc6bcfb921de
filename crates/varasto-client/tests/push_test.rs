//! Push and clone flows against an in-memory API fake: deduplicated
//! uploads, atomic-looking commits, and byte-identical round trips.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use varasto_client::{
    clone_collection, push, ApiClient, ClientError, Result, Workdir, WorkdirState,
    STATE_FILE_NAME,
};
use varasto_resolver::compute_state_at;
use varasto_types::{verify_digest, BlobRef, Collection, CollectionChangeset, NO_PARENT_ID};

/// In-memory stand-in for the server: blob store plus one collection with
/// head-linkage checking, counting probes and uploads.
struct FakeServer {
    blobs: Mutex<HashMap<BlobRef, Vec<u8>>>,
    collection: Mutex<Collection>,
    probes: AtomicUsize,
    uploads: AtomicUsize,
}

impl FakeServer {
    fn new() -> FakeServer {
        FakeServer {
            blobs: Mutex::new(HashMap::new()),
            collection: Mutex::new(empty_collection()),
            probes: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    fn seed_blob(&self, content: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(BlobRef::of(content), content.to_vec());
    }

    fn last_changeset(&self) -> CollectionChangeset {
        self.collection
            .lock()
            .unwrap()
            .changesets
            .last()
            .expect("no changesets committed")
            .clone()
    }
}

fn empty_collection() -> Collection {
    Collection {
        id: "c1".into(),
        directory: "root".into(),
        name: "fake".into(),
        created: None,
        desired_volumes: vec![1],
        head: NO_PARENT_ID.into(),
        changesets: vec![],
        metadata: BTreeMap::new(),
        tags: vec![],
    }
}

#[async_trait]
impl ApiClient for FakeServer {
    async fn blob_exists(&self, blob_ref: &BlobRef) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.lock().unwrap().contains_key(blob_ref))
    }

    async fn upload_blob(
        &self,
        blob_ref: &BlobRef,
        _collection_id: &str,
        chunk: Vec<u8>,
    ) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        verify_digest(&chunk, blob_ref)?;
        self.blobs.lock().unwrap().insert(*blob_ref, chunk);
        Ok(())
    }

    async fn download_blob(&self, blob_ref: &BlobRef) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(blob_ref)
            .cloned()
            .ok_or(ClientError::UnexpectedStatus {
                status: 404,
                url: blob_ref.as_hex(),
            })
    }

    async fn get_collection(&self, _id: &str) -> Result<Collection> {
        Ok(self.collection.lock().unwrap().clone())
    }

    async fn submit_changeset(
        &self,
        _collection_id: &str,
        changeset: &CollectionChangeset,
    ) -> Result<Collection> {
        let mut collection = self.collection.lock().unwrap();
        if changeset.parent != collection.head {
            return Err(ClientError::UnexpectedStatus {
                status: 409,
                url: "changesets".into(),
            });
        }
        collection.head = changeset.id.clone();
        collection.changesets.push(changeset.clone());
        Ok(collection.clone())
    }
}

fn fresh_workdir(tmp: &TempDir) -> Workdir {
    Workdir::initialize(
        tmp.path(),
        WorkdirState {
            changeset_id: NO_PARENT_ID.into(),
            collection: empty_collection(),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_push_uploads_and_advances_head() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), b"contents of a").unwrap();
    fs::write(tmp.path().join("b.txt"), b"contents of b").unwrap();

    let server = FakeServer::new();
    let mut wd = fresh_workdir(&tmp);

    assert!(push(&mut wd, &server).await.unwrap());

    assert_eq!(server.uploads.load(Ordering::SeqCst), 2);
    assert_ne!(wd.state.changeset_id, NO_PARENT_ID);
    assert_eq!(wd.state.collection.head, wd.state.changeset_id);

    let committed = server.last_changeset();
    assert_eq!(committed.files_created.len(), 2);
    assert!(committed.files_updated.is_empty());
    assert!(committed.files_deleted.is_empty());

    // the state file on disk reflects the new head
    let reopened = Workdir::open(tmp.path()).unwrap();
    assert_eq!(reopened.state.changeset_id, wd.state.changeset_id);
}

#[tokio::test]
async fn test_push_of_known_chunks_probes_but_never_uploads() {
    let tmp = TempDir::new().unwrap();
    let content = b"already on the server".to_vec();
    fs::write(tmp.path().join("dup.txt"), &content).unwrap();

    let server = FakeServer::new();
    server.seed_blob(&content);
    let mut wd = fresh_workdir(&tmp);

    assert!(push(&mut wd, &server).await.unwrap());

    assert_eq!(server.probes.load(Ordering::SeqCst), 1);
    assert_eq!(server.uploads.load(Ordering::SeqCst), 0, "no POST bodies");

    // the commit still references the deduplicated chunk
    let committed = server.last_changeset();
    assert_eq!(
        committed.files_created[0].blob_refs,
        vec![BlobRef::of(&content)]
    );
}

#[tokio::test]
async fn test_identical_files_upload_their_chunk_once() {
    let tmp = TempDir::new().unwrap();
    let content = b"same bytes in two files".to_vec();
    fs::write(tmp.path().join("one.txt"), &content).unwrap();
    fs::write(tmp.path().join("two.txt"), &content).unwrap();

    let server = FakeServer::new();
    let mut wd = fresh_workdir(&tmp);

    push(&mut wd, &server).await.unwrap();

    assert_eq!(server.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(server.probes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_push_without_changes_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), b"stable").unwrap();

    let server = FakeServer::new();
    let mut wd = fresh_workdir(&tmp);

    assert!(push(&mut wd, &server).await.unwrap());
    let uploads_after_first = server.uploads.load(Ordering::SeqCst);

    assert!(!push(&mut wd, &server).await.unwrap());
    assert_eq!(server.uploads.load(Ordering::SeqCst), uploads_after_first);
}

#[tokio::test]
async fn test_update_and_delete_flow() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("keep.txt"), b"v1").unwrap();
    fs::write(tmp.path().join("z-gone.txt"), b"z").unwrap();
    fs::write(tmp.path().join("a-gone.txt"), b"a").unwrap();

    let server = FakeServer::new();
    let mut wd = fresh_workdir(&tmp);
    push(&mut wd, &server).await.unwrap();

    fs::write(tmp.path().join("keep.txt"), b"v2, now with more bytes").unwrap();
    fs::remove_file(tmp.path().join("z-gone.txt")).unwrap();
    fs::remove_file(tmp.path().join("a-gone.txt")).unwrap();

    push(&mut wd, &server).await.unwrap();

    let committed = server.last_changeset();
    assert!(committed.files_created.is_empty());
    assert_eq!(committed.files_updated.len(), 1);
    assert_eq!(committed.files_updated[0].path, "keep.txt");
    // deleted paths are sorted lexicographically
    assert_eq!(committed.files_deleted, vec!["a-gone.txt", "z-gone.txt"]);

    // resolving the new head reproduces exactly what is on disk
    let state = compute_state_at(&wd.state.collection, &wd.state.changeset_id).unwrap();
    let paths: Vec<&str> = state.file_list().iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["keep.txt"]);
}

#[tokio::test]
async fn test_clone_round_trip_is_byte_identical() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join("a.txt"), b"alpha contents").unwrap();
    fs::create_dir(source.path().join("nested")).unwrap();
    fs::write(source.path().join("nested/b.bin"), vec![9u8; 4096]).unwrap();

    let server = FakeServer::new();
    let mut wd = fresh_workdir(&source);
    push(&mut wd, &server).await.unwrap();

    let target = TempDir::new().unwrap();
    let cloned = clone_collection(&server, "c1", "", target.path(), Some("checkout"))
        .await
        .unwrap();

    for rel in ["a.txt", "nested/b.bin"] {
        let original = fs::read(source.path().join(rel)).unwrap();
        let copied = fs::read(cloned.join(rel)).unwrap();
        assert_eq!(original, copied, "{rel} differs after round trip");
    }
    assert!(cloned.path().join(STATE_FILE_NAME).exists());
    assert_eq!(cloned.state.changeset_id, wd.state.changeset_id);

    // the recorded modification time is restored on disk
    let committed = server.last_changeset();
    let recorded = committed
        .files_created
        .iter()
        .find(|f| f.path == "a.txt")
        .unwrap();
    let on_disk = fs::metadata(cloned.join("a.txt")).unwrap().modified().unwrap();
    assert_eq!(DateTime::<Utc>::from(on_disk), recorded.modified);
}

#[tokio::test]
async fn test_clone_refuses_existing_directory() {
    let server = FakeServer::new();
    let target = TempDir::new().unwrap();
    fs::create_dir(target.path().join("busy")).unwrap();

    let err = clone_collection(&server, "c1", "", target.path(), Some("busy"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::WorkdirAlreadyExists(_)));
}

#[tokio::test]
async fn test_clone_of_older_revision() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join("a.txt"), b"first").unwrap();

    let server = FakeServer::new();
    let mut wd = fresh_workdir(&source);
    push(&mut wd, &server).await.unwrap();
    let first_rev = wd.state.changeset_id.clone();

    fs::write(source.path().join("b.txt"), b"second").unwrap();
    push(&mut wd, &server).await.unwrap();

    let target = TempDir::new().unwrap();
    let cloned = clone_collection(&server, "c1", &first_rev, target.path(), Some("old"))
        .await
        .unwrap();

    assert!(cloned.join("a.txt").exists());
    assert!(!cloned.join("b.txt").exists());
}
