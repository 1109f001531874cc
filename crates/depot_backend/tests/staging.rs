use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;

use depot_backend::ObjectStagingBackend;
use depot_core::memory::{MemoryBlobStore, MemoryMetadataStore};
use depot_core::{Error, Missing, SessionId, SessionManager, StagingBackend, UploadConfig};
use depot_objectstore::Filesystem;

async fn staging() -> (tempfile::TempDir, ObjectStagingBackend) {
    let dir = tempfile::tempdir().expect("tempdir");
    let fs = Filesystem::new(dir.path()).await.expect("filesystem store");
    (dir, ObjectStagingBackend::new(Arc::new(fs)))
}

#[tokio::test]
async fn chunks_are_keyed_by_session_and_index() {
    let (dir, staging) = staging().await;
    let session = SessionId::new();

    staging.put(&session, 3, Bytes::from_static(b"three")).await.unwrap();

    let path = dir
        .path()
        .join("staging")
        .join(session.to_string())
        .join("3");
    assert_eq!(std::fs::read(path).unwrap(), b"three");
    assert_eq!(
        staging.get(&session, 3).await.unwrap(),
        Bytes::from_static(b"three")
    );
}

#[tokio::test]
async fn missing_chunk_maps_to_not_found() {
    let (_dir, staging) = staging().await;
    let session = SessionId::new();

    match staging.get(&session, 0).await {
        Err(Error::NotFound(Missing::Chunk { session: s, index })) => {
            assert_eq!(s, session);
            assert_eq!(index, 0);
        }
        other => panic!("expected missing chunk, got {other:?}"),
    }
}

#[tokio::test]
async fn purge_removes_every_chunk_of_the_session() {
    let (dir, staging) = staging().await;
    let (a, b) = (SessionId::new(), SessionId::new());
    for i in 0..3 {
        staging.put(&a, i, Bytes::from_static(b"a")).await.unwrap();
    }
    staging.put(&b, 0, Bytes::from_static(b"b")).await.unwrap();

    staging.purge_all(&a).await.unwrap();
    staging.purge_all(&a).await.unwrap();

    assert!(!dir.path().join("staging").join(a.to_string()).exists());
    assert!(staging.get(&b, 0).await.is_ok());

    staging.delete(&b, 0).await.unwrap();
    staging.delete(&b, 0).await.unwrap();
    assert!(staging.get(&b, 0).await.is_err());
}

#[tokio::test]
async fn session_manager_over_filesystem_staging() {
    let (dir, staging) = staging().await;
    let blobs = Arc::new(MemoryBlobStore::new(4));
    let manager = SessionManager::new(
        Arc::new(MemoryMetadataStore::default()),
        Arc::new(staging),
        blobs.clone(),
        UploadConfig::default(),
    );

    let id = manager.init_upload("a.txt", 3, 4).await.unwrap();
    manager.record_chunk(&id, 0, Bytes::from_static(b"abcd")).await.unwrap();
    manager.record_chunk(&id, 2, Bytes::from_static(b"ij")).await.unwrap();
    manager.record_chunk(&id, 1, Bytes::from_static(b"efgh")).await.unwrap();
    manager.finalize(&id).await.unwrap();

    let (_, body) = manager.retrieve("a.txt").await.unwrap();
    let pieces: Vec<Bytes> = body.try_collect().await.unwrap();
    assert_eq!(pieces.concat(), b"abcdefghij");

    manager.cleanup().wait_idle().await;
    assert!(!dir.path().join("staging").join(id.to_string()).exists());
}
