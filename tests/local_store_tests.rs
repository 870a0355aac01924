//! Tests for the SQLite + disk object store.

use archive_relay::services::{
    local_store::LocalObjectStore,
    object_store::{ByteRange, ObjectStore, PutOptions, StoreError},
};
use axum::http::StatusCode;
use bytes::Bytes;
use futures::StreamExt;
use tempfile::TempDir;

const BASE_URL: &str = "http://127.0.0.1:3000/blobs";

async fn open_store() -> (LocalObjectStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store =
        LocalObjectStore::connect("sqlite::memory:", dir.path().join("objects"), BASE_URL)
            .await
            .unwrap();
    (store, dir)
}

async fn read_all(
    store: &LocalObjectStore,
    url: &str,
    range: Option<ByteRange>,
) -> (StatusCode, Vec<u8>) {
    let body = store.get(url, range).await.unwrap();
    let status = body.status;
    let mut stream = body.stream;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    (status, out)
}

#[tokio::test]
async fn put_list_get_roundtrip() {
    let (store, _dir) = open_store().await;
    let object = store
        .put("1700000000_a.zip", Bytes::from_static(b"archive bytes"), PutOptions::default())
        .await
        .unwrap();

    assert_eq!(object.pathname, "1700000000_a.zip");
    assert_eq!(object.url, format!("{}/1700000000_a.zip", BASE_URL));
    assert_eq!(object.size, 13);

    let listed = store.list().await.unwrap();
    assert_eq!(listed, vec![object.clone()]);

    let (status, data) = read_all(&store, &object.url, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data, b"archive bytes");
}

#[tokio::test]
async fn put_without_overwrite_rejects_existing_pathname() {
    let (store, _dir) = open_store().await;
    store
        .put("1_a.zip", Bytes::from_static(b"first"), PutOptions::default())
        .await
        .unwrap();

    let err = store
        .put("1_a.zip", Bytes::from_static(b"second"), PutOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    let replaced = store
        .put("1_a.zip", Bytes::from_static(b"second"), PutOptions { overwrite: true })
        .await
        .unwrap();
    let (_, data) = read_all(&store, &replaced.url, None).await;
    assert_eq!(data, b"second");
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn ranged_reads_report_partial_content() {
    let (store, _dir) = open_store().await;
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let object = store
        .put("1_big.zip", Bytes::from(payload.clone()), PutOptions::default())
        .await
        .unwrap();

    let (status, data) = read_all(&store, &object.url, Some(ByteRange::prefix(8192))).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(data, &payload[..8192]);

    let middle = ByteRange {
        start: 100,
        end: 200,
    };
    let (status, data) = read_all(&store, &object.url, Some(middle)).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(data, &payload[100..200]);

    // A window larger than the object yields the whole object.
    let whole = ByteRange::prefix(1 << 20);
    let (status, data) = read_all(&store, &object.url, Some(whole)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data, payload);
}

#[tokio::test]
async fn delete_removes_row_and_file() {
    let (store, dir) = open_store().await;
    let object = store
        .put("1_a.zip", Bytes::from_static(b"bytes"), PutOptions::default())
        .await
        .unwrap();

    store.delete(&object.url).await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
    assert!(matches!(
        store.get(&object.url, None).await.map(|_| ()).unwrap_err(),
        StoreError::NotFound(_)
    ));
    assert!(matches!(
        store.delete(&object.url).await.unwrap_err(),
        StoreError::NotFound(_)
    ));

    // Shard directories are pruned once empty.
    let mut entries = std::fs::read_dir(dir.path().join("objects")).unwrap();
    assert!(entries.next().is_none());
}

#[tokio::test]
async fn foreign_urls_are_not_found() {
    let (store, _dir) = open_store().await;
    let err = store
        .delete("https://elsewhere.example.com/blobs/1_a.zip")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn unsafe_pathnames_are_rejected() {
    let (store, _dir) = open_store().await;
    for pathname in ["", "../escape.zip", "/abs.zip", "a\\b.zip"] {
        let err = store
            .put(pathname, Bytes::from_static(b"x"), PutOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidPathname(_)),
            "{pathname:?} should be rejected"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_puts_keep_the_winner_intact() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}", dir.path().join("meta/relay.db").display());
    let store = LocalObjectStore::connect(&db_url, dir.path().join("objects"), BASE_URL)
        .await
        .unwrap();

    for round in 0..20 {
        let pathname = format!("{round}_a.zip");
        let (first, second) = tokio::join!(
            store.put(&pathname, Bytes::from_static(b"first payload"), PutOptions::default()),
            store.put(&pathname, Bytes::from_static(b"second payload"), PutOptions::default()),
        );

        let (winner, expected) = match (first, second) {
            (Ok(object), Err(err)) => {
                assert!(matches!(err, StoreError::AlreadyExists(_)));
                (object, &b"first payload"[..])
            }
            (Err(err), Ok(object)) => {
                assert!(matches!(err, StoreError::AlreadyExists(_)));
                (object, &b"second payload"[..])
            }
            (first, second) => panic!("round {round}: {first:?} / {second:?}"),
        };

        let (status, data) = read_all(&store, &winner.url, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data, expected, "round {round}");
    }

    assert_eq!(store.list().await.unwrap().len(), 20);

    // No staged temp files are left behind.
    let mut stack = vec![dir.path().join("objects")];
    while let Some(path) = stack.pop() {
        for entry in std::fs::read_dir(&path).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                stack.push(entry.path());
            } else {
                let name = entry.file_name();
                assert!(!name.to_string_lossy().starts_with(".tmp-"), "{name:?}");
            }
        }
    }
}

#[tokio::test]
async fn file_database_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}", dir.path().join("meta/relay.db").display());
    let objects = dir.path().join("objects");

    {
        let store = LocalObjectStore::connect(&db_url, &objects, BASE_URL).await.unwrap();
        store
            .put("1_a.zip", Bytes::from_static(b"persisted"), PutOptions::default())
            .await
            .unwrap();
        store.db.close().await;
    }

    let store = LocalObjectStore::connect(&db_url, &objects, BASE_URL).await.unwrap();
    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    let (_, data) = read_all(&store, &listed[0].url, None).await;
    assert_eq!(data, b"persisted");
}
