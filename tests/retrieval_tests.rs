//! Tests for latest/named selection and prefix reads.

mod common;

use archive_relay::services::{
    object_store::ObjectStore,
    retrieval::{Delivery, PARTIAL_WINDOW, Retrieval, RetrievalError},
};
use axum::http::StatusCode;
use common::{MemoryStore, payload};
use futures::StreamExt;
use std::sync::{Arc, atomic::Ordering};

fn retrieval(store: &Arc<MemoryStore>) -> Retrieval {
    Retrieval::new(store.clone(), Delivery::Proxy, ".zip", PARTIAL_WINDOW)
}

#[tokio::test]
async fn latest_picks_newest_zip() {
    let store = Arc::new(MemoryStore::new());
    store.insert_at("10_a.zip", b"a", 10);
    store.insert_at("30_notes.txt", b"t", 30);
    store.insert_at("20_b.zip", b"b", 20);

    let latest = retrieval(&store).latest().await.unwrap();
    assert_eq!(latest.pathname, "20_b.zip");
}

#[tokio::test]
async fn latest_on_empty_store_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    store.insert_at("10_notes.txt", b"t", 10);
    let err = retrieval(&store).latest().await.unwrap_err();
    assert!(matches!(err, RetrievalError::NotFound));
}

#[tokio::test]
async fn named_matches_exact_and_timestamped_revisions() {
    let store = Arc::new(MemoryStore::new());
    store.insert_at("a.zip", b"plain", 5);
    store.insert_at("10_a.zip", b"first", 10);
    store.insert_at("40_aa.zip", b"other", 40);
    store.insert_at("20_a.zip", b"second", 20);

    let r = retrieval(&store);
    assert_eq!(r.named("a.zip").await.unwrap().pathname, "20_a.zip");
    assert_eq!(r.named("aa.zip").await.unwrap().pathname, "40_aa.zip");
    assert!(matches!(
        r.named("missing.zip").await.unwrap_err(),
        RetrievalError::NotFound
    ));
    assert!(matches!(
        r.named("..").await.unwrap_err(),
        RetrievalError::InvalidName(_)
    ));
}

#[tokio::test]
async fn prefix_of_small_object_is_whole_object() {
    let store = Arc::new(MemoryStore::new());
    let data = payload(5000, 4);
    store.insert_at("10_a.zip", &data, 10);

    let r = retrieval(&store);
    let object = r.latest().await.unwrap();
    let bytes = r.fetch_prefix(&object, PARTIAL_WINDOW).await.unwrap();
    assert_eq!(bytes.len(), 5000);
    assert_eq!(&bytes[..], &data[..]);
}

#[tokio::test]
async fn prefix_of_large_object_is_truncated_to_window() {
    let store = Arc::new(MemoryStore::new());
    let data = payload(100_000, 5);
    store.insert_at("10_a.zip", &data, 10);

    let r = retrieval(&store);
    let object = r.latest().await.unwrap();
    let bytes = r.fetch_prefix(&object, PARTIAL_WINDOW).await.unwrap();
    assert_eq!(bytes.len(), PARTIAL_WINDOW);
    assert_eq!(&bytes[..], &data[..PARTIAL_WINDOW]);
}

#[tokio::test]
async fn prefix_never_exceeds_limit_when_store_ignores_range() {
    let store = Arc::new(MemoryStore::new());
    let data = payload(50_000, 6);
    store.insert_at("10_a.zip", &data, 10);
    store.ignore_ranges.store(true, Ordering::SeqCst);

    let r = retrieval(&store);
    let object = r.latest().await.unwrap();
    let bytes = r.fetch_prefix(&object, 1500).await.unwrap();
    assert_eq!(bytes.len(), 1500);
    assert_eq!(&bytes[..], &data[..1500]);
}

#[tokio::test]
async fn exact_object_size_equal_to_window_is_returned_whole() {
    let store = Arc::new(MemoryStore::new());
    let data = payload(PARTIAL_WINDOW, 8);
    store.insert_at("10_a.zip", &data, 10);

    let body = store
        .get(
            &MemoryStore::url_for("10_a.zip"),
            Some(archive_relay::services::object_store::ByteRange::prefix(
                PARTIAL_WINDOW as u64,
            )),
        )
        .await
        .unwrap();
    assert_eq!(body.status, StatusCode::OK);

    let r = retrieval(&store);
    let object = r.latest().await.unwrap();
    assert_eq!(
        r.fetch_prefix(&object, PARTIAL_WINDOW).await.unwrap().len(),
        PARTIAL_WINDOW
    );
}

#[tokio::test]
async fn fetch_full_streams_entire_object() {
    let store = Arc::new(MemoryStore::new());
    let data = payload(12_345, 2);
    store.insert_at("10_a.zip", &data, 10);

    let r = retrieval(&store);
    let object = r.exact("10_a.zip").await.unwrap();
    let body = r.fetch_full(&object).await.unwrap();
    assert_eq!(body.content_length, Some(12_345));

    let mut collected = Vec::new();
    let mut stream = body.stream;
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, data);
}

#[tokio::test]
async fn vanished_object_surfaces_store_not_found() {
    let store = Arc::new(MemoryStore::new());
    store.insert_at("10_a.zip", b"x", 10);

    let r = retrieval(&store);
    let object = r.latest().await.unwrap();
    store.delete(&object.url).await.unwrap();

    let err = r.fetch_prefix(&object, 10).await.unwrap_err();
    assert!(matches!(err, RetrievalError::Store(_)));
}
