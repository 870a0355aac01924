//! Object store contract shared by every backend.
//!
//! The relay only needs four operations from the store: put, list, delete and
//! a (possibly ranged) get. Objects are addressed by pathname on write and by
//! the URL the store handed back on every other call.

use crate::models::object::StoredObject;
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;

/// A boxed stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object `{0}` already exists")]
    AlreadyExists(String),
    #[error("invalid object pathname `{0}`")]
    InvalidPathname(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Half-open byte range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// The leading `len` bytes of an object.
    pub fn prefix(len: u64) -> Self {
        Self { start: 0, end: len }
    }

    /// HTTP `Range` header value. The header's end bound is inclusive.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PutOptions {
    /// Replace an existing object with the same pathname instead of failing.
    pub overwrite: bool,
}

/// Body returned by [`ObjectStore::get`].
///
/// `status` is `200 OK` when the whole object is delivered and
/// `206 Partial Content` when only the requested range is.
pub struct ObjectBody {
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Store `data` under `pathname` and return the committed object.
    async fn put(&self, pathname: &str, data: Bytes, options: PutOptions)
    -> StoreResult<StoredObject>;

    /// Every live object in the store.
    async fn list(&self) -> StoreResult<Vec<StoredObject>>;

    /// Delete the object at `url`.
    async fn delete(&self, url: &str) -> StoreResult<()>;

    /// Read the object at `url`, optionally restricted to `range`.
    async fn get(&self, url: &str, range: Option<ByteRange>) -> StoreResult<ObjectBody>;

    /// Short backend identifier for logs.
    fn backend_name(&self) -> &'static str;
}
