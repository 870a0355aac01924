//! Latest/partial retrieval: pick the most recently committed object that
//! matches a filter and deliver all of it, or just its leading window.

use crate::{
    models::object::{LogicalName, StoredObject},
    services::object_store::{ByteRange, ObjectBody, ObjectStore, StoreError},
};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use clap::ValueEnum;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Default size of the `/latest/partial` window.
pub const PARTIAL_WINDOW: usize = 1024 * 8;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("no matching object found")]
    NotFound,
    #[error("invalid filename `{0}`")]
    InvalidName(String),
    #[error("store answered {0} for a read")]
    UnexpectedStatus(StatusCode),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// How full objects reach the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Stream the object through the relay, hiding the backing URL.
    #[default]
    Proxy,
    /// Answer with a temporary redirect to the backing URL.
    Redirect,
}

/// The object in `objects` matching `predicate` with the greatest
/// `uploaded_at`. Ties resolve to whichever the store listed last.
pub fn select_latest<I, P>(objects: I, mut predicate: P) -> Option<StoredObject>
where
    I: IntoIterator<Item = StoredObject>,
    P: FnMut(&StoredObject) -> bool,
{
    objects
        .into_iter()
        .filter(|obj| predicate(obj))
        .max_by_key(|obj| obj.uploaded_at)
}

pub struct Retrieval {
    store: Arc<dyn ObjectStore>,
    delivery: Delivery,
    latest_extension: String,
    partial_window: usize,
}

impl Retrieval {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        delivery: Delivery,
        latest_extension: impl Into<String>,
        partial_window: usize,
    ) -> Self {
        Self {
            store,
            delivery,
            latest_extension: latest_extension.into(),
            partial_window,
        }
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn partial_window(&self) -> usize {
        self.partial_window
    }

    async fn select<P>(&self, predicate: P) -> RetrievalResult<StoredObject>
    where
        P: FnMut(&StoredObject) -> bool,
    {
        let objects = self.store.list().await?;
        select_latest(objects, predicate).ok_or(RetrievalError::NotFound)
    }

    /// Most recent object of any name carrying the configured extension.
    pub async fn latest(&self) -> RetrievalResult<StoredObject> {
        let extension = self.latest_extension.as_str();
        self.select(|obj| obj.has_extension(extension)).await
    }

    /// Most recent committed revision of the logical file `file_name`.
    pub async fn named(&self, file_name: &str) -> RetrievalResult<StoredObject> {
        let name = LogicalName::parse(file_name)
            .ok_or_else(|| RetrievalError::InvalidName(file_name.to_string()))?;
        self.select(|obj| obj.matches_name(&name)).await
    }

    /// The object stored under exactly `pathname`.
    pub async fn exact(&self, pathname: &str) -> RetrievalResult<StoredObject> {
        self.select(|obj| obj.pathname == pathname).await
    }

    /// Open the full object for relaying.
    pub async fn fetch_full(&self, object: &StoredObject) -> RetrievalResult<ObjectBody> {
        let body = self.store.get(&object.url, None).await?;
        if body.status != StatusCode::OK {
            return Err(RetrievalError::UnexpectedStatus(body.status));
        }
        Ok(body)
    }

    /// Read at most `limit` leading bytes of `object`.
    ///
    /// The store may answer `200 OK` (object no larger than the window) or
    /// `206 Partial Content`; anything else is a failure. Bytes beyond
    /// `limit` are discarded if the store over-delivers.
    pub async fn fetch_prefix(
        &self,
        object: &StoredObject,
        limit: usize,
    ) -> RetrievalResult<Bytes> {
        let body = self
            .store
            .get(&object.url, Some(ByteRange::prefix(limit as u64)))
            .await?;
        if body.status != StatusCode::OK && body.status != StatusCode::PARTIAL_CONTENT {
            return Err(RetrievalError::UnexpectedStatus(body.status));
        }

        let expected = body.content_length.unwrap_or(0) as usize;
        let mut buf = BytesMut::with_capacity(limit.min(expected));
        let mut stream = body.stream;
        while buf.len() < limit {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk?;
            let take = chunk.len().min(limit - buf.len());
            buf.extend_from_slice(&chunk[..take]);
        }

        debug!(
            pathname = %object.pathname,
            status = %body.status,
            len = buf.len(),
            "fetched object prefix"
        );
        Ok(buf.freeze())
    }
}
