//! Remote blob service backend.
//!
//! Talks to a token-authenticated blob REST API over `reqwest`:
//!
//! ```text
//! PUT  {api}/{pathname}      upload, x-add-random-suffix: 0
//! GET  {api}?cursor=...      paginated listing
//! POST {api}/delete          {"urls": [...]}
//! GET  {object url}          download, optional Range header
//! ```
//!
//! Object URLs are public; the bearer token is only ever sent to the API
//! endpoint, never to object URLs.

use crate::{
    models::object::StoredObject,
    services::object_store::{
        ByteRange, ObjectBody, ObjectStore, PutOptions, StoreError, StoreResult,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const API_VERSION: &str = "7";
const LIST_PAGE_SIZE: u32 = 1000;

pub struct HttpBlobStore {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    url: String,
    pathname: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    blobs: Vec<BlobEntry>,
    cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobEntry {
    pathname: String,
    url: String,
    uploaded_at: DateTime<Utc>,
    #[serde(default)]
    size: i64,
}

impl From<BlobEntry> for StoredObject {
    fn from(entry: BlobEntry) -> Self {
        StoredObject {
            pathname: entry.pathname,
            url: entry.url,
            uploaded_at: entry.uploaded_at,
            size: entry.size,
        }
    }
}

impl HttpBlobStore {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        let api_url = api_url.into().trim_end_matches('/').to_string();

        info!("HTTP blob backend initialized: api={}", api_url);

        Ok(Self {
            client,
            api_url,
            token: token.into(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
    }

    /// Turn a non-success response into a store error, keeping the body for
    /// the message.
    async fn check(response: Response, target: &str) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(target.to_string()),
            StatusCode::CONFLICT => StoreError::AlreadyExists(target.to_string()),
            _ => StoreError::Unavailable(format!("{} returned {}: {}", target, status, body)),
        })
    }
}

#[async_trait]
impl ObjectStore for HttpBlobStore {
    async fn put(
        &self,
        pathname: &str,
        data: Bytes,
        options: PutOptions,
    ) -> StoreResult<StoredObject> {
        let size = data.len() as i64;
        let request = self
            .client
            .put(format!("{}/{}", self.api_url, pathname))
            .header("x-add-random-suffix", "0")
            .header(
                "x-allow-overwrite",
                if options.overwrite { "1" } else { "0" },
            )
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data);

        let response = Self::check(self.authorized(request).send().await?, pathname).await?;
        let body: PutResponse = response.json().await?;
        debug!(pathname = %body.pathname, size, "stored object in blob service");

        Ok(StoredObject {
            pathname: body.pathname,
            url: body.url,
            uploaded_at: Utc::now(),
            size,
        })
    }

    async fn list(&self) -> StoreResult<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&self.api_url)
                .query(&[("limit", LIST_PAGE_SIZE.to_string())]);
            if let Some(cursor) = cursor.as_deref() {
                request = request.query(&[("cursor", cursor)]);
            }

            let response = Self::check(self.authorized(request).send().await?, "list").await?;
            let page: ListResponse = response.json().await?;
            objects.extend(page.blobs.into_iter().map(StoredObject::from));

            match page.cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete(&self, url: &str) -> StoreResult<()> {
        let request = self
            .client
            .post(format!("{}/delete", self.api_url))
            .json(&json!({ "urls": [url] }));
        Self::check(self.authorized(request).send().await?, url).await?;
        Ok(())
    }

    async fn get(&self, url: &str, range: Option<ByteRange>) -> StoreResult<ObjectBody> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(header::RANGE, range.header_value());
        }

        let response = Self::check(request.send().await?, url).await?;
        let status = response.status();
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(StoreError::from));

        Ok(ObjectBody {
            status,
            content_length,
            stream: Box::pin(stream),
        })
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
