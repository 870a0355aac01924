//! In-memory object store with failure injection.

use archive_relay::{
    models::object::StoredObject,
    services::object_store::{
        ByteRange, ObjectBody, ObjectStore, PutOptions, StoreError, StoreResult,
    },
};
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

const URL_SCHEME: &str = "memory://";

/// Bytes per item on streams handed out by `get`.
const STREAM_CHUNK: usize = 1000;

#[derive(Clone)]
struct Entry {
    data: Bytes,
    uploaded_at: DateTime<Utc>,
}

/// Object store keeping everything in a map keyed by pathname.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Entry>>,
    pub fail_puts: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub fail_lists: AtomicBool,
    /// Answer ranged reads with the whole object and `200 OK`.
    pub ignore_ranges: AtomicBool,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url_for(pathname: &str) -> String {
        format!("{}{}", URL_SCHEME, pathname)
    }

    /// Seed an object with a fixed upload time.
    pub fn insert_at(&self, pathname: &str, data: &[u8], uploaded_at_secs: i64) {
        let uploaded_at = Utc
            .timestamp_opt(uploaded_at_secs, 0)
            .single()
            .expect("valid timestamp");
        self.objects.lock().unwrap().insert(
            pathname.to_string(),
            Entry {
                data: Bytes::copy_from_slice(data),
                uploaded_at,
            },
        );
    }

    pub fn pathnames(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn data(&self, pathname: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(pathname)
            .map(|e| e.data.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn pathname_from_url(url: &str) -> StoreResult<&str> {
        url.strip_prefix(URL_SCHEME)
            .ok_or_else(|| StoreError::NotFound(url.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        pathname: &str,
        data: Bytes,
        options: PutOptions,
    ) -> StoreResult<StoredObject> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected put failure".into()));
        }
        let mut objects = self.objects.lock().unwrap();
        if !options.overwrite && objects.contains_key(pathname) {
            return Err(StoreError::AlreadyExists(pathname.to_string()));
        }
        let uploaded_at = Utc::now();
        let size = data.len() as i64;
        objects.insert(pathname.to_string(), Entry { data, uploaded_at });
        self.puts.fetch_add(1, Ordering::SeqCst);

        Ok(StoredObject {
            pathname: pathname.to_string(),
            url: Self::url_for(pathname),
            uploaded_at,
            size,
        })
    }

    async fn list(&self) -> StoreResult<Vec<StoredObject>> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected list failure".into()));
        }
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .map(|(pathname, entry)| StoredObject {
                pathname: pathname.clone(),
                url: Self::url_for(pathname),
                uploaded_at: entry.uploaded_at,
                size: entry.data.len() as i64,
            })
            .collect())
    }

    async fn delete(&self, url: &str) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected delete failure".into()));
        }
        let pathname = Self::pathname_from_url(url)?;
        match self.objects.lock().unwrap().remove(pathname) {
            Some(_) => {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound(pathname.to_string())),
        }
    }

    async fn get(&self, url: &str, range: Option<ByteRange>) -> StoreResult<ObjectBody> {
        let pathname = Self::pathname_from_url(url)?;
        let data = self
            .data(pathname)
            .ok_or_else(|| StoreError::NotFound(pathname.to_string()))?;

        let size = data.len();
        let range = range.filter(|_| !self.ignore_ranges.load(Ordering::SeqCst));
        let (status, body) = match range {
            None => (StatusCode::OK, data),
            Some(range) => {
                let start = (range.start as usize).min(size);
                let end = (range.end as usize).min(size);
                if start == 0 && end == size {
                    (StatusCode::OK, data)
                } else {
                    (StatusCode::PARTIAL_CONTENT, data.slice(start..end))
                }
            }
        };

        let content_length = Some(body.len() as u64);
        let pieces: Vec<StoreResult<Bytes>> = (0..body.len())
            .step_by(STREAM_CHUNK)
            .map(|at| Ok(body.slice(at..(at + STREAM_CHUNK).min(body.len()))))
            .collect();

        Ok(ObjectBody {
            status,
            content_length,
            stream: Box::pin(futures::stream::iter(pieces)),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
