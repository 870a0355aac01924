//! src/services/local_store.rs
//!
//! LocalObjectStore — an [`ObjectStore`] backed by SQLite for metadata and
//! local disk for object payloads, sharded beneath
//! `base_path/{shard}/{shard}/{pathname}`. Used for development and
//! single-host deployments; object URLs point at the relay's own
//! `/blobs/{pathname}` route.

use crate::{
    models::object::{ObjectRow, StoredObject},
    services::object_store::{
        ByteRange, ObjectBody, ObjectStore, PutOptions, StoreError, StoreResult,
    },
};
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_PATHNAME_LEN: usize = 1024;

/// Schema applied on connect. Every statement is idempotent.
const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix for object URLs, e.g. `http://127.0.0.1:3000/blobs`.
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Open the metadata database at `database_url`, make sure the payload
    /// directory exists and apply the schema.
    pub async fn connect(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let in_memory = database_url.contains(":memory:");
        if !in_memory {
            let db_path = database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:")
                .trim_start_matches("file:");
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).await?;
                    info!("Created missing directory {:?}", parent);
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // An in-memory database lives as long as its single connection.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self::new(Arc::new(pool), base_path, public_base_url);
        store.migrate().await?;
        Ok(store)
    }

    /// Run the embedded schema statements one by one.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Reject pathnames that could escape `base_path`.
    fn ensure_pathname_safe(pathname: &str) -> StoreResult<()> {
        let invalid = || StoreError::InvalidPathname(pathname.to_string());
        if pathname.is_empty() || pathname.len() > MAX_PATHNAME_LEN {
            return Err(invalid());
        }
        if pathname
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(invalid());
        }
        if pathname
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    /// Two-level shard identifiers from MD5(pathname), as lowercase hex.
    fn object_shards(pathname: &str) -> (String, String) {
        let digest = md5::compute(pathname);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, pathname: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(pathname);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(pathname);
        path
    }

    fn url_for(&self, pathname: &str) -> String {
        format!("{}/{}", self.public_base_url, pathname)
    }

    /// Map a URL handed out by [`Self::url_for`] back to its pathname.
    fn pathname_from_url<'a>(&self, url: &'a str) -> StoreResult<&'a str> {
        url.strip_prefix(self.public_base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|pathname| !pathname.is_empty())
            .ok_or_else(|| StoreError::NotFound(url.to_string()))
    }

    fn to_stored(&self, row: ObjectRow) -> StoredObject {
        StoredObject {
            url: self.url_for(&row.pathname),
            pathname: row.pathname,
            uploaded_at: row.uploaded_at,
            size: row.size_bytes,
        }
    }

    async fn fetch_row(&self, pathname: &str) -> StoreResult<Option<ObjectRow>> {
        Ok(sqlx::query_as::<_, ObjectRow>(
            "SELECT id, pathname, size_bytes, etag, uploaded_at
             FROM objects WHERE pathname = ?",
        )
        .bind(pathname)
        .fetch_optional(&*self.db)
        .await?)
    }

    /// Write `data` to a temp file beside `file_path` and fsync it. Returns
    /// the temp path and the hex MD5 of the payload. The caller renames the
    /// temp file into place once the metadata row is claimed.
    async fn stage_payload(
        &self,
        file_path: &Path,
        data: &[u8],
    ) -> StoreResult<(PathBuf, String)> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let mut digest = Context::new();
        digest.consume(data);

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        Ok((tmp_path, format!("{:x}", digest.compute())))
    }

    /// Remove empty shard directories up to (not including) `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.base_path.as_path();
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        pathname: &str,
        data: Bytes,
        options: PutOptions,
    ) -> StoreResult<StoredObject> {
        Self::ensure_pathname_safe(pathname)?;
        if !options.overwrite && self.fetch_row(pathname).await?.is_some() {
            return Err(StoreError::AlreadyExists(pathname.to_string()));
        }

        let file_path = self.object_path(pathname);
        let (tmp_path, etag) = self.stage_payload(&file_path, &data).await?;
        let size_bytes = data.len() as i64;
        let uploaded_at = Utc::now();

        let sql = if options.overwrite {
            "INSERT INTO objects (id, pathname, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(pathname) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at
             RETURNING id, pathname, size_bytes, etag, uploaded_at"
        } else {
            "INSERT INTO objects (id, pathname, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, pathname, size_bytes, etag, uploaded_at"
        };

        // Claim the row before the payload reaches `file_path`.
        let inserted = sqlx::query_as::<_, ObjectRow>(sql)
            .bind(Uuid::new_v4())
            .bind(pathname)
            .bind(size_bytes)
            .bind(&etag)
            .bind(uploaded_at)
            .fetch_one(&*self.db)
            .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return if is_unique_violation(&err) {
                    Err(StoreError::AlreadyExists(pathname.to_string()))
                } else {
                    Err(StoreError::Sqlx(err))
                };
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            if !options.overwrite {
                let _ = sqlx::query("DELETE FROM objects WHERE id = ?")
                    .bind(row.id)
                    .execute(&*self.db)
                    .await;
            }
            return Err(StoreError::Io(err));
        }

        debug!(pathname, size_bytes, "stored object on local disk");
        Ok(self.to_stored(row))
    }

    async fn list(&self) -> StoreResult<Vec<StoredObject>> {
        let rows = sqlx::query_as::<_, ObjectRow>(
            "SELECT id, pathname, size_bytes, etag, uploaded_at
             FROM objects ORDER BY uploaded_at ASC, pathname ASC",
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(rows.into_iter().map(|row| self.to_stored(row)).collect())
    }

    async fn delete(&self, url: &str) -> StoreResult<()> {
        let pathname = self.pathname_from_url(url)?;
        let result = sqlx::query("DELETE FROM objects WHERE pathname = ?")
            .bind(pathname)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(pathname.to_string()));
        }

        let file_path = self.object_path(pathname);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn get(&self, url: &str, range: Option<ByteRange>) -> StoreResult<ObjectBody> {
        let pathname = self.pathname_from_url(url)?;
        let row = self
            .fetch_row(pathname)
            .await?
            .ok_or_else(|| StoreError::NotFound(pathname.to_string()))?;

        let file_path = self.object_path(pathname);
        let mut file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(pathname.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        let size = row.size_bytes.max(0) as u64;
        let (status, start, end) = match range {
            None => (StatusCode::OK, 0, size),
            Some(range) => {
                let start = range.start.min(size);
                let end = range.end.min(size);
                if start == 0 && end == size {
                    (StatusCode::OK, 0, size)
                } else {
                    (StatusCode::PARTIAL_CONTENT, start, end)
                }
            }
        };

        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        let length = end.saturating_sub(start);
        let stream = ReaderStream::new(file.take(length)).map(|res| res.map_err(StoreError::Io));

        Ok(ObjectBody {
            status,
            content_length: Some(length),
            stream: Box::pin(stream),
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
