//! src/services/upload_service.rs
//!
//! UploadService — the chunked upload protocol plus whole-file commits.
//!
//! Every chunk drives exactly one transition, chosen by its flags:
//! - `isStarted`: (re)start the session, write the payload; when
//!   `isCompleted` is also set, fall through to completion.
//! - neither flag: append the payload.
//! - `isCompleted`: append any trailing payload, finalize, run the
//!   overwrite policy and commit `<unix seconds>_<name>` to the store.
//!
//! A completion attempt always releases the session, whether or not the
//! commit succeeded. Failures on begin/append leave the session in place so
//! the client can retry the chunk.

use crate::{
    models::{
        chunk::{ChunkRequest, ChunkResponse, ChunkStatus},
        object::{LogicalName, StoredObject},
    },
    services::{
        object_store::{ObjectStore, PutOptions, StoreError},
        overwrite::{OverwritePolicy, OverwriteReport},
        session_store::{SessionError, SessionGuard, SessionStore},
    },
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Transition requested by a chunk's `isStarted` / `isCompleted` flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkAction {
    Begin { complete: bool },
    Append,
    Complete,
}

impl ChunkAction {
    pub fn from_flags(is_started: bool, is_completed: bool) -> Self {
        match (is_started, is_completed) {
            (true, complete) => ChunkAction::Begin { complete },
            (false, false) => ChunkAction::Append,
            (false, true) => ChunkAction::Complete,
        }
    }
}

/// A validated, decoded chunk.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub name: LogicalName,
    pub payload: Bytes,
    pub number: u32,
    pub total: u32,
    pub action: ChunkAction,
}

impl Chunk {
    pub fn decode(request: ChunkRequest) -> UploadResult<Self> {
        let name = LogicalName::parse(&request.file_name)
            .ok_or_else(|| UploadError::InvalidRequest("fileName is required".into()))?;
        let payload = general_purpose::STANDARD
            .decode(request.data.as_bytes())
            .map_err(|err| {
                UploadError::InvalidRequest(format!("data is not valid base64: {err}"))
            })?;

        Ok(Self {
            name,
            payload: Bytes::from(payload),
            number: request.chunk_number,
            total: request.total_chunks,
            action: ChunkAction::from_flags(request.is_started, request.is_completed),
        })
    }
}

#[derive(Debug)]
pub enum ChunkOutcome {
    Started {
        name: LogicalName,
        received: u64,
    },
    Appending {
        name: LogicalName,
        received: u64,
        chunks: u32,
    },
    Completed {
        object: StoredObject,
        overwrite: OverwriteReport,
    },
}

impl From<ChunkOutcome> for ChunkResponse {
    fn from(outcome: ChunkOutcome) -> Self {
        match outcome {
            ChunkOutcome::Started { name, received } => ChunkResponse {
                status: ChunkStatus::Started,
                message: Some(format!("Started upload of {name} ({received} bytes)")),
                url: None,
                filename: None,
            },
            ChunkOutcome::Appending {
                name,
                received,
                chunks,
            } => ChunkResponse {
                status: ChunkStatus::Appending,
                message: Some(format!(
                    "Appended chunk {chunks} to {name} ({received} bytes)"
                )),
                url: None,
                filename: None,
            },
            ChunkOutcome::Completed { object, overwrite } => ChunkResponse {
                status: ChunkStatus::Completed,
                message: Some(if overwrite.is_clean() {
                    format!(
                        "Upload completed, replaced {} revision(s)",
                        overwrite.deleted.len()
                    )
                } else {
                    format!(
                        "Upload completed, {} earlier revision(s) could not be removed",
                        overwrite.failures.len()
                    )
                }),
                url: Some(object.url),
                filename: Some(object.pathname),
            },
        }
    }
}

pub struct UploadService {
    sessions: Arc<SessionStore>,
    store: Arc<dyn ObjectStore>,
    policy: OverwritePolicy,
    strict_order: bool,
}

impl UploadService {
    pub fn new(
        sessions: Arc<SessionStore>,
        store: Arc<dyn ObjectStore>,
        strict_order: bool,
    ) -> Self {
        Self {
            sessions,
            store,
            policy: OverwritePolicy,
            strict_order,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Apply one chunk to its session.
    pub async fn handle_chunk(&self, chunk: Chunk) -> UploadResult<ChunkOutcome> {
        let mut session = self.sessions.lock(chunk.name.as_str()).await;

        match chunk.action {
            ChunkAction::Begin { complete } => {
                session.begin(chunk.total).await?;
                if complete {
                    return self.complete(&mut session, &chunk).await;
                }
                let received = session.append(&chunk.payload, chunk.number).await?;
                info!(name = %chunk.name, total = chunk.total, "started chunked upload");
                Ok(ChunkOutcome::Started {
                    name: chunk.name,
                    received,
                })
            }
            ChunkAction::Append => {
                self.check_order(&session, &chunk)?;
                let received = session.append(&chunk.payload, chunk.number).await?;
                let chunks = session.session().map_or(0, |s| s.chunks_received);
                Ok(ChunkOutcome::Appending {
                    name: chunk.name,
                    received,
                    chunks,
                })
            }
            ChunkAction::Complete => {
                self.check_order(&session, &chunk)?;
                self.complete(&mut session, &chunk).await
            }
        }
    }

    /// The session must exist; its next expected ordinal is checked against
    /// the chunk, rejecting mismatches only in strict mode.
    fn check_order(&self, session: &SessionGuard<'_>, chunk: &Chunk) -> UploadResult<()> {
        let Some(current) = session.session() else {
            return Err(SessionError::NotFound(chunk.name.to_string()).into());
        };
        if chunk.number == current.next_chunk {
            return Ok(());
        }
        if self.strict_order {
            return Err(SessionError::OutOfOrder {
                name: chunk.name.to_string(),
                expected: current.next_chunk,
                got: chunk.number,
            }
            .into());
        }
        warn!(
            name = %chunk.name,
            expected = current.next_chunk,
            got = chunk.number,
            "chunk arrived out of order; accepting"
        );
        Ok(())
    }

    async fn complete(
        &self,
        session: &mut SessionGuard<'_>,
        chunk: &Chunk,
    ) -> UploadResult<ChunkOutcome> {
        let result = self.commit(session, chunk).await;
        if let Err(err) = session.release().await {
            warn!(name = %chunk.name, "failed to release upload session: {}", err);
        }
        if let Err(err) = &result {
            warn!(name = %chunk.name, "chunked upload commit failed: {}", err);
        }
        result
    }

    async fn commit(
        &self,
        session: &mut SessionGuard<'_>,
        chunk: &Chunk,
    ) -> UploadResult<ChunkOutcome> {
        session.append(&chunk.payload, chunk.number).await?;
        let content = session.finalize().await?;
        let size = content.len();

        let overwrite = self.policy.apply(self.store.as_ref(), &chunk.name).await;

        let pathname = chunk.name.committed_name(Utc::now().timestamp());
        let object = self
            .store
            .put(&pathname, content, PutOptions::default())
            .await?;
        session.mark_committed()?;

        info!(
            pathname = %object.pathname,
            size,
            replaced = overwrite.deleted.len(),
            backend = self.store.backend_name(),
            "committed chunked upload"
        );
        Ok(ChunkOutcome::Completed { object, overwrite })
    }

    /// Abandon the in-progress session for `file_name`.
    pub async fn abandon(&self, file_name: &str) -> UploadResult<()> {
        let name = LogicalName::parse(file_name)
            .ok_or_else(|| UploadError::InvalidRequest("filename is required".into()))?;
        Ok(self.sessions.abandon(name.as_str()).await?)
    }

    /// Commit a whole file in one call as `<unix seconds>_<name>`.
    pub async fn upload_file(&self, file_name: &str, data: Bytes) -> UploadResult<StoredObject> {
        let name = LogicalName::parse(file_name)
            .ok_or_else(|| UploadError::InvalidRequest("Filename is required".into()))?;
        let pathname = name.committed_name(Utc::now().timestamp());
        let object = self
            .store
            .put(&pathname, data, PutOptions::default())
            .await?;
        info!(pathname = %object.pathname, size = object.size, "uploaded whole file");
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_actions() {
        assert_eq!(
            ChunkAction::from_flags(true, false),
            ChunkAction::Begin { complete: false }
        );
        assert_eq!(
            ChunkAction::from_flags(true, true),
            ChunkAction::Begin { complete: true }
        );
        assert_eq!(ChunkAction::from_flags(false, false), ChunkAction::Append);
        assert_eq!(ChunkAction::from_flags(false, true), ChunkAction::Complete);
    }

    #[test]
    fn decode_rejects_missing_name_and_bad_base64() {
        let missing = ChunkRequest {
            data: general_purpose::STANDARD.encode(b"abc"),
            ..Default::default()
        };
        assert!(matches!(
            Chunk::decode(missing),
            Err(UploadError::InvalidRequest(_))
        ));

        let garbage = ChunkRequest {
            data: "not base64!!".into(),
            file_name: "a.zip".into(),
            ..Default::default()
        };
        assert!(matches!(
            Chunk::decode(garbage),
            Err(UploadError::InvalidRequest(_))
        ));
    }

    #[test]
    fn decode_sanitizes_name_and_payload() {
        let chunk = Chunk::decode(ChunkRequest {
            data: general_purpose::STANDARD.encode(b"payload"),
            chunk_number: 3,
            total_chunks: 5,
            file_name: "nested/dir/a.zip".into(),
            is_started: false,
            is_completed: false,
        })
        .unwrap();
        assert_eq!(chunk.name.as_str(), "a.zip");
        assert_eq!(&chunk.payload[..], b"payload");
        assert_eq!(chunk.number, 3);
        assert_eq!(chunk.action, ChunkAction::Append);
    }
}
