//! src/services/session_store.rs
//!
//! SessionStore — process-lifetime accumulation of chunked uploads.
//!
//! Each logical filename owns one slot in an explicit map. A slot is an
//! async mutex around an optional [`UploadSession`]; holding the slot lock
//! (a [`SessionGuard`]) serializes every operation on that filename, so two
//! chunk requests for the same file never interleave while requests for
//! different files never contend. The session's bytes live in a scratch
//! file under `scratch_dir`, owned by the session until it is released.

use crate::models::session::{SessionState, UploadSession};
use bytes::Bytes;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
};
use tracing::{debug, info, warn};

const SCRATCH_EXTENSION: &str = "part";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no upload session for `{0}`")]
    NotFound(String),
    #[error("upload session `{name}` cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: SessionState,
        to: SessionState,
    },
    #[error("chunk {got} for `{name}` is out of order (expected {expected})")]
    OutOfOrder { name: String, expected: u32, got: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

type Slot = Arc<AsyncMutex<Option<UploadSession>>>;

pub struct SessionStore {
    scratch_dir: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
    live: AtomicUsize,
    released: AtomicU64,
}

impl SessionStore {
    /// Prepare `scratch_dir` and drop scratch files left by a previous
    /// process. Sessions never survive a restart.
    pub async fn open(scratch_dir: impl Into<PathBuf>) -> SessionResult<Self> {
        let scratch_dir = scratch_dir.into();
        fs::create_dir_all(&scratch_dir).await?;

        let mut removed = 0usize;
        let mut entries = fs::read_dir(&scratch_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == SCRATCH_EXTENSION) {
                match fs::remove_file(&path).await {
                    Ok(_) => removed += 1,
                    Err(err) => {
                        warn!("could not remove stale scratch file {}: {}", path.display(), err)
                    }
                }
            }
        }
        if removed > 0 {
            info!(
                "Removed {} stale scratch files from {}",
                removed,
                scratch_dir.display()
            );
        }

        Ok(Self {
            scratch_dir,
            slots: Mutex::new(HashMap::new()),
            live: AtomicUsize::new(0),
            released: AtomicU64::new(0),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Number of sessions currently holding a scratch buffer.
    pub fn session_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Total number of sessions whose buffer has been released.
    pub fn released_total(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    fn scratch_path(&self, name: &str) -> PathBuf {
        self.scratch_dir.join(format!("{}.{}", name, SCRATCH_EXTENSION))
    }

    fn slot(&self, name: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Acquire exclusive access to the session slot for `name`, waiting for
    /// any in-flight request on the same name to finish.
    pub async fn lock(&self, name: &str) -> SessionGuard<'_> {
        let slot = self.slot(name);
        let guard = slot.clone().lock_owned().await;
        SessionGuard {
            store: self,
            name: name.to_string(),
            slot,
            guard,
        }
    }

    /// Release an in-progress session without committing it.
    pub async fn abandon(&self, name: &str) -> SessionResult<()> {
        let mut session = self.lock(name).await;
        if session.release().await? {
            info!(name, "abandoned upload session");
            Ok(())
        } else {
            Err(SessionError::NotFound(name.to_string()))
        }
    }

    /// Release sessions that have seen no chunk for `max_age`. Sessions busy
    /// with a request are skipped. Returns the number released.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let candidates: Vec<(String, Slot)> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .iter()
                .map(|(name, slot)| (name.clone(), slot.clone()))
                .collect()
        };

        let mut swept = 0;
        for (name, slot) in candidates {
            let Ok(guard) = slot.clone().try_lock_owned() else {
                continue;
            };
            let mut session = SessionGuard {
                store: self,
                name,
                slot,
                guard,
            };
            let stale = session
                .session()
                .is_some_and(|s| s.last_activity.elapsed() >= max_age);
            if !stale {
                continue;
            }
            match session.release().await {
                Ok(_) => {
                    info!(name = %session.name, "released stale upload session");
                    swept += 1;
                }
                Err(err) => {
                    warn!(name = %session.name, "failed to release stale session: {}", err)
                }
            }
        }
        swept
    }
}

/// Exclusive handle on one filename's session slot.
pub struct SessionGuard<'a> {
    store: &'a SessionStore,
    name: String,
    slot: Slot,
    guard: OwnedMutexGuard<Option<UploadSession>>,
}

impl SessionGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.guard.as_ref()
    }

    fn session_mut(&mut self) -> SessionResult<&mut UploadSession> {
        let name = &self.name;
        self.guard
            .as_mut()
            .ok_or_else(|| SessionError::NotFound(name.clone()))
    }

    fn transition(&mut self, to: SessionState) -> SessionResult<()> {
        let session = self.session_mut()?;
        if !session.state.can_transition(to) {
            return Err(SessionError::InvalidTransition {
                name: session.name.clone(),
                from: session.state,
                to,
            });
        }
        debug!(name = %session.name, from = %session.state, to = %to, "session transition");
        session.state = to;
        Ok(())
    }

    /// (Re)create the buffer for this name, truncating any prior one.
    pub async fn begin(&mut self, total_chunks: u32) -> SessionResult<()> {
        let path = self.store.scratch_path(&self.name);
        File::create(&path).await?;

        match self.guard.as_mut() {
            Some(session) => {
                debug!(name = %self.name, discarded = session.len, "restarting upload session");
                let mut fresh = UploadSession::new(self.name.clone(), path);
                fresh.state = session.state;
                *session = fresh;
            }
            None => {
                *self.guard = Some(UploadSession::new(self.name.clone(), path));
                self.store.live.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.transition(SessionState::Receiving)?;
        self.session_mut()?.total_chunks = total_chunks;
        Ok(())
    }

    /// Append `bytes` to the buffer and record the chunk ordinal. Empty
    /// payloads are recorded without touching the scratch file.
    pub async fn append(&mut self, bytes: &[u8], chunk_number: u32) -> SessionResult<u64> {
        let session = self.session_mut()?;
        if session.state != SessionState::Receiving {
            return Err(SessionError::InvalidTransition {
                name: session.name.clone(),
                from: session.state,
                to: SessionState::Receiving,
            });
        }

        if !bytes.is_empty() {
            let mut file = OpenOptions::new()
                .append(true)
                .open(&session.scratch_path)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            session.len += bytes.len() as u64;
        }
        session.chunks_received += 1;
        session.last_activity = Instant::now();
        session.next_chunk = chunk_number.saturating_add(1);
        Ok(session.len)
    }

    /// Move to `Finalizing` and return the complete accumulated bytes. The
    /// caller must still [`release`](Self::release) the session.
    pub async fn finalize(&mut self) -> SessionResult<Bytes> {
        self.transition(SessionState::Finalizing)?;
        let path = self.session_mut()?.scratch_path.clone();
        Ok(Bytes::from(fs::read(&path).await?))
    }

    pub fn mark_committed(&mut self) -> SessionResult<()> {
        self.transition(SessionState::Committed)
    }

    /// Free the buffer. Returns `false` when there was no session to release.
    /// The session is dropped from the slot even if removing the scratch
    /// file fails.
    pub async fn release(&mut self) -> SessionResult<bool> {
        let Some(session) = self.guard.take() else {
            return Ok(false);
        };
        self.store.live.fetch_sub(1, Ordering::SeqCst);
        self.store.released.fetch_add(1, Ordering::SeqCst);
        debug!(
            name = %session.name,
            len = session.len,
            state = %session.state,
            created_at = %session.created_at,
            "releasing upload session"
        );

        match fs::remove_file(&session.scratch_path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
            Err(err) => Err(SessionError::Io(err)),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            return;
        }
        // Map entry, `self.slot` and the guard's own handle: nobody else is
        // waiting on this slot, so it can go.
        let mut slots = self
            .store
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&self.slot) == 3 {
            if let Some(current) = slots.get(&self.name) {
                if Arc::ptr_eq(current, &self.slot) {
                    slots.remove(&self.name);
                }
            }
        }
    }
}
