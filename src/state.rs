use crate::{
    config::AppConfig,
    services::{
        object_store::ObjectStore, retrieval::Retrieval, session_store::SessionStore,
        upload_service::UploadService,
    },
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub retrieval: Arc<Retrieval>,
    pub sessions: Arc<SessionStore>,
    pub store: Arc<dyn ObjectStore>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(cfg: &AppConfig, store: Arc<dyn ObjectStore>, sessions: Arc<SessionStore>) -> Self {
        let uploads = UploadService::new(sessions.clone(), store.clone(), cfg.strict_chunk_order);
        let retrieval = Retrieval::new(
            store.clone(),
            cfg.delivery,
            cfg.latest_extension.clone(),
            cfg.partial_window,
        );

        Self {
            uploads: Arc::new(uploads),
            retrieval: Arc::new(retrieval),
            sessions,
            store,
            max_body_bytes: cfg.max_body_bytes,
        }
    }
}
