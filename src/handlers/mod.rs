//! HTTP handlers. Each module owns one group of endpoints and delegates the
//! actual work to the services in `AppState`.

pub mod download_handlers;
pub mod health_handlers;
pub mod upload_handlers;
