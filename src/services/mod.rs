//! Storage-side services: the object store backends, the chunk session
//! store, the upload protocol and retrieval.

pub mod http_store;
pub mod local_store;
pub mod object_store;
pub mod overwrite;
pub mod retrieval;
pub mod session_store;
pub mod upload_service;
