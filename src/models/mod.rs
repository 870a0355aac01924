//! Core data models for the archive relay.
//!
//! Committed objects map to metadata rows via `sqlx::FromRow` (local backend)
//! and serialize as JSON via `serde`; the chunk types are the wire protocol.

pub mod chunk;
pub mod object;
pub mod session;
