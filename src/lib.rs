//! Chunked archive upload relay.
//!
//! Clients push a file as a sequence of base64 chunks; the relay accumulates
//! them per filename, commits the result to an object store under a
//! timestamped name (removing earlier revisions), and serves the most recent
//! archive back in full or as a leading byte window.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
