//! Wire shapes for the chunked upload protocol.

use serde::{Deserialize, Serialize};

/// One piece of a chunked upload as submitted by the client.
///
/// Only `is_started` / `is_completed` drive the protocol; the ordinals are
/// recorded and, when strict ordering is enabled, checked.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    /// Base64-encoded payload. May be empty.
    #[serde(default)]
    pub data: String,

    #[serde(default)]
    pub chunk_number: u32,

    #[serde(default)]
    pub total_chunks: u32,

    #[serde(default)]
    pub file_name: String,

    #[serde(default)]
    pub is_started: bool,

    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Started,
    Appending,
    Completed,
}

/// Response to a chunk submission.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkResponse {
    pub status: ChunkStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}
