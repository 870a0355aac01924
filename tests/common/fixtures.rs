//! Test data builders.

use archive_relay::{models::chunk::ChunkRequest, services::upload_service::Chunk};
use base64::{Engine as _, engine::general_purpose};

/// Deterministic, non-repeating-looking payload of `len` bytes.
#[allow(dead_code)]
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// A wire-level chunk request.
#[allow(dead_code)]
pub fn chunk_request(
    file_name: &str,
    data: &[u8],
    chunk_number: u32,
    total_chunks: u32,
    is_started: bool,
    is_completed: bool,
) -> ChunkRequest {
    ChunkRequest {
        data: general_purpose::STANDARD.encode(data),
        chunk_number,
        total_chunks,
        file_name: file_name.to_string(),
        is_started,
        is_completed,
    }
}

/// A decoded chunk, ready for `UploadService::handle_chunk`.
#[allow(dead_code)]
pub fn chunk(
    file_name: &str,
    data: &[u8],
    chunk_number: u32,
    total_chunks: u32,
    is_started: bool,
    is_completed: bool,
) -> Chunk {
    Chunk::decode(chunk_request(
        file_name,
        data,
        chunk_number,
        total_chunks,
        is_started,
        is_completed,
    ))
    .expect("valid test chunk")
}

/// Split `data` into `parts` chunks flagged the way the client flags them.
#[allow(dead_code)]
pub fn split_into_chunks(file_name: &str, data: &[u8], parts: usize) -> Vec<Chunk> {
    let size = data.len().div_ceil(parts).max(1);
    let pieces: Vec<&[u8]> = data.chunks(size).collect();
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            chunk(
                file_name,
                piece,
                (i + 1) as u32,
                total as u32,
                i == 0,
                i + 1 == total,
            )
        })
        .collect()
}
