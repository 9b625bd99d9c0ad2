use serde::{Deserialize, Serialize};

use crate::types::{ContentHash, FileDescriptor};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens (or resumes) an upload, and asks whether the content is already stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub content_hash: ContentHash,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub biz_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub biz_id: String,
}

/// Finalizes an upload once all chunks are acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to [`InitUploadRequest`].
///
/// When `already_exists` is set the server holds identical content for this
/// business context and `access_url` points at it; no transfer is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    #[serde(default)]
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub already_exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acknowledged_chunks: Vec<u32>,
}

/// Response to a chunk put.
///
/// Backends that finalize single-shot uploads implicitly return the stored
/// file in `file`; the client then skips the merge call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub acked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileDescriptor>,
}

/// Response to a status (resume check) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub acknowledged_chunks: Vec<u32>,
}

fn is_false(v: &bool) -> bool {
    !v
}
