use std::time::Duration;

/// Path of the init/dedup endpoint, relative to the service base URL.
pub const INIT_PATH: &str = "/uploads/init";

/// Prefix for per-upload endpoints (`/uploads/{uploadId}/...`).
pub const UPLOADS_PATH: &str = "/uploads";

/// Timeout applied to each remote call (init, chunk put, merge, status).
///
/// Large chunks on slow links may need more; callers override it through
/// the uploader configuration.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Content type used for raw chunk bodies.
pub const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

/// Builds the chunk endpoint path for an upload.
pub fn chunk_path(upload_id: &str, index: u32) -> String {
    format!("{UPLOADS_PATH}/{upload_id}/chunks/{index}")
}

/// Builds the merge endpoint path for an upload.
pub fn merge_path(upload_id: &str) -> String {
    format!("{UPLOADS_PATH}/{upload_id}/merge")
}

/// Builds the status endpoint path for an upload.
pub fn status_path(upload_id: &str) -> String {
    format!("{UPLOADS_PATH}/{upload_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths() {
        assert_eq!(chunk_path("u1", 3), "/uploads/u1/chunks/3");
        assert_eq!(merge_path("u1"), "/uploads/u1/merge");
        assert_eq!(status_path("u1"), "/uploads/u1");
    }
}
