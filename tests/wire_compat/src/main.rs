fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use filedrop_protocol::{
        ChunkAck, ContentHash, FileDescriptor, InitUploadRequest, InitUploadResponse,
        MergeRequest, StatusResponse,
    };
    use filedrop_uploader::{ProgressEvent, Stage};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, exact numbers).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    // --- Request payloads ---

    #[test]
    fn fixture_init_upload_request() {
        let req: InitUploadRequest = roundtrip_test("init_upload_request.json");
        assert_eq!(
            req.content_hash,
            "9e107d9d372bb6826bd81d3542a419d6".parse::<ContentHash>().unwrap()
        );
        assert_eq!(req.total_chunks, 5);
        assert_eq!(req.chunk_size * u64::from(req.total_chunks), req.file_size);
    }

    #[test]
    fn fixture_merge_request() {
        let req: MergeRequest = roundtrip_test("merge_request.json");
        assert_eq!(req.upload_id, "up-7f3a");
    }

    // --- Response payloads ---

    #[test]
    fn fixture_init_upload_response_new() {
        let resp: InitUploadResponse = roundtrip_test("init_upload_response_new.json");
        assert!(!resp.already_exists);
        assert_eq!(resp.acknowledged_chunks, vec![0, 1, 2]);
    }

    #[test]
    fn fixture_init_upload_response_dedup() {
        let resp: InitUploadResponse = roundtrip_test("init_upload_response_dedup.json");
        assert!(resp.already_exists);
        assert!(resp.upload_id.is_empty());
        assert_eq!(resp.file_type.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn fixture_chunk_ack() {
        let ack: ChunkAck = roundtrip_test("chunk_ack.json");
        assert!(ack.acked);
        assert!(ack.file.is_none());
    }

    #[test]
    fn fixture_chunk_ack_finalized() {
        let ack: ChunkAck = roundtrip_test("chunk_ack_finalized.json");
        let file = ack.file.unwrap();
        assert_eq!(file.file_name, "avatar.png");
        assert!(file.thumbnail_url.is_none());
    }

    #[test]
    fn fixture_file_descriptor() {
        let file: FileDescriptor = roundtrip_test("file_descriptor.json");
        assert_eq!(file.file_size, 26_214_400);
    }

    #[test]
    fn fixture_status_response() {
        let resp: StatusResponse = roundtrip_test("status_response.json");
        assert_eq!(resp.acknowledged_chunks, vec![0, 1, 2, 4]);
    }

    #[test]
    fn sizes_above_f64_precision_survive() {
        // 2^53 + 1 has no exact f64 representation.
        let json = serde_json::json!({
            "accessUrl": "https://cdn.example.com/f/huge.bin",
            "fileName": "huge.bin",
            "fileSize": 9_007_199_254_740_993u64,
            "fileType": "application/octet-stream",
        });
        let file: FileDescriptor = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(file.file_size, 9_007_199_254_740_993);
        assert_eq!(serde_json::to_value(&file).unwrap(), json);

        let mut off_by_one = json.clone();
        off_by_one["fileSize"] = serde_json::json!(9_007_199_254_740_992u64);
        assert_ne!(serde_json::to_value(&file).unwrap(), off_by_one);
    }

    // --- Client output ---

    #[test]
    fn fixture_progress_event() {
        let event = ProgressEvent {
            percent: 57,
            stage: Stage::Uploading,
            current: Some(2),
            total: Some(4),
            message: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            load_fixture("progress_event.json")
        );
    }

    // --- Rejections ---

    #[test]
    fn rejects_malformed_content_hash() {
        let mut fixture = load_fixture("init_upload_request.json");
        fixture["contentHash"] = serde_json::json!("not-a-digest");
        assert!(serde_json::from_value::<InitUploadRequest>(fixture).is_err());
    }

    #[test]
    fn rejects_missing_required_fields() {
        let fixture = serde_json::json!({ "fileName": "a.bin" });
        assert!(serde_json::from_value::<InitUploadRequest>(fixture.clone()).is_err());
        assert!(serde_json::from_value::<FileDescriptor>(fixture).is_err());
    }
}
