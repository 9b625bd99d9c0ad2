use filedrop_protocol::FileKind;

/// Resolves the [`FileKind`] of an upload.
///
/// The declared MIME type wins when it is specific enough; otherwise the
/// type guessed from the file extension decides.
pub fn classify(content_type: Option<&str>, file_name: &str) -> FileKind {
    content_type
        .and_then(kind_from_mime)
        .or_else(|| kind_from_mime(&content_type_for_name(file_name)))
        .unwrap_or(FileKind::Other)
}

/// Best-effort MIME type for a file name, used when the caller declared none.
pub fn content_type_for_name(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn kind_from_mime(mime: &str) -> Option<FileKind> {
    let mime = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let (top, sub) = mime.split_once('/')?;
    match top {
        "image" => Some(FileKind::Image),
        "video" => Some(FileKind::Video),
        "audio" => Some(FileKind::Audio),
        "text" => Some(FileKind::Document),
        "application" => match sub {
            "pdf" | "msword" | "rtf" | "vnd.ms-excel" | "vnd.ms-powerpoint" => {
                Some(FileKind::Document)
            }
            s if s.starts_with("vnd.openxmlformats-officedocument") => Some(FileKind::Document),
            s if s.starts_with("vnd.oasis.opendocument") => Some(FileKind::Document),
            "zip" | "gzip" | "x-gzip" | "x-tar" | "x-gtar" | "x-compressed" | "x-7z-compressed"
            | "vnd.rar" | "x-rar-compressed" | "x-bzip" | "x-bzip2" | "x-xz" => {
                Some(FileKind::Archive)
            }
            // octet-stream and friends say nothing; fall back to the extension.
            _ => None,
        },
        _ => None,
    }
}
