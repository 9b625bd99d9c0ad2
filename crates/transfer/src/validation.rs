use filedrop_protocol::FileKind;

use crate::format::format_size;
use crate::{DEFAULT_MAX_FILE_SIZE, TransferError};

/// Pre-flight limits checked before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Kinds accepted for upload.
    pub allowed_kinds: Vec<FileKind>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_kinds: FileKind::ALL.to_vec(),
        }
    }
}

/// Validates the file name reported to the server.
///
/// Rejects:
/// - Empty or whitespace-only names
/// - Path separators (`/` or `\`)
/// - The special names `.` and `..`
/// - Control characters
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!(
            "reserved name not allowed: {name}"
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidName(format!(
            "control characters not allowed: {name:?}"
        )));
    }

    Ok(())
}

/// Checks name, size and kind of an upload against `limits`.
pub fn validate_upload(
    name: &str,
    size: u64,
    kind: FileKind,
    limits: &UploadLimits,
) -> Result<(), TransferError> {
    validate_file_name(name)?;

    if size > limits.max_file_size {
        return Err(TransferError::TooLarge {
            size: format_size(size),
            limit: format_size(limits.max_file_size),
        });
    }

    if !limits.allowed_kinds.contains(&kind) {
        return Err(TransferError::KindNotAllowed(kind));
    }

    Ok(())
}
