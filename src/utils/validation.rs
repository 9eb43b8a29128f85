use std::path::Path;

use crate::models::MediaKind;

/// Magic byte signatures accepted per media kind. Video covers are plain
/// images.
const IMAGE_SIGNATURES: &[&[u8]] = &[
    &[0xFF, 0xD8, 0xFF],       // JPEG
    &[0x89, 0x50, 0x4E, 0x47], // PNG
    &[0x47, 0x49, 0x46, 0x38], // GIF
    &[0x52, 0x49, 0x46, 0x46], // WEBP (RIFF)
    &[0x42, 0x4D],             // BMP
];

const VIDEO_SIGNATURES: &[&[u8]] = &[
    &[0x00, 0x00, 0x00, 0x1C, 0x66, 0x74, 0x79, 0x70], // MP4 ftyp
    &[0x00, 0x00, 0x00, 0x20, 0x66, 0x74, 0x79, 0x70], // MP4 variant
    &[0x1A, 0x45, 0xDF, 0xA3],                         // Matroska / WebM
    &[0x00, 0x00, 0x00, 0x14, 0x66, 0x74, 0x79, 0x70], // QuickTime
];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates a blob before a task is created for it. The blob must be
/// non-empty and within the configured size cap.
pub fn validate_blob(blob: &[u8], max_size: usize) -> Result<(), ValidationError> {
    if blob.is_empty() {
        return Err(ValidationError {
            code: "EMPTY_BLOB",
            message: "Upload content must not be empty".to_string(),
        });
    }

    if blob.len() > max_size {
        return Err(ValidationError {
            code: "BLOB_TOO_LARGE",
            message: format!(
                "Blob size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                blob.len(),
                max_size,
                max_size / 1024 / 1024
            ),
        });
    }

    Ok(())
}

/// Checks the blob header against the signatures expected for its media
/// kind. Formats without a reliable signature pass through; mismatches are
/// logged, not rejected.
pub fn matches_kind(header: &[u8], kind: MediaKind) -> bool {
    let signatures = match kind {
        MediaKind::Image | MediaKind::VideoCover => IMAGE_SIGNATURES,
        MediaKind::Video => VIDEO_SIGNATURES,
    };

    signatures
        .iter()
        .any(|signature| header.len() >= signature.len() && header.starts_with(signature))
}

/// Sanitizes a display file name: strips any path components, replaces
/// reserved characters, and caps the length at 255 bytes on a char
/// boundary. Falls back to "untitled" when nothing usable remains.
pub fn sanitize_file_name(file_name: &str) -> String {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if file_name.contains("..") || file_name.contains('/') || file_name.contains('\\') {
        tracing::warn!("Path components in file name: {}", file_name);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == '/'
                || c == '\\'
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized
    }
}
