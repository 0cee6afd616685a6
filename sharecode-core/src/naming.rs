//! Stored-blob naming: sanitized original name behind a random id.

/// Replacement for empty upload filenames.
pub const UNNAMED_FILE: &str = "unnamed-file";

/// Keep `[A-Za-z0-9._-]`, replace every other character with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Display name for an upload: the client's name, or [`UNNAMED_FILE`] if blank.
pub fn display_name(raw: &str) -> &str {
    if raw.trim().is_empty() {
        UNNAMED_FILE
    } else {
        raw
    }
}

/// `<uuid>_<sanitized>`, unique per call.
pub fn stored_file_name(display_name: &str) -> String {
    format!(
        "{}_{}",
        uuid::Uuid::new_v4(),
        sanitize_file_name(display_name)
    )
}
