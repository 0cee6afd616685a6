//! Content type inferred from a filename suffix.

/// Suffix table, checked in order against the lowercased name.
const SUFFIX_TYPES: &[(&str, &str)] = &[
    (".mp4", "video/mp4"),
    (".webm", "video/webm"),
    (".avi", "video/x-msvideo"),
    (".mov", "video/quicktime"),
    (".mkv", "video/x-matroska"),
    (".mp3", "audio/mpeg"),
    (".wav", "audio/wav"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".pdf", "application/pdf"),
    (".txt", "text/plain"),
    (".html", "text/html"),
    (".json", "application/json"),
    (".zip", "application/zip"),
];

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

pub fn content_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    SUFFIX_TYPES
        .iter()
        .find(|(suffix, _)| lower.ends_with(suffix))
        .map_or(FALLBACK_CONTENT_TYPE, |(_, ty)| ty)
}
