//! Transfer wire format: one `filename: <name>\n` line, then raw bytes until close.
//!
//! There is no length prefix. The receiver learns the size only when the
//! sender closes the connection.

/// Header line prefix.
pub const HEADER_PREFIX: &str = "filename: ";

/// Name used when the header line is missing or malformed.
pub const DEFAULT_DOWNLOAD_NAME: &str = "downloaded-file";

/// Longest header line a receiver accepts, newline included.
pub const MAX_HEADER_LEN: usize = 4096;

/// Encode the header line announcing `file_name`.
pub fn encode_header(file_name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_PREFIX.len() + file_name.len() + 1);
    out.extend_from_slice(HEADER_PREFIX.as_bytes());
    out.extend_from_slice(file_name.as_bytes());
    out.push(b'\n');
    out
}

/// Parse a header line (newline already stripped). Falls back to [`DEFAULT_DOWNLOAD_NAME`].
pub fn parse_header(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim()
        .strip_prefix(HEADER_PREFIX)
        .map(|name| name.trim().replace('\r', ""))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string())
}
