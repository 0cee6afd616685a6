//! Binary-safe extraction of the first uploaded file from a raw multipart/form-data body.
//!
//! The body is scanned as bytes, never as text lines, so file content may hold
//! any byte values. Only an exact `\r\n--<boundary>` match ends the content.

/// Content type used when the part carries no `Content-Type:` header.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const FILENAME_MARKER: &[u8] = b"filename=\"";
const CONTENT_TYPE_MARKER: &[u8] = b"Content-Type:";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// First file part of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUpload {
    pub file_name: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("Content-Type must be multipart/form-data")]
    NotMultipart,
    #[error("missing boundary in Content-Type")]
    MissingBoundary,
    #[error("no file field in body")]
    NoFileField,
    #[error("unterminated filename")]
    UnterminatedFileName,
    #[error("part headers not terminated")]
    UnterminatedHeaders,
    #[error("closing boundary not found")]
    MissingClosingBoundary,
}

/// Position of the first occurrence of `needle` in `haystack` at or after `from`.
pub fn find_sequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Pull the boundary out of a request `Content-Type` value, unwrapping quotes.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    if !content_type.starts_with("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }
    let idx = content_type
        .find("boundary=")
        .ok_or(MultipartError::MissingBoundary)?;
    let mut boundary = content_type[idx + "boundary=".len()..].trim();
    // A later parameter may follow an unquoted boundary.
    if !boundary.starts_with('"') {
        if let Some((b, _)) = boundary.split_once(';') {
            boundary = b.trim();
        }
    }
    if boundary.len() >= 2 && boundary.starts_with('"') && boundary.ends_with('"') {
        boundary = &boundary[1..boundary.len() - 1];
    }
    if boundary.is_empty() {
        return Err(MultipartError::MissingBoundary);
    }
    Ok(boundary.to_string())
}

/// Decode the first file field of `body`. Later parts are ignored.
pub fn decode(body: &[u8], boundary: &str) -> Result<ParsedUpload, MultipartError> {
    let name_start = find_sequence(body, FILENAME_MARKER, 0).ok_or(MultipartError::NoFileField)?
        + FILENAME_MARKER.len();
    let name_end = body[name_start..]
        .iter()
        .position(|&b| b == b'"')
        .map(|p| p + name_start)
        .ok_or(MultipartError::UnterminatedFileName)?;
    let file_name = String::from_utf8_lossy(&body[name_start..name_end]).into_owned();

    let header_end =
        find_sequence(body, HEADER_END, name_end).ok_or(MultipartError::UnterminatedHeaders)?;
    let content_start = header_end + HEADER_END.len();

    // Content-Type only counts while still inside this part's headers.
    let content_type = find_sequence(&body[..header_end], CONTENT_TYPE_MARKER, name_end)
        .map(|at| {
            let mut start = at + CONTENT_TYPE_MARKER.len();
            while start < body.len() && (body[start] == b' ' || body[start] == b'\t') {
                start += 1;
            }
            let end = body[start..]
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
                .map_or(body.len(), |p| p + start);
            String::from_utf8_lossy(&body[start..end]).trim().to_string()
        })
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    // The next delimiter ends the part, whether it closes the body or opens another field.
    let delimiter = format!("\r\n--{boundary}");
    let content_end = find_sequence(body, delimiter.as_bytes(), content_start)
        .ok_or(MultipartError::MissingClosingBoundary)?;

    Ok(ParsedUpload {
        file_name,
        content: body[content_start..content_end].to_vec(),
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

    fn body_with(name: &str, ctype: Option<&str>, content: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        b.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n")
                .as_bytes(),
        );
        if let Some(t) = ctype {
            b.extend_from_slice(format!("Content-Type: {t}\r\n").as_bytes());
        }
        b.extend_from_slice(b"\r\n");
        b.extend_from_slice(content);
        b.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        b
    }

    #[test]
    fn find_sequence_basics() {
        assert_eq!(find_sequence(b"abcabc", b"bc", 0), Some(1));
        assert_eq!(find_sequence(b"abcabc", b"bc", 2), Some(4));
        assert_eq!(find_sequence(b"abc", b"abcd", 0), None);
        assert_eq!(find_sequence(b"abc", b"c", 5), None);
        assert_eq!(find_sequence(b"abc", b"", 1), Some(1));
    }

    #[test]
    fn decodes_simple_text_file() {
        let body = body_with("hello.txt", Some("text/plain"), b"hello world");
        let up = decode(&body, BOUNDARY).unwrap();
        assert_eq!(up.file_name, "hello.txt");
        assert_eq!(up.content, b"hello world");
        assert_eq!(up.content_type, "text/plain");
    }

    #[test]
    fn missing_content_type_defaults() {
        let body = body_with("blob", None, b"\x00\x01\x02");
        let up = decode(&body, BOUNDARY).unwrap();
        assert_eq!(up.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(up.content, vec![0, 1, 2]);
    }

    #[test]
    fn empty_content() {
        let body = body_with("empty.bin", None, b"");
        let up = decode(&body, BOUNDARY).unwrap();
        assert!(up.content.is_empty());
    }

    #[test]
    fn utf8_filename() {
        let body = body_with("résumé ✓.pdf", Some("application/pdf"), b"%PDF");
        let up = decode(&body, BOUNDARY).unwrap();
        assert_eq!(up.file_name, "résumé ✓.pdf");
    }

    #[test]
    fn boundary_lookalikes_inside_content_survive() {
        let mut content = Vec::new();
        content.extend_from_slice(b"start\r\n--");
        content.extend_from_slice(&BOUNDARY.as_bytes()[..BOUNDARY.len() - 1]);
        content.extend_from_slice(b"X\r\n");
        content.extend_from_slice(b"\n--");
        content.extend_from_slice(BOUNDARY.as_bytes());
        content.extend_from_slice(b"\r--");
        content.extend_from_slice(BOUNDARY.as_bytes());
        content.extend_from_slice(b"--\r\n\r\nend");
        let body = body_with("tricky.bin", None, &content);
        let up = decode(&body, BOUNDARY).unwrap();
        assert_eq!(up.content, content);
    }

    #[test]
    fn random_binary_content_round_trips() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let len = rng.gen_range(0..4096);
            let mut content = vec![0u8; len];
            rng.fill_bytes(&mut content);
            // A random buffer matching the full delimiter is astronomically unlikely.
            let body = body_with("r.bin", None, &content);
            let up = decode(&body, BOUNDARY).unwrap();
            assert_eq!(up.content, content);
        }
    }

    #[test]
    fn only_first_file_part_is_decoded() {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"a\"; filename=\"first.txt\"\r\n\r\n",
        );
        body.extend_from_slice(b"one");
        body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"b\"; filename=\"second.txt\"\r\n\r\n",
        );
        body.extend_from_slice(b"two");
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        let up = decode(&body, BOUNDARY).unwrap();
        assert_eq!(up.file_name, "first.txt");
        assert_eq!(up.content, b"one");
    }

    #[test]
    fn content_type_of_later_part_is_not_borrowed() {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"a\"; filename=\"a.bin\"\r\n\r\n",
        );
        body.extend_from_slice(b"data");
        body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: text/html\r\n\r\nx");
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        let up = decode(&body, BOUNDARY).unwrap();
        assert_eq!(up.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(up.content, b"data");
    }

    #[test]
    fn trailing_text_field_is_ignored() {
        let mut content = b"line one\r\n".to_vec();
        content.extend_from_slice(&[0xff, 0x00, b'-', b'-', 0x0d]);
        let mut body = body_with("photo.png", Some("image/png"), &content);
        // Turn the closing delimiter into an inner one and append a plain field.
        let tail = format!("\r\n--{BOUNDARY}--\r\n");
        body.truncate(body.len() - tail.len());
        body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"note\"\r\n\r\nhi");
        body.extend_from_slice(tail.as_bytes());
        let up = decode(&body, BOUNDARY).unwrap();
        assert_eq!(up.file_name, "photo.png");
        assert_eq!(up.content_type, "image/png");
        assert_eq!(up.content, content);
    }

    #[test]
    fn structural_failures() {
        assert_eq!(
            decode(b"no file here", BOUNDARY),
            Err(MultipartError::NoFileField)
        );
        assert_eq!(
            decode(b"filename=\"abc", BOUNDARY),
            Err(MultipartError::UnterminatedFileName)
        );
        assert_eq!(
            decode(b"filename=\"abc\"\r\nno blank line", BOUNDARY),
            Err(MultipartError::UnterminatedHeaders)
        );
        assert_eq!(
            decode(b"filename=\"abc\"\r\n\r\ncontent without end", BOUNDARY),
            Err(MultipartError::MissingClosingBoundary)
        );
    }

    #[test]
    fn boundary_extraction() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc123").unwrap(),
            "abc123"
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"a b;c\"").unwrap(),
            "a b;c"
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=xyz; charset=utf-8")
                .unwrap(),
            "xyz"
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary="),
            Err(MultipartError::MissingBoundary)
        );
        assert_eq!(
            boundary_from_content_type("application/json"),
            Err(MultipartError::NotMultipart)
        );
    }
}
