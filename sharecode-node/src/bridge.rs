//! Download bridge: dial a code's listener, read the header line and body,
//! buffer the body in a scratch file so the HTTP response can carry a length.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use sharecode_core::{mime, wire, ShareCode};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// How long a listener may take to accept and send its header line.
pub const HEADER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("cannot connect to code {code}: {source}")]
    Connect {
        code: ShareCode,
        source: std::io::Error,
    },
    #[error("header line longer than {0} bytes")]
    HeaderTooLong(usize),
    #[error("no header from code {0} within {1:?}")]
    Timeout(ShareCode, Duration),
    #[error("transfer failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully received file, ready to relay. The scratch file is unlinked already;
/// its storage is released when `body` drops.
#[derive(Debug)]
pub struct Download {
    pub file_name: String,
    pub content_type: &'static str,
    pub length: u64,
    pub body: tokio::fs::File,
}

/// Connect to `host:code`, read the transfer, buffer it under `scratch_dir`.
/// Connecting and reading the header line must finish within `header_timeout`.
pub async fn fetch(
    host: &str,
    code: ShareCode,
    scratch_dir: &Path,
    header_timeout: Duration,
) -> Result<Download, BridgeError> {
    let mut line = Vec::new();
    let limit = wire::MAX_HEADER_LEN as u64;
    let head = async {
        let stream = TcpStream::connect((host, code))
            .await
            .map_err(|source| BridgeError::Connect { code, source })?;
        let mut reader = BufReader::new(stream);
        (&mut reader).take(limit).read_until(b'\n', &mut line).await?;
        Ok::<_, BridgeError>(reader)
    };
    let mut reader = tokio::time::timeout(header_timeout, head)
        .await
        .map_err(|_| BridgeError::Timeout(code, header_timeout))??;
    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() as u64 >= limit {
        return Err(BridgeError::HeaderTooLong(wire::MAX_HEADER_LEN));
    }
    let file_name = wire::parse_header(&line);
    let content_type = mime::content_type_for(&file_name);

    // Anonymous temp file: removed by the OS on drop, on every path.
    let scratch = tempfile::tempfile_in(scratch_dir)?;
    let mut body = tokio::fs::File::from_std(scratch);
    let length = tokio::io::copy(&mut reader, &mut body).await?;
    body.flush().await?;
    body.seek(SeekFrom::Start(0)).await?;

    tracing::debug!(code, file = %file_name, length, "download buffered");
    Ok(Download {
        file_name,
        content_type,
        length,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::tests::free_port;
    use tokio::net::TcpListener;

    /// One-connection sender that writes `payload` and closes.
    async fn fake_sender(payload: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(&payload).await.unwrap();
            s.shutdown().await.unwrap();
        });
        port
    }

    async fn body_bytes(mut d: Download) -> Vec<u8> {
        let mut out = Vec::new();
        d.body.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn relays_name_type_and_bytes() {
        let mut payload = b"filename: clip.mp4\n".to_vec();
        payload.extend((0..50_000u32).map(|i| (i % 251) as u8));
        let port = fake_sender(payload.clone()).await;
        let dir = tempfile::tempdir().unwrap();

        let d = fetch("127.0.0.1", port, dir.path(), HEADER_TIMEOUT).await.unwrap();
        assert_eq!(d.file_name, "clip.mp4");
        assert_eq!(d.content_type, "video/mp4");
        assert_eq!(d.length, 50_000);
        assert_eq!(body_bytes(d).await, &payload[19..]);
    }

    #[tokio::test]
    async fn crlf_header_and_unknown_extension() {
        let port = fake_sender(b"filename: data.xyz\r\nabc".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let d = fetch("127.0.0.1", port, dir.path(), HEADER_TIMEOUT).await.unwrap();
        assert_eq!(d.file_name, "data.xyz");
        assert_eq!(d.content_type, "application/octet-stream");
        assert_eq!(body_bytes(d).await, b"abc");
    }

    #[tokio::test]
    async fn malformed_header_gets_default_name() {
        let port = fake_sender(b"garbage\nrest".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let d = fetch("127.0.0.1", port, dir.path(), HEADER_TIMEOUT).await.unwrap();
        assert_eq!(d.file_name, wire::DEFAULT_DOWNLOAD_NAME);
        assert_eq!(body_bytes(d).await, b"rest");
    }

    #[tokio::test]
    async fn empty_body_is_fine() {
        let port = fake_sender(b"filename: empty.txt\n".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let d = fetch("127.0.0.1", port, dir.path(), HEADER_TIMEOUT).await.unwrap();
        assert_eq!(d.length, 0);
        assert_eq!(d.content_type, "text/plain");
    }

    #[tokio::test]
    async fn oversized_header_rejected() {
        let port = fake_sender(vec![b'a'; wire::MAX_HEADER_LEN + 10]).await;
        let dir = tempfile::tempdir().unwrap();
        let err = fetch("127.0.0.1", port, dir.path(), HEADER_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, BridgeError::HeaderTooLong(_)));
    }

    #[tokio::test]
    async fn nothing_listening_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch("127.0.0.1", free_port(), dir.path(), HEADER_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, BridgeError::Connect { .. }));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let held = tokio::spawn(async move {
            // Accept and keep the socket open without writing anything.
            let (s, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(s);
        });
        let dir = tempfile::tempdir().unwrap();
        let err = fetch("127.0.0.1", port, dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(p, _) if p == port));
        held.abort();
    }

    #[tokio::test]
    async fn scratch_file_leaves_nothing_behind() {
        let port = fake_sender(b"filename: a.txt\nhello".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let d = fetch("127.0.0.1", port, dir.path(), HEADER_TIMEOUT).await.unwrap();
        drop(d);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
