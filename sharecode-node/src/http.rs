//! Minimal HTTP/1.1 endpoint over tokio: parse with httparse, one request per
//! connection, responses written by hand with CORS headers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::api::{self, AppState};
use crate::error::ApiError;

const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 16 * 1024;

const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type,Authorization"),
];

#[derive(Debug)]
pub struct Request {
    pub method: String,
    /// Path without query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    File { file: tokio::fs::File, len: u64 },
}

#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Body,
}

impl Response {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn text(status: u16, msg: impl Into<String>) -> Self {
        Self::empty(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(Body::Bytes(msg.into().into_bytes()))
    }

    pub fn json<T: serde::Serialize>(status: u16, value: &T) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(value).map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(Self::empty(status)
            .with_header("Content-Type", "application/json")
            .with_body(Body::Bytes(bytes)))
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    #[cfg(test)]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[cfg(test)]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn content_length(&self) -> u64 {
        match &self.body {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::File { len, .. } => *len,
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        411 => "Length Required",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Serialize `resp` onto `stream`. CORS headers go on every response.
pub async fn write_response(stream: &mut TcpStream, resp: Response) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", resp.status, reason(resp.status));
    for (k, v) in CORS_HEADERS {
        head.push_str(&format!("{k}: {v}\r\n"));
    }
    for (k, v) in &resp.headers {
        head.push_str(&format!("{k}: {v}\r\n"));
    }
    if resp.status != 204 {
        head.push_str(&format!("Content-Length: {}\r\n", resp.content_length()));
    }
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await?;
    match resp.body {
        Body::Empty => {}
        Body::Bytes(b) => stream.write_all(&b).await?,
        Body::File { mut file, .. } => {
            tokio::io::copy(&mut file, stream).await?;
        }
    }
    stream.flush().await
}

/// Read one request: head via httparse, body by Content-Length.
pub async fn read_request(stream: &mut TcpStream, max_body: u64) -> Result<Request, ApiError> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let (method, path, headers, head_len) = loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if n == 0 {
            return Err(ApiError::BadRequest("connection closed mid-request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut slots);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = req.method.unwrap_or_default().to_string();
                let target = req.path.unwrap_or_default();
                let path = target.split('?').next().unwrap_or_default().to_string();
                let headers = req
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_string(),
                            String::from_utf8_lossy(h.value).trim().to_string(),
                        )
                    })
                    .collect::<Vec<_>>();
                break (method, path, headers, head_len);
            }
            Ok(httparse::Status::Partial) if buf.len() > MAX_HEAD_LEN => {
                return Err(ApiError::BadRequest("request head too large".into()));
            }
            Ok(httparse::Status::Partial) => continue,
            Err(e) => return Err(ApiError::BadRequest(format!("malformed request: {e}"))),
        }
    };

    let mut req = Request {
        method,
        path,
        headers,
        body: Vec::new(),
    };
    if req
        .header("Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        return Err(ApiError::LengthRequired);
    }
    let length = match req.header("Content-Length") {
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| ApiError::BadRequest("invalid Content-Length".into()))?,
        None => 0,
    };
    if length > max_body {
        return Err(ApiError::PayloadTooLarge(max_body));
    }
    if length > 0
        && req
            .header("Expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        stream
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    let length = length as usize;
    let mut body = buf.split_off(head_len);
    body.truncate(length);
    if body.len() < length {
        let have = body.len();
        body.resize(length, 0);
        stream
            .read_exact(&mut body[have..])
            .await
            .map_err(|e| ApiError::BadRequest(format!("truncated body: {e}")))?;
    }
    req.body = body;
    Ok(req)
}

/// Accept loop. At most `max_workers` connections are handled at once.
pub async fn run_http(
    listener: TcpListener,
    state: Arc<AppState>,
    max_workers: usize,
) -> std::io::Result<()> {
    let workers = Arc::new(Semaphore::new(max_workers));
    loop {
        let permit = workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_connection(stream, peer, state).await {
                tracing::debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
) -> std::io::Result<()> {
    let resp = match read_request(&mut stream, state.max_upload_bytes).await {
        Ok(req) => {
            tracing::debug!(%peer, method = %req.method, path = %req.path, "request");
            api::route(req, &state).await
        }
        Err(e) => {
            tracing::debug!(%peer, error = %e, "rejected request");
            e.into_response()
        }
    };
    write_response(&mut stream, resp).await
}
