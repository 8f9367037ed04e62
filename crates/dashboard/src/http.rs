//! Minimal HTTP/1.1 plumbing over async-net
//!
//! The control plane serves a handful of REST routes, two SSE streams
//! and one WebSocket upgrade on a localhost socket; requests are parsed
//! and responses written directly on the TCP stream, the same way the
//! rest of the system does its wire work.

use async_net::TcpStream;
use futures::{AsyncReadExt, AsyncWriteExt};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Maximum accepted size of a request head + body
const MAX_REQUEST: usize = 64 * 1024;

/// A parsed HTTP request
#[derive(Debug)]
pub struct Request {
    /// Uppercase method
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Headers, keys lowercased
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Vec<u8>,
}

impl Request {
    /// Header lookup by lowercase name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Whether this is a WebSocket upgrade request
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }

    /// Path segments, e.g. `/api/services/db/start` → `["api", "services", "db", "start"]`
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// Read and parse one request, bounded by `timeout`.
///
/// `Ok(None)` means the peer closed (or said nothing) within the window.
pub async fn read_request(
    stream: &mut TcpStream,
    timeout: Duration,
) -> io::Result<Option<Request>> {
    let attempt = async {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 4096];

        // Read until the end of the header block.
        let head_end = loop {
            if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                break pos;
            }
            if buf.len() > MAX_REQUEST {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "request too large"));
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty request"))?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?
            .to_uppercase();
        let target = parts
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing target"))?;

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let (path, query) = match target.split_once('?') {
            Some((path, raw_query)) => (path.to_string(), parse_query(raw_query)),
            None => (target.to_string(), HashMap::new()),
        };

        // Body: whatever content-length promises, some of which may
        // already be buffered.
        let content_length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if content_length > MAX_REQUEST {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "body too large"));
        }
        let mut body = buf[head_end + 4..].to_vec();
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(content_length);

        Ok(Some(Request {
            method,
            path,
            query,
            headers,
            body,
        }))
    };

    futures_lite::future::or(attempt, async {
        smol::Timer::after(timeout).await;
        Ok(None)
    })
    .await
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Write a complete response with a body
pub async fn respond(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        content_type,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Write a JSON response
pub async fn respond_json(
    stream: &mut TcpStream,
    status: u16,
    value: &serde_json::Value,
) -> io::Result<()> {
    respond(stream, status, "application/json", value.to_string().as_bytes()).await
}

/// Write the JSON error envelope `{"error": …, "kind": …}`
pub async fn respond_error(
    stream: &mut TcpStream,
    status: u16,
    error: &str,
    kind: &str,
) -> io::Result<()> {
    respond_json(
        stream,
        status,
        &serde_json::json!({ "error": error, "kind": kind }),
    )
    .await
}

/// Start a Server-Sent-Events response
pub async fn start_sse(stream: &mut TcpStream) -> io::Result<()> {
    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        )
        .await?;
    stream.flush().await
}

/// Write one SSE frame, bounded by `timeout`; an error means the
/// consumer is gone or wedged and the stream should end.
pub async fn sse_frame(
    stream: &mut TcpStream,
    event: &str,
    data: &serde_json::Value,
    timeout: Duration,
) -> io::Result<()> {
    let frame = format!("event: {event}\ndata: {data}\n\n");
    let attempt = async {
        stream.write_all(frame.as_bytes()).await?;
        stream.flush().await
    };
    futures_lite::future::or(attempt, async {
        smol::Timer::after(timeout).await;
        Err(io::Error::new(io::ErrorKind::TimedOut, "sse write timed out"))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(raw: &str) -> Request {
        let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let raw = raw.to_string();
        let writer = smol::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(raw.as_bytes()).await.unwrap();
            client.flush().await.unwrap();
            // Keep the socket open while the server parses.
            smol::Timer::after(Duration::from_millis(200)).await;
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream, Duration::from_secs(2))
            .await
            .unwrap()
            .expect("request parses");
        writer.await;
        request
    }

    #[smol_potat::test]
    async fn parses_request_line_query_and_headers() {
        let request = roundtrip(
            "GET /api/health/stream?interval=10&service=a,b HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n",
        )
        .await;
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/api/health/stream");
        assert_eq!(request.query["interval"], "10");
        assert_eq!(request.query["service"], "a,b");
        assert_eq!(request.header("accept"), Some("text/event-stream"));
        assert_eq!(request.segments(), vec!["api", "health", "stream"]);
    }

    #[smol_potat::test]
    async fn reads_the_body_to_content_length() {
        let request = roundtrip(
            "POST /api/logs/classifications HTTP/1.1\r\nContent-Length: 17\r\n\r\n{\"text\":\"x\",\"a\":1}extra ignored",
        )
        .await;
        assert_eq!(request.body.len(), 17);
        assert_eq!(&request.body, b"{\"text\":\"x\",\"a\":1");
    }

    #[smol_potat::test]
    async fn silent_peer_times_out_as_none() {
        let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        let result = read_request(&mut stream, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
