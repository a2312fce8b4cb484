//! Per-connection request/response loop.
//!
//! Reads one HTTP/1.1 request head at a time with `httparse`, collects the
//! Content-Length body, canonicalizes into a [`waypoint_core::Request`],
//! dispatches, and writes the response back. Keep-alive follows the HTTP
//! version default unless a Connection header overrides it. Bodies are
//! fully buffered; chunked transfer encoding is not supported by this
//! adapter.

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use waypoint_core::{Request, Response};

use crate::Server;

const MAX_HEAD_BYTES: usize = 8 * 1024;
const MAX_HEADERS: usize = 64;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("malformed request: {reason}")]
    Malformed { reason: String },

    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ConnectionError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }
}

struct ParsedRequest {
    request: Request,
    keep_alive: bool,
    head_only: bool,
}

/// One accepted stream; processes requests until the peer closes or
/// keep-alive ends.
pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream, buffer: BytesMut::with_capacity(4 * 1024) }
    }

    pub async fn process(mut self, server: Arc<Server>) -> Result<(), ConnectionError> {
        loop {
            let Some(parsed) = self.read_request().await? else {
                debug!("peer closed the connection");
                return Ok(());
            };
            let keep_alive = parsed.keep_alive;
            let head_only = parsed.head_only;

            let mut response = server.respond(parsed.request).await;
            self.write_response(&response, &server, head_only, keep_alive).await?;

            // the continuation phase runs only after the response is out
            if let Some(deferred) = response.take_deferred() {
                tokio::spawn(deferred);
            }

            if !keep_alive {
                return Ok(());
            }
        }
    }

    /// Reads and parses one request. `None` means the peer closed cleanly
    /// between requests.
    async fn read_request(&mut self) -> Result<Option<ParsedRequest>, ConnectionError> {
        let head_end = loop {
            if let Some(end) = find_head_end(&self.buffer) {
                if end > MAX_HEAD_BYTES {
                    return Err(ConnectionError::HeadTooLarge);
                }
                break end;
            }
            if self.buffer.len() > MAX_HEAD_BYTES {
                return Err(ConnectionError::HeadTooLarge);
            }
            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::malformed("connection closed mid-request"));
            }
        };

        let (method, uri, headers, http11) = {
            let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut parsed = httparse::Request::new(&mut header_storage);
            let status = parsed
                .parse(&self.buffer[..head_end])
                .map_err(|e| ConnectionError::malformed(e.to_string()))?;
            if status.is_partial() {
                return Err(ConnectionError::malformed("incomplete request head"));
            }

            let method = parsed
                .method
                .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
                .ok_or_else(|| ConnectionError::malformed("invalid method"))?;
            let uri = parsed
                .path
                .unwrap_or("/")
                .parse::<Uri>()
                .map_err(|_| ConnectionError::malformed("invalid uri"))?;

            let mut headers = HeaderMap::with_capacity(parsed.headers.len());
            for header in parsed.headers.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes())
                    .map_err(|_| ConnectionError::malformed("invalid header name"))?;
                let value = HeaderValue::from_bytes(header.value)
                    .map_err(|_| ConnectionError::malformed("invalid header value"))?;
                headers.append(name, value);
            }

            (method, uri, headers, parsed.version == Some(1))
        };
        self.buffer.advance(head_end);

        if headers.contains_key(http::header::TRANSFER_ENCODING) {
            return Err(ConnectionError::malformed("chunked bodies are not supported"));
        }

        let content_length = match headers.get(http::header::CONTENT_LENGTH) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or_else(|| ConnectionError::malformed("invalid content-length"))?,
            None => 0,
        };

        let body = self.read_body(content_length).await?;

        let keep_alive = match headers.get(http::header::CONNECTION).and_then(|v| v.to_str().ok()) {
            Some(connection) if connection.eq_ignore_ascii_case("close") => false,
            Some(connection) if connection.eq_ignore_ascii_case("keep-alive") => true,
            _ => http11,
        };
        let head_only = method == Method::HEAD;

        let mut http_request = http::Request::new(body);
        *http_request.method_mut() = method;
        *http_request.uri_mut() = uri;
        *http_request.headers_mut() = headers;

        Ok(Some(ParsedRequest { request: Request::from(http_request), keep_alive, head_only }))
    }

    async fn read_body(&mut self, content_length: usize) -> Result<Bytes, ConnectionError> {
        while self.buffer.len() < content_length {
            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(ConnectionError::malformed("connection closed mid-body"));
            }
        }
        Ok(self.buffer.split_to(content_length).freeze())
    }

    async fn write_response(
        &mut self,
        response: &Response,
        server: &Server,
        head_only: bool,
        keep_alive: bool,
    ) -> Result<(), ConnectionError> {
        let status = response.status();
        let mut head: Vec<u8> = Vec::with_capacity(256);

        head.extend_from_slice(b"HTTP/1.1 ");
        head.extend_from_slice(status.as_str().as_bytes());
        head.push(b' ');
        head.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
        head.extend_from_slice(b"\r\n");

        head.extend_from_slice(b"date: ");
        head.extend_from_slice(server.http_date().as_bytes());
        head.extend_from_slice(b"\r\n");

        head.extend_from_slice(b"connection: ");
        head.extend_from_slice(if keep_alive { b"keep-alive" } else { b"close" });
        head.extend_from_slice(b"\r\n");

        let body_len = response.body().map_or(0, Bytes::len);
        if body_allowed(status) {
            head.extend_from_slice(b"content-length: ");
            head.extend_from_slice(body_len.to_string().as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        for (name, value) in response.headers() {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        self.stream.write_all(&head).await?;
        if !head_only
            && let Some(body) = response.body()
        {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }
}

fn body_allowed(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n").map(|position| position + 4)
}
