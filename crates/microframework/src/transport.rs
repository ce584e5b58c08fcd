//! Where rendered responses go.
//!
//! A [`Transport`] holds the status line and headers until the first body
//! byte (or [`Transport::finish`]) commits them. After that point they can no
//! longer change, which is what "headers already sent" means to the
//! supervisor.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use hyper::ext::ReasonPhrase;
use std::io::Write;

use crate::error::{FrameworkError, Result};
use crate::response::canonical_reason;

/// Sink for exactly one response.
pub trait Transport {
    /// Whether the status line and headers have been committed.
    fn headers_sent(&self) -> bool;

    /// Status that was or will be sent.
    fn status(&self) -> u16;

    fn set_status(&mut self, version: &str, status: u16, reason: &str) -> Result<()>;

    /// Set a header, replacing any earlier value for the name.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<()>;

    fn has_header(&self, name: &HeaderName) -> bool;

    /// Write body bytes, committing the head first if needed.
    fn write_body(&mut self, bytes: &[u8]) -> Result<()>;

    /// Commit the head if nothing was written, and flush.
    fn finish(&mut self) -> Result<()>;
}

/// Status line and headers not yet committed.
#[derive(Debug, Clone)]
struct Head {
    version: String,
    status: u16,
    reason: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    sent: bool,
}

impl Default for Head {
    fn default() -> Self {
        Self {
            version: "1.1".to_string(),
            status: 200,
            reason: "OK".to_string(),
            headers: Vec::new(),
            sent: false,
        }
    }
}

impl Head {
    fn ensure_pending(&self) -> Result<()> {
        if self.sent {
            return Err(FrameworkError::output_integrity("Headers already sent"));
        }
        Ok(())
    }

    fn set_status(&mut self, version: &str, status: u16, reason: &str) -> Result<()> {
        self.ensure_pending()?;
        self.version = version.to_string();
        self.status = status;
        self.reason = reason.to_string();
        Ok(())
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<()> {
        self.ensure_pending()?;
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
        Ok(())
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }
}

/// Collects the response in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    head: Head,
    body: Vec<u8>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reason(&self) -> &str {
        &self.head.reason
    }

    pub fn version(&self) -> &str {
        &self.head.version
    }

    pub fn headers(&self) -> HeaderMap {
        self.head.headers.iter().cloned().collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head
            .headers
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Convert into a response for an HTTP server.
    ///
    /// A reason phrase other than the registered one is kept through the
    /// `ReasonPhrase` extension, so custom codes reach the client intact.
    pub fn into_http_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.head.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in self.head.headers {
            headers.insert(name, value);
        }

        if canonical_reason(self.head.status) != Some(self.head.reason.as_str()) {
            match ReasonPhrase::try_from(self.head.reason.into_bytes()) {
                Ok(reason) => {
                    response.extensions_mut().insert(reason);
                }
                Err(e) => tracing::debug!(error = %e, "Dropping invalid reason phrase"),
            }
        }
        response
    }
}

impl Transport for MemoryTransport {
    fn headers_sent(&self) -> bool {
        self.head.sent
    }

    fn status(&self) -> u16 {
        self.head.status
    }

    fn set_status(&mut self, version: &str, status: u16, reason: &str) -> Result<()> {
        self.head.set_status(version, status, reason)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<()> {
        self.head.set_header(name, value)
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.head.has_header(name)
    }

    fn write_body(&mut self, bytes: &[u8]) -> Result<()> {
        self.head.sent = true;
        self.body.extend_from_slice(bytes);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.head.sent = true;
        Ok(())
    }
}

/// How the head is framed on a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `HTTP/1.1 200 OK` status line
    Http1,
    /// `Status: 200 OK` header, for CGI gateways
    Cgi,
}

/// Writes the response as raw bytes.
#[derive(Debug)]
pub struct WriterTransport<W: Write> {
    head: Head,
    framing: Framing,
    writer: W,
}

impl<W: Write> WriterTransport<W> {
    pub fn new(writer: W, framing: Framing) -> Self {
        Self {
            head: Head::default(),
            framing,
            writer,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn commit(&mut self) -> Result<()> {
        if self.head.sent {
            return Ok(());
        }
        self.head.sent = true;

        let mut block = match self.framing {
            Framing::Http1 => format!(
                "HTTP/{} {} {}\r\n",
                self.head.version, self.head.status, self.head.reason
            ),
            Framing::Cgi => format!("Status: {} {}\r\n", self.head.status, self.head.reason),
        }
        .into_bytes();

        for (name, value) in &self.head.headers {
            block.extend_from_slice(title_case(name.as_str()).as_bytes());
            block.extend_from_slice(b": ");
            block.extend_from_slice(value.as_bytes());
            block.extend_from_slice(b"\r\n");
        }
        block.extend_from_slice(b"\r\n");

        self.writer.write_all(&block)?;
        Ok(())
    }
}

impl<W: Write> Transport for WriterTransport<W> {
    fn headers_sent(&self) -> bool {
        self.head.sent
    }

    fn status(&self) -> u16 {
        self.head.status
    }

    fn set_status(&mut self, version: &str, status: u16, reason: &str) -> Result<()> {
        self.head.set_status(version, status, reason)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<()> {
        self.head.set_header(name, value)
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.head.has_header(name)
    }

    fn write_body(&mut self, bytes: &[u8]) -> Result<()> {
        self.commit()?;
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.commit()?;
        self.writer.flush()?;
        Ok(())
    }
}

/// `content-type` → `Content-Type`
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
