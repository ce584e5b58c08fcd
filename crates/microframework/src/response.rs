//! The response an application hands back to the supervisor.

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Status, reason, headers and body of one response.
///
/// Headers are kept in a [`HeaderMap`] so names compare case-insensitively.
/// More than one value under a name is representable here but is refused
/// when the response is rendered.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    reason: Option<String>,
    version: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            version: "1.1".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set an explicit reason phrase; needed for codes without a registered one.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Append a header value. Existing values for the name are kept.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append a header from strings, validating name and value.
    pub fn try_with_header(self, name: &str, value: &str) -> anyhow::Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        Ok(self.with_header(name, value))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase that will be sent.
    ///
    /// An explicit non-empty reason wins; otherwise the registered phrase for
    /// the status, or an empty string for unregistered codes.
    pub fn reason_phrase(&self) -> &str {
        match self.reason.as_deref() {
            Some(reason) if !reason.is_empty() => reason,
            _ => canonical_reason(self.status).unwrap_or(""),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Registered reason phrase for a status code.
pub fn canonical_reason(status: u16) -> Option<&'static str> {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
}
