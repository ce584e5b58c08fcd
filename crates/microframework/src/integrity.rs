//! Output integrity checks around response rendering.

use axum::http::{header, HeaderValue};

use crate::error::{FrameworkError, Result};
use crate::output::OutputBuffer;
use crate::response::Response;
use crate::transport::Transport;

/// Body of the fallback response.
pub const FALLBACK_BODY: &str = "Unexpected fatal error\n";

const PREVIEW_CHARS: usize = 50;

/// Guards what reaches the transport.
#[derive(Debug, Clone, Default)]
pub struct OutputIntegritySupervisor {
    default_content_type: Option<HeaderValue>,
}

impl OutputIntegritySupervisor {
    /// `default_content_type` is added to responses that do not set one.
    pub fn new(default_content_type: Option<HeaderValue>) -> Self {
        Self {
            default_content_type,
        }
    }

    /// Unwind every capture scope, failing if anything was left behind.
    ///
    /// Committed headers are checked first: if they went out, no response
    /// can be rendered safely whatever the buffers hold.
    pub fn reset_buffers_asserting_no_output(
        &self,
        output: &OutputBuffer,
        transport: &dyn Transport,
    ) -> Result<()> {
        if transport.headers_sent() {
            output.unwind();
            return Err(FrameworkError::output_integrity(
                "Headers already sent before the response was rendered",
            ));
        }

        for contents in output.unwind() {
            if !contents.is_empty() {
                let preview: String = String::from_utf8_lossy(&contents)
                    .chars()
                    .take(PREVIEW_CHARS)
                    .collect();
                return Err(FrameworkError::output_integrity(format!(
                    "Unexpected buffered output during request ({preview}"
                )));
            }
        }
        Ok(())
    }

    /// Render a response, or fail before writing anything.
    ///
    /// The reason phrase and every header are validated up front so a
    /// rejected response leaves the transport untouched.
    pub fn render_response(&self, response: &Response, transport: &mut dyn Transport) -> Result<()> {
        let reason = check_status_line(response)?;

        let headers = response.headers();
        for name in headers.keys() {
            if headers.get_all(name).iter().count() > 1 {
                return Err(FrameworkError::header_rendering(format!(
                    "Cannot specify multiple values for the {} header",
                    name
                )));
            }
        }

        transport.set_status(response.version(), response.status(), reason)?;
        for (name, value) in headers {
            transport.set_header(name.clone(), value.clone())?;
        }
        if let Some(content_type) = &self.default_content_type {
            if !transport.has_header(&header::CONTENT_TYPE) {
                transport.set_header(header::CONTENT_TYPE, content_type.clone())?;
            }
        }

        transport.write_body(response.body())?;
        transport.finish()
    }

    /// Emit the fallback response with no integrity checks.
    ///
    /// If the head already went out only the body is appended; otherwise
    /// the status becomes 500 with a plain-text content type. Transport errors
    /// are logged and stop the fallback; there is nothing left to fall back to.
    pub fn render_error_response(&self, transport: &mut dyn Transport) {
        let written = if transport.headers_sent() {
            Ok(())
        } else {
            transport
                .set_status("1.1", 500, "Internal Server Error")
                .and_then(|_| {
                    transport.set_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                })
        };
        if let Err(e) = written
            .and_then(|_| transport.write_body(FALLBACK_BODY.as_bytes()))
            .and_then(|_| transport.finish())
        {
            tracing::warn!(error = %e, "Could not write fallback response");
        }
    }
}

/// Validate the parts of the status line, returning the reason to send.
///
/// Anything that could not be written as a single well-formed status line is
/// refused, so no caller-supplied text can add lines to the head.
fn check_status_line(response: &Response) -> Result<&str> {
    let status = response.status();
    if !(100..=999).contains(&status) {
        return Err(FrameworkError::header_rendering(format!(
            "Invalid HTTP status code \"{status}\""
        )));
    }

    let reason = response.reason_phrase();
    if reason.is_empty() {
        return Err(FrameworkError::header_rendering(format!(
            "HTTP reason phrase cannot be empty and there is no default for status \"{status}\""
        )));
    }
    if reason.chars().any(char::is_control) {
        return Err(FrameworkError::header_rendering(format!(
            "Invalid HTTP reason phrase {reason:?} for status \"{status}\""
        )));
    }

    let version = response.version();
    if !is_protocol_version(version) {
        return Err(FrameworkError::header_rendering(format!(
            "Invalid HTTP protocol version {version:?}"
        )));
    }
    Ok(reason)
}

/// `1`, `2`, `1.0`, `1.1` and the like.
fn is_protocol_version(version: &str) -> bool {
    let mut parts = version.split('.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next();
    let digit = |part: &str| part.len() == 1 && part.bytes().all(|b| b.is_ascii_digit());

    parts.next().is_none() && digit(major) && minor.map_or(true, digit)
}
