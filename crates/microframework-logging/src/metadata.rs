//! Metadata attached to every log entry.
//!
//! Service metadata is loaded once per process; request metadata is built
//! per invocation from CGI-style server variables and carries the
//! correlation id shared by all entries of one request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Version reported when the version file cannot be read.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Identifies the deployed service (`serviceContext`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContext {
    pub service: String,
    pub version: String,
}

impl ServiceContext {
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
        }
    }

    /// Load the version from a file containing the version string.
    ///
    /// Never fails: a missing or empty file yields [`UNKNOWN_VERSION`].
    pub fn load(service: impl Into<String>, version_file: impl AsRef<Path>) -> Self {
        let path = version_file.as_ref();
        let version = match std::fs::read_to_string(path) {
            Ok(contents) if !contents.trim().is_empty() => contents.trim().to_string(),
            Ok(_) => UNKNOWN_VERSION.to_string(),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Could not read version file");
                UNKNOWN_VERSION.to_string()
            }
        };
        Self::new(service, version)
    }
}

/// Per-request metadata (`httpRequest`, correlation id, trace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Correlation id shared by every entry of one request
    pub request_id: String,
    /// Trace id, from `X-Cloud-Trace-Context` when present
    pub trace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestMetadata {
    /// Metadata with a fresh correlation id and no request details.
    pub fn detached() -> Self {
        let request_id = generate_request_id();
        Self {
            trace: request_id.clone(),
            request_id,
            method: None,
            url: None,
            remote_ip: None,
            user_agent: None,
        }
    }

    /// Build from CGI-style server variables (`REQUEST_METHOD`, `REQUEST_URI`, ...).
    pub fn from_server_vars(vars: &BTreeMap<String, String>) -> Self {
        let request_id = generate_request_id();
        let trace = vars
            .get("HTTP_X_CLOUD_TRACE_CONTEXT")
            .and_then(|header| header.split('/').next())
            .filter(|trace| !trace.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| request_id.clone());

        // Stackdriver wants the path only; the query string is not part of requestUrl.
        let url = vars
            .get("REQUEST_URI")
            .map(|uri| uri.split('?').next().unwrap_or_default().to_string());

        Self {
            request_id,
            trace,
            method: vars.get("REQUEST_METHOD").cloned(),
            url,
            remote_ip: vars.get("REMOTE_ADDR").cloned(),
            user_agent: vars.get("HTTP_USER_AGENT").cloned(),
        }
    }

    /// The `httpRequest` object used in application entries.
    pub fn http_context(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut http = serde_json::Map::new();
        if let Some(method) = &self.method {
            http.insert("requestMethod".to_string(), method.clone().into());
        }
        if let Some(url) = &self.url {
            http.insert("requestUrl".to_string(), url.clone().into());
        }
        if let Some(ip) = &self.remote_ip {
            http.insert("remoteIp".to_string(), ip.clone().into());
        }
        http
    }
}

fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}
