//! Inbound request model and the default request source.
//!
//! A request arrives as CGI-style server variables plus a body. The same
//! variables also feed request metadata for logging, so they are kept on the
//! request as a [`ServerEnv`].

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use std::collections::BTreeMap;
use std::io::Read;
use std::net::SocketAddr;

use crate::error::{FrameworkError, Result};

/// CGI-style server variables (`REQUEST_METHOD`, `HTTP_USER_AGENT`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEnv(BTreeMap<String, String>);

impl ServerEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the process environment.
    pub fn from_process_env() -> Self {
        Self(std::env::vars().collect())
    }

    /// Variables describing a request received by an HTTP server.
    pub fn from_request_parts(
        method: &Method,
        uri: &Uri,
        version: &str,
        headers: &HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("REQUEST_METHOD".to_string(), method.to_string());
        vars.insert(
            "REQUEST_URI".to_string(),
            uri.path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        );
        vars.insert(
            "QUERY_STRING".to_string(),
            uri.query().unwrap_or_default().to_string(),
        );
        vars.insert("SERVER_PROTOCOL".to_string(), format!("HTTP/{version}"));
        if let Some(addr) = remote_addr {
            vars.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        }

        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let key = match name.as_str() {
                "content-type" => "CONTENT_TYPE".to_string(),
                "content-length" => "CONTENT_LENGTH".to_string(),
                other => format!("HTTP_{}", other.to_ascii_uppercase().replace('-', "_")),
            };
            vars.entry(key)
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Self(vars)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl FromIterator<(String, String)> for ServerEnv {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A parsed inbound request.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    method: Method,
    uri: Uri,
    version: String,
    headers: HeaderMap,
    body: Bytes,
    server: ServerEnv,
}

impl ServerRequest {
    /// Build a request from server variables and a body.
    pub fn from_env(server: ServerEnv, body: Bytes) -> Result<Self> {
        let method = match server.get("REQUEST_METHOD") {
            Some(m) => Method::from_bytes(m.as_bytes())
                .map_err(|e| FrameworkError::RequestUnavailable(format!("bad method {m:?}: {e}")))?,
            None => Method::GET,
        };
        let uri_text = server.get("REQUEST_URI").unwrap_or("/");
        let uri: Uri = uri_text
            .parse()
            .map_err(|e| FrameworkError::RequestUnavailable(format!("bad uri {uri_text:?}: {e}")))?;
        let version = server
            .get("SERVER_PROTOCOL")
            .and_then(|p| p.strip_prefix("HTTP/"))
            .unwrap_or("1.1")
            .to_string();

        let mut headers = HeaderMap::new();
        for (key, value) in server.as_map() {
            let name = match key.as_str() {
                "CONTENT_TYPE" => "content-type".to_string(),
                "CONTENT_LENGTH" => "content-length".to_string(),
                other => match other.strip_prefix("HTTP_") {
                    Some(rest) => rest.to_ascii_lowercase().replace('_', "-"),
                    None => continue,
                },
            };
            if value.is_empty() {
                continue;
            }
            // Variables that cannot form a header are dropped rather than failing the request.
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        Ok(Self {
            method,
            uri,
            version,
            headers,
            body,
            server,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn server(&self) -> &ServerEnv {
        &self.server
    }

    /// Query parameters as raw `key=value` pairs; the last value of a key wins.
    pub fn query_params(&self) -> BTreeMap<String, String> {
        self.uri
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect()
    }
}

/// Where the supervisor reads the request from when no factory is supplied.
pub trait RequestSource: Send + Sync {
    fn read_request(&self) -> Result<ServerRequest>;
}

/// Reads the request from CGI variables and standard input.
#[derive(Debug, Clone, Default)]
pub struct CgiRequestSource {
    env: Option<ServerEnv>,
}

impl CgiRequestSource {
    /// Read variables from the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given variables instead of the process environment.
    pub fn with_env(env: ServerEnv) -> Self {
        Self { env: Some(env) }
    }
}

impl RequestSource for CgiRequestSource {
    fn read_request(&self) -> Result<ServerRequest> {
        let env = self.env.clone().unwrap_or_else(ServerEnv::from_process_env);

        let length = env
            .get("CONTENT_LENGTH")
            .and_then(|l| l.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let mut body = Vec::new();
        if length > 0 {
            std::io::stdin()
                .lock()
                .take(length)
                .read_to_end(&mut body)
                .map_err(|e| FrameworkError::RequestUnavailable(format!("could not read body: {e}")))?;
        }

        ServerRequest::from_env(env, Bytes::from(body))
    }
}
