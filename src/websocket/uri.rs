use std::fmt;
use std::str::FromStr;
use tungstenite::http::Uri;
use crate::error::{WsResult, WsError};

/// A parsed `ws://` or `wss://` endpoint with its port resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsTarget {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`.
    pub path: String,
}

impl WsTarget {
    /// Parses `scheme://host[:port]path`, defaulting the port to 80 for `ws` and 443 for `wss`.
    pub fn parse(uri: &str) -> WsResult<WsTarget> {
        let parsed = Uri::from_str(uri).map_err(|e| {
            tracing::error!("Refusing invalid URI {:?}: {}", uri, e);
            WsError::InvalidUri(format!("{}: {}", uri, e))
        })?;

        let scheme = parsed
            .scheme_str()
            .ok_or_else(|| WsError::InvalidUri(format!("{}: missing scheme", uri)))?;
        let secure = if scheme.eq_ignore_ascii_case("wss") {
            true
        } else if scheme.eq_ignore_ascii_case("ws") {
            false
        } else {
            tracing::error!("Refusing URI {:?} with unsupported scheme", uri);
            return Err(WsError::UnsupportedScheme(scheme.to_string()));
        };

        let host = match parsed.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(WsError::InvalidUri(format!("{}: missing host", uri))),
        };

        let port = parsed.port_u16().unwrap_or(if secure { 443 } else { 80 });
        let path = match parsed.path_and_query() {
            Some(pq) if !pq.as_str().is_empty() && pq.as_str().starts_with('/') => pq.as_str().to_string(),
            Some(pq) if !pq.as_str().is_empty() => format!("/{}", pq.as_str()),
            _ => "/".to_string(),
        };

        Ok(WsTarget { secure, host, port, path })
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// The URI used for the upgrade request, with the port spelled out.
    pub fn request_uri(&self) -> WsResult<Uri> {
        Uri::from_str(&self.to_string()).map_err(|e| WsError::InvalidUri(e.to_string()))
    }
}

impl fmt::Display for WsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme(), self.host, self.port, self.path)
    }
}
