//! Endpoint parsing and normalization.
//!
//! An endpoint is the address of a remote node: scheme, host, port and an
//! optional path. Two endpoints are the same node when their normalized
//! strings match, so `WS://Localhost:8546/` and `ws://localhost:8546` share a
//! pool.

use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::SessionError;

/// Transport scheme of an endpoint
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Scheme {
    /// Plain WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
}

impl Scheme {
    /// Scheme as written in a URL
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    /// Port used when the URL does not carry one
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, normalized address of a remote node
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    /// Parse and normalize an endpoint string of the form `scheme://host:port[/path]`
    pub fn parse(input: &str) -> Result<Self, SessionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SessionError::InvalidEndpoint("empty endpoint".to_string()));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| SessionError::InvalidEndpoint(format!("{}: {}", trimmed, e)))?;

        let scheme = match url.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => {
                return Err(SessionError::InvalidEndpoint(format!(
                    "unsupported scheme '{}' in {}",
                    other, trimmed
                )))
            }
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => {
                return Err(SessionError::InvalidEndpoint(format!(
                    "missing host in {}",
                    trimmed
                )))
            }
        };

        if !url.username().is_empty() || url.password().is_some() {
            return Err(SessionError::InvalidEndpoint(format!(
                "credentials are not allowed in {}",
                trimmed
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(SessionError::InvalidEndpoint(format!(
                "query and fragment are not allowed in {}",
                trimmed
            )));
        }

        // Url drops the port when it equals the scheme default
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        if port == 0 {
            return Err(SessionError::InvalidEndpoint(format!(
                "port 0 is not connectable in {}",
                trimmed
            )));
        }

        let path = match url.path() {
            "" | "/" => String::new(),
            p => p.trim_end_matches('/').to_string(),
        };

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Transport scheme
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Lowercased host name or address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path component without trailing slash, empty for the root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// URL handed to the WebSocket client
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

impl FromStr for Endpoint {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}
