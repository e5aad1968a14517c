//! Pool keys: endpoint plus namespace.

use std::fmt;
use wspool_session::Endpoint;

/// Caller-chosen partition label; independent pools may target one endpoint
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    /// Name of the namespace used when the caller gives none
    pub const GLOBAL: &'static str = "global";

    /// Namespace with the given label
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The default namespace
    pub fn global() -> Self {
        Self(Self::GLOBAL.to_string())
    }

    /// Label as given
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for Namespace {
    fn from(label: String) -> Self {
        Self(label)
    }
}

/// Identifies one pool in the registry
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PoolKey {
    endpoint: Endpoint,
    namespace: Namespace,
}

impl PoolKey {
    /// Key for `endpoint` within `namespace`
    pub fn new(endpoint: Endpoint, namespace: Namespace) -> Self {
        Self {
            endpoint,
            namespace,
        }
    }

    /// Key for `endpoint` in the global namespace
    pub fn global(endpoint: Endpoint) -> Self {
        Self::new(endpoint, Namespace::global())
    }

    /// Target endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Partition label
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.namespace, self.endpoint)
    }
}
