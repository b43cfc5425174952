//! Client key derivation.

use std::fmt;

/// Address used when a request carries no resolvable client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// A key that uniquely identifies a rate-limited client scope.
///
/// Limits apply per client address, per HTTP method and per path. The parts
/// are kept as separate fields so that addresses containing the display
/// delimiter (IPv6) can never collide with another tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    /// Client network address
    pub addr: String,
    /// HTTP method, exactly as received
    pub method: String,
    /// Normalized request path
    pub path: String,
}

impl ClientKey {
    /// Create a new client key.
    pub fn new(addr: &str, method: &str, path: &str) -> Self {
        let addr = if addr.is_empty() { UNKNOWN_CLIENT } else { addr };

        Self {
            addr: addr.to_string(),
            method: method.to_string(),
            path: normalize_path(path),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.addr, self.method, self.path)
    }
}

/// Strip trailing slashes so `/departments/` and `/departments` share a bucket.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
