use std::fmt;

use tracing::warn;

/// A rule dropped while building route configuration. The rest of the
/// configuration is still published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// `Kind/namespace/name` of the offending object.
    pub object: String,
    pub reason: &'static str,
    pub message: String,
}

impl Rejection {
    pub fn new(object: impl Into<String>, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn log(&self) {
        warn!(
            "Rejected {} (reason={}): {}",
            self.object, self.reason, self.message
        );
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.object, self.reason, self.message)
    }
}

/// Reason codes carried by rejections.
pub mod reason {
    pub const INVALID_LISTENER: &str = "InvalidListener";
    pub const DUPLICATE_PORT: &str = "DuplicateListenerPort";
    pub const HOSTNAME_CONFLICT: &str = "HostnameConflict";
    pub const ROUTE_CONFLICT: &str = "RouteConflict";
    pub const CERTIFICATE_MISSING: &str = "CertificateNotCovering";
    pub const INVALID_CERTIFICATE: &str = "InvalidCertificate";
    pub const BACKEND_NOT_FOUND: &str = "BackendNotFound";
    pub const INVALID_HOSTNAME: &str = "InvalidHostname";
    pub const INVALID_SERVICE: &str = "InvalidService";
    pub const INVALID_ANNOTATION: &str = "InvalidAnnotation";
}
