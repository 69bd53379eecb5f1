//! Forwarding policy for proxied requests

use std::time::Duration;

/// Timeouts and header handling applied to every forwarded request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardPolicy {
    /// Hard deadline for the whole upstream round trip, body included
    pub upstream_timeout: Duration,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Relay the caller-identity header to the upstream instead of stripping it
    pub forward_caller_header: bool,
    /// Largest inbound request body the mesh will buffer
    pub max_body_bytes: usize,
}

impl Default for ForwardPolicy {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            forward_caller_header: false,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ForwardPolicy {
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_forward_caller_header(mut self, forward: bool) -> Self {
        self.forward_caller_header = forward;
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}
