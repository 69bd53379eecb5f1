//! Gateway configuration from command-line flags and environment variables

use clap::{Parser, ValueEnum};
use mesh_proxy::ForwardPolicy;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "mesh-gateway", about = "Service directory and authorized forwarding gateway")]
pub struct GatewayConfig {
    /// Address to listen on
    #[arg(long, env = "MESH_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Hard deadline for a proxied upstream round trip, in seconds
    #[arg(long, env = "MESH_UPSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub upstream_timeout_secs: u64,

    /// Upstream connect timeout, in seconds
    #[arg(long, env = "MESH_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Pass the X-Service-ID header through to upstreams instead of stripping it
    #[arg(long, env = "MESH_FORWARD_CALLER_HEADER")]
    pub forward_caller_header: bool,

    /// Largest request body accepted on /register and /request, in bytes
    #[arg(long, env = "MESH_MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    #[arg(long, env = "MESH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl GatewayConfig {
    pub fn forward_policy(&self) -> ForwardPolicy {
        ForwardPolicy::default()
            .with_upstream_timeout(Duration::from_secs(self.upstream_timeout_secs))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_forward_caller_header(self.forward_caller_header)
            .with_max_body_bytes(self.max_body_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::try_parse_from(["mesh-gateway"]).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.forward_policy(), ForwardPolicy::default());
    }

    #[test]
    fn test_flags_override_policy() {
        let config = GatewayConfig::try_parse_from([
            "mesh-gateway",
            "--listen",
            "127.0.0.1:9090",
            "--upstream-timeout-secs",
            "3",
            "--connect-timeout-secs",
            "1",
            "--forward-caller-header",
            "--max-body-bytes",
            "4096",
            "--log-format",
            "json",
        ])
        .unwrap();

        let policy = config.forward_policy();
        assert_eq!(policy.upstream_timeout, Duration::from_secs(3));
        assert_eq!(policy.connect_timeout, Duration::from_secs(1));
        assert!(policy.forward_caller_header);
        assert_eq!(policy.max_body_bytes, 4096);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_listen_address_rejected() {
        assert!(GatewayConfig::try_parse_from(["mesh-gateway", "--listen", "nowhere"]).is_err());
    }
}
