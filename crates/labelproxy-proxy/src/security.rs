//! SSRF hardening for the configured `upstream_url`.
//!
//! The proxy only ever dials one fixed upstream, but that URL comes from
//! operator configuration and is worth validating carefully, since a
//! misconfigured or maliciously supplied upstream would let the proxy be
//! used to reach internal services.

use std::net::IpAddr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("URL scheme '{0}' is not allowed, only HTTPS is permitted")]
    InvalidScheme(String),

    #[error("host '{0}' is blocked: internal/private IP addresses are not allowed")]
    BlockedHost(String),

    #[error("URL must have a host")]
    MissingHost,
}

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal",
    "metadata.goog",
    "169.254.169.254",
    "fd00:ec2::254",
];

/// Configuration for upstream URL validation.
#[derive(Debug, Clone)]
pub struct UrlValidationConfig {
    pub allow_http: bool,
    pub allow_localhost: bool,
    pub allow_private_ips: bool,
    pub allowed_domains: Option<Vec<String>>,
}

impl Default for UrlValidationConfig {
    fn default() -> Self {
        Self {
            allow_http: false,
            allow_localhost: false,
            allow_private_ips: false,
            allowed_domains: None,
        }
    }
}

impl UrlValidationConfig {
    /// Development configuration that allows a loopback upstream.
    pub fn development() -> Self {
        Self {
            allow_http: true,
            allow_localhost: true,
            allow_private_ips: true,
            allowed_domains: None,
        }
    }
}

/// Validate `upstream_url` to prevent the proxy being pointed at an internal
/// or metadata service. Returns the parsed URL on success.
pub fn validate_upstream_url(url_str: &str, config: &UrlValidationConfig) -> Result<Url, SecurityError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => {}
        "http" if config.allow_http => {}
        scheme => return Err(SecurityError::InvalidScheme(scheme.to_string())),
    }

    let host = url.host_str().ok_or(SecurityError::MissingHost)?;

    if !config.allow_localhost {
        let host_lower = host.to_lowercase();
        for blocked in BLOCKED_HOSTNAMES {
            if host_lower == *blocked || host_lower.ends_with(&format!(".{}", blocked)) {
                return Err(SecurityError::BlockedHost(host.to_string()));
            }
        }
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if !config.allow_localhost && is_loopback(&ip) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
        if !config.allow_private_ips && is_private_ip(&ip) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
        if is_link_local(&ip) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
    }

    if let Some(ref allowed) = config.allowed_domains {
        let host_lower = host.to_lowercase();
        let is_allowed = allowed.iter().any(|domain| {
            let domain_lower = domain.to_lowercase();
            host_lower == domain_lower || host_lower.ends_with(&format!(".{}", domain_lower))
        });
        if !is_allowed {
            return Err(SecurityError::BlockedHost(format!(
                "{} is not in the allowed domains list",
                host
            )));
        }
    }

    Ok(url)
}

fn is_loopback(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                || v4.octets()[0] == 0
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            (segments[0] & 0xfe00) == 0xfc00
        }
    }
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets()[0] == 169 && v4.octets()[1] == 254,
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_https_url_accepted() {
        let config = UrlValidationConfig::default();
        assert!(validate_upstream_url("https://prometheus.example.com", &config).is_ok());
    }

    #[test]
    fn http_blocked_by_default() {
        let config = UrlValidationConfig::default();
        let result = validate_upstream_url("http://prometheus.example.com", &config);
        assert!(matches!(result, Err(SecurityError::InvalidScheme(_))));
    }

    #[test]
    fn loopback_blocked_by_default() {
        let config = UrlValidationConfig::default();
        let result = validate_upstream_url("https://127.0.0.1:9090", &config);
        assert!(matches!(result, Err(SecurityError::BlockedHost(_))));
    }

    #[test]
    fn cloud_metadata_host_blocked() {
        let config = UrlValidationConfig::default();
        let result = validate_upstream_url("https://169.254.169.254/", &config);
        assert!(result.is_err());
    }

    #[test]
    fn development_config_allows_loopback_http() {
        let config = UrlValidationConfig::development();
        assert!(validate_upstream_url("http://127.0.0.1:9090", &config).is_ok());
    }

    #[test]
    fn private_ip_blocked() {
        let config = UrlValidationConfig::default();
        assert!(validate_upstream_url("https://10.0.0.5:9090", &config).is_err());
        assert!(validate_upstream_url("https://192.168.1.5:9090", &config).is_err());
    }
}
