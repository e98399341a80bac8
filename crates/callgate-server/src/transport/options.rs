//! Transport tuning derived from the resolved gateway config.
//!
//! Timeouts and the message ceiling are fixed, tighter than typical
//! transport defaults so dead peers are dropped quickly.

use callgate_core::GatewayConfig;
use std::time::Duration;

/// How long a connection has to finish its handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);
/// How long to wait for a pong before declaring the peer dead.
pub const PING_TIMEOUT: Duration = Duration::from_millis(2_000);
/// Time between pings.
pub const PING_INTERVAL: Duration = Duration::from_millis(10_000);
/// Largest message (and frame) a peer may send, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 100_000;

/// Allowed cross-origin callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    /// `*`: any origin.
    Any,
    /// Exact origins, e.g. `https://app.example.com`.
    List(Vec<String>),
}

impl CorsPolicy {
    /// Parse a configured origin value. Empty means no policy.
    pub fn parse(origin: &str) -> Option<Self> {
        let origin = origin.trim();
        if origin.is_empty() {
            return None;
        }
        if origin == "*" {
            return Some(CorsPolicy::Any);
        }
        let list: Vec<String> = origin
            .split(',')
            .map(|o| o.trim().trim_end_matches('/').to_ascii_lowercase())
            .filter(|o| !o.is_empty())
            .collect();
        Some(CorsPolicy::List(list))
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            CorsPolicy::Any => true,
            CorsPolicy::List(list) => {
                let origin = origin.trim_end_matches('/').to_ascii_lowercase();
                list.iter().any(|o| *o == origin)
            }
        }
    }
}

/// Options the transport server is constructed with.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub path: String,
    pub connect_timeout: Duration,
    pub ping_timeout: Duration,
    pub ping_interval: Duration,
    pub max_message_size: usize,
    /// `None` leaves cross-origin access at the restrictive default.
    pub cors: Option<CorsPolicy>,
}

impl TransportOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            path: config.path.clone(),
            connect_timeout: CONNECT_TIMEOUT,
            ping_timeout: PING_TIMEOUT,
            ping_interval: PING_INTERVAL,
            max_message_size: MAX_MESSAGE_SIZE,
            cors: CorsPolicy::parse(&config.origin),
        }
    }

    /// Whether a request path falls under the transport path prefix.
    pub fn path_matches(&self, request_path: &str) -> bool {
        let prefix = self.path.trim_end_matches('/');
        let path = request_path.split('?').next().unwrap_or_default();
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Whether a handshake with these `Origin` and `Host` headers may proceed.
    ///
    /// Without a policy only same-origin browser handshakes pass; requests
    /// without an `Origin` header (non-browser callers) always pass.
    pub fn origin_allowed(&self, origin: Option<&str>, host: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        match &self.cors {
            Some(policy) => policy.allows(origin),
            None => match (origin_authority(origin), host) {
                (Some(authority), Some(host)) => authority.eq_ignore_ascii_case(host.trim()),
                _ => false,
            },
        }
    }
}

/// `https://host:port/` → `host:port`.
fn origin_authority(origin: &str) -> Option<&str> {
    let (_, rest) = origin.split_once("://")?;
    let authority = rest.split('/').next()?;
    (!authority.is_empty()).then_some(authority)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(origin: &str) -> TransportOptions {
        TransportOptions::from_config(&GatewayConfig {
            port: 0,
            path: "/gateway".into(),
            origin: origin.into(),
        })
    }

    #[test]
    fn fixed_tuning() {
        let opts = options("");
        assert_eq!(opts.path, "/gateway");
        assert_eq!(opts.connect_timeout, Duration::from_secs(5));
        assert_eq!(opts.ping_timeout, Duration::from_secs(2));
        assert_eq!(opts.ping_interval, Duration::from_secs(10));
        assert_eq!(opts.max_message_size, 100_000);
        assert!(opts.cors.is_none());
    }

    #[test]
    fn cors_only_when_origin_configured() {
        assert_eq!(options("*").cors, Some(CorsPolicy::Any));
        assert_eq!(
            options("https://a.example, https://b.example/").cors,
            Some(CorsPolicy::List(vec![
                "https://a.example".into(),
                "https://b.example".into()
            ]))
        );
        assert!(options("   ").cors.is_none());
    }

    #[test]
    fn path_prefix() {
        let opts = options("");
        assert!(opts.path_matches("/gateway"));
        assert!(opts.path_matches("/gateway/"));
        assert!(opts.path_matches("/gateway/?v=1"));
        assert!(opts.path_matches("/gateway?v=1"));
        assert!(!opts.path_matches("/gatewayx"));
        assert!(!opts.path_matches("/"));
    }

    #[test]
    fn restrictive_default_allows_same_origin_only() {
        let opts = options("");
        assert!(opts.origin_allowed(None, Some("gw.local:7300")));
        assert!(opts.origin_allowed(Some("http://gw.local:7300"), Some("gw.local:7300")));
        assert!(!opts.origin_allowed(Some("https://evil.example"), Some("gw.local:7300")));
        assert!(!opts.origin_allowed(Some("null"), Some("gw.local:7300")));
    }

    #[test]
    fn configured_policy() {
        let opts = options("https://app.example.com");
        assert!(opts.origin_allowed(Some("https://app.example.com"), Some("gw.local")));
        assert!(!opts.origin_allowed(Some("https://other.example.com"), Some("gw.local")));
        assert!(options("*").origin_allowed(Some("https://x.example"), Some("gw.local")));
    }
}
