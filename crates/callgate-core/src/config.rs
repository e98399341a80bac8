//! Gateway configuration: caller input merged with process-wide defaults.
//!
//! [`GatewayConfigInput`] keeps every field as present-or-absent. Only an
//! absent `port` or `origin` is filled from [`ProcessDefaults`]; an explicit
//! `port = 0` is kept as is.

use serde::{Deserialize, Serialize};

/// Default transport path prefix.
pub const DEFAULT_PATH: &str = "/gateway";

/// Process-wide ambient configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessDefaults {
    /// Process identity advertised to admitted peers.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub port: u16,
    /// Cross-origin allow policy; empty disables it.
    #[serde(default)]
    pub origin: String,
}

impl Default for ProcessDefaults {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: 0,
            origin: String::new(),
        }
    }
}

fn default_name() -> String {
    "callgate".to_string()
}

/// Partial gateway configuration as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfigInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayConfig {
    /// Listening port; 0 until bound to an ephemeral port.
    pub port: u16,
    /// Transport path prefix.
    pub path: String,
    /// Cross-origin allow policy; empty disables it.
    pub origin: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 0,
            path: DEFAULT_PATH.to_string(),
            origin: String::new(),
        }
    }
}

impl GatewayConfigInput {
    /// Resolve this input against `defaults`, starting from a fresh config.
    pub fn resolve(&self, defaults: &ProcessDefaults) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.apply(self, defaults);
        config
    }

    /// Overlay the fields set in `other` onto `self`.
    pub fn merge(mut self, other: GatewayConfigInput) -> Self {
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.path.is_some() {
            self.path = other.path;
        }
        if other.origin.is_some() {
            self.origin = other.origin;
        }
        self
    }
}

impl GatewayConfig {
    /// Apply caller input on top of this config.
    ///
    /// Fields set in `input` are copied. An absent `port` or `origin` is
    /// reset to the process default; an absent `path` keeps its current value.
    pub fn apply(&mut self, input: &GatewayConfigInput, defaults: &ProcessDefaults) {
        self.port = input.port.unwrap_or(defaults.port);
        self.origin = input
            .origin
            .clone()
            .unwrap_or_else(|| defaults.origin.clone());
        if let Some(path) = &input.path {
            self.path = path.clone();
        }
    }

    /// Whether a cross-origin policy is configured.
    pub fn has_origin(&self) -> bool {
        !self.origin.trim().is_empty()
    }
}
