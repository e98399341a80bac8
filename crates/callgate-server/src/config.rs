//! Server configuration: TOML file + CLI overrides.

use callgate_core::{GatewayConfigInput, GatewayError, GatewayResult, ProcessDefaults};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// `[process]`: ambient defaults shared by every gateway in the process.
    #[serde(default)]
    pub process: ProcessDefaults,
    /// `[gateway]`: explicit gateway input.
    #[serde(default)]
    pub gateway: GatewayConfigInput,
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub path: Option<String>,
    pub origin: Option<String>,
    pub name: Option<String>,
}

/// Config file merged with CLI overrides.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub process: ProcessDefaults,
    pub gateway: GatewayConfigInput,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> GatewayResult<Self> {
        let file = match config_path {
            Some(path) => read_config_file(&expand_tilde(path))?,
            None => ConfigFile::default(),
        };

        let mut process = file.process;
        if let Some(name) = cli.name {
            process.name = name;
        }

        // CLI flags count as explicit input, so `--port 0` still means port 0.
        let gateway = file.gateway.merge(GatewayConfigInput {
            port: cli.port,
            path: cli.path,
            origin: cli.origin,
        });

        Ok(Self { process, gateway })
    }
}

fn read_config_file(path: &Path) -> GatewayResult<ConfigFile> {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        return Ok(ConfigFile::default());
    }
    info!(path = %path.display(), "loading config file");
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
