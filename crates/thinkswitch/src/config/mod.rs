use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Result, ThinkswitchError};
use crate::proxy::SamplingPolicy;

/// Main configuration structure for thinkswitch
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Served model and virtual model names
    #[serde(default)]
    pub models: ModelsConfig,
    /// Sampling parameter policy
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Response repair settings
    #[serde(default)]
    pub rectifier: RectifierConfig,
}

/// HTTP proxy server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on (e.g., "0.0.0.0:9000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Backend base URL; request paths are appended to it
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Timeout for establishing a backend connection, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Grace period for in-flight requests on shutdown, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            backend_url: default_backend_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    180
}

/// Model naming configuration
///
/// None of these have usable defaults: they must match what the backend
/// serves and what clients are told to ask for.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelsConfig {
    /// Real model identifier served by the backend
    #[serde(default)]
    pub served_model: String,
    /// Virtual name for thinking mode, general tasks
    #[serde(default)]
    pub thinking_general: String,
    /// Virtual name for thinking mode, coding tasks
    #[serde(default)]
    pub thinking_coding: String,
    /// Virtual name for instant mode, general tasks
    #[serde(default)]
    pub instruct_general: String,
    /// Virtual name for instant mode, reasoning tasks
    #[serde(default)]
    pub instruct_reasoning: String,
}

/// Sampling parameter policy configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SamplingConfig {
    /// Overwrite client-supplied sampling values instead of only filling gaps
    #[serde(default)]
    pub enforce: bool,
}

impl SamplingConfig {
    pub fn policy(&self) -> SamplingPolicy {
        if self.enforce {
            SamplingPolicy::Enforce
        } else {
            SamplingPolicy::Fill
        }
    }
}

/// Response repair configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RectifierConfig {
    /// Move reasoning text into an empty `content` for instant, buffered completions
    #[serde(default = "default_fix_misplaced_content")]
    pub fix_misplaced_content: bool,
    /// Bytes the SSE reframer may hold without a complete event before flushing raw
    #[serde(default = "default_stream_watermark_bytes")]
    pub stream_watermark_bytes: usize,
}

impl Default for RectifierConfig {
    fn default() -> Self {
        Self {
            fix_misplaced_content: default_fix_misplaced_content(),
            stream_watermark_bytes: default_stream_watermark_bytes(),
        }
    }
}

fn default_fix_misplaced_content() -> bool {
    true
}

fn default_stream_watermark_bytes() -> usize {
    8 * 1024
}

impl Config {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ThinkswitchError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| ThinkswitchError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from an explicit path, or the first default location that exists
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".thinkswitch").join("config.toml")),
            dirs::config_dir().map(|c| c.join("thinkswitch").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Parsed backend base URL
    pub fn backend_url(&self) -> Result<Url> {
        let url = Url::parse(&self.proxy.backend_url).map_err(|e| {
            ThinkswitchError::Config(format!(
                "Invalid backend URL '{}': {e}",
                self.proxy.backend_url
            ))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ThinkswitchError::Config(format!(
                "Unsupported backend URL scheme '{other}': only http and https are allowed"
            ))),
        }
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.proxy
            .listen_addr
            .parse()
            .map_err(|e| ThinkswitchError::Config(format!("Invalid listen address: {e}")))
    }

    /// Check the configuration before anything is started
    pub fn validate(&self) -> Result<()> {
        if self.proxy.listen_addr.is_empty() {
            return Err(ThinkswitchError::Config(
                "listen address cannot be empty".to_string(),
            ));
        }
        let addr = self.listen_addr()?;
        if addr.port() <= 1024 {
            return Err(ThinkswitchError::Config(format!(
                "port must be between 1025 and 65535, got {}",
                addr.port()
            )));
        }
        self.backend_url()?;

        let names = [
            ("served model", &self.models.served_model),
            ("thinking-general model", &self.models.thinking_general),
            ("thinking-coding model", &self.models.thinking_coding),
            ("instruct-general model", &self.models.instruct_general),
            ("instruct-reasoning model", &self.models.instruct_reasoning),
        ];
        for (label, name) in names {
            if name.is_empty() {
                return Err(ThinkswitchError::Config(format!(
                    "{label} name cannot be empty"
                )));
            }
        }

        if self.rectifier.stream_watermark_bytes == 0 {
            return Err(ThinkswitchError::Config(
                "stream watermark must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
