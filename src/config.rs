//! Configuration types for Polly

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::replay::MatchPolicy;
use crate::storage::validate_session_name;
use crate::{PollyError, Result};

/// Default listen port
pub const DEFAULT_PORT: u16 = 1234;

/// Operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Record mode: forward traffic upstream and capture it
    Record,
    /// Replay mode: serve from a captured session
    #[default]
    Replay,
}

impl std::str::FromStr for Mode {
    type Err = PollyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "replay" => Ok(Self::Replay),
            other => Err(PollyError::Config(format!(
                "Unknown mode '{other}', expected 'record' or 'replay'"
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record => f.write_str("record"),
            Self::Replay => f.write_str("replay"),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Operating mode
    pub mode: Mode,
    /// Session name, the stem of the `.har` file
    pub session: String,
    /// Directory holding session files
    pub session_dir: PathBuf,
    /// Port to listen on
    pub port: u16,
    /// Replay matching policy
    pub policy: MatchPolicy,
    /// Upstream origins used in record mode
    pub upstream: UpstreamConfig,
    /// Resource limits
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            session: String::new(),
            session_dir: PathBuf::from("."),
            port: DEFAULT_PORT,
            policy: MatchPolicy::default(),
            upstream: UpstreamConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Upstream origins
///
/// Requests whose path contains `mock_path_marker` go to `mock_backend_url`
/// untouched; everything else goes to `sandbox_url` with its `Host` header
/// rewritten to `sandbox_host`. Without a mock backend every request goes to
/// the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the sandbox upstream
    pub sandbox_url: String,
    /// Host header sent to the sandbox upstream
    pub sandbox_host: String,
    /// Base URL of the mock backend, if any
    pub mock_backend_url: Option<String>,
    /// Path substring routing a request to the mock backend
    pub mock_path_marker: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            sandbox_url: "https://tda-sandbox-mock.travelperk.com".to_string(),
            sandbox_host: "tda-sandbox-mock.travelperk.com".to_string(),
            mock_backend_url: Some("http://sandbox-backend.travelperk.com".to_string()),
            mock_path_marker: "be-mock".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Single-upstream configuration pointing every request at `base_url`
    #[must_use]
    pub fn single(base_url: &str, host: &str) -> Self {
        Self {
            sandbox_url: base_url.trim_end_matches('/').to_string(),
            sandbox_host: host.to_string(),
            mock_backend_url: None,
            mock_path_marker: String::new(),
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound request body size in bytes
    pub max_request_size: usize,
    /// Maximum headers per inbound request
    pub max_headers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 16 * 1024 * 1024, // 16 MB
            max_headers: 128,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PollyError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| PollyError::Config(format!("Failed to parse config: {e}")))
    }

    /// Path of the session file
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        crate::storage::session_path(&self.session_dir, &self.session)
    }

    /// Address the server listens on
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_session_name(&self.session)?;

        if self.port == 0 {
            return Err(PollyError::Config("port cannot be 0".to_string()));
        }

        if self.mode == Mode::Record {
            validate_base_url("upstream.sandbox_url", &self.upstream.sandbox_url)?;
            if self.upstream.sandbox_host.is_empty() {
                return Err(PollyError::Config(
                    "upstream.sandbox_host cannot be empty".to_string(),
                ));
            }
            if let Some(ref url) = self.upstream.mock_backend_url {
                validate_base_url("upstream.mock_backend_url", url)?;
                if self.upstream.mock_path_marker.is_empty() {
                    return Err(PollyError::Config(
                        "upstream.mock_path_marker cannot be empty with a mock backend"
                            .to_string(),
                    ));
                }
            }
        }

        if self.limits.max_request_size == 0 {
            return Err(PollyError::Config(
                "limits.max_request_size must be > 0".to_string(),
            ));
        }
        if self.limits.max_headers == 0 {
            return Err(PollyError::Config(
                "limits.max_headers must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_base_url(field: &str, url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| PollyError::Config(format!("{field}: invalid URL '{url}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PollyError::Config(format!(
                "{field}: unsupported scheme '{other}'"
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(PollyError::Config(format!("{field}: URL '{url}' has no host")));
    }

    Ok(())
}
