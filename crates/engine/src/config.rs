//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! base_url = "https://api.example.com"
//! request_timeout_ms = 30000
//!
//! [cache]
//! short_ms = 30000
//! long_ms = 300000
//!
//! [operations]
//! poll_interval_ms = 1000
//!
//! [elevation]
//! required_tokens = ["insufficient_scope"]
//! second_factor_tokens = ["otp_token_required"]
//! token_ttl_secs = 1800
//!
//! [loaders]
//! auth = "auth"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// `base_url` is not an absolute URL that can carry path segments.
	#[error("invalid base_url '{url}': {reason}")]
	InvalidBaseUrl {
		/// The configured value.
		url: String,
		/// Why it was rejected.
		reason: String,
	},
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
	/// Root of the control-plane API. Command paths are appended to it.
	pub base_url: String,
	/// Default per-invocation deadline. `None` waits indefinitely.
	pub request_timeout_ms: Option<u64>,
	pub cache: CacheTimers,
	pub operations: OperationConfig,
	pub elevation: ElevationConfig,
	pub loaders: SharedLoaders,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			base_url: "http://127.0.0.1:4000".into(),
			request_timeout_ms: Some(30_000),
			cache: CacheTimers::default(),
			operations: OperationConfig::default(),
			elevation: ElevationConfig::default(),
			loaders: SharedLoaders::default(),
		}
	}
}

/// Freshness windows for the named cache policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheTimers {
	pub short_ms: u64,
	pub long_ms: u64,
}

impl Default for CacheTimers {
	fn default() -> Self {
		Self {
			short_ms: 30_000,
			long_ms: 300_000,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationConfig {
	/// Delay between operation fetches while waiting for a terminal status.
	pub poll_interval_ms: u64,
}

impl Default for OperationConfig {
	fn default() -> Self {
		Self { poll_interval_ms: 1_000 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElevationConfig {
	/// Backend error tokens meaning "retry this command with an elevated token".
	pub required_tokens: Vec<String>,
	/// Backend error tokens meaning "the step-up needs a second factor".
	pub second_factor_tokens: Vec<String>,
	/// Lifetime requested for elevated tokens.
	pub token_ttl_secs: u64,
}

impl Default for ElevationConfig {
	fn default() -> Self {
		Self {
			required_tokens: vec!["insufficient_scope".into()],
			second_factor_tokens: vec!["otp_token_required".into()],
			token_ttl_secs: 1_800,
		}
	}
}

/// Well-known loader ids shared across workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SharedLoaders {
	pub auth: String,
}

impl Default for SharedLoaders {
	fn default() -> Self {
		Self { auth: "auth".into() }
	}
}

impl EngineConfig {
	/// Parses a configuration document.
	pub fn from_toml_str(input: &str) -> Result<Self> {
		let config: Self = toml::from_str(input)?;
		config.base_url()?;
		Ok(config)
	}

	/// Reads and parses a configuration file.
	pub fn load(path: &Path) -> Result<Self> {
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	/// Parsed `base_url`.
	pub fn base_url(&self) -> Result<Url> {
		let url = Url::parse(&self.base_url).map_err(|err| ConfigError::InvalidBaseUrl {
			url: self.base_url.clone(),
			reason: err.to_string(),
		})?;
		if url.cannot_be_a_base() {
			return Err(ConfigError::InvalidBaseUrl {
				url: self.base_url.clone(),
				reason: "URL cannot carry path segments".into(),
			});
		}
		Ok(url)
	}

	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout_ms.map(Duration::from_millis)
	}

	pub fn operation_poll_interval(&self) -> Duration {
		Duration::from_millis(self.operations.poll_interval_ms)
	}
}
