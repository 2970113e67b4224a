//! `thingkit.toml` loading.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading the configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// The file is not valid TOML or has unexpected fields.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// `log.level` is not a tracing level.
	#[error("invalid log level: {0} (expected trace, debug, info, warn or error)")]
	InvalidLevel(String),

	/// `stream.capacity` is too small to ever serve a reader.
	#[error("stream capacity must be at least 2, got {0}")]
	InvalidCapacity(usize),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	pub thing: ThingConfig,
	pub stream: StreamConfig,
	pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThingConfig {
	/// Path the demo thing is exposed under.
	pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
	/// Ring buffer slots.
	pub capacity: usize,
	/// Delay between synthetic frames.
	pub frame_interval_ms: u64,
	pub width: u32,
	pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
	pub level: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			thing: ThingConfig::default(),
			stream: StreamConfig::default(),
			log: LogConfig::default(),
		}
	}
}

impl Default for ThingConfig {
	fn default() -> Self {
		Self { path: "/camera".to_string() }
	}
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			capacity: 100,
			frame_interval_ms: 33,
			width: 64,
			height: 48,
		}
	}
}

impl Default for LogConfig {
	fn default() -> Self {
		Self { level: "info".to_string() }
	}
}

impl StreamConfig {
	pub fn frame_interval(&self) -> Duration {
		Duration::from_millis(self.frame_interval_ms)
	}
}

impl Config {
	/// Reads and validates a config file.
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml(&text)
	}

	/// Parses and validates config text. Missing fields take their defaults.
	pub fn from_toml(text: &str) -> Result<Self> {
		let config: Self = toml::from_str(text)?;
		config.log_level()?;
		if config.stream.capacity < 2 {
			return Err(ConfigError::InvalidCapacity(config.stream.capacity));
		}
		Ok(config)
	}

	pub fn log_level(&self) -> Result<tracing::Level> {
		tracing::Level::from_str(&self.log.level).map_err(|_| ConfigError::InvalidLevel(self.log.level.clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_uses_defaults() {
		let config = Config::from_toml("").unwrap();
		assert_eq!(config, Config::default());
		assert_eq!(config.log_level().unwrap(), tracing::Level::INFO);
		assert_eq!(config.stream.frame_interval(), Duration::from_millis(33));
	}

	#[test]
	fn partial_sections_merge_with_defaults() {
		let config = Config::from_toml(
			r#"
[thing]
path = "/microscope"

[stream]
capacity = 12

[log]
level = "debug"
"#,
		)
		.unwrap();

		assert_eq!(config.thing.path, "/microscope");
		assert_eq!(config.stream.capacity, 12);
		assert_eq!(config.stream.width, 64);
		assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);
	}

	#[test]
	fn rejects_unknown_fields() {
		assert!(matches!(Config::from_toml("[stream]\nslots = 4\n"), Err(ConfigError::Parse(_))));
	}

	#[test]
	fn rejects_bad_values() {
		assert!(matches!(Config::from_toml("[log]\nlevel = \"loud\"\n"), Err(ConfigError::InvalidLevel(level)) if level == "loud"));
		assert!(matches!(Config::from_toml("[stream]\ncapacity = 1\n"), Err(ConfigError::InvalidCapacity(1))));
	}

	#[test]
	fn missing_file_reports_path() {
		let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
		assert!(err.to_string().contains("/definitely/not/here.toml"));
	}
}
