//! Alarm configuration.
//!
//! Configuration is plain data with serde defaults, so a partial TOML table
//! (or none at all) yields a usable alarm:
//!
//! ```toml
//! worker_threads = 2
//! thread_name = "vcs-refresh"
//! poll_interval_ms = 250
//! drain_budget_ms = 3000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default tick at which the drain re-checks the external progress signal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default time the drain waits before force-cancelling outstanding tasks.
pub const DEFAULT_DRAIN_BUDGET: Duration = Duration::from_secs(10);

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or field types.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A field holds a value the alarm cannot run with.
	#[error("invalid value for '{field}': {reason}")]
	Invalid {
		/// Offending field name.
		field: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
}

/// Tunables for one [`crate::ClosingAlarm`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlarmConfig {
	/// Worker threads in an owned pool. Ignored for shared pools.
	pub worker_threads: usize,
	/// Thread name for an owned pool.
	pub thread_name: String,
	/// Drain tick in milliseconds.
	pub poll_interval_ms: u64,
	/// Drain budget in milliseconds. `None` or `0` waits for natural completion.
	pub drain_budget_ms: Option<u64>,
}

impl Default for AlarmConfig {
	fn default() -> Self {
		Self {
			worker_threads: 1,
			thread_name: "slowly-closing-alarm".to_string(),
			poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
			drain_budget_ms: Some(DEFAULT_DRAIN_BUDGET.as_millis() as u64),
		}
	}
}

impl AlarmConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(src)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let src = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&src)
	}

	/// Rejects values the alarm cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.worker_threads == 0 {
			return Err(ConfigError::Invalid {
				field: "worker_threads",
				reason: "must be at least 1",
			});
		}
		if self.poll_interval_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "poll_interval_ms",
				reason: "must be greater than zero",
			});
		}
		Ok(())
	}

	/// Drain tick.
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	/// Drain budget, if any.
	pub fn drain_budget(&self) -> Option<Duration> {
		self.drain_budget_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
	}

	/// Sets the drain tick.
	#[must_use]
	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval_ms = interval.as_millis() as u64;
		self
	}

	/// Sets or clears the drain budget.
	#[must_use]
	pub fn with_drain_budget(mut self, budget: Option<Duration>) -> Self {
		self.drain_budget_ms = budget.map(|b| b.as_millis() as u64);
		self
	}

	/// Sets the owned pool size.
	#[must_use]
	pub fn with_worker_threads(mut self, threads: usize) -> Self {
		self.worker_threads = threads;
		self
	}

	/// Sets the owned pool thread name.
	#[must_use]
	pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
		self.thread_name = name.into();
		self
	}
}
