//! Error types for the shutdown alarm.

use thiserror::Error;

use crate::config::ConfigError;

/// Result of a shutdown checkpoint that fired.
///
/// Returned by [`crate::SectionAware`] checkpoints once shutdown has begun.
/// Task bodies propagate it with `?`; the alarm never treats it as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Stop {
	/// Cooperative cancellation. The worker pool is shared, so the calling
	/// task is only asked to unwind and nothing is aborted.
	#[error("operation cancelled: alarm is shutting down")]
	Cancelled,
	/// The worker pool is owned by the alarm and the calling task has been
	/// aborted. The abort lands at the task's next `.await`.
	#[error("worker interrupted: alarm is shutting down")]
	Interrupted,
}

/// Errors raised while constructing an alarm.
#[derive(Debug, Error)]
pub enum AlarmError {
	/// The owned tokio runtime could not be built.
	#[error("failed to build worker pool '{name}': {source}")]
	PoolBuild {
		/// Thread name the pool was configured with.
		name: String,
		/// The underlying I/O error.
		#[source]
		source: std::io::Error,
	},

	/// A shared pool was requested but no tokio runtime is active.
	#[error("no ambient tokio runtime to share")]
	NoAmbientRuntime,

	/// The configuration was rejected.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
