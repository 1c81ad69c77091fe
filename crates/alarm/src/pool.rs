use std::future::Future;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::config::AlarmConfig;
use crate::error::AlarmError;

/// Who owns the threads an alarm runs its tasks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolOwnership {
	/// The alarm built the pool and tears it down on shutdown.
	Owned,
	/// The pool belongs to someone else and outlives the alarm.
	Shared,
}

impl PoolOwnership {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Owned => "owned",
			Self::Shared => "shared",
		}
	}
}

/// Executor that runs submitted tasks.
///
/// Ownership is explicit: an [`WorkerPool::Owned`] runtime is shut down by the
/// alarm, a [`WorkerPool::Shared`] handle never is.
#[derive(Debug)]
pub enum WorkerPool {
	/// Runtime built for and owned by one alarm.
	Owned(Runtime),
	/// Handle to a runtime owned elsewhere.
	Shared(Handle),
}

impl WorkerPool {
	/// Builds an owned multi-threaded runtime sized by `config`.
	pub fn owned(config: &AlarmConfig) -> Result<Self, AlarmError> {
		config.validate()?;
		let runtime = tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(config.worker_threads)
			.thread_name(config.thread_name.clone())
			.build()
			.map_err(|source| AlarmError::PoolBuild {
				name: config.thread_name.clone(),
				source,
			})?;
		Ok(Self::Owned(runtime))
	}

	/// Borrows a runtime owned elsewhere.
	pub fn shared(handle: Handle) -> Self {
		Self::Shared(handle)
	}

	/// Borrows the runtime the caller is running on.
	pub fn current() -> Result<Self, AlarmError> {
		Handle::try_current().map(Self::Shared).map_err(|_| AlarmError::NoAmbientRuntime)
	}

	/// Returns the ownership flag.
	pub const fn ownership(&self) -> PoolOwnership {
		match self {
			Self::Owned(_) => PoolOwnership::Owned,
			Self::Shared(_) => PoolOwnership::Shared,
		}
	}

	/// Splits into a spawn handle and, for owned pools, the runtime to tear down later.
	pub(crate) fn into_parts(self) -> (Handle, Option<Runtime>) {
		match self {
			Self::Owned(runtime) => (runtime.handle().clone(), Some(runtime)),
			Self::Shared(handle) => (handle, None),
		}
	}
}

/// Spawns a task on the pool's handle.
pub(crate) fn spawn_on<F>(handle: &Handle, ownership: PoolOwnership, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(pool = ownership.as_str(), "alarm.pool.spawn");
	handle.spawn(fut)
}

/// Tears down an owned runtime without blocking the caller.
///
/// Safe from async context. Tasks still alive are dropped at their next yield.
pub(crate) fn shutdown_owned(runtime: Option<Runtime>) {
	if let Some(runtime) = runtime {
		tracing::trace!("alarm.pool.shutdown");
		runtime.shutdown_background();
	}
}
