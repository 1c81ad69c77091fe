//! Host lifetimes that own shutdown-aware members.
//!
//! A [`HostLifetime`] stands for whatever the alarms serve (a project, a
//! session, a window). It closes members gracefully in registration order and
//! disposes them abruptly in reverse order. Dropping the lifetime disposes it.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::alarm::ClosingAlarm;
use crate::progress::ProgressSignal;
use crate::report::ShutdownReport;

/// A component whose shutdown is driven by a [`HostLifetime`].
#[async_trait]
pub trait Closeable: Send + Sync {
	/// Name used in close reports and logs.
	fn name(&self) -> &str;

	/// Graceful shutdown.
	async fn close(&self, progress: Option<&dyn ProgressSignal>) -> ShutdownReport;

	/// Abrupt teardown. Must be idempotent.
	fn dispose(&self);
}

#[async_trait]
impl Closeable for ClosingAlarm {
	fn name(&self) -> &str {
		ClosingAlarm::name(self)
	}

	async fn close(&self, progress: Option<&dyn ProgressSignal>) -> ShutdownReport {
		self.wait_and_stop(progress).await
	}

	fn dispose(&self) {
		ClosingAlarm::dispose(self);
	}
}

/// Named scope that members bind their shutdown to.
pub struct HostLifetime {
	name: String,
	state: Mutex<LifetimeState>,
}

#[derive(Default)]
struct LifetimeState {
	members: Vec<Arc<dyn Closeable>>,
	disposed: bool,
}

impl std::fmt::Debug for HostLifetime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("HostLifetime")
			.field("name", &self.name)
			.field("members", &state.members.iter().map(|m| m.name().to_string()).collect::<Vec<_>>())
			.field("disposed", &state.disposed)
			.finish()
	}
}

impl HostLifetime {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			state: Mutex::new(LifetimeState::default()),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Number of registered members.
	pub fn len(&self) -> usize {
		self.state.lock().members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns true once [`Self::dispose`] ran.
	pub fn is_disposed(&self) -> bool {
		self.state.lock().disposed
	}

	/// Registers a member. A member registered after disposal is disposed at once.
	pub fn register(&self, member: Arc<dyn Closeable>) {
		let mut state = self.state.lock();
		if state.disposed {
			drop(state);
			tracing::debug!(lifetime = %self.name, member = member.name(), "lifetime.register.late");
			member.dispose();
			return;
		}
		tracing::debug!(lifetime = %self.name, member = member.name(), "lifetime.register");
		state.members.push(member);
	}

	/// Closes every member in registration order.
	///
	/// Members stay registered, so a later [`Self::dispose`] still tears down
	/// anything a cancelled close left behind.
	pub async fn close(&self, progress: Option<&dyn ProgressSignal>) -> Vec<(String, ShutdownReport)> {
		let members = self.state.lock().members.clone();
		tracing::info!(lifetime = %self.name, members = members.len(), "lifetime.close");
		let mut reports = Vec::with_capacity(members.len());
		for member in members {
			let report = member.close(progress).await;
			reports.push((member.name().to_string(), report));
		}
		reports
	}

	/// Disposes every member in reverse registration order. Runs once.
	pub fn dispose(&self) {
		let members = {
			let mut state = self.state.lock();
			if state.disposed {
				return;
			}
			state.disposed = true;
			std::mem::take(&mut state.members)
		};
		tracing::debug!(lifetime = %self.name, members = members.len(), "lifetime.dispose");
		for member in members.iter().rev() {
			member.dispose();
		}
	}
}

impl Drop for HostLifetime {
	fn drop(&mut self) {
		self.dispose();
	}
}
