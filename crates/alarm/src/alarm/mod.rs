//! The shutdown alarm.
//!
//! [`ClosingAlarm`] runs short-lived tasks on a worker pool and shuts down in
//! bounded time:
//!
//! 1. `Running → Draining`: new submissions are dropped and the pending set is
//!    snapshotted.
//! 2. The snapshot is waited on in submission order, one poll tick at a time,
//!    so an external [`ProgressSignal`] and the drain budget are observed
//!    between ticks. The budget is extended while a task sits inside a
//!    critical section.
//! 3. `Draining → Finished`: whatever is still pending is aborted and an owned
//!    pool is torn down.
//!
//! [`ClosingAlarm::dispose`] is the abrupt path that skips step 2.
//!
//! All bookkeeping (pending set, critical-section flag, phase) lives behind a
//! single mutex. Task bodies never run under it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AlarmConfig;
use crate::error::{AlarmError, Stop};
use crate::lifetime::HostLifetime;
use crate::pool::{PoolOwnership, WorkerPool, shutdown_owned, spawn_on};
use crate::progress::ProgressSignal;
use crate::report::{AlarmPhase, DrainOutcome, ShutdownReport};
use crate::section::SectionAware;
use crate::task::{PendingTask, TaskClock, TaskHandle, TaskId};

/// Cooperative shutdown coordinator for a pool of background tasks.
///
/// Cloning is cheap; clones share one alarm. Tasks typically capture a clone
/// to call the [`SectionAware`] checkpoints.
#[derive(Debug, Clone)]
pub struct ClosingAlarm {
	inner: Arc<AlarmInner>,
}

#[derive(Debug)]
struct AlarmInner {
	name: String,
	ownership: PoolOwnership,
	handle: Handle,
	poll_interval: Duration,
	drain_budget: Option<Duration>,
	clock: TaskClock,
	shared: Mutex<AlarmShared>,
}

#[derive(Debug)]
struct AlarmShared {
	phase: AlarmPhase,
	in_section: bool,
	pending: BTreeMap<TaskId, PendingTask>,
	/// Owned runtime awaiting teardown. Always `None` for shared pools.
	runtime: Option<Runtime>,
}

impl AlarmShared {
	fn shutdown_started(&self) -> bool {
		self.phase != AlarmPhase::Running
	}

	/// Moves to `Finished` and hands back everything the caller must abort and tear down.
	fn finish(&mut self) -> (BTreeMap<TaskId, PendingTask>, Option<Runtime>) {
		self.phase = AlarmPhase::Finished;
		self.in_section = false;
		(std::mem::take(&mut self.pending), self.runtime.take())
	}
}

impl ClosingAlarm {
	/// Creates an alarm running tasks on `pool`.
	pub fn new(name: impl Into<String>, pool: WorkerPool, config: &AlarmConfig) -> Result<Self, AlarmError> {
		if let Err(err) = config.validate() {
			shutdown_owned(pool.into_parts().1);
			return Err(err.into());
		}
		let ownership = pool.ownership();
		let (handle, runtime) = pool.into_parts();
		let name = name.into();
		tracing::debug!(alarm = %name, pool = ownership.as_str(), "alarm.create");
		Ok(Self {
			inner: Arc::new(AlarmInner {
				name,
				ownership,
				handle,
				poll_interval: config.poll_interval(),
				drain_budget: config.drain_budget(),
				clock: TaskClock::new(),
				shared: Mutex::new(AlarmShared {
					phase: AlarmPhase::Running,
					in_section: false,
					pending: BTreeMap::new(),
					runtime,
				}),
			}),
		})
	}

	/// Creates an alarm with its own pool built from `config`.
	pub fn with_owned_pool(name: impl Into<String>, config: &AlarmConfig) -> Result<Self, AlarmError> {
		Self::new(name, WorkerPool::owned(config)?, config)
	}

	/// Creates an alarm and binds it to `lifetime`.
	///
	/// Closing the lifetime drains the alarm; disposing it disposes the alarm.
	pub fn bound(lifetime: &HostLifetime, name: impl Into<String>, pool: WorkerPool, config: &AlarmConfig) -> Result<Self, AlarmError> {
		let alarm = Self::new(name, pool, config)?;
		lifetime.register(Arc::new(alarm.clone()));
		Ok(alarm)
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn ownership(&self) -> PoolOwnership {
		self.inner.ownership
	}

	/// Current lifecycle phase.
	pub fn phase(&self) -> AlarmPhase {
		self.inner.shared.lock().phase
	}

	/// Number of tasks submitted and not yet finished.
	pub fn pending_count(&self) -> usize {
		self.inner.shared.lock().pending.len()
	}

	/// Returns true while some task is between enter and exit.
	pub fn is_in_critical_section(&self) -> bool {
		self.inner.shared.lock().in_section
	}

	/// Submits a task.
	///
	/// Returns `None` without running anything once shutdown has begun.
	pub fn submit<F>(&self, task: F) -> Option<TaskHandle>
	where
		F: Future<Output = Result<(), Stop>> + Send + 'static,
	{
		let inner = &self.inner;
		let id = inner.clock.next();
		let done = CancellationToken::new();
		{
			let mut shared = inner.shared.lock();
			if shared.shutdown_started() {
				tracing::debug!(alarm = %inner.name, phase = shared.phase.as_str(), "alarm.submit.dropped");
				return None;
			}
			shared.pending.insert(id, PendingTask::reserved(done.clone()));
		}

		let guard = CompletionGuard {
			alarm: Arc::downgrade(inner),
			name: inner.name.clone(),
			id,
			done: done.clone(),
			outcome: None,
		};
		let join = spawn_on(&inner.handle, inner.ownership, async move {
			let mut guard = guard;
			tracing::trace!(alarm = %guard.name, task = %guard.id, "alarm.task.start");
			guard.outcome = Some(task.await);
		});
		let abort = join.abort_handle();

		let mut shared = inner.shared.lock();
		if let Some(pending) = shared.pending.get_mut(&id) {
			pending.attach(abort);
		} else if shared.shutdown_started() {
			// Swept by a shutdown that started while we were spawning.
			drop(shared);
			abort.abort();
		}
		tracing::debug!(alarm = %inner.name, task = %id, "alarm.submit");
		Some(TaskHandle::new(id, done))
	}

	/// Runs `fut` inside the critical section.
	///
	/// If the task is dropped mid-section (abort, panic) the flag is still cleared.
	pub async fn critical_section<F, T>(&self, fut: F) -> Result<T, Stop>
	where
		F: Future<Output = T>,
	{
		self.enter()?;
		let reset = SectionReset { inner: &self.inner, armed: true };
		let value = fut.await;
		reset.disarm();
		self.exit()?;
		Ok(value)
	}

	/// Shuts the alarm down, draining in-flight tasks before aborting the rest.
	///
	/// Only the first call performs the shutdown. Later calls, and calls after
	/// [`Self::dispose`], return immediately with [`DrainOutcome::AlreadyStopped`].
	pub async fn wait_and_stop(&self, progress: Option<&dyn ProgressSignal>) -> ShutdownReport {
		let inner = &self.inner;
		let started = Instant::now();

		let snapshot: Vec<(TaskId, CancellationToken)> = {
			let mut shared = inner.shared.lock();
			if shared.shutdown_started() {
				tracing::debug!(alarm = %inner.name, phase = shared.phase.as_str(), "alarm.shutdown.repeat");
				return ShutdownReport::already_stopped(shared.phase);
			}
			shared.phase = AlarmPhase::Draining;
			tracing::debug!(alarm = %inner.name, pending = shared.pending.len(), "alarm.shutdown.start");
			shared
				.pending
				.iter()
				.filter(|(_, pending)| !pending.is_finished())
				.map(|(id, pending)| (*id, pending.done().clone()))
				.collect()
		};

		let total = snapshot.len();
		let deadline = inner.drain_budget.map(|budget| started + budget);
		let mut outcome = DrainOutcome::Drained;
		let mut completed = 0usize;

		'drain: for (index, (id, done)) in snapshot.iter().enumerate() {
			loop {
				let tick = inner.next_tick(deadline);
				if tokio::time::timeout(tick, done.cancelled()).await.is_ok() {
					completed += 1;
					break;
				}
				if progress.is_some_and(|p| p.is_cancelled()) {
					tracing::info!(alarm = %inner.name, task = %id, remaining = total - index, "alarm.shutdown.cancelled");
					outcome = DrainOutcome::Cancelled;
					break 'drain;
				}
				if deadline.is_some_and(|d| Instant::now() >= d) {
					let in_section = inner.shared.lock().in_section;
					if !in_section {
						tracing::warn!(alarm = %inner.name, task = %id, remaining = total - index, "alarm.shutdown.budget_exhausted");
						outcome = DrainOutcome::BudgetExhausted;
						break 'drain;
					}
					tracing::trace!(alarm = %inner.name, task = %id, "alarm.shutdown.section_extends_budget");
				}
				tracing::trace!(alarm = %inner.name, task = %id, "alarm.shutdown.wait");
			}
			if let Some(progress) = progress {
				progress.report(index + 1, total);
			}
		}

		let (leftovers, runtime) = inner.shared.lock().finish();
		let force_cancelled = leftovers.values().filter(|pending| !pending.is_finished()).count();
		for pending in leftovers.values() {
			pending.abort();
		}
		drop(leftovers);
		shutdown_owned(runtime);

		let report = ShutdownReport {
			phase: AlarmPhase::Finished,
			outcome,
			waited: total,
			completed,
			force_cancelled,
			elapsed: started.elapsed(),
		};
		tracing::debug!(
			alarm = %inner.name,
			outcome = ?report.outcome,
			waited = report.waited,
			completed = report.completed,
			force_cancelled = report.force_cancelled,
			elapsed_ms = report.elapsed.as_millis() as u64,
			"alarm.shutdown.finish"
		);
		report
	}

	/// Abrupt teardown: aborts every pending task and tears down an owned pool
	/// without waiting. Idempotent and safe to race with [`Self::wait_and_stop`].
	pub fn dispose(&self) {
		let inner = &self.inner;
		let (leftovers, runtime) = {
			let mut shared = inner.shared.lock();
			if shared.phase == AlarmPhase::Finished && shared.pending.is_empty() && shared.runtime.is_none() {
				return;
			}
			shared.finish()
		};
		tracing::debug!(alarm = %inner.name, aborted = leftovers.len(), "alarm.dispose");
		for pending in leftovers.values() {
			pending.abort();
		}
		drop(leftovers);
		shutdown_owned(runtime);
	}
}

impl SectionAware for ClosingAlarm {
	fn enter(&self) -> Result<(), Stop> {
		let mut shared = self.inner.shared.lock();
		tracing::trace!(alarm = %self.inner.name, "alarm.section.enter");
		if shared.shutdown_started() {
			return Err(self.inner.stop_self(&shared, "enter"));
		}
		shared.in_section = true;
		Ok(())
	}

	fn exit(&self) -> Result<(), Stop> {
		let mut shared = self.inner.shared.lock();
		tracing::trace!(alarm = %self.inner.name, "alarm.section.exit");
		shared.in_section = false;
		if shared.shutdown_started() {
			return Err(self.inner.stop_self(&shared, "exit"));
		}
		Ok(())
	}

	fn should_exit_asap(&self) -> bool {
		self.inner.shared.lock().shutdown_started()
	}

	fn check(&self) -> Result<(), Stop> {
		let shared = self.inner.shared.lock();
		if shared.shutdown_started() {
			return Err(self.inner.stop_self(&shared, "check"));
		}
		Ok(())
	}
}

impl AlarmInner {
	/// Thread-stop action.
	///
	/// A shared pool runs unrelated work, so only the cooperative signal is
	/// returned. An owned pool additionally aborts the calling task.
	fn stop_self(&self, shared: &AlarmShared, site: &'static str) -> Stop {
		match self.ownership {
			PoolOwnership::Shared => {
				tracing::debug!(alarm = %self.name, site, "alarm.stop_self.cancel");
				Stop::Cancelled
			}
			PoolOwnership::Owned => {
				// The current task is mid-poll, so abort only flags it; the drop
				// happens on this thread after the poll returns.
				if let Some(task_id) = tokio::task::try_id()
					&& let Some(pending) = shared.pending.values().find(|pending| pending.runs_as(task_id))
				{
					pending.abort();
				}
				tracing::debug!(alarm = %self.name, site, "alarm.stop_self.interrupt");
				Stop::Interrupted
			}
		}
	}

	/// Wait slice for the drain: one poll interval, cut short by the deadline.
	fn next_tick(&self, deadline: Option<Instant>) -> Duration {
		match deadline {
			Some(deadline) => {
				let remaining = deadline.saturating_duration_since(Instant::now());
				if remaining.is_zero() { self.poll_interval } else { self.poll_interval.min(remaining) }
			}
			None => self.poll_interval,
		}
	}

	fn release(&self, id: TaskId) {
		let removed = self.shared.lock().pending.remove(&id).is_some();
		tracing::trace!(alarm = %self.name, task = %id, removed, "alarm.task.release");
	}
}

impl Drop for AlarmInner {
	fn drop(&mut self) {
		shutdown_owned(self.shared.get_mut().runtime.take());
	}
}

/// Owned by a task's future; releases the pending slot however the body ends.
struct CompletionGuard {
	alarm: Weak<AlarmInner>,
	name: String,
	id: TaskId,
	done: CancellationToken,
	outcome: Option<Result<(), Stop>>,
}

impl Drop for CompletionGuard {
	fn drop(&mut self) {
		match &self.outcome {
			Some(Ok(())) => tracing::debug!(alarm = %self.name, task = %self.id, "alarm.task.done"),
			Some(Err(stop)) => tracing::debug!(alarm = %self.name, task = %self.id, %stop, "alarm.task.stopped"),
			None => tracing::debug!(alarm = %self.name, task = %self.id, "alarm.task.dropped"),
		}
		if let Some(inner) = self.alarm.upgrade() {
			inner.release(self.id);
		}
		self.done.cancel();
	}
}

/// Clears the critical-section flag if a section is abandoned mid-flight.
struct SectionReset<'a> {
	inner: &'a AlarmInner,
	armed: bool,
}

impl SectionReset<'_> {
	fn disarm(mut self) {
		self.armed = false;
	}
}

impl Drop for SectionReset<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.inner.shared.lock().in_section = false;
		}
	}
}

#[cfg(test)]
mod tests;
