use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Submission sequence number of one task.
///
/// Ids grow monotonically per alarm, so ordering by id is submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
	/// Raw sequence number.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl std::fmt::Display for TaskId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Monotonic submission clock.
#[derive(Debug, Default)]
pub(crate) struct TaskClock {
	next: AtomicU64,
}

impl TaskClock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next task id, starting at 1.
	pub fn next(&self) -> TaskId {
		TaskId(self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
	}
}

/// Caller-side handle to a submitted task.
///
/// Completion covers every way a body can end: return, `Err`, panic, or abort.
/// The task's own output is not carried; callers that care about it report it
/// through their own channel.
#[derive(Debug, Clone)]
pub struct TaskHandle {
	id: TaskId,
	done: CancellationToken,
}

impl TaskHandle {
	pub(crate) fn new(id: TaskId, done: CancellationToken) -> Self {
		Self { id, done }
	}

	/// Submission id.
	pub const fn id(&self) -> TaskId {
		self.id
	}

	/// Returns true once the task body has ended.
	pub fn is_finished(&self) -> bool {
		self.done.is_cancelled()
	}

	/// Resolves once the task body has ended.
	pub async fn finished(&self) {
		self.done.cancelled().await;
	}
}

/// Alarm-side record of one task that has not finished yet.
#[derive(Debug)]
pub(crate) struct PendingTask {
	/// Set once the task has been handed to the pool.
	spawned: Option<Spawned>,
	done: CancellationToken,
}

#[derive(Debug)]
struct Spawned {
	task_id: tokio::task::Id,
	abort: AbortHandle,
}

impl PendingTask {
	/// Reserves a slot before the task is spawned.
	pub fn reserved(done: CancellationToken) -> Self {
		Self { spawned: None, done }
	}

	pub fn attach(&mut self, abort: AbortHandle) {
		self.spawned = Some(Spawned {
			task_id: abort.id(),
			abort,
		});
	}

	pub fn done(&self) -> &CancellationToken {
		&self.done
	}

	pub fn is_finished(&self) -> bool {
		self.done.is_cancelled() || self.spawned.as_ref().is_some_and(|s| s.abort.is_finished())
	}

	/// Returns true when this record belongs to the given tokio task.
	pub fn runs_as(&self, task_id: tokio::task::Id) -> bool {
		self.spawned.as_ref().is_some_and(|s| s.task_id == task_id)
	}

	/// Aborts the task. A reserved slot has nothing to abort yet.
	pub fn abort(&self) {
		if let Some(spawned) = &self.spawned {
			spawned.abort.abort();
		}
	}
}
