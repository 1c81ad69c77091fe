use std::time::Duration;

/// Lifecycle phase of an alarm. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlarmPhase {
	/// Accepting tasks.
	Running,
	/// Shutdown started; waiting on in-flight tasks.
	Draining,
	/// Every handle drained or force-cancelled. Terminal.
	Finished,
}

impl AlarmPhase {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Running => "running",
			Self::Draining => "draining",
			Self::Finished => "finished",
		}
	}
}

/// How the drain wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DrainOutcome {
	/// Every snapshotted task finished on its own.
	Drained,
	/// The external progress signal reported cancellation.
	Cancelled,
	/// The drain budget elapsed outside any critical section.
	BudgetExhausted,
	/// Shutdown had already been started by an earlier call or by dispose.
	AlreadyStopped,
}

/// Summary of one [`crate::ClosingAlarm::wait_and_stop`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
	pub(crate) phase: AlarmPhase,
	pub(crate) outcome: DrainOutcome,
	pub(crate) waited: usize,
	pub(crate) completed: usize,
	pub(crate) force_cancelled: usize,
	pub(crate) elapsed: Duration,
}

impl ShutdownReport {
	pub(crate) fn already_stopped(phase: AlarmPhase) -> Self {
		Self {
			phase,
			outcome: DrainOutcome::AlreadyStopped,
			waited: 0,
			completed: 0,
			force_cancelled: 0,
			elapsed: Duration::ZERO,
		}
	}

	/// Phase observed when the call returned.
	pub fn phase(&self) -> AlarmPhase {
		self.phase
	}

	pub fn outcome(&self) -> DrainOutcome {
		self.outcome
	}

	/// Handles the drain snapshotted and waited on.
	pub fn waited(&self) -> usize {
		self.waited
	}

	/// Snapshotted handles that finished before the sweep.
	pub fn completed(&self) -> usize {
		self.completed
	}

	/// Handles still pending at the sweep and aborted by it.
	pub fn force_cancelled(&self) -> usize {
		self.force_cancelled
	}

	pub fn elapsed(&self) -> Duration {
		self.elapsed
	}

	/// Returns true when this call performed the shutdown.
	pub fn performed(&self) -> bool {
		self.outcome != DrainOutcome::AlreadyStopped
	}
}
