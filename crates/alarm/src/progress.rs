//! External progress and cancellation for the drain phase.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Progress channel handed to [`crate::ClosingAlarm::wait_and_stop`].
///
/// The drain polls [`ProgressSignal::is_cancelled`] once per tick; a `true`
/// abandons the wait and jumps straight to the force-cancel sweep.
pub trait ProgressSignal: Send + Sync {
	/// Returns true when whoever drives the shutdown has given up waiting.
	fn is_cancelled(&self) -> bool;

	/// Reports drain progress as handles waited on out of the snapshot size.
	fn report(&self, _done: usize, _total: usize) {}
}

impl ProgressSignal for CancellationToken {
	fn is_cancelled(&self) -> bool {
		CancellationToken::is_cancelled(self)
	}
}

impl ProgressSignal for AtomicBool {
	fn is_cancelled(&self) -> bool {
		self.load(Ordering::Acquire)
	}
}

impl<T: ProgressSignal + ?Sized> ProgressSignal for Arc<T> {
	fn is_cancelled(&self) -> bool {
		(**self).is_cancelled()
	}

	fn report(&self, done: usize, total: usize) {
		(**self).report(done, total);
	}
}
