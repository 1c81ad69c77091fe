use crate::error::Stop;

/// Cooperative shutdown checkpoints for code running under an alarm.
///
/// A critical section marks a side-effecting region that shutdown must not
/// cut in half. Entering after shutdown began fails instead of entering;
/// exiting after shutdown began fails after the flag is cleared, so the task
/// unwinds right behind its protected region.
///
/// Sections do not nest: the flag is a single boolean per alarm, and an inner
/// `exit` clears it for the outer region too.
pub trait SectionAware: Send + Sync {
	/// Enters the critical section, or returns the stop action if shutdown began.
	fn enter(&self) -> Result<(), Stop>;

	/// Leaves the critical section, then returns the stop action if shutdown began.
	fn exit(&self) -> Result<(), Stop>;

	/// Returns true once shutdown began. Never triggers the stop action.
	fn should_exit_asap(&self) -> bool;

	/// Returns the stop action if shutdown began.
	fn check(&self) -> Result<(), Stop>;
}
