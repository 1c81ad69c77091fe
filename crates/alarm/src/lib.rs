//! Cooperative shutdown alarm for background work.
//!
//! A [`ClosingAlarm`] runs short-lived async tasks on a worker pool and, when
//! its host goes away, shuts down in bounded time: it stops accepting work,
//! lets tasks inside a critical section finish, and aborts whatever is left
//! once the drain budget runs out or the caller's [`ProgressSignal`] cancels.
//!
//! Tasks cooperate through [`SectionAware`] checkpoints, which return
//! [`Stop`] once shutdown began:
//!
//! ```no_run
//! use slowclose_alarm::{AlarmConfig, ClosingAlarm, SectionAware};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let alarm = ClosingAlarm::with_owned_pool("vcs-refresh", &AlarmConfig::default())?;
//! let worker = alarm.clone();
//! alarm.submit(async move {
//! 	for _ in 0..10 {
//! 		worker.check()?;
//! 		worker.critical_section(async { /* write one file */ }).await?;
//! 	}
//! 	Ok(())
//! });
//! let report = alarm.wait_and_stop(None).await;
//! println!("{:?}", report.outcome());
//! # Ok(())
//! # }
//! ```

mod alarm;
pub mod config;
mod error;
pub mod lifetime;
mod pool;
pub mod progress;
mod report;
mod section;
mod task;

pub use alarm::ClosingAlarm;
pub use config::{AlarmConfig, ConfigError};
pub use error::{AlarmError, Stop};
pub use lifetime::{Closeable, HostLifetime};
pub use pool::{PoolOwnership, WorkerPool};
pub use progress::ProgressSignal;
pub use report::{AlarmPhase, DrainOutcome, ShutdownReport};
pub use section::SectionAware;
pub use task::{TaskHandle, TaskId};
