use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use super::*;

fn fast_config() -> AlarmConfig {
	AlarmConfig::default()
		.with_worker_threads(2)
		.with_poll_interval(Duration::from_millis(10))
		.with_drain_budget(Some(Duration::from_secs(5)))
}

fn owned(name: &str, config: &AlarmConfig) -> ClosingAlarm {
	ClosingAlarm::with_owned_pool(name, config).unwrap()
}

async fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
	let start = std::time::Instant::now();
	while start.elapsed() < timeout {
		if f() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	false
}

#[tokio::test]
async fn pending_set_empties_when_tasks_finish_out_of_order() {
	let alarm = owned("out-of-order", &fast_config().with_worker_threads(4));
	let mut handles = Vec::new();
	for delay in [80u64, 60, 40, 20, 0] {
		let handle = alarm.submit(async move {
			tokio::time::sleep(Duration::from_millis(delay)).await;
			Ok(())
		});
		handles.push(handle.unwrap());
	}
	assert!(alarm.pending_count() <= 5);

	// The last submitted task finishes first.
	tokio::time::timeout(Duration::from_secs(2), handles[4].finished()).await.unwrap();
	assert!(alarm.pending_count() < 5);

	for handle in &handles {
		tokio::time::timeout(Duration::from_secs(2), handle.finished()).await.unwrap();
	}
	assert_eq!(alarm.pending_count(), 0);
	assert_eq!(alarm.phase(), AlarmPhase::Running);
	alarm.dispose();
}

#[tokio::test]
async fn submit_after_shutdown_never_runs() {
	let alarm = owned("late-submit", &fast_config());
	let report = alarm.wait_and_stop(None).await;
	assert_eq!(report.outcome(), DrainOutcome::Drained);
	assert_eq!(report.phase(), AlarmPhase::Finished);

	let ran = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&ran);
	let handle = alarm.submit(async move {
		flag.store(true, Ordering::SeqCst);
		Ok(())
	});
	assert!(handle.is_none());
	tokio::time::sleep(Duration::from_millis(30)).await;
	assert!(!ran.load(Ordering::SeqCst));
	assert_eq!(alarm.pending_count(), 0);
}

#[tokio::test]
async fn submit_while_draining_is_dropped() {
	let alarm = owned("draining-submit", &fast_config());
	let (release_tx, release_rx) = oneshot::channel::<()>();
	alarm.submit(async move {
		let _ = release_rx.await;
		Ok(())
	});

	let stopper = alarm.clone();
	let shutdown = tokio::spawn(async move { stopper.wait_and_stop(None).await });
	assert!(wait_until(Duration::from_secs(2), || alarm.phase() == AlarmPhase::Draining).await);

	assert!(alarm.submit(async { Ok(()) }).is_none());
	let _ = release_tx.send(());
	let report = shutdown.await.unwrap();
	assert_eq!(report.completed(), 1);
	assert_eq!(report.force_cancelled(), 0);
}

/// Result log shared between a task body and the test.
#[derive(Default)]
struct SectionLog {
	enter: parking_lot::Mutex<Option<Result<(), Stop>>>,
	exit: parking_lot::Mutex<Option<Result<(), Stop>>>,
	stops: AtomicUsize,
	after_exit: AtomicBool,
}

impl SectionLog {
	fn record(&self, slot: &parking_lot::Mutex<Option<Result<(), Stop>>>, result: Result<(), Stop>) -> Result<(), Stop> {
		if result.is_err() {
			self.stops.fetch_add(1, Ordering::SeqCst);
		}
		*slot.lock() = Some(result);
		result
	}
}

#[tokio::test]
async fn exit_after_shutdown_fires_stop_action_once() {
	// Budget far shorter than the section: the section must still be respected.
	let config = fast_config().with_drain_budget(Some(Duration::from_millis(30)));
	let alarm = owned("section", &config);
	let log = Arc::new(SectionLog::default());
	let (entered_tx, entered_rx) = oneshot::channel::<()>();
	let (go_tx, go_rx) = oneshot::channel::<()>();

	let worker = alarm.clone();
	let task_log = Arc::clone(&log);
	let handle = alarm
		.submit(async move {
			task_log.record(&task_log.enter, worker.enter())?;
			let _ = entered_tx.send(());
			let _ = go_rx.await;
			task_log.record(&task_log.exit, worker.exit())?;
			tokio::task::yield_now().await;
			task_log.after_exit.store(true, Ordering::SeqCst);
			Ok(())
		})
		.unwrap();

	entered_rx.await.unwrap();
	assert!(alarm.is_in_critical_section());

	let stopper = alarm.clone();
	let shutdown = tokio::spawn(async move { stopper.wait_and_stop(None).await });
	assert!(wait_until(Duration::from_secs(2), || alarm.phase() == AlarmPhase::Draining).await);

	// Well past the budget, the task is still inside its section.
	tokio::time::sleep(Duration::from_millis(120)).await;
	assert!(!handle.is_finished(), "section must not be cut short");
	assert_eq!(alarm.phase(), AlarmPhase::Draining);

	go_tx.send(()).unwrap();
	let report = tokio::time::timeout(Duration::from_secs(2), shutdown).await.unwrap().unwrap();

	assert_eq!(*log.enter.lock(), Some(Ok(())));
	assert_eq!(*log.exit.lock(), Some(Err(Stop::Interrupted)));
	assert_eq!(log.stops.load(Ordering::SeqCst), 1);
	assert!(!log.after_exit.load(Ordering::SeqCst));
	assert_eq!(report.outcome(), DrainOutcome::Drained);
	assert_eq!(report.completed(), 1);
	assert_eq!(report.force_cancelled(), 0);
	assert!(!alarm.is_in_critical_section());
}

#[tokio::test]
async fn enter_after_shutdown_does_not_enter() {
	let alarm = owned("late-enter", &fast_config());
	alarm.wait_and_stop(None).await;
	assert_eq!(alarm.enter(), Err(Stop::Interrupted));
	assert!(!alarm.is_in_critical_section());
	assert_eq!(alarm.exit(), Err(Stop::Interrupted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shared_pool_stop_action_is_cooperative() {
	let alarm = ClosingAlarm::new("shared", WorkerPool::current().unwrap(), &fast_config()).unwrap();
	assert_eq!(alarm.ownership(), PoolOwnership::Shared);

	let observed = Arc::new(parking_lot::Mutex::new(None));
	let survived = Arc::new(AtomicBool::new(false));
	let worker = alarm.clone();
	let task_observed = Arc::clone(&observed);
	let task_survived = Arc::clone(&survived);
	alarm.submit(async move {
		while !worker.should_exit_asap() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		let result = worker.check();
		*task_observed.lock() = Some(result);
		tokio::task::yield_now().await;
		task_survived.store(true, Ordering::SeqCst);
		result
	});

	let report = tokio::time::timeout(Duration::from_secs(2), alarm.wait_and_stop(None)).await.unwrap();
	assert_eq!(*observed.lock(), Some(Err(Stop::Cancelled)));
	assert!(survived.load(Ordering::SeqCst), "shared pool tasks must not be aborted by the stop action");
	assert_eq!(report.completed(), 1);
	assert_eq!(report.force_cancelled(), 0);
}

#[tokio::test]
async fn owned_pool_stop_action_interrupts_the_task() {
	let alarm = owned("owned", &fast_config());
	assert_eq!(alarm.ownership(), PoolOwnership::Owned);

	let observed = Arc::new(parking_lot::Mutex::new(None));
	let survived = Arc::new(AtomicBool::new(false));
	let worker = alarm.clone();
	let task_observed = Arc::clone(&observed);
	let task_survived = Arc::clone(&survived);
	let handle = alarm
		.submit(async move {
			while !worker.should_exit_asap() {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
			let result = worker.check();
			*task_observed.lock() = Some(result);
			// Aborted here: the body never resumes.
			tokio::task::yield_now().await;
			task_survived.store(true, Ordering::SeqCst);
			Ok(())
		})
		.unwrap();

	let report = tokio::time::timeout(Duration::from_secs(2), alarm.wait_and_stop(None)).await.unwrap();
	assert!(handle.is_finished());
	assert_eq!(*observed.lock(), Some(Err(Stop::Interrupted)));
	assert!(!survived.load(Ordering::SeqCst));
	assert_eq!(report.completed(), 1);
}

#[tokio::test]
async fn cancelled_progress_abandons_drain_within_a_tick() {
	let config = fast_config().with_poll_interval(Duration::from_millis(20)).with_drain_budget(None);
	let alarm = owned("cancelled", &config);
	let stuck = alarm
		.submit(async {
			std::future::pending::<()>().await;
			Ok(())
		})
		.unwrap();

	let token = CancellationToken::new();
	let canceller = token.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(50)).await;
		canceller.cancel();
	});

	let report = tokio::time::timeout(Duration::from_secs(2), alarm.wait_and_stop(Some(&token)))
		.await
		.expect("drain must give up once the signal cancels");
	assert_eq!(report.outcome(), DrainOutcome::Cancelled);
	assert_eq!(report.force_cancelled(), 1);
	assert!(report.elapsed() < Duration::from_millis(500), "took {:?}", report.elapsed());
	assert_eq!(alarm.pending_count(), 0);
	tokio::time::timeout(Duration::from_secs(2), stuck.finished()).await.unwrap();
}

#[tokio::test]
async fn hung_task_is_force_cancelled_after_budget() {
	let config = fast_config().with_drain_budget(Some(Duration::from_millis(200)));
	let alarm = owned("hung", &config);
	for delay in [20u64, 60] {
		alarm.submit(async move {
			tokio::time::sleep(Duration::from_millis(delay)).await;
			Ok(())
		});
	}
	let hung = alarm
		.submit(async {
			std::future::pending::<()>().await;
			Ok(())
		})
		.unwrap();

	let report = tokio::time::timeout(Duration::from_secs(3), alarm.wait_and_stop(None)).await.unwrap();
	assert_eq!(report.phase(), AlarmPhase::Finished);
	assert_eq!(report.outcome(), DrainOutcome::BudgetExhausted);
	assert_eq!(report.waited(), 3);
	assert_eq!(report.completed(), 2);
	assert_eq!(report.force_cancelled(), 1);
	assert_eq!(alarm.pending_count(), 0);
	assert_eq!(alarm.phase(), AlarmPhase::Finished);
	tokio::time::timeout(Duration::from_secs(2), hung.finished()).await.unwrap();
}

#[tokio::test]
async fn second_shutdown_is_a_no_op() {
	let alarm = owned("twice", &fast_config());
	let first = alarm.wait_and_stop(None).await;
	assert!(first.performed());
	let second = alarm.wait_and_stop(None).await;
	assert!(!second.performed());
	assert_eq!(second.outcome(), DrainOutcome::AlreadyStopped);
	assert_eq!(second.phase(), AlarmPhase::Finished);
}

#[tokio::test]
async fn dispose_aborts_without_waiting() {
	let alarm = owned("dispose", &fast_config());
	let stuck = alarm
		.submit(async {
			std::future::pending::<()>().await;
			Ok(())
		})
		.unwrap();

	alarm.dispose();
	assert_eq!(alarm.phase(), AlarmPhase::Finished);
	assert_eq!(alarm.pending_count(), 0);
	assert!(alarm.should_exit_asap());
	assert!(alarm.submit(async { Ok(()) }).is_none());
	tokio::time::timeout(Duration::from_secs(2), stuck.finished()).await.unwrap();

	alarm.dispose();
	let report = alarm.wait_and_stop(None).await;
	assert_eq!(report.outcome(), DrainOutcome::AlreadyStopped);
}

#[tokio::test]
async fn dispose_during_drain_ends_the_drain() {
	let config = fast_config().with_drain_budget(None);
	let alarm = owned("dispose-race", &config);
	alarm.submit(async {
		std::future::pending::<()>().await;
		Ok(())
	});

	let stopper = alarm.clone();
	let shutdown = tokio::spawn(async move { stopper.wait_and_stop(None).await });
	assert!(wait_until(Duration::from_secs(2), || alarm.phase() == AlarmPhase::Draining).await);
	alarm.dispose();

	let report = tokio::time::timeout(Duration::from_secs(2), shutdown).await.unwrap().unwrap();
	assert_eq!(report.phase(), AlarmPhase::Finished);
	assert_eq!(report.force_cancelled(), 0);
}

#[tokio::test]
async fn panicking_task_releases_its_slot() {
	let alarm = owned("panic", &fast_config());
	let handle = alarm
		.submit(async {
			panic!("task blew up");
		})
		.unwrap();
	tokio::time::timeout(Duration::from_secs(2), handle.finished()).await.unwrap();
	assert_eq!(alarm.pending_count(), 0);
	let report = alarm.wait_and_stop(None).await;
	assert_eq!(report.waited(), 0);
}

#[tokio::test]
async fn critical_section_helper_returns_value() {
	let alarm = owned("helper", &fast_config());
	let (tx, rx) = oneshot::channel();
	let worker = alarm.clone();
	alarm.submit(async move {
		let value = worker
			.critical_section(async {
				tokio::time::sleep(Duration::from_millis(5)).await;
				41 + 1
			})
			.await?;
		let _ = tx.send((value, worker.is_in_critical_section()));
		Ok(())
	});
	let (value, still_inside) = tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
	assert_eq!(value, 42);
	assert!(!still_inside);
	alarm.dispose();
}

#[tokio::test]
async fn aborted_section_clears_the_flag() {
	let alarm = owned("abandoned-section", &fast_config());
	let (entered_tx, entered_rx) = oneshot::channel::<()>();
	let worker = alarm.clone();
	let handle = alarm
		.submit(async move {
			worker
				.critical_section(async move {
					let _ = entered_tx.send(());
					std::future::pending::<()>().await;
				})
				.await
		})
		.unwrap();
	entered_rx.await.unwrap();
	assert!(alarm.is_in_critical_section());
	alarm.dispose();
	tokio::time::timeout(Duration::from_secs(2), handle.finished()).await.unwrap();
	assert!(!alarm.is_in_critical_section());
}

#[tokio::test]
async fn should_exit_asap_has_no_side_effects() {
	let alarm = owned("poll", &fast_config());
	assert!(!alarm.should_exit_asap());
	assert_eq!(alarm.check(), Ok(()));
	alarm.wait_and_stop(None).await;
	assert!(alarm.should_exit_asap());
	assert!(alarm.should_exit_asap());
	assert_eq!(alarm.check(), Err(Stop::Interrupted));
}

#[test]
fn invalid_config_is_rejected() {
	let config = AlarmConfig::default().with_poll_interval(Duration::ZERO);
	let err = ClosingAlarm::with_owned_pool("bad", &config).unwrap_err();
	assert!(matches!(err, AlarmError::Config(_)));
}
