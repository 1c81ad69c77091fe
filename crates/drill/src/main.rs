//! Shutdown drill.
//!
//! Submits a mix of finishing, hanging and section-holding tasks to one alarm
//! bound to a host lifetime, closes the lifetime and prints the report.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use slowclose_alarm::{AlarmConfig, ClosingAlarm, HostLifetime, SectionAware, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drill command line arguments.
#[derive(Parser, Debug)]
#[command(name = "slowclose-drill")]
#[command(about = "Run a scripted shutdown against a slowly closing alarm")]
struct Args {
	/// Tasks that finish on their own
	#[arg(long, default_value_t = 3)]
	tasks: usize,

	/// Tasks that never finish and never check for shutdown
	#[arg(long, default_value_t = 1)]
	hang: usize,

	/// Hold one critical section for this many milliseconds
	#[arg(long, value_name = "MS")]
	section_ms: Option<u64>,

	/// TOML alarm configuration
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Override the drain budget (0 waits for natural completion)
	#[arg(long, value_name = "MS")]
	budget_ms: Option<u64>,

	/// Override the drain poll interval
	#[arg(long, value_name = "MS")]
	poll_ms: Option<u64>,

	/// Run tasks on this process's runtime instead of an owned pool
	#[arg(long)]
	shared: bool,

	/// Cancel the shutdown progress signal after this many milliseconds
	#[arg(long, value_name = "MS")]
	cancel_after_ms: Option<u64>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let mut config = match &args.config {
		Some(path) => AlarmConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => AlarmConfig::default(),
	};
	if let Some(ms) = args.budget_ms {
		config.drain_budget_ms = Some(ms);
	}
	if let Some(ms) = args.poll_ms {
		config.poll_interval_ms = ms;
	}
	config.validate()?;

	let pool = if args.shared { WorkerPool::current()? } else { WorkerPool::owned(&config)? };
	let lifetime = HostLifetime::new("drill");
	let alarm = ClosingAlarm::bound(&lifetime, "drill", pool, &config)?;
	info!(ownership = ?alarm.ownership(), tasks = args.tasks, hang = args.hang, "drill.start");

	for n in 0..args.tasks {
		let worker = alarm.clone();
		alarm.submit(async move {
			for _ in 0..=n {
				worker.check()?;
				tokio::time::sleep(Duration::from_millis(20)).await;
			}
			Ok(())
		});
	}
	for _ in 0..args.hang {
		alarm.submit(async {
			std::future::pending::<()>().await;
			Ok(())
		});
	}
	if let Some(ms) = args.section_ms {
		let worker = alarm.clone();
		alarm.submit(async move {
			worker
				.critical_section(async move {
					tokio::time::sleep(Duration::from_millis(ms)).await;
					info!(held_ms = ms, "drill.section.done");
				})
				.await
		});
	}

	// Let the workers get going before pulling the plug.
	tokio::time::sleep(Duration::from_millis(10)).await;

	let progress = CancellationToken::new();
	if let Some(ms) = args.cancel_after_ms {
		let progress = progress.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(ms)).await;
			progress.cancel();
		});
	}

	for (name, report) in lifetime.close(Some(&progress)).await {
		println!(
			"{name}: {:?} after {:?} (waited {}, completed {}, force-cancelled {})",
			report.outcome(),
			report.elapsed(),
			report.waited(),
			report.completed(),
			report.force_cancelled()
		);
	}
	lifetime.dispose();
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("slowclose_alarm=trace,slowclose_drill=debug,info")
		} else {
			EnvFilter::new("slowclose_alarm=info,slowclose_drill=info,warn")
		}
	});
	tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
