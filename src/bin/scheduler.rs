//! Expiry scheduler: the single background leader that releases expired
//! reservations, cancels abandoned orders and pull-reconciles stale
//! payments on a fixed interval.
//!
//! Leadership is a pid lock file; a second start exits with code 1 and
//! stale locks are reclaimed. `--status` and `--stop` manage a running
//! instance.
//!
//! Exit codes: 0 success, 1 lock held / not running, 2 configuration error.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

use atelier::application::reconciler::PaymentReconciler;
use atelier::application::sweeper::ExpirySweeper;
use atelier::config::Config;
use atelier::infrastructure::currency::ExchangeRateConverter;
use atelier::infrastructure::gateway::paypro::PayProGateway;
use atelier::infrastructure::gateway::verifier::InsecureVerifier;
use atelier::infrastructure::persistence::Database;
use atelier::infrastructure::scheduler_lock::SchedulerLock;

#[derive(Debug, Parser)]
#[command(name = "scheduler", about = "Reservation expiry scheduler")]
struct Args {
    /// Minutes between sweeps (default from SCHEDULER_INTERVAL_MINUTES)
    #[arg(long, value_name = "N")]
    interval: Option<i64>,

    /// Cancel pending orders older than N minutes (default from
    /// HARD_TIMEOUT_MINUTES)
    #[arg(long, value_name = "N")]
    max_age: Option<i64>,

    /// Run one sweep without mutating anything and report what would be done
    #[arg(long)]
    dry_run: bool,

    /// Check whether a scheduler instance is running
    #[arg(long)]
    status: bool,

    /// Stop a running scheduler instance
    #[arg(long)]
    stop: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(mut config) => {
            if let Some(interval) = args.interval {
                config.scheduler_interval_minutes = interval;
            }
            if let Some(max_age) = args.max_age {
                config.hard_timeout_minutes = max_age;
            }
            config
        }
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let lock_path = Path::new(&config.scheduler_lock_file);

    if args.status {
        return match SchedulerLock::holder(lock_path) {
            Some(pid) => {
                println!("Scheduler is running (pid {})", pid);
                ExitCode::SUCCESS
            }
            None => {
                println!("Scheduler is not running");
                ExitCode::from(1)
            }
        };
    }

    if args.stop {
        #[cfg(unix)]
        return match SchedulerLock::stop(lock_path) {
            Ok(pid) => {
                println!("Sent stop signal to scheduler (pid {})", pid);
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("Could not stop scheduler: {}", e);
                ExitCode::from(1)
            }
        };
        #[cfg(not(unix))]
        {
            println!("--stop is only supported on unix");
            return ExitCode::from(1);
        }
    }

    let mut lock = match SchedulerLock::acquire(lock_path) {
        Ok(lock) => lock,
        Err(e) => {
            error!("Could not acquire scheduler lock: {}", e);
            return ExitCode::from(1);
        }
    };

    let result = run(&config, args.dry_run).await;
    lock.release();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Scheduler failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(config: &Config, dry_run: bool) -> anyhow::Result<()> {
    info!(
        "Scheduler starting: interval {}m, hard timeout {}m, batch size {}{}",
        config.scheduler_interval_minutes,
        config.hard_timeout_minutes,
        config.batch_size,
        if dry_run { " (dry run)" } else { "" }
    );

    let db = Database::new(
        &config.database_url,
        Duration::from_secs(config.lock_timeout_seconds),
    )
    .await?;

    let reconciler = PaymentReconciler::new(
        db.pool.clone(),
        Arc::new(PayProGateway::new(config)),
        Arc::new(ExchangeRateConverter::new(
            config.exchange_rate_url.clone(),
            config.rate_fallback,
        )),
        Arc::new(InsecureVerifier),
        config,
    );

    let sweeper = ExpirySweeper::new(db.pool.clone(), reconciler, config);
    let sweeper = if dry_run { sweeper.dry_run() } else { sweeper };

    if dry_run {
        let stats = sweeper.tick().await?;
        println!(
            "Dry run: would release {} expired + {} orphaned reservation(s), \
             cancel {} order(s), reconcile {} payment(s)",
            stats.expired_released,
            stats.orphans_released,
            stats.orders_cancelled,
            stats.payments_reconciled
        );
        return Ok(());
    }

    let interval = Duration::from_secs((config.scheduler_interval_minutes.max(1) as u64) * 60);

    loop {
        // A tick failure is logged and retried next interval; ticks are
        // crash-safe so nothing is left half done.
        if let Err(e) = sweeper.tick().await {
            error!("Sweep failed: {}", e);
        }

        if wait_or_shutdown(interval).await {
            info!("Shutdown signal received, stopping scheduler");
            return Ok(());
        }
    }
}

/// Sleep for `interval`, returning true if a shutdown signal arrived.
async fn wait_or_shutdown(interval: Duration) -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                tokio::time::sleep(interval).await;
                return false;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = tokio::signal::ctrl_c() => true,
            _ = sigterm.recv() => true,
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = tokio::signal::ctrl_c() => true,
        }
    }
}
