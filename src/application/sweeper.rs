//! The periodic cleanup sweep.
//!
//! Each tick: release expired holds, release orphans, cancel abandoned
//! orders, pull-reconcile stale pending payments, record stats. Every
//! reservation termination runs in its own transaction, so a crash mid-tick
//! leaves no partial state and the next leader simply resumes.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::application::lifecycle::OrderLifecycle;
use crate::application::reconciler::PaymentReconciler;
use crate::config::Config;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::order::LifecycleEvent;
use crate::domain::reservation::ReservationOutcome;
use crate::infrastructure::persistence::reservations::{ReservationStore, Termination};
use crate::infrastructure::persistence::orders::OrderStore;
use crate::infrastructure::persistence::sweep_log::{SweepLog, SweepStats};

pub struct ExpirySweeper {
    pool: SqlitePool,
    lifecycle: OrderLifecycle,
    reconciler: PaymentReconciler,
    batch_size: usize,
    hard_timeout_minutes: i64,
    scheduler_interval_minutes: i64,
    pull_window_hours: i64,
    sweep_log_retention: usize,
    dry_run: bool,
}

impl ExpirySweeper {
    pub fn new(pool: SqlitePool, reconciler: PaymentReconciler, config: &Config) -> Self {
        Self {
            lifecycle: OrderLifecycle::new(pool.clone()),
            pool,
            reconciler,
            batch_size: config.batch_size,
            hard_timeout_minutes: config.hard_timeout_minutes,
            scheduler_interval_minutes: config.scheduler_interval_minutes,
            pull_window_hours: config.pull_window_hours,
            sweep_log_retention: config.sweep_log_retention,
            dry_run: false,
        }
    }

    /// Same queries, no mutations; the stats report what would be done.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// One full sweep. Individual failures are logged and skipped; the
    /// tick itself only fails on setup-level errors.
    pub async fn tick(&self) -> EngineResult<SweepStats> {
        let started_at = Utc::now();
        let mut stats = SweepStats::default();

        stats.expired_released = self.release_expired().await?;
        stats.orphans_released = self.release_orphans().await?;
        stats.orders_cancelled = self.cancel_abandoned().await?;
        stats.payments_reconciled = self.pull_reconcile().await?;

        let finished_at = Utc::now();
        if self.dry_run {
            info!(
                "Dry-run sweep: would release {} expired + {} orphaned reservation(s), \
                 cancel {} order(s), reconcile {} payment(s)",
                stats.expired_released,
                stats.orphans_released,
                stats.orders_cancelled,
                stats.payments_reconciled
            );
        } else {
            let mut conn = self.pool.acquire().await?;
            SweepLog::record(
                &mut conn,
                started_at,
                finished_at,
                &stats,
                self.sweep_log_retention,
            )
            .await?;
            info!(
                "Sweep done in {}ms: released {} expired + {} orphaned, cancelled {}, reconciled {}",
                (finished_at - started_at).num_milliseconds(),
                stats.expired_released,
                stats.orphans_released,
                stats.orders_cancelled,
                stats.payments_reconciled
            );
        }

        Ok(stats)
    }

    /// Step 1: expired ACTIVE reservations on unpaid orders, in batches,
    /// one transaction per reservation.
    async fn release_expired(&self) -> EngineResult<u64> {
        let mut released = 0u64;
        loop {
            let batch = {
                let mut conn = self.pool.acquire().await?;
                ReservationStore::expired_batch(&mut conn, Utc::now(), self.batch_size).await?
            };
            if batch.is_empty() {
                break;
            }
            if self.dry_run {
                released += batch.len() as u64;
                break; // without mutations the same batch would repeat
            }

            let mut batch_flips = 0u64;
            for reservation in &batch {
                match self.terminate_one(&reservation.id).await {
                    Ok(true) => batch_flips += 1,
                    Ok(false) => {}
                    Err(e) if e.is_retryable() => {
                        warn!(
                            "Skipping reservation {} this tick (retryable: {})",
                            reservation.id, e
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            released += batch_flips;
            // A batch that made no progress would repeat forever; leave the
            // stragglers to the next tick.
            if batch_flips == 0 || batch.len() < self.batch_size {
                break;
            }
        }
        Ok(released)
    }

    /// Step 2: ACTIVE reservations on orders that went terminal without the
    /// reconciler cleaning up. Releasing restores the reserved-sum
    /// invariant; such rows only exist after an upstream fault.
    async fn release_orphans(&self) -> EngineResult<u64> {
        let orphans = {
            let mut conn = self.pool.acquire().await?;
            ReservationStore::orphaned_active(&mut conn, self.batch_size).await?
        };
        if self.dry_run {
            return Ok(orphans.len() as u64);
        }

        let mut released = 0u64;
        for reservation in &orphans {
            warn!(
                "Orphaned reservation {} on terminal order {}; releasing",
                reservation.id, reservation.order_id
            );
            if self.terminate_one(&reservation.id).await? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Step 3: pending orders past the hard timeout with no holds left.
    async fn cancel_abandoned(&self) -> EngineResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::minutes(self.hard_timeout_minutes);
        let orders = {
            let mut conn = self.pool.acquire().await?;
            OrderStore::abandoned_pending(&mut conn, cutoff, self.batch_size).await?
        };
        if self.dry_run {
            return Ok(orders.len() as u64);
        }

        let mut cancelled = 0u64;
        for order in &orders {
            match self
                .lifecycle
                .apply(&order.id, &LifecycleEvent::ReservationExpired)
                .await
            {
                Ok(applied) if applied.applied => cancelled += 1,
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    warn!("Skipping order {} this tick (retryable: {})", order.id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    /// Step 4: ask the gateway about pending orders old enough to have
    /// missed a webhook but young enough to still matter.
    async fn pull_reconcile(&self) -> EngineResult<u64> {
        let now = Utc::now();
        let older_than = now - chrono::Duration::minutes(self.scheduler_interval_minutes);
        let newer_than = now - chrono::Duration::hours(self.pull_window_hours);

        let candidates = {
            let mut conn = self.pool.acquire().await?;
            OrderStore::pending_for_reconciliation(
                &mut conn,
                older_than,
                newer_than,
                self.batch_size,
            )
            .await?
        };
        if self.dry_run {
            return Ok(candidates.len() as u64);
        }

        let mut reconciled = 0u64;
        for (order, token) in &candidates {
            match self.reconciler.reconcile_by_token(token).await {
                Ok(outcome) if outcome.event_applied => reconciled += 1,
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Gateway unavailable for order {} this tick: {}",
                        order.order_number, e
                    );
                }
                Err(EngineError::NotFound { .. }) => {
                    warn!(
                        "Gateway no longer knows token {} for order {}",
                        token, order.order_number
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reconciled)
    }

    /// Terminate one reservation as RELEASED in its own transaction.
    /// Returns whether this call performed the flip.
    async fn terminate_one(&self, reservation_id: &str) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await?;
        let termination =
            ReservationStore::terminate(&mut tx, reservation_id, ReservationOutcome::Released)
                .await?;
        tx.commit().await?;
        Ok(matches!(termination, Termination::Applied(_)))
    }
}
