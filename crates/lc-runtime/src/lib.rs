//! lc-runtime
//!
//! The checker's outer control loop: reconciliation cycles, each containing
//! processing rounds, each driving a fixed pool of workers over a freshly
//! loaded workset.
//!
//! Round timing rules:
//! - the first round after a reconcile always runs to completion, even if
//!   the cycle budget has already elapsed — a freshly loaded workset gets at
//!   least one full pass;
//! - later rounds are capped at
//!   `min(remaining cycle budget, workset_owner_max_links × (1 + owner_revisit_min_interval))`
//!   seconds, so one slow owner pushing every probe to the fetch timeout
//!   cannot freeze the rest of the workset;
//! - on round timeout the stop flag is set and workers are joined; no
//!   in-flight fetch is aborted, so shutdown latency is bounded by the
//!   per-fetch timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use lc_config::CheckerConfig;
use lc_db::{IdentifierSource, LinkStore};
use lc_exclusions::ExclusionRegistry;
use lc_fetcher::{check_and_record, FetchConfig};
use lc_reconcile::{reconcile_table, ReconcileStats};
use lc_scheduler::{Dispatch, Scheduler, SchedulerConfig};

/// Sleep before retrying when a round finds nothing eligible.
const EMPTY_WORKSET_SLEEP: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Accounting for one processing round.
#[derive(Debug, Default, Clone)]
pub struct RoundReport {
    pub checked: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
    /// Total seconds workers spent in WAIT sleeps.
    pub wait_sleep_secs: u64,
    /// True when the round hit its timeout and was stopped.
    pub timed_out: bool,
}

/// Accounting for one reconciliation cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    /// `None` when the reconcile aborted (paging failure); rounds still ran
    /// against the existing table.
    pub reconcile: Option<ReconcileStats>,
    pub rounds: Vec<RoundReport>,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
    succeeded: u64,
    failed: u64,
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Owns the scheduler and drives cycles; shared with workers by `Arc`.
pub struct Checker {
    config: CheckerConfig,
    store: Arc<dyn LinkStore>,
    source: Arc<dyn IdentifierSource>,
    exclusions: Arc<ExclusionRegistry>,
    scheduler: Arc<Scheduler>,
    empty_workset_sleep: Duration,
}

impl Checker {
    pub fn new(
        config: CheckerConfig,
        store: Arc<dyn LinkStore>,
        source: Arc<dyn IdentifierSource>,
        exclusions: Arc<ExclusionRegistry>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
            workset_owner_max_links: config.workset_owner_max_links,
            good_recheck_min_interval: config.good_recheck_min_interval,
            bad_recheck_min_interval: config.bad_recheck_min_interval,
            owner_revisit_min_interval: config.owner_revisit_min_interval,
        }));
        Self {
            config,
            store,
            source,
            exclusions,
            scheduler,
            empty_workset_sleep: EMPTY_WORKSET_SLEEP,
        }
    }

    /// Shrink the empty-workset sleep (scenario tests only; production keeps
    /// the 60 s default).
    pub fn with_empty_workset_sleep(mut self, d: Duration) -> Self {
        self.empty_workset_sleep = d;
        self
    }

    /// Run forever. A failed cycle is logged and retried after the
    /// empty-workset sleep rather than taking the process down.
    pub async fn run(&self) -> Result<()> {
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %format!("{e:#}"), "cycle failed; retrying");
                tokio::time::sleep(self.empty_workset_sleep).await;
            }
        }
    }

    /// One reconciliation cycle: reconcile the table, then run rounds until
    /// the cycle budget is spent (always at least one).
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle_start = Instant::now();
        let cycle_budget = Duration::from_secs(self.config.table_update_cycle);
        let mut report = CycleReport::default();

        self.exclusions.refresh().await;
        let excl = self.exclusions.snapshot().await;
        match reconcile_table(self.store.as_ref(), self.source.as_ref(), &excl).await {
            Ok(stats) => {
                info!(
                    inserted = stats.inserted,
                    deleted = stats.deleted,
                    retargeted = stats.retargeted,
                    unchanged = stats.unchanged,
                    row_errors = stats.row_errors,
                    "table reconciled"
                );
                report.reconcile = Some(stats);
            }
            Err(e) => {
                // Rounds still run against the existing table; the next
                // cycle retries the reconcile from scratch.
                error!(error = %format!("{e:#}"), "reconcile aborted");
            }
        }

        let mut first_round = true;
        loop {
            if !first_round && cycle_start.elapsed() >= cycle_budget {
                break;
            }

            match self.run_round(first_round, cycle_start, cycle_budget).await? {
                Some(round) => report.rounds.push(round),
                None => {
                    // Nothing eligible anywhere: don't spin.
                    tokio::time::sleep(self.empty_workset_sleep).await;
                }
            }
            first_round = false;
        }

        Ok(report)
    }

    /// Load a workset and drive one round of workers over it. Returns `None`
    /// when the workset came up empty.
    pub async fn run_round(
        &self,
        first_round: bool,
        cycle_start: Instant,
        cycle_budget: Duration,
    ) -> Result<Option<RoundReport>> {
        self.exclusions.refresh().await;
        let excl = self.exclusions.snapshot().await;

        let total = self
            .scheduler
            .load_workset(self.store.as_ref(), &excl, epoch_now())
            .await?;
        if total == 0 {
            return Ok(None);
        }

        let round_start = Instant::now();
        let stop = Arc::new(AtomicBool::new(false));
        let wait_sleep = Arc::new(AtomicU64::new(0));

        let fetch_config = FetchConfig {
            user_agent: self.config.user_agent.clone(),
            check_timeout: self.config.check_timeout,
            max_read: self.config.max_read,
        };

        let mut handles = Vec::with_capacity(self.config.num_workers);
        for _ in 0..self.config.num_workers.max(1) {
            // The ring holds one entry more than the notification threshold
            // so the trailing-failure count can actually exceed it.
            handles.push(tokio::spawn(worker_loop(
                Arc::clone(&self.scheduler),
                Arc::clone(&self.store),
                Arc::clone(&self.exclusions),
                fetch_config.clone(),
                self.config.notify_failure_threshold + 1,
                Arc::clone(&stop),
                Arc::clone(&wait_sleep),
            )));
        }

        // First round: unbounded, so a fresh workset always gets one full
        // pass. Later rounds: capped.
        let round_timeout = if first_round {
            None
        } else {
            let per_links = Duration::from_secs(
                self.config.workset_owner_max_links as u64
                    * (1 + self.config.owner_revisit_min_interval),
            );
            Some(cycle_budget.saturating_sub(cycle_start.elapsed()).min(per_links))
        };

        let mut joined = Box::pin(futures_util::future::join_all(handles));
        let mut timed_out = false;
        let results = match round_timeout {
            None => joined.await,
            Some(t) => match tokio::time::timeout(t, &mut joined).await {
                Ok(results) => results,
                Err(_) => {
                    timed_out = true;
                    stop.store(true, Ordering::SeqCst);
                    joined.await
                }
            },
        };

        let mut stats = WorkerStats::default();
        for r in results {
            match r {
                Ok(w) => {
                    stats.succeeded += w.succeeded;
                    stats.failed += w.failed;
                }
                Err(e) => error!(error = %e, "worker terminated abnormally"),
            }
        }

        let elapsed = round_start.elapsed();
        let checked = stats.succeeded + stats.failed;
        let rate = checked as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        info!(
            checked,
            succeeded = stats.succeeded,
            failed = stats.failed,
            elapsed_secs = elapsed.as_secs(),
            rate_per_sec = rate,
            wait_sleep_secs = wait_sleep.load(Ordering::SeqCst),
            timed_out,
            "round complete"
        );

        Ok(Some(RoundReport {
            checked,
            succeeded: stats.succeeded,
            failed: stats.failed,
            elapsed,
            wait_sleep_secs: wait_sleep.load(Ordering::SeqCst),
            timed_out,
        }))
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn worker_loop(
    scheduler: Arc<Scheduler>,
    store: Arc<dyn LinkStore>,
    exclusions: Arc<ExclusionRegistry>,
    fetch_config: FetchConfig,
    history_capacity: usize,
    stop: Arc<AtomicBool>,
    wait_sleep: Arc<AtomicU64>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        // Exclusions are re-checked at every dispatch so an operator edit
        // takes effect mid-round.
        exclusions.refresh().await;
        let excl = exclusions.snapshot().await;

        match scheduler.next_link(&excl, Instant::now()) {
            Dispatch::Finished => break,
            Dispatch::Wait => {
                wait_sleep.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Dispatch::Ready { slot, mut row } => {
                let report = check_and_record(
                    store.as_ref(),
                    &fetch_config,
                    &mut row,
                    history_capacity,
                    epoch_now(),
                )
                .await;
                if report.is_success() {
                    stats.succeeded += 1;
                } else {
                    stats.failed += 1;
                    warn!(
                        identifier = %row.identifier,
                        return_code = report.return_code,
                        detail = %report.detail,
                        "link check failed"
                    );
                }
                scheduler.mark_checked(slot, Instant::now());
            }
        }
    }

    stats
}

fn epoch_now() -> i64 {
    chrono::Utc::now().timestamp()
}
