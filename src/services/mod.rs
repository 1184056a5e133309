use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, Utc};
use futures::{stream, StreamExt};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::db::{repository::DrugRepository, DatabaseError};

pub mod notifier;

pub use notifier::{AlertNotifier, LogNotifier, NotifyError, TelegramNotifier};

/// Owners processed at the same time within one run.
const OWNER_CONCURRENCY: usize = 8;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
    #[error("Alert cutoff out of range: {now} + {lead}")]
    CutoffOutOfRange { now: DateTime<Utc>, lead: Duration },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AlertCycleSummary {
    pub owners: usize,
    pub drugs_alerted: u64,
    pub failed_owners: Vec<i32>,
}

/// Marks an alert run as in progress for as long as it is alive.
///
/// The flag is cleared on drop, so a run that panics or whose future is
/// cancelled does not block later runs.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    /// Claims `running`.
    ///
    /// Returns:
    /// - `Some(RunGuard)` if no other run held the flag.
    /// - `None` if a run is already in progress.
    pub fn try_acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        if running.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Self {
            running: Arc::clone(running),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Schedules the expiry alert run.
///
/// This function registers a `tokio_cron_scheduler` job that calls
/// [`run_alert_cycle`] on every tick of `cron`, then starts the scheduler.
///
/// Parameters:
/// - `repo`: The drug repository the job reads from and marks alerts in.
/// - `notifier`: Where alerts are delivered.
/// - `cron`: Six-field cron expression, seconds first.
/// - `lead`: How far ahead of each run a drug counts as expiring.
///
/// A tick that fires while the previous run is still going is skipped.
///
/// Returns:
/// - `Ok(JobScheduler)` once the job is scheduled and the scheduler started.
///   Callers keep it and call `shutdown` on exit.
/// - `Err(AlertError::Scheduler)` if the cron expression is invalid or the
///   scheduler fails to start.
pub async fn schedule_alerts(
    repo: DrugRepository,
    notifier: Arc<dyn AlertNotifier>,
    cron: &str,
    lead: Duration,
) -> Result<JobScheduler, AlertError> {
    let sched = JobScheduler::new().await?;
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _l| {
        let repo = repo.clone();
        let notifier = Arc::clone(&notifier);
        let running = Arc::clone(&running);
        Box::pin(async move {
            let Some(_guard) = RunGuard::try_acquire(&running) else {
                log::warn!("Previous expiry alert run still in progress, skipping");
                return;
            };

            match run_alert_cycle(&repo, notifier.as_ref(), Utc::now(), lead).await {
                Ok(summary) => log::info!(
                    "Expiry alert run completed: {} owners, {} drugs alerted, {} failed",
                    summary.owners,
                    summary.drugs_alerted,
                    summary.failed_owners.len()
                ),
                Err(e) => log::error!("Error running expiry alerts: {}", e),
            }
        })
    })
    .map_err(|e| {
        log::error!("Failed to create job: {}", e);
        e
    })?;

    sched.add(job).await.map_err(|e| {
        log::error!("Failed to add job to scheduler: {}", e);
        e
    })?;

    sched.start().await?;

    log::info!("Expiry alert scheduler started ({})", cron);
    Ok(sched)
}

/// Runs one expiry alert pass.
///
/// Every owner with unalerted drugs expiring by `now + lead` is notified
/// once, then those drugs are marked as sent at `now`. Owners are processed
/// a few at a time. A failure for one owner is logged and does not stop
/// the others.
///
/// Delivery is at-least-once: two concurrent passes may both notify an
/// owner before either marks the drugs.
///
/// Parameters:
/// - `repo`: The drug repository.
/// - `notifier`: Where alerts are delivered.
/// - `now`: The run time, also written as `alert_sent_at`.
/// - `lead`: How far ahead of `now` a drug counts as expiring.
///
/// Returns:
/// - `Ok(AlertCycleSummary)` with the owners seen, drugs marked and owners
///   that failed.
/// - `Err(AlertError::CutoffOutOfRange)` if `now + lead` is not a valid
///   timestamp.
/// - `Err(AlertError::Database)` if the owner list cannot be read.
pub async fn run_alert_cycle(
    repo: &DrugRepository,
    notifier: &dyn AlertNotifier,
    now: DateTime<Utc>,
    lead: Duration,
) -> Result<AlertCycleSummary, AlertError> {
    let cutoff = now
        .checked_add_signed(lead)
        .ok_or(AlertError::CutoffOutOfRange { now, lead })?;
    let owners = repo
        .find_distinct_owner_ids_with_expiring_drugs(cutoff)
        .await?;

    if owners.is_empty() {
        log::debug!("No drugs expiring before {}", cutoff);
        return Ok(AlertCycleSummary::default());
    }

    let results: Vec<(i32, Result<u64, AlertError>)> = stream::iter(owners.iter().copied())
        .map(|owner| async move {
            (owner, alert_owner(repo, notifier, owner, cutoff, now).await)
        })
        .buffered(OWNER_CONCURRENCY)
        .collect()
        .await;

    let mut summary = AlertCycleSummary {
        owners: owners.len(),
        ..Default::default()
    };
    for (owner, result) in results {
        match result {
            Ok(count) => summary.drugs_alerted += count,
            Err(e) => {
                log::error!("Failed to send expiry alert to user {}: {}", owner, e);
                summary.failed_owners.push(owner);
            }
        }
    }

    Ok(summary)
}

async fn alert_owner(
    repo: &DrugRepository,
    notifier: &dyn AlertNotifier,
    owner_user_id: i32,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64, AlertError> {
    let drugs = repo
        .find_by_owner_user_id_and_expiration_date_less_than_equal_and_alert_sent_false(
            owner_user_id,
            cutoff,
        )
        .await?;

    // Another run may have marked them since the owner list was read.
    if drugs.is_empty() {
        return Ok(0);
    }

    notifier.notify(owner_user_id, &drugs, now).await?;

    let ids: Vec<i32> = drugs.iter().map(|item| item.drug.drug_id).collect();
    let marked = repo.mark_alerts_as_sent(&ids, now).await?;

    log::debug!("Alerted user {} about {} drugs", owner_user_id, marked);
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    // Never connects unless a query runs.
    fn unreachable_repo() -> DrugRepository {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        DrugRepository::new(pool)
    }

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let running = Arc::new(AtomicBool::new(false));

        let first = RunGuard::try_acquire(&running);
        assert!(first.is_some());
        assert!(RunGuard::try_acquire(&running).is_none());
    }

    #[test]
    fn dropping_guard_allows_next_run() {
        let running = Arc::new(AtomicBool::new(false));

        let first = RunGuard::try_acquire(&running).unwrap();
        drop(first);

        assert!(!running.load(Ordering::SeqCst));
        assert!(RunGuard::try_acquire(&running).is_some());
    }

    #[test]
    fn panicking_run_releases_guard() {
        let running = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&running);

        let result = std::thread::spawn(move || {
            let _guard = RunGuard::try_acquire(&shared).unwrap();
            panic!("alert run failed");
        })
        .join();

        assert!(result.is_err());
        assert!(RunGuard::try_acquire(&running).is_some());
    }

    #[tokio::test]
    async fn cancelled_run_releases_guard() {
        let running = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&running);

        let task = tokio::spawn(async move {
            let _guard = RunGuard::try_acquire(&shared).unwrap();
            std::future::pending::<()>().await;
        });
        while !running.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert!(RunGuard::try_acquire(&running).is_some());
    }

    #[tokio::test]
    async fn overflowing_cutoff_is_an_error() {
        let repo = unreachable_repo();

        let result = run_alert_cycle(
            &repo,
            &LogNotifier,
            DateTime::<Utc>::MAX_UTC,
            Duration::days(1),
        )
        .await;
        assert!(matches!(result, Err(AlertError::CutoffOutOfRange { .. })));

        let result = run_alert_cycle(&repo, &LogNotifier, Utc::now(), Duration::days(100_000_000))
            .await;
        assert!(matches!(result, Err(AlertError::CutoffOutOfRange { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schedule_alerts_rejects_malformed_cron() {
        let result = schedule_alerts(
            unreachable_repo(),
            Arc::new(LogNotifier),
            "every morning",
            Duration::days(30),
        )
        .await;

        assert!(matches!(result, Err(AlertError::Scheduler(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schedule_alerts_starts_and_shuts_down() {
        let mut sched = schedule_alerts(
            unreachable_repo(),
            Arc::new(LogNotifier),
            "0 0 8 * * *",
            Duration::days(30),
        )
        .await
        .unwrap();

        sched.shutdown().await.unwrap();
    }
}
