//! Background jobs: review polling, expiry sweeps, weekly digests.
//!
//! Each job runs in its own spawned loop: sleep until the next cron fire,
//! take the job's durable lease, run, release. The lease survives crashes
//! via its TTL, so a wedged holder never blocks the job forever, and a
//! second process never double-runs it.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::{Deps, DigestSender, ReviewEngine};
use crate::store::Database;

/// Review poll, every 15 minutes.
pub const REVIEW_POLL_SCHEDULE: &str = "0 */15 * * * *";
/// Expiry sweep, top of every hour.
pub const EXPIRY_SCHEDULE: &str = "0 0 * * * *";
/// Weekly digest, Monday 08:00 (shifted by the configured UTC offset).
pub const DIGEST_SCHEDULE: &str = "0 0 8 * * Mon";

const REVIEW_POLL_LEASE_SECS: i64 = 600;
const EXPIRY_LEASE_SECS: i64 = 300;
const DIGEST_LEASE_SECS: i64 = 3600;

/// Owns the spawned job loops. One holder id per process instance.
pub struct JobRunner {
    deps: Deps,
    holder: String,
}

impl JobRunner {
    pub fn new(deps: Deps) -> Self {
        Self {
            deps,
            holder: Uuid::new_v4().to_string(),
        }
    }

    /// Spawn all job loops.
    pub fn spawn_all(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_review_poll(),
            self.spawn_expiry_sweep(),
            self.spawn_digest(),
        ]
    }

    fn spawn_review_poll(&self) -> JoinHandle<()> {
        let deps = self.deps.clone();
        let holder = self.holder.clone();
        tokio::spawn(async move {
            info!(schedule = REVIEW_POLL_SCHEDULE, "Review poll job started");
            loop {
                if !sleep_until_next(REVIEW_POLL_SCHEDULE, 0).await {
                    return;
                }
                run_leased(
                    &deps.db,
                    "poll_reviews",
                    &holder,
                    REVIEW_POLL_LEASE_SECS,
                    || poll_reviews(&deps),
                )
                .await;
            }
        })
    }

    fn spawn_expiry_sweep(&self) -> JoinHandle<()> {
        let deps = self.deps.clone();
        let holder = self.holder.clone();
        tokio::spawn(async move {
            info!(schedule = EXPIRY_SCHEDULE, "Expiry sweep job started");
            loop {
                if !sleep_until_next(EXPIRY_SCHEDULE, 0).await {
                    return;
                }
                run_leased(&deps.db, "expire_items", &holder, EXPIRY_LEASE_SECS, || {
                    expire_items(&deps)
                })
                .await;
            }
        })
    }

    fn spawn_digest(&self) -> JoinHandle<()> {
        let deps = self.deps.clone();
        let holder = self.holder.clone();
        let offset_hours = self.deps.config.digest_utc_offset_hours;
        tokio::spawn(async move {
            info!(
                schedule = DIGEST_SCHEDULE,
                offset_hours, "Weekly digest job started"
            );
            loop {
                if !sleep_until_next(DIGEST_SCHEDULE, offset_hours).await {
                    return;
                }
                run_leased(&deps.db, "send_digests", &holder, DIGEST_LEASE_SECS, || {
                    send_digests(&deps)
                })
                .await;
            }
        })
    }
}

/// Sleep until the next cron fire. Returns `false` when the schedule is
/// unusable and the loop should stop.
async fn sleep_until_next(schedule: &str, offset_hours: i32) -> bool {
    let next = match next_fire(schedule, offset_hours) {
        Ok(at) => at,
        Err(e) => {
            error!(schedule, "Job schedule unusable: {e}");
            return false;
        }
    };
    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    debug!(schedule, wait_secs = wait.as_secs(), "Sleeping until next fire");
    tokio::time::sleep(wait).await;
    true
}

/// Next fire time of a cron expression, evaluated in the given UTC offset.
fn next_fire(schedule: &str, offset_hours: i32) -> Result<DateTime<Utc>, String> {
    let tz = FixedOffset::east_opt(offset_hours * 3600)
        .ok_or_else(|| format!("invalid UTC offset: {offset_hours}"))?;
    let parsed = cron::Schedule::from_str(schedule).map_err(|e| format!("invalid cron: {e}"))?;
    parsed
        .upcoming(tz)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| "no upcoming fire".to_string())
}

async fn run_leased<F, Fut>(
    db: &Arc<dyn Database>,
    name: &str,
    holder: &str,
    ttl_secs: i64,
    job: F,
) where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    match db.acquire_job_lease(name, holder, ttl_secs).await {
        Ok(true) => {
            job().await;
            if let Err(e) = db.release_job_lease(name, holder).await {
                error!(job = name, "Lease release failed: {e}");
            }
        }
        Ok(false) => info!(job = name, "Lease held elsewhere, skipping run"),
        Err(e) => error!(job = name, "Lease acquisition failed: {e}"),
    }
}

async fn poll_reviews(deps: &Deps) {
    let clients = match deps.db.list_active_clients().await {
        Ok(clients) => clients,
        Err(e) => {
            error!("Review poll could not list clients: {e}");
            return;
        }
    };

    let engine = ReviewEngine::new(deps.clone());
    let since = Utc::now() - chrono::Duration::minutes(deps.config.review_lookback_minutes);

    for client in &clients {
        let reviews = match deps.listing.fetch_reviews(client, since).await {
            Ok(reviews) => reviews,
            Err(e) => {
                error!(client_id = client.id, "Review fetch failed: {e}");
                continue;
            }
        };
        for review in &reviews {
            match engine.seed(client, review).await {
                Ok(true) => {
                    info!(client_id = client.id, review_ref = %review.review_ref, "New review alert sent")
                }
                Ok(false) => {}
                Err(e) => error!(client_id = client.id, "Review seed failed: {e}"),
            }
        }
    }
}

async fn expire_items(deps: &Deps) {
    match deps.db.expire_due_items(Utc::now()).await {
        Ok(0) => debug!("Expiry sweep found nothing due"),
        Ok(count) => info!(count, "Expired overdue items"),
        Err(e) => error!("Expiry sweep failed: {e}"),
    }
}

async fn send_digests(deps: &Deps) {
    if let Err(e) = DigestSender::new(deps.clone()).send_all().await {
        error!("Digest run failed: {e}");
    }
}
