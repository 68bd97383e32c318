//! Weekly performance digest, delivered via a template message.
//!
//! Template delivery matters here: the digest is pushed outside any user
//! conversation window, where free-form messages would be rejected.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{error, info};

use crate::engine::Deps;
use crate::error::Result;
use crate::services::listing::WeeklyMetrics;
use crate::store::model::{ActivityKind, ActivityRecord, ActivityStatus, Client};

const DIGEST_TEMPLATE: &str = "weekly_performance_digest";

/// The weekly digest sender.
pub struct DigestSender {
    deps: Deps,
}

impl DigestSender {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Send the digest to every active client. Per-client failures are
    /// recorded and do not stop the run.
    pub async fn send_all(&self) -> Result<()> {
        let clients = self.deps.db.list_active_clients().await?;
        info!(count = clients.len(), "Sending weekly digests");
        for client in &clients {
            if let Err(e) = self.send_one(client).await {
                error!(client_id = client.id, "Digest delivery failed: {e}");
            }
        }
        Ok(())
    }

    async fn send_one(&self, client: &Client) -> Result<()> {
        let now = Utc::now();
        let since = now - Duration::days(7);

        let metrics = match self.deps.listing.fetch_metrics(client, since, now).await {
            Ok(metrics) => metrics,
            Err(e) => {
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::DigestSent,
                        ActivityStatus::Failed,
                        None,
                        Some(&e.to_string()),
                    )
                    .await?;
                return Ok(());
            }
        };

        let activity = self.deps.db.list_activity_since(client.id, since).await?;
        let (posts_published, reviews_replied) = count_activity(&activity);
        let digest = format_weekly_digest(&metrics, posts_published, reviews_replied);

        match self
            .deps
            .chat
            .send_template(
                &client.address,
                DIGEST_TEMPLATE,
                &[client.business_name.clone(), digest],
            )
            .await
        {
            Ok(()) => {
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::DigestSent,
                        ActivityStatus::Success,
                        Some(json!({
                            "posts_published": posts_published,
                            "reviews_replied": reviews_replied,
                        })),
                        None,
                    )
                    .await?;
            }
            Err(e) => {
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::DigestSent,
                        ActivityStatus::Failed,
                        None,
                        Some(&e.to_string()),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

/// Count successful publishes and review replies in the window.
fn count_activity(records: &[ActivityRecord]) -> (usize, usize) {
    let mut posts = 0;
    let mut replies = 0;
    for record in records {
        if record.status != ActivityStatus::Success {
            continue;
        }
        match record.kind {
            ActivityKind::PostPublished
            | ActivityKind::OfferPublished
            | ActivityKind::PhotoPublished => posts += 1,
            ActivityKind::ReviewReplied => replies += 1,
            _ => {}
        }
    }
    (posts, replies)
}

/// The digest body handed to the template as its second parameter.
fn format_weekly_digest(metrics: &WeeklyMetrics, posts_published: usize, reviews_replied: usize) -> String {
    format!(
        "Profile Views: {}\n\
         Website Clicks: {}\n\
         Phone Calls: {}\n\
         Direction Requests: {}\n\n\
         Posts published: {posts_published}\n\
         Reviews replied: {reviews_replied}",
        metrics.impressions, metrics.website_clicks, metrics.call_clicks, metrics.direction_requests,
    )
}
