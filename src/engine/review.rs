//! Review workflow — poll alerts, suggested replies, custom replies.
//!
//! New unanswered reviews become pending items with a suggested reply and a
//! 48-hour deadline. The user posts the suggestion, types their own reply,
//! or skips.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::action::{ActionId, ActionVerb};
use crate::engine::{APOLOGY_PUBLISH, Deps, MenuFlow, draft_preview, transition_guarded};
use crate::error::Result;
use crate::services::generator::BusinessContext;
use crate::services::listing::RemoteReview;
use crate::services::transport::Button;
use crate::store::model::{
    ActivityKind, ActivityStatus, Client, ItemKind, ItemStatus, NewWorkflowItem, WorkflowItem,
};

const STALE_ITEM_TEXT: &str = "This review is no longer pending.";

/// The review workflow engine.
pub struct ReviewEngine {
    deps: Deps,
    menu: MenuFlow,
}

impl ReviewEngine {
    pub fn new(deps: Deps) -> Self {
        Self {
            menu: MenuFlow::new(deps.clone()),
            deps,
        }
    }

    /// Turn a fetched review into a pending item and alert the client.
    ///
    /// Idempotent per review: a review already tracked (any status) seeds
    /// nothing and returns `false`.
    pub async fn seed(&self, client: &Client, review: &RemoteReview) -> Result<bool> {
        if self
            .deps
            .db
            .find_item_by_review_ref(&review.review_ref)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let context = BusinessContext::from(client);
        let suggested = match self
            .deps
            .generator
            .suggest_review_reply(&context, &review.reviewer_name, review.rating, &review.text)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                // Leave the review for the next poll rather than alerting
                // without a suggestion.
                error!(client_id = client.id, "Review reply generation failed: {e}");
                return Ok(false);
            }
        };

        let expires_at = Utc::now() + Duration::hours(self.deps.config.review_expiry_hours);
        let item = match self
            .deps
            .db
            .insert_item(&NewWorkflowItem::review(
                client.id,
                &review.review_ref,
                &review.text,
                &review.reviewer_name,
                review.rating,
                &suggested,
                expires_at,
            ))
            .await
        {
            Ok(item) => item,
            // The review_ref raced in from a concurrent poll.
            Err(e) if e.is_unique_violation() => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        self.send_alert(client, &item).await?;
        self.deps
            .db
            .insert_activity(
                client.id,
                ActivityKind::ReviewAlert,
                ActivityStatus::Success,
                Some(json!({ "item_id": item.id, "review_ref": review.review_ref })),
                None,
            )
            .await?;
        Ok(true)
    }

    /// Handle a decision button for a review item.
    pub async fn claim_decision(&self, client: &Client, action: ActionId) -> Result<()> {
        let Some(item) = self.deps.db.get_item(action.item_id).await? else {
            self.deps
                .chat
                .send_text(&client.address, STALE_ITEM_TEXT)
                .await?;
            return Ok(());
        };
        if item.client_id != client.id || item.kind != ItemKind::Review {
            warn!(
                client_id = client.id,
                item_id = item.id,
                "Review action does not match item"
            );
            return Ok(());
        }

        match action.verb {
            ActionVerb::Approve => {
                if item.status != ItemStatus::Pending {
                    debug!(item_id = item.id, status = %item.status, "Approve on settled review");
                    return Ok(());
                }
                if !transition_guarded(
                    &self.deps.db,
                    &item,
                    ItemStatus::Pending,
                    ItemStatus::Approved,
                )
                .await?
                {
                    debug!(item_id = item.id, "Stale approve on review");
                    return Ok(());
                }
                self.post_reply(client, &item, item.publish_text().to_string())
                    .await?;
            }
            ActionVerb::Edit => {
                if item.status == ItemStatus::Pending
                    && transition_guarded(
                        &self.deps.db,
                        &item,
                        ItemStatus::Pending,
                        ItemStatus::AwaitingCustomReply,
                    )
                    .await?
                {
                    self.deps
                        .chat
                        .send_text(&client.address, "Type your reply and send it:")
                        .await?;
                } else {
                    debug!(item_id = item.id, "Stale edit on review");
                }
            }
            ActionVerb::Skip => {
                if item.status.is_active()
                    && transition_guarded(&self.deps.db, &item, item.status, ItemStatus::Rejected)
                        .await?
                {
                    self.menu.confirmation_with_menu(client, "Skipped.").await?;
                } else {
                    debug!(item_id = item.id, "Stale skip on review");
                }
            }
            ActionVerb::PhotoSkip => {
                debug!(item_id = item.id, "Photo-skip has no meaning for reviews");
            }
        }
        Ok(())
    }

    /// Claim a free-text message as the custom reply for the review
    /// awaiting one. Returns `false` when nothing is awaiting.
    pub async fn claim_custom_reply(&self, client: &Client, text: &str) -> Result<bool> {
        let Some(item) = self
            .deps
            .db
            .find_item_in_status(client.id, ItemKind::Review, ItemStatus::AwaitingCustomReply)
            .await?
        else {
            return Ok(false);
        };

        // The write is status-guarded in storage: an expiry racing in
        // cannot be stamped with text after the item settles.
        if !self.deps.db.set_item_custom_text(item.id, text).await? {
            debug!(item_id = item.id, "Review settled before custom reply landed");
            return Ok(true);
        }
        if !transition_guarded(
            &self.deps.db,
            &item,
            ItemStatus::AwaitingCustomReply,
            ItemStatus::CustomReply,
        )
        .await?
        {
            debug!(item_id = item.id, "Review expired before custom reply posted");
            return Ok(true);
        }

        self.post_reply(client, &item, text.to_string()).await?;
        Ok(true)
    }

    async fn send_alert(&self, client: &Client, item: &WorkflowItem) -> Result<()> {
        let body = format_review_alert(
            item.rating.unwrap_or(0),
            item.reviewer_name.as_deref().unwrap_or("A customer"),
            &item.source_text,
            &item.draft_text,
        );
        let buttons = [
            Button::new(
                ActionId::new(ItemKind::Review, ActionVerb::Approve, item.id).to_string(),
                "Post Reply",
            ),
            Button::new(
                ActionId::new(ItemKind::Review, ActionVerb::Edit, item.id).to_string(),
                "Edit Reply",
            ),
            Button::new(
                ActionId::new(ItemKind::Review, ActionVerb::Skip, item.id).to_string(),
                "Skip",
            ),
        ];
        self.deps
            .chat
            .send_buttons(&client.address, &body, &buttons)
            .await?;
        Ok(())
    }

    async fn post_reply(&self, client: &Client, item: &WorkflowItem, reply: String) -> Result<()> {
        let Some(review_ref) = item.review_ref.as_deref() else {
            warn!(item_id = item.id, "Review item has no review_ref");
            return Ok(());
        };

        match self
            .deps
            .listing
            .reply_to_review(client, review_ref, &reply)
            .await
        {
            Ok(()) => {
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::ReviewReplied,
                        ActivityStatus::Success,
                        Some(json!({ "item_id": item.id, "review_ref": review_ref })),
                        None,
                    )
                    .await?;
                self.menu
                    .confirmation_with_menu(client, "Reply posted to Google!")
                    .await?;
            }
            Err(e) => {
                error!(client_id = client.id, item_id = item.id, "Review reply failed: {e}");
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::ReviewReplied,
                        ActivityStatus::Failed,
                        Some(json!({ "item_id": item.id, "review_ref": review_ref })),
                        Some(&e.to_string()),
                    )
                    .await?;
                self.deps
                    .chat
                    .send_text(&client.address, APOLOGY_PUBLISH)
                    .await?;
            }
        }
        Ok(())
    }
}

/// The alert message shown for a new review.
fn format_review_alert(rating: u8, reviewer: &str, review_text: &str, suggested: &str) -> String {
    let stars: String = "⭐".repeat(rating.min(5) as usize);
    let review = if review_text.is_empty() {
        "(no comment)".to_string()
    } else {
        draft_preview(review_text)
    };
    format!(
        "{stars} New review from {reviewer}\n\n\"{review}\"\n\nSuggested reply:\n\"{}\"",
        draft_preview(suggested)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_formats_stars_and_quotes() {
        let alert = format_review_alert(5, "Aoife", "Great work, spotless finish", "Thanks Aoife!");
        assert!(alert.starts_with("⭐⭐⭐⭐⭐ New review from Aoife"));
        assert!(alert.contains("\"Great work, spotless finish\""));
        assert!(alert.contains("Suggested reply:\n\"Thanks Aoife!\""));
    }

    #[test]
    fn alert_handles_missing_comment_and_rating() {
        let alert = format_review_alert(0, "A customer", "", "Thank you!");
        assert!(alert.starts_with(" New review from A customer"));
        assert!(alert.contains("(no comment)"));
    }

    #[test]
    fn alert_caps_star_count() {
        let alert = format_review_alert(9, "X", "text", "reply");
        assert!(alert.starts_with(&"⭐".repeat(5)));
        assert!(!alert.contains(&"⭐".repeat(6)));
    }
}
