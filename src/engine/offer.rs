//! Offer workflow — brief to draft to approval to published offer post.
//!
//! Same shape as the post workflow, with a validity window and a
//! call-to-action on top. Approving a pending offer offers the photo step;
//! the user can attach one or publish text-only.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::action::{ActionId, ActionVerb};
use crate::engine::{
    APOLOGY_GENERATION, APOLOGY_PUBLISH, Deps, MenuFlow, PhotoPipeline, draft_preview,
    insert_superseding, transition_guarded,
};
use crate::error::Result;
use crate::services::generator::BusinessContext;
use crate::services::transport::Button;
use crate::store::model::{
    ActivityKind, ActivityStatus, Client, ItemKind, ItemStatus, NewWorkflowItem, WorkflowItem,
};

const STALE_ITEM_TEXT: &str = "This offer is no longer pending.";

/// The offer workflow engine.
pub struct OfferEngine {
    deps: Deps,
    menu: MenuFlow,
    photo: PhotoPipeline,
}

impl OfferEngine {
    pub fn new(deps: Deps) -> Self {
        Self {
            menu: MenuFlow::new(deps.clone()),
            photo: PhotoPipeline::new(deps.clone()),
            deps,
        }
    }

    /// Start a new offer from the user's brief.
    pub async fn start(&self, client: &Client, brief: &str) -> Result<()> {
        let superseded = self
            .deps
            .db
            .supersede_active_item(client.id, ItemKind::Offer)
            .await?;
        if superseded > 0 {
            info!(client_id = client.id, superseded, "Superseded active offer");
        }

        let context = BusinessContext::from(client);
        let draft = match self.deps.generator.draft_offer(&context, brief).await {
            Ok(draft) => draft,
            Err(e) => {
                error!(client_id = client.id, "Offer draft generation failed: {e}");
                self.deps
                    .chat
                    .send_text(&client.address, APOLOGY_GENERATION)
                    .await?;
                return Ok(());
            }
        };

        let end_date = Utc::now() + Duration::days(self.deps.config.offer_duration_days);
        let item = insert_superseding(
            &self.deps.db,
            &NewWorkflowItem::offer(client.id, brief, &draft, end_date),
        )
        .await?;
        self.send_preview(client, &item, false).await
    }

    /// Handle a decision button for an offer item.
    pub async fn claim_decision(&self, client: &Client, action: ActionId) -> Result<()> {
        let Some(item) = self.deps.db.get_item(action.item_id).await? else {
            self.deps
                .chat
                .send_text(&client.address, STALE_ITEM_TEXT)
                .await?;
            return Ok(());
        };
        if item.client_id != client.id || item.kind != ItemKind::Offer {
            warn!(
                client_id = client.id,
                item_id = item.id,
                "Offer action does not match item"
            );
            return Ok(());
        }

        match action.verb {
            ActionVerb::Approve => match item.status {
                ItemStatus::Pending => {
                    if transition_guarded(
                        &self.deps.db,
                        &item,
                        ItemStatus::Pending,
                        ItemStatus::AwaitingPhoto,
                    )
                    .await?
                    {
                        self.send_photo_prompt(client, item.id).await?;
                    } else {
                        debug!(item_id = item.id, "Stale approve on offer");
                    }
                }
                ItemStatus::AwaitingPhoto => self.publish_without_photo(client, &item).await?,
                status => debug!(item_id = item.id, %status, "Approve on settled offer"),
            },
            ActionVerb::PhotoSkip => {
                if item.status == ItemStatus::AwaitingPhoto {
                    self.publish_without_photo(client, &item).await?;
                } else {
                    debug!(item_id = item.id, status = %item.status, "Photo-skip on settled offer");
                }
            }
            ActionVerb::Edit => {
                if item.status == ItemStatus::Pending
                    && transition_guarded(
                        &self.deps.db,
                        &item,
                        ItemStatus::Pending,
                        ItemStatus::AwaitingEdit,
                    )
                    .await?
                {
                    self.deps
                        .chat
                        .send_text(&client.address, "No problem. Tell me what to change:")
                        .await?;
                } else {
                    debug!(item_id = item.id, "Stale edit on offer");
                }
            }
            ActionVerb::Skip => {
                if item.status.is_active()
                    && transition_guarded(&self.deps.db, &item, item.status, ItemStatus::Skipped)
                        .await?
                {
                    self.menu
                        .confirmation_with_menu(client, "No problem, skipped.")
                        .await?;
                } else {
                    debug!(item_id = item.id, "Stale skip on offer");
                }
            }
        }
        Ok(())
    }

    /// Claim a free-text message as edit feedback for the awaiting offer.
    pub async fn claim_edit_feedback(&self, client: &Client, feedback: &str) -> Result<bool> {
        let Some(item) = self
            .deps
            .db
            .find_item_in_status(client.id, ItemKind::Offer, ItemStatus::AwaitingEdit)
            .await?
        else {
            return Ok(false);
        };

        let context = BusinessContext::from(client);
        let revised = match self
            .deps
            .generator
            .revise_draft(&context, ItemKind::Offer, &item.draft_text, feedback)
            .await
        {
            Ok(revised) => revised,
            Err(e) => {
                error!(client_id = client.id, "Offer revision failed: {e}");
                self.deps
                    .chat
                    .send_text(&client.address, APOLOGY_GENERATION)
                    .await?;
                return Ok(true);
            }
        };

        if self.deps.db.update_item_draft(item.id, &revised).await? {
            let mut refreshed = item.clone();
            refreshed.draft_text = revised;
            self.send_preview(client, &refreshed, true).await?;
        } else {
            debug!(item_id = item.id, "Offer left awaiting_edit before revision landed");
        }
        Ok(true)
    }

    /// Claim an inbound image for the offer awaiting its photo.
    pub async fn claim_photo(&self, client: &Client, media_id: &str) -> Result<bool> {
        let Some(item) = self
            .deps
            .db
            .find_item_in_status(client.id, ItemKind::Offer, ItemStatus::AwaitingPhoto)
            .await?
        else {
            return Ok(false);
        };

        self.photo.run(client, &item, media_id).await?;
        Ok(true)
    }

    async fn send_preview(&self, client: &Client, item: &WorkflowItem, revised: bool) -> Result<()> {
        let lead = if revised {
            "Here's your updated offer post:"
        } else {
            "Here's your offer post:"
        };
        let body = format!(
            "{lead}\n\n\"{}\"\n\nOffer valid until: {}\nCall-to-action: Call Now",
            draft_preview(&item.draft_text),
            self.end_date(item).format("%d %B %Y"),
        );
        let buttons = [
            Button::new(
                ActionId::new(ItemKind::Offer, ActionVerb::Approve, item.id).to_string(),
                "Post It",
            ),
            Button::new(
                ActionId::new(ItemKind::Offer, ActionVerb::Edit, item.id).to_string(),
                "Edit",
            ),
            Button::new(
                ActionId::new(ItemKind::Offer, ActionVerb::Skip, item.id).to_string(),
                "Skip",
            ),
        ];
        self.deps
            .chat
            .send_buttons(&client.address, &body, &buttons)
            .await?;
        Ok(())
    }

    async fn send_photo_prompt(&self, client: &Client, item_id: i64) -> Result<()> {
        let body = "Great. Want to add a photo? Send one now, or publish without it.";
        let buttons = [
            Button::new(
                ActionId::new(ItemKind::Offer, ActionVerb::PhotoSkip, item_id).to_string(),
                "No Photo",
            ),
            Button::new(
                ActionId::new(ItemKind::Offer, ActionVerb::Skip, item_id).to_string(),
                "Skip",
            ),
        ];
        self.deps
            .chat
            .send_buttons(&client.address, body, &buttons)
            .await?;
        Ok(())
    }

    async fn publish_without_photo(&self, client: &Client, item: &WorkflowItem) -> Result<()> {
        // Claim before publishing: losing the transition means another
        // dispatch already took this item.
        if !transition_guarded(
            &self.deps.db,
            item,
            ItemStatus::AwaitingPhoto,
            item.approval_status(),
        )
        .await?
        {
            debug!(item_id = item.id, "Stale publish claim on offer");
            return Ok(());
        }

        let cta = item.cta_type.as_deref().unwrap_or("CALL");
        match self
            .deps
            .listing
            .publish_offer(client, item.publish_text(), self.end_date(item), cta)
            .await
        {
            Ok(remote_ref) => {
                self.deps.db.set_item_remote_ref(item.id, &remote_ref).await?;
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::OfferPublished,
                        ActivityStatus::Success,
                        Some(json!({ "item_id": item.id, "remote_ref": remote_ref })),
                        None,
                    )
                    .await?;
                self.menu
                    .confirmation_with_menu(client, "Your offer has been posted to Google Maps!")
                    .await?;
            }
            Err(e) => {
                error!(client_id = client.id, item_id = item.id, "Offer publish failed: {e}");
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::OfferPublished,
                        ActivityStatus::Failed,
                        Some(json!({ "item_id": item.id })),
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

    fn end_date(&self, item: &WorkflowItem) -> DateTime<Utc> {
        item.offer_end_date
            .unwrap_or_else(|| Utc::now() + Duration::days(self.deps.config.offer_duration_days))
    }
}
