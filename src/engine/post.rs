//! Post workflow — brief to draft to approval to published listing post.
//!
//! Approving a pending post first offers a photo step: the user can send a
//! photo (published through the photo pipeline) or publish text-only.

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

const STALE_ITEM_TEXT: &str = "This post is no longer pending.";

/// The post workflow engine.
pub struct PostEngine {
    deps: Deps,
    menu: MenuFlow,
    photo: PhotoPipeline,
}

impl PostEngine {
    pub fn new(deps: Deps) -> Self {
        Self {
            menu: MenuFlow::new(deps.clone()),
            photo: PhotoPipeline::new(deps.clone()),
            deps,
        }
    }

    /// Start a new post from the user's brief.
    ///
    /// Any still-active post is superseded: the newest brief always wins.
    pub async fn start(&self, client: &Client, brief: &str) -> Result<()> {
        let superseded = self
            .deps
            .db
            .supersede_active_item(client.id, ItemKind::Post)
            .await?;
        if superseded > 0 {
            info!(client_id = client.id, superseded, "Superseded active post");
        }

        let context = BusinessContext::from(client);
        let draft = match self.deps.generator.draft_post(&context, brief).await {
            Ok(draft) => draft,
            Err(e) => {
                error!(client_id = client.id, "Post draft generation failed: {e}");
                self.deps
                    .chat
                    .send_text(&client.address, APOLOGY_GENERATION)
                    .await?;
                return Ok(());
            }
        };

        let item =
            insert_superseding(&self.deps.db, &NewWorkflowItem::post(client.id, brief, &draft))
                .await?;
        self.send_preview(client, item.id, &item.draft_text, false)
            .await
    }

    /// Handle a decision button for a post item.
    pub async fn claim_decision(&self, client: &Client, action: ActionId) -> Result<()> {
        let Some(item) = self.deps.db.get_item(action.item_id).await? else {
            self.deps
                .chat
                .send_text(&client.address, STALE_ITEM_TEXT)
                .await?;
            return Ok(());
        };
        if item.client_id != client.id || item.kind != ItemKind::Post {
            warn!(
                client_id = client.id,
                item_id = item.id,
                "Post action does not match item"
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
                        debug!(item_id = item.id, "Stale approve on post");
                    }
                }
                ItemStatus::AwaitingPhoto => self.publish_without_photo(client, &item).await?,
                status => debug!(item_id = item.id, %status, "Approve on settled post"),
            },
            ActionVerb::PhotoSkip => {
                if item.status == ItemStatus::AwaitingPhoto {
                    self.publish_without_photo(client, &item).await?;
                } else {
                    debug!(item_id = item.id, status = %item.status, "Photo-skip on settled post");
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
                    debug!(item_id = item.id, "Stale edit on post");
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
                    debug!(item_id = item.id, "Stale skip on post");
                }
            }
        }
        Ok(())
    }

    /// Claim a free-text message as edit feedback for the awaiting post.
    ///
    /// Returns `false` when no post is awaiting an edit, so the router can
    /// try the next claimant.
    pub async fn claim_edit_feedback(&self, client: &Client, feedback: &str) -> Result<bool> {
        let Some(item) = self
            .deps
            .db
            .find_item_in_status(client.id, ItemKind::Post, ItemStatus::AwaitingEdit)
            .await?
        else {
            return Ok(false);
        };

        let context = BusinessContext::from(client);
        let revised = match self
            .deps
            .generator
            .revise_draft(&context, ItemKind::Post, &item.draft_text, feedback)
            .await
        {
            Ok(revised) => revised,
            Err(e) => {
                error!(client_id = client.id, "Post revision failed: {e}");
                self.deps
                    .chat
                    .send_text(&client.address, APOLOGY_GENERATION)
                    .await?;
                return Ok(true);
            }
        };

        if self.deps.db.update_item_draft(item.id, &revised).await? {
            self.send_preview(client, item.id, &revised, true).await?;
        } else {
            debug!(item_id = item.id, "Post left awaiting_edit before revision landed");
        }
        Ok(true)
    }

    /// Claim an inbound image for the post awaiting its photo.
    pub async fn claim_photo(&self, client: &Client, media_id: &str) -> Result<bool> {
        let Some(item) = self
            .deps
            .db
            .find_item_in_status(client.id, ItemKind::Post, ItemStatus::AwaitingPhoto)
            .await?
        else {
            return Ok(false);
        };

        self.photo.run(client, &item, media_id).await?;
        Ok(true)
    }

    async fn send_preview(
        &self,
        client: &Client,
        item_id: i64,
        draft: &str,
        revised: bool,
    ) -> Result<()> {
        let lead = if revised {
            "Here's your updated post:"
        } else {
            "Here's your post:"
        };
        let body = format!("{lead}\n\n\"{}\"", draft_preview(draft));
        let buttons = [
            Button::new(
                ActionId::new(ItemKind::Post, ActionVerb::Approve, item_id).to_string(),
                "Post It",
            ),
            Button::new(
                ActionId::new(ItemKind::Post, ActionVerb::Edit, item_id).to_string(),
                "Edit",
            ),
            Button::new(
                ActionId::new(ItemKind::Post, ActionVerb::Skip, item_id).to_string(),
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
        let body = "Great. Want to add a photo of the job? Send one now, or publish without it.";
        let buttons = [
            Button::new(
                ActionId::new(ItemKind::Post, ActionVerb::PhotoSkip, item_id).to_string(),
                "No Photo",
            ),
            Button::new(
                ActionId::new(ItemKind::Post, ActionVerb::Skip, item_id).to_string(),
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
            debug!(item_id = item.id, "Stale publish claim on post");
            return Ok(());
        }

        match self
            .deps
            .listing
            .publish_text(client, item.publish_text())
            .await
        {
            Ok(remote_ref) => {
                self.deps.db.set_item_remote_ref(item.id, &remote_ref).await?;
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::PostPublished,
                        ActivityStatus::Success,
                        Some(json!({ "item_id": item.id, "remote_ref": remote_ref })),
                        None,
                    )
                    .await?;
                self.menu
                    .confirmation_with_menu(client, "Your post is now live on Google Maps!")
                    .await?;
            }
            Err(e) => {
                error!(client_id = client.id, item_id = item.id, "Post publish failed: {e}");
                self.deps
                    .db
                    .insert_activity(
                        client.id,
                        ActivityKind::PostPublished,
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
}
