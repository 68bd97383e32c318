//! Event router — dedupe, identity resolution, and the priority claim
//! chain.
//!
//! Every verified inbound event passes through here exactly once. The
//! router is the only place that decides *which* workflow a message
//! belongs to; engines decide what to do with it. Free-text messages are
//! offered to claimants in priority order: post edit feedback, offer edit
//! feedback, pending custom review reply, affirmative shortcut, armed
//! intent, and finally the main menu.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::action::{ActionId, ActionVerb};
use crate::engine::{Deps, MenuFlow, OfferEngine, PhotoPipeline, PostEngine, ReviewEngine};
use crate::error::Result;
use crate::store::Database;
use crate::store::model::{Client, ClientStatus, IntentKind, ItemKind};
use crate::webhook::event::{EventBody, InboundEvent};

/// The inbound-event router.
pub struct EventRouter {
    db: Arc<dyn Database>,
    post: PostEngine,
    offer: OfferEngine,
    review: ReviewEngine,
    photo: PhotoPipeline,
    menu: MenuFlow,
}

impl EventRouter {
    pub fn new(deps: Deps) -> Self {
        Self {
            db: deps.db.clone(),
            post: PostEngine::new(deps.clone()),
            offer: OfferEngine::new(deps.clone()),
            review: ReviewEngine::new(deps.clone()),
            photo: PhotoPipeline::new(deps.clone()),
            menu: MenuFlow::new(deps),
        }
    }

    /// Route one event. Never panics and never propagates engine errors;
    /// the webhook has already acknowledged the delivery.
    pub async fn dispatch(&self, event: InboundEvent) {
        let event_id = event.event_id.clone();
        if let Err(e) = self.dispatch_inner(event).await {
            error!(event_id, "Dispatch failed: {e}");
        }
    }

    async fn dispatch_inner(&self, event: InboundEvent) -> Result<()> {
        // Dedupe before any side effect: the ledger insert is the claim.
        if !self.db.record_event_if_new(&event.event_id).await? {
            debug!(event_id = event.event_id, "Duplicate event ignored");
            return Ok(());
        }

        let address = normalize_address(&event.from);
        let Some(client) = self.db.find_client_by_address(&address).await? else {
            info!(%address, "Message from unknown sender ignored");
            return Ok(());
        };
        if client.status != ClientStatus::Active {
            info!(client_id = client.id, status = %client.status, "Inactive client ignored");
            return Ok(());
        }

        match event.body {
            EventBody::Text(text) => self.dispatch_text(&client, text.trim()).await,
            EventBody::Button { id } => self.dispatch_action(&client, &id).await,
            EventBody::List { id } => {
                // A selection replaces whatever intent was armed before.
                self.db.take_intent(client.id).await?;
                self.menu.handle_selection(&client, &id).await
            }
            EventBody::Image { media_id, caption } => {
                self.dispatch_image(&client, &media_id, caption.as_deref())
                    .await
            }
        }
    }

    async fn dispatch_text(&self, client: &Client, text: &str) -> Result<()> {
        if text.is_empty() {
            return self.menu.send_main_menu(client).await;
        }

        // Priority order: an in-flight edit always outranks starting
        // something new.
        if self.post.claim_edit_feedback(client, text).await? {
            return Ok(());
        }
        if self.offer.claim_edit_feedback(client, text).await? {
            return Ok(());
        }
        if self.review.claim_custom_reply(client, text).await? {
            return Ok(());
        }

        if is_affirmative(text) {
            if let Some(action) = self.newest_approvable(client).await? {
                return self.route_action(client, action).await;
            }
        }

        if let Some(intent) = self.db.take_intent(client.id).await? {
            return match intent {
                IntentKind::PostBrief => self.post.start(client, text).await,
                IntentKind::OfferBrief => self.offer.start(client, text).await,
            };
        }

        self.menu.send_main_menu(client).await
    }

    async fn dispatch_action(&self, client: &Client, id: &str) -> Result<()> {
        // A button press abandons any armed intent.
        self.db.take_intent(client.id).await?;

        match id.parse::<ActionId>() {
            Ok(action) => self.route_action(client, action).await,
            Err(e) => {
                warn!(client_id = client.id, id, "Unroutable button id: {e}");
                self.menu.send_main_menu(client).await
            }
        }
    }

    async fn route_action(&self, client: &Client, action: ActionId) -> Result<()> {
        match action.kind {
            ItemKind::Post => self.post.claim_decision(client, action).await,
            ItemKind::Offer => self.offer.claim_decision(client, action).await,
            ItemKind::Review => self.review.claim_decision(client, action).await,
        }
    }

    async fn dispatch_image(
        &self,
        client: &Client,
        media_id: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        self.db.take_intent(client.id).await?;

        if self.post.claim_photo(client, media_id).await? {
            return Ok(());
        }
        if self.offer.claim_photo(client, media_id).await? {
            return Ok(());
        }
        // No item waiting: the photo itself is the content.
        info!(client_id = client.id, "Publishing standalone photo");
        self.photo.publish_standalone(client, media_id, caption).await
    }

    /// The newest active item an affirmative message could approve.
    async fn newest_approvable(&self, client: &Client) -> Result<Option<ActionId>> {
        let mut newest: Option<(ItemKind, i64, chrono::DateTime<chrono::Utc>)> = None;
        for kind in [ItemKind::Post, ItemKind::Offer, ItemKind::Review] {
            if let Some(item) = self.db.find_active_item(client.id, kind).await? {
                let candidate = (kind, item.id, item.updated_at);
                if newest.as_ref().is_none_or(|(_, _, at)| candidate.2 > *at) {
                    newest = Some(candidate);
                }
            }
        }
        Ok(newest.map(|(kind, id, _)| ActionId::new(kind, ActionVerb::Approve, id)))
    }
}

/// Normalize a sender address to digits only.
///
/// Transports report the same number in several shapes ("+353 87...",
/// "353-87...", "0035387..."); clients are stored and matched digits-only.
pub fn normalize_address(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Whether a short free-text message reads as approval of the pending item.
fn is_affirmative(text: &str) -> bool {
    const AFFIRMATIVES: [&str; 9] = [
        "yes",
        "ok",
        "okay",
        "sure",
        "approve",
        "publish",
        "go ahead",
        "post it",
        "send it",
    ];
    let normalized = text
        .trim()
        .trim_end_matches(['!', '.', '?'])
        .to_lowercase();
    AFFIRMATIVES.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_everything_but_digits() {
        assert_eq!(normalize_address("+353 87 123 4567"), "353871234567");
        assert_eq!(normalize_address("353-87-123-4567"), "353871234567");
        assert_eq!(normalize_address("353871234567"), "353871234567");
        assert_eq!(normalize_address("no digits"), "");
    }

    #[test]
    fn affirmative_matches_known_phrases() {
        for text in ["yes", "Yes!", "OK", "okay.", "Post it", "go ahead", "PUBLISH"] {
            assert!(is_affirmative(text), "{text} should be affirmative");
        }
    }

    #[test]
    fn affirmative_rejects_longer_messages() {
        for text in [
            "yes but change the ending",
            "finished a rewire today",
            "no",
            "",
            "okay here is my reply to the customer",
        ] {
            assert!(!is_affirmative(text), "{text} should not be affirmative");
        }
    }
}
