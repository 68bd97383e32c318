//! Workflow engines — one per conversational transaction kind, plus the
//! menu flow, photo pipeline and weekly digest.
//!
//! Engines own the full lifecycle of their items: starting a draft,
//! claiming decisions and free-text follow-ups, publishing, and auditing.
//! All state lives in the store; an engine holds no memory between events.

pub mod digest;
pub mod menu;
pub mod offer;
pub mod photo;
pub mod post;
pub mod review;

use std::sync::Arc;

use tracing::warn;

use crate::config::{Config, DRAFT_PREVIEW_MAX};
use crate::services::transport::truncate_preview;
use crate::services::{ChatTransport, DraftGenerator, ListingClient, SitePublisher};
use crate::store::Database;
use crate::store::model::{ItemStatus, WorkflowItem};

pub use digest::DigestSender;
pub use menu::MenuFlow;
pub use offer::OfferEngine;
pub use photo::PhotoPipeline;
pub use post::PostEngine;
pub use review::ReviewEngine;

/// Shared collaborators handed to every engine.
#[derive(Clone)]
pub struct Deps {
    pub db: Arc<dyn Database>,
    pub chat: Arc<dyn ChatTransport>,
    pub listing: Arc<dyn ListingClient>,
    pub generator: Arc<dyn DraftGenerator>,
    pub site: Arc<dyn SitePublisher>,
    pub config: Arc<Config>,
}

/// Draft preview shown in chat, truncated to the transport-safe length.
pub(crate) fn draft_preview(text: &str) -> String {
    truncate_preview(text, DRAFT_PREVIEW_MAX)
}

/// Insert a new item, superseding whatever active item raced in between.
///
/// The partial unique index rejects a second active item per (client,
/// kind); on that violation the stale one is marked skipped and the insert
/// retried once.
pub(crate) async fn insert_superseding(
    db: &Arc<dyn Database>,
    item: &crate::store::model::NewWorkflowItem,
) -> std::result::Result<crate::store::model::WorkflowItem, crate::error::DatabaseError> {
    match db.insert_item(item).await {
        Ok(inserted) => Ok(inserted),
        Err(e) if e.is_unique_violation() => {
            db.supersede_active_item(item.client_id, item.kind).await?;
            db.insert_item(item).await
        }
        Err(e) => Err(e),
    }
}

/// Move an item through the state machine.
///
/// Validates the `from`/`to` pair against the item's kind before touching
/// storage, then relies on the store's compare-and-set for the race. Both
/// an illegal pair and a stale claim come back as `false`.
pub(crate) async fn transition_guarded(
    db: &Arc<dyn Database>,
    item: &WorkflowItem,
    from: ItemStatus,
    to: ItemStatus,
) -> crate::error::Result<bool> {
    if !from.can_transition_to(item.kind, to) {
        warn!(item_id = item.id, kind = %item.kind, %from, %to, "Refusing invalid status transition");
        return Ok(false);
    }
    Ok(db.transition_item(item.id, from, to).await?)
}

pub(crate) const APOLOGY_GENERATION: &str =
    "Sorry, something went wrong while writing that draft. Please try again in a minute.";

pub(crate) const APOLOGY_PUBLISH: &str =
    "Sorry, something went wrong while publishing. We'll look into it.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::store::model::{ClientStatus, NewClient, NewWorkflowItem};

    #[tokio::test]
    async fn guarded_transition_refuses_invalid_pairs() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let client = db
            .insert_client(&NewClient {
                address: "353871234567".to_string(),
                status: ClientStatus::Active,
                business_name: "Murphy Electrical".to_string(),
                trade_type: "electrician".to_string(),
                county: "Kildare".to_string(),
                listing_account_id: None,
                listing_location_id: None,
                place_id: None,
                site_repo: None,
                site_summary: None,
                service_areas: vec![],
                services: vec![],
            })
            .await
            .unwrap();
        let item = db
            .insert_item(&NewWorkflowItem::post(client.id, "brief", "draft"))
            .await
            .unwrap();

        // A pair the post state machine never allows is refused without
        // touching the row.
        assert!(
            !transition_guarded(&db, &item, ItemStatus::Pending, ItemStatus::CustomReply)
                .await
                .unwrap()
        );
        let unchanged = db.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ItemStatus::Pending);

        assert!(
            transition_guarded(&db, &item, ItemStatus::Pending, ItemStatus::AwaitingPhoto)
                .await
                .unwrap()
        );
        let moved = db.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(moved.status, ItemStatus::AwaitingPhoto);
    }
}
