//! Domain model — clients, workflow items, statuses, audit records.
//!
//! A workflow item is one in-flight conversational transaction (a draft
//! post, a draft offer, or a pending review reply). Items move through a
//! kind-scoped state machine and become immutable at a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activation status of a client account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Paused,
    Onboarding,
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Onboarding => "onboarding",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ClientStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "onboarding" => Ok(Self::Onboarding),
            _ => Err(format!("Unknown client status: {}", s)),
        }
    }
}

/// Which workflow a item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Offer,
    Review,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Post => "post",
            Self::Offer => "offer",
            Self::Review => "review",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Self::Post),
            "offer" => Ok(Self::Offer),
            "review" => Ok(Self::Review),
            _ => Err(format!("Unknown item kind: {}", s)),
        }
    }
}

/// Status of a workflow item.
///
/// Post/offer items: `pending → awaiting_photo | awaiting_edit | approved |
/// edited | skipped`, with `awaiting_edit → pending` when a revised draft
/// is generated. Review items: `pending → approved | rejected |
/// awaiting_custom_reply → custom_reply`. Any active item with a deadline
/// can expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    AwaitingPhoto,
    AwaitingEdit,
    AwaitingCustomReply,
    Approved,
    Edited,
    Skipped,
    Rejected,
    CustomReply,
    Expired,
}

impl ItemStatus {
    /// Whether no further transition can occur from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved
                | Self::Edited
                | Self::Skipped
                | Self::Rejected
                | Self::CustomReply
                | Self::Expired
        )
    }

    /// Whether the item is still in flight.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if a transition from `self` to `target` is valid for `kind`.
    pub fn can_transition_to(&self, kind: ItemKind, target: ItemStatus) -> bool {
        use ItemStatus::*;
        // Expiry applies to any active status, regardless of kind.
        if target == Expired {
            return self.is_active();
        }
        match kind {
            ItemKind::Post | ItemKind::Offer => matches!(
                (self, target),
                (Pending, AwaitingPhoto)
                    | (Pending, AwaitingEdit)
                    | (Pending, Approved)
                    | (Pending, Edited)
                    | (Pending, Skipped)
                    | (AwaitingPhoto, Approved)
                    | (AwaitingPhoto, Edited)
                    | (AwaitingPhoto, Skipped)
                    | (AwaitingEdit, Pending)
                    | (AwaitingEdit, Skipped)
            ),
            ItemKind::Review => matches!(
                (self, target),
                (Pending, Approved)
                    | (Pending, Rejected)
                    | (Pending, AwaitingCustomReply)
                    | (AwaitingCustomReply, CustomReply)
                    | (AwaitingCustomReply, Rejected)
            ),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::AwaitingPhoto => "awaiting_photo",
            Self::AwaitingEdit => "awaiting_edit",
            Self::AwaitingCustomReply => "awaiting_custom_reply",
            Self::Approved => "approved",
            Self::Edited => "edited",
            Self::Skipped => "skipped",
            Self::Rejected => "rejected",
            Self::CustomReply => "custom_reply",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting_photo" => Ok(Self::AwaitingPhoto),
            "awaiting_edit" => Ok(Self::AwaitingEdit),
            "awaiting_custom_reply" => Ok(Self::AwaitingCustomReply),
            "approved" => Ok(Self::Approved),
            "edited" => Ok(Self::Edited),
            "skipped" => Ok(Self::Skipped),
            "rejected" => Ok(Self::Rejected),
            "custom_reply" => Ok(Self::CustomReply),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown item status: {}", s)),
        }
    }
}

/// A business account owning workflow items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    /// Normalized conversation address (digits only).
    pub address: String,
    pub status: ClientStatus,
    pub business_name: String,
    pub trade_type: String,
    pub county: String,
    /// Listing platform account reference.
    pub listing_account_id: Option<String>,
    /// Listing platform location reference.
    pub listing_location_id: Option<String>,
    /// Public place reference used for the review link.
    pub place_id: Option<String>,
    /// Static-site repository ("owner/repo"); photo pages are skipped when unset.
    pub site_repo: Option<String>,
    /// Short business summary used to parametrize generated text.
    pub site_summary: Option<String>,
    pub service_areas: Vec<String>,
    pub services: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Listing location reference pair, when both halves are configured.
    pub fn listing_refs(&self) -> Option<(&str, &str)> {
        match (&self.listing_account_id, &self.listing_location_id) {
            (Some(account), Some(location)) => Some((account.as_str(), location.as_str())),
            _ => None,
        }
    }
}

/// Insert payload for a new client account.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub address: String,
    pub status: ClientStatus,
    pub business_name: String,
    pub trade_type: String,
    pub county: String,
    pub listing_account_id: Option<String>,
    pub listing_location_id: Option<String>,
    pub place_id: Option<String>,
    pub site_repo: Option<String>,
    pub site_summary: Option<String>,
    pub service_areas: Vec<String>,
    pub services: Vec<String>,
}

/// One in-flight conversational transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowItem {
    pub id: i64,
    pub client_id: i64,
    pub kind: ItemKind,
    pub status: ItemStatus,
    /// The brief from the user, or the review text.
    pub source_text: String,
    /// The AI-suggested text.
    pub draft_text: String,
    /// User override / final custom reply.
    pub custom_text: Option<String>,
    /// External review identifier (reviews only, unique when present).
    pub review_ref: Option<String>,
    pub reviewer_name: Option<String>,
    pub rating: Option<u8>,
    /// Offer validity end (offers only).
    pub offer_end_date: Option<DateTime<Utc>>,
    /// Offer call-to-action selector (offers only).
    pub cta_type: Option<String>,
    /// Identifier returned by the publish call, once published.
    pub remote_ref: Option<String>,
    /// How many times the draft was regenerated from edit feedback.
    pub revision_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowItem {
    /// Terminal status an approval should land on: `edited` when the
    /// draft went through at least one feedback revision, else `approved`.
    pub fn approval_status(&self) -> ItemStatus {
        if self.revision_count > 0 {
            ItemStatus::Edited
        } else {
            ItemStatus::Approved
        }
    }

    /// Text to publish: the user override when present, else the draft.
    pub fn publish_text(&self) -> &str {
        self.custom_text.as_deref().unwrap_or(&self.draft_text)
    }
}

/// Insert payload for a new workflow item.
#[derive(Debug, Clone)]
pub struct NewWorkflowItem {
    pub client_id: i64,
    pub kind: ItemKind,
    pub status: ItemStatus,
    pub source_text: String,
    pub draft_text: String,
    pub review_ref: Option<String>,
    pub reviewer_name: Option<String>,
    pub rating: Option<u8>,
    pub offer_end_date: Option<DateTime<Utc>>,
    pub cta_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewWorkflowItem {
    /// A post draft awaiting a decision.
    pub fn post(client_id: i64, brief: impl Into<String>, draft: impl Into<String>) -> Self {
        Self {
            client_id,
            kind: ItemKind::Post,
            status: ItemStatus::Pending,
            source_text: brief.into(),
            draft_text: draft.into(),
            review_ref: None,
            reviewer_name: None,
            rating: None,
            offer_end_date: None,
            cta_type: None,
            expires_at: None,
        }
    }

    /// An offer draft awaiting a decision.
    pub fn offer(
        client_id: i64,
        brief: impl Into<String>,
        draft: impl Into<String>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id,
            kind: ItemKind::Offer,
            status: ItemStatus::Pending,
            source_text: brief.into(),
            draft_text: draft.into(),
            review_ref: None,
            reviewer_name: None,
            rating: None,
            offer_end_date: Some(end_date),
            cta_type: Some("CALL".to_string()),
            expires_at: None,
        }
    }

    /// A review reply awaiting a decision.
    pub fn review(
        client_id: i64,
        review_ref: impl Into<String>,
        review_text: impl Into<String>,
        reviewer_name: impl Into<String>,
        rating: u8,
        suggested_reply: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id,
            kind: ItemKind::Review,
            status: ItemStatus::Pending,
            source_text: review_text.into(),
            draft_text: suggested_reply.into(),
            review_ref: Some(review_ref.into()),
            reviewer_name: Some(reviewer_name.into()),
            rating: Some(rating),
            offer_end_date: None,
            cta_type: None,
            expires_at: Some(expires_at),
        }
    }
}

/// Kind of audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PostPublished,
    OfferPublished,
    PhotoPublished,
    ReviewAlert,
    ReviewReplied,
    DigestSent,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PostPublished => "post_published",
            Self::OfferPublished => "offer_published",
            Self::PhotoPublished => "photo_published",
            Self::ReviewAlert => "review_alert",
            Self::ReviewReplied => "review_replied",
            Self::DigestSent => "digest_sent",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post_published" => Ok(Self::PostPublished),
            "offer_published" => Ok(Self::OfferPublished),
            "photo_published" => Ok(Self::PhotoPublished),
            "review_alert" => Ok(Self::ReviewAlert),
            "review_replied" => Ok(Self::ReviewReplied),
            "digest_sent" => Ok(Self::DigestSent),
            _ => Err(format!("Unknown activity kind: {}", s)),
        }
    }
}

/// Outcome recorded on an activity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Success,
    Failed,
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ActivityStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown activity status: {}", s)),
        }
    }
}

/// Immutable audit log entry, written once per completed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub client_id: i64,
    pub kind: ActivityKind,
    pub status: ActivityStatus,
    pub detail: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What the next free-text message from a client should start.
///
/// Armed by a menu selection, disarmed by the message that consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    PostBrief,
    OfferBrief,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostBrief => write!(f, "post_brief"),
            Self::OfferBrief => write!(f, "offer_brief"),
        }
    }
}

impl std::str::FromStr for IntentKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post_brief" => Ok(Self::PostBrief),
            "offer_brief" => Ok(Self::OfferBrief),
            _ => Err(format!("Unknown intent kind: {}", s)),
        }
    }
}

/// An armed per-conversation intent.
#[derive(Debug, Clone)]
pub struct ArmedIntent {
    pub client_id: i64,
    pub intent: IntentKind,
    pub armed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn post_transitions() {
        use ItemStatus::*;
        let valid = [
            (Pending, AwaitingPhoto),
            (Pending, AwaitingEdit),
            (Pending, Approved),
            (Pending, Edited),
            (Pending, Skipped),
            (AwaitingPhoto, Approved),
            (AwaitingPhoto, Skipped),
            (AwaitingEdit, Pending),
            (AwaitingEdit, Skipped),
        ];
        for (from, to) in valid {
            assert!(
                from.can_transition_to(ItemKind::Post, to),
                "{from} should transition to {to}"
            );
        }

        assert!(!Approved.can_transition_to(ItemKind::Post, Pending));
        assert!(!Skipped.can_transition_to(ItemKind::Post, Approved));
        assert!(!Pending.can_transition_to(ItemKind::Post, CustomReply));
        assert!(!Pending.can_transition_to(ItemKind::Post, AwaitingCustomReply));
    }

    #[test]
    fn review_transitions() {
        use ItemStatus::*;
        assert!(Pending.can_transition_to(ItemKind::Review, Approved));
        assert!(Pending.can_transition_to(ItemKind::Review, Rejected));
        assert!(Pending.can_transition_to(ItemKind::Review, AwaitingCustomReply));
        assert!(AwaitingCustomReply.can_transition_to(ItemKind::Review, CustomReply));
        assert!(AwaitingCustomReply.can_transition_to(ItemKind::Review, Rejected));

        assert!(!Pending.can_transition_to(ItemKind::Review, AwaitingPhoto));
        assert!(!Pending.can_transition_to(ItemKind::Review, AwaitingEdit));
        assert!(!Approved.can_transition_to(ItemKind::Review, Pending));
        assert!(!CustomReply.can_transition_to(ItemKind::Review, Approved));
    }

    #[test]
    fn any_active_status_can_expire() {
        use ItemStatus::*;
        for kind in [ItemKind::Post, ItemKind::Offer, ItemKind::Review] {
            assert!(Pending.can_transition_to(kind, Expired));
            assert!(AwaitingEdit.can_transition_to(kind, Expired));
            assert!(AwaitingCustomReply.can_transition_to(kind, Expired));
            assert!(!Approved.can_transition_to(kind, Expired));
            assert!(!Expired.can_transition_to(kind, Expired));
        }
    }

    #[test]
    fn terminal_set() {
        use ItemStatus::*;
        for status in [Approved, Edited, Skipped, Rejected, CustomReply, Expired] {
            assert!(status.is_terminal(), "{status} should be terminal");
            assert!(!status.is_active());
        }
        for status in [Pending, AwaitingPhoto, AwaitingEdit, AwaitingCustomReply] {
            assert!(status.is_active(), "{status} should be active");
        }
    }

    #[test]
    fn display_matches_serde() {
        use ItemStatus::*;
        for status in [
            Pending,
            AwaitingPhoto,
            AwaitingEdit,
            AwaitingCustomReply,
            Approved,
            Edited,
            Skipped,
            Rejected,
            CustomReply,
            Expired,
        ] {
            let display = format!("{status}");
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(format!("\"{display}\""), json);
            assert_eq!(ItemStatus::from_str(&display).unwrap(), status);
        }
    }

    #[test]
    fn kind_roundtrip() {
        for kind in [ItemKind::Post, ItemKind::Offer, ItemKind::Review] {
            assert_eq!(ItemKind::from_str(&kind.to_string()).unwrap(), kind);
        }
        assert!(ItemKind::from_str("poster").is_err());
    }

    #[test]
    fn approval_status_reflects_revisions() {
        let mut item = sample_item();
        assert_eq!(item.approval_status(), ItemStatus::Approved);
        item.revision_count = 2;
        assert_eq!(item.approval_status(), ItemStatus::Edited);
    }

    #[test]
    fn publish_text_prefers_custom() {
        let mut item = sample_item();
        assert_eq!(item.publish_text(), "draft");
        item.custom_text = Some("override".to_string());
        assert_eq!(item.publish_text(), "override");
    }

    #[test]
    fn new_offer_defaults_cta() {
        let item = NewWorkflowItem::offer(1, "10% off", "Offer text", Utc::now());
        assert_eq!(item.cta_type.as_deref(), Some("CALL"));
        assert!(item.offer_end_date.is_some());
    }

    fn sample_item() -> WorkflowItem {
        WorkflowItem {
            id: 1,
            client_id: 1,
            kind: ItemKind::Post,
            status: ItemStatus::Pending,
            source_text: "brief".to_string(),
            draft_text: "draft".to_string(),
            custom_text: None,
            review_ref: None,
            reviewer_name: None,
            rating: None,
            offer_end_date: None,
            cta_type: None,
            remote_ref: None,
            revision_count: 0,
            expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
