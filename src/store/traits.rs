//! Unified `Database` trait — single async interface for all persistence.
//!
//! The durable store is the only source of truth between events: no
//! in-memory workflow state survives a dispatch, so every guard the router
//! and engines rely on (event uniqueness, one active item per kind, status
//! transitions) is enforced here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::store::model::{
    ActivityKind, ActivityRecord, ActivityStatus, Client, IntentKind, ItemKind, ItemStatus,
    NewClient, NewWorkflowItem, WorkflowItem,
};

/// Backend-agnostic database trait covering clients, workflow items, the
/// processed-event ledger, armed intents, activity records, and job leases.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Processed-event ledger ──────────────────────────────────────

    /// Record an inbound event id if it has not been seen before.
    ///
    /// Returns `true` when the id was new and is now durably recorded.
    /// A uniqueness violation (the id raced or replayed) returns
    /// `Ok(false)`, never an error.
    async fn record_event_if_new(&self, event_id: &str) -> Result<bool, DatabaseError>;

    // ── Clients ─────────────────────────────────────────────────────

    /// Insert a new client account.
    async fn insert_client(&self, client: &NewClient) -> Result<Client, DatabaseError>;

    /// Look up a client by conversation address (normalized to digits).
    async fn find_client_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Client>, DatabaseError>;

    /// All clients with `active` status.
    async fn list_active_clients(&self) -> Result<Vec<Client>, DatabaseError>;

    // ── Workflow items ──────────────────────────────────────────────

    /// Insert a new workflow item. Fails with a constraint error when an
    /// active item of the same kind already exists for the client.
    async fn insert_item(&self, item: &NewWorkflowItem) -> Result<WorkflowItem, DatabaseError>;

    /// Get an item by id.
    async fn get_item(&self, id: i64) -> Result<Option<WorkflowItem>, DatabaseError>;

    /// The client's item of the given kind in exactly this status, if any.
    async fn find_item_in_status(
        &self,
        client_id: i64,
        kind: ItemKind,
        status: ItemStatus,
    ) -> Result<Option<WorkflowItem>, DatabaseError>;

    /// The client's non-terminal item of the given kind, if any.
    async fn find_active_item(
        &self,
        client_id: i64,
        kind: ItemKind,
    ) -> Result<Option<WorkflowItem>, DatabaseError>;

    /// Look up a review item by its external review identifier.
    async fn find_item_by_review_ref(
        &self,
        review_ref: &str,
    ) -> Result<Option<WorkflowItem>, DatabaseError>;

    /// Move an item from `from` to `to`.
    ///
    /// The transition is guarded in storage: it only applies while the item
    /// is still in `from`. Returns `false` when the guard failed (stale
    /// claim), which callers treat as a silent no-op.
    async fn transition_item(
        &self,
        id: i64,
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<bool, DatabaseError>;

    /// Replace the draft of an `awaiting_edit` item and return it to
    /// `pending`, bumping the revision count. Returns `false` when the
    /// item is no longer awaiting an edit.
    async fn update_item_draft(&self, id: i64, draft: &str) -> Result<bool, DatabaseError>;

    /// Store the user's override / final custom text.
    ///
    /// Guarded like a transition: the write only applies while the item is
    /// still `awaiting_custom_reply`, so a settled item stays immutable.
    /// Returns `false` when the guard failed.
    async fn set_item_custom_text(&self, id: i64, text: &str) -> Result<bool, DatabaseError>;

    /// Store the remote identifier returned by a publish call.
    async fn set_item_remote_ref(&self, id: i64, remote_ref: &str)
    -> Result<(), DatabaseError>;

    /// Mark any active item of the given kind `skipped` so a new one can
    /// be started. Returns the number of items superseded (0 or 1 under
    /// the partial unique index).
    async fn supersede_active_item(
        &self,
        client_id: i64,
        kind: ItemKind,
    ) -> Result<usize, DatabaseError>;

    /// Expire every active item whose deadline has passed.
    ///
    /// Idempotent: a second sweep over the same state expires nothing.
    async fn expire_due_items(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError>;

    // ── Activity log ────────────────────────────────────────────────

    /// Append an immutable audit record.
    async fn insert_activity(
        &self,
        client_id: i64,
        kind: ActivityKind,
        status: ActivityStatus,
        detail: Option<serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Activity records for a client since the given time, newest first.
    async fn list_activity_since(
        &self,
        client_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, DatabaseError>;

    // ── Armed intents ───────────────────────────────────────────────

    /// Arm (or re-arm) the client's next-message intent.
    async fn arm_intent(&self, client_id: i64, intent: IntentKind) -> Result<(), DatabaseError>;

    /// Consume the client's armed intent, removing it. Returns `None`
    /// when nothing was armed.
    async fn take_intent(&self, client_id: i64) -> Result<Option<IntentKind>, DatabaseError>;

    // ── Job leases ──────────────────────────────────────────────────

    /// Atomically acquire the named job lease for `ttl_secs`.
    ///
    /// Succeeds when no lease exists or the existing one has expired.
    /// Returns `false` when another holder still owns an unexpired lease.
    async fn acquire_job_lease(
        &self,
        name: &str,
        holder: &str,
        ttl_secs: i64,
    ) -> Result<bool, DatabaseError>;

    /// Release the named lease if still held by `holder`.
    async fn release_job_lease(&self, name: &str, holder: &str) -> Result<(), DatabaseError>;
}
