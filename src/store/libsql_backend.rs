//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 text so string comparison in SQL matches chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    ActivityKind, ActivityRecord, ActivityStatus, Client, ClientStatus, IntentKind, ItemKind,
    ItemStatus, NewClient, NewWorkflowItem, WorkflowItem,
};
use crate::store::traits::Database;

/// SQL fragment matching every non-terminal item status.
const ACTIVE_STATUSES_SQL: &str =
    "('pending', 'awaiting_photo', 'awaiting_edit', 'awaiting_custom_reply')";

const ITEM_COLUMNS: &str = "id, client_id, kind, status, source_text, draft_text, custom_text, \
     review_ref, reviewer_name, rating, offer_end_date, cta_type, remote_ref, revision_count, \
     expires_at, created_at, updated_at";

const CLIENT_COLUMNS: &str = "id, address, status, business_name, trade_type, county, \
     listing_account_id, listing_location_id, place_id, site_repo, site_summary, \
     service_areas, services, created_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn parse_string_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn query_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = format!("{op}: {e}");
    if msg.contains("UNIQUE constraint failed") || msg.contains("SQLITE_CONSTRAINT") {
        DatabaseError::Constraint(msg)
    } else {
        DatabaseError::Query(msg)
    }
}

/// Map a libsql row to a Client. Column order matches CLIENT_COLUMNS.
fn row_to_client(row: &libsql::Row) -> Result<Client, libsql::Error> {
    let status_str: String = row.get(2)?;
    let service_areas: String = row.get(11)?;
    let services: String = row.get(12)?;
    let created_str: String = row.get(13)?;

    Ok(Client {
        id: row.get(0)?,
        address: row.get(1)?,
        status: status_str.parse().unwrap_or(ClientStatus::Onboarding),
        business_name: row.get(3)?,
        trade_type: row.get(4)?,
        county: row.get(5)?,
        listing_account_id: row.get(6).ok(),
        listing_location_id: row.get(7).ok(),
        place_id: row.get(8).ok(),
        site_repo: row.get(9).ok(),
        site_summary: row.get(10).ok(),
        service_areas: parse_string_list(&service_areas),
        services: parse_string_list(&services),
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql row to a WorkflowItem. Column order matches ITEM_COLUMNS.
fn row_to_item(row: &libsql::Row) -> Result<WorkflowItem, libsql::Error> {
    let kind_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(15)?;
    let updated_str: String = row.get(16)?;

    Ok(WorkflowItem {
        id: row.get(0)?,
        client_id: row.get(1)?,
        kind: kind_str.parse().unwrap_or(ItemKind::Post),
        status: status_str.parse().unwrap_or(ItemStatus::Pending),
        source_text: row.get(4)?,
        draft_text: row.get(5)?,
        custom_text: row.get(6).ok(),
        review_ref: row.get(7).ok(),
        reviewer_name: row.get(8).ok(),
        rating: row.get::<i64>(9).ok().map(|r| r as u8),
        offer_end_date: parse_optional_datetime(row.get(10).ok()),
        cta_type: row.get(11).ok(),
        remote_ref: row.get(12).ok(),
        revision_count: row.get::<i64>(13).unwrap_or(0) as u32,
        expires_at: parse_optional_datetime(row.get(14).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql row to an ActivityRecord.
/// Column order: id, client_id, kind, status, detail, error, created_at.
fn row_to_activity(row: &libsql::Row) -> Result<ActivityRecord, libsql::Error> {
    let kind_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let detail_str: Option<String> = row.get(4).ok();
    let created_str: String = row.get(6)?;

    Ok(ActivityRecord {
        id: row.get(0)?,
        client_id: row.get(1)?,
        kind: kind_str.parse().unwrap_or(ActivityKind::PostPublished),
        status: status_str.parse().unwrap_or(ActivityStatus::Failed),
        detail: detail_str.and_then(|d| serde_json::from_str(&d).ok()),
        error: row.get(5).ok(),
        created_at: parse_datetime(&created_str),
    })
}

async fn fetch_one_item(
    conn: &Connection,
    op: &str,
    sql: String,
    params: impl libsql::params::IntoParams,
) -> Result<Option<WorkflowItem>, DatabaseError> {
    let mut rows = conn
        .query(&sql, params)
        .await
        .map_err(|e| query_err(op, e))?;

    match rows.next().await.map_err(|e| query_err(op, e))? {
        Some(row) => Ok(Some(row_to_item(&row).map_err(|e| query_err(op, e))?)),
        None => Ok(None),
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    // ── Processed-event ledger ──────────────────────────────────────

    async fn record_event_if_new(&self, event_id: &str) -> Result<bool, DatabaseError> {
        let result = self
            .conn()
            .execute(
                "INSERT INTO processed_events (event_id) VALUES (?1)",
                params![event_id],
            )
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = query_err("record_event_if_new", e);
                if err.is_unique_violation() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    // ── Clients ─────────────────────────────────────────────────────

    async fn insert_client(&self, client: &NewClient) -> Result<Client, DatabaseError> {
        let now = Utc::now();
        let service_areas = serde_json::to_string(&client.service_areas).unwrap_or_default();
        let services = serde_json::to_string(&client.services).unwrap_or_default();

        self.conn()
            .execute(
                "INSERT INTO clients (address, status, business_name, trade_type, county,
                     listing_account_id, listing_location_id, place_id, site_repo,
                     site_summary, service_areas, services, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    client.address.as_str(),
                    client.status.to_string(),
                    client.business_name.as_str(),
                    client.trade_type.as_str(),
                    client.county.as_str(),
                    client.listing_account_id.as_deref(),
                    client.listing_location_id.as_deref(),
                    client.place_id.as_deref(),
                    client.site_repo.as_deref(),
                    client.site_summary.as_deref(),
                    service_areas,
                    services,
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("insert_client", e))?;

        let id = self.conn().last_insert_rowid();
        Ok(Client {
            id,
            address: client.address.clone(),
            status: client.status,
            business_name: client.business_name.clone(),
            trade_type: client.trade_type.clone(),
            county: client.county.clone(),
            listing_account_id: client.listing_account_id.clone(),
            listing_location_id: client.listing_location_id.clone(),
            place_id: client.place_id.clone(),
            site_repo: client.site_repo.clone(),
            site_summary: client.site_summary.clone(),
            service_areas: client.service_areas.clone(),
            services: client.services.clone(),
            created_at: now,
        })
    }

    async fn find_client_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Client>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE address = ?1 LIMIT 1"),
                params![address],
            )
            .await
            .map_err(|e| query_err("find_client_by_address", e))?;

        match rows
            .next()
            .await
            .map_err(|e| query_err("find_client_by_address", e))?
        {
            Some(row) => Ok(Some(
                row_to_client(&row).map_err(|e| query_err("find_client_by_address", e))?,
            )),
            None => Ok(None),
        }
    }

    async fn list_active_clients(&self) -> Result<Vec<Client>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients WHERE status = 'active' ORDER BY id"
                ),
                (),
            )
            .await
            .map_err(|e| query_err("list_active_clients", e))?;

        let mut clients = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            clients.push(row_to_client(&row).map_err(|e| query_err("list_active_clients", e))?);
        }
        Ok(clients)
    }

    // ── Workflow items ──────────────────────────────────────────────

    async fn insert_item(&self, item: &NewWorkflowItem) -> Result<WorkflowItem, DatabaseError> {
        let now = Utc::now();

        self.conn()
            .execute(
                "INSERT INTO workflow_items (client_id, kind, status, source_text, draft_text,
                     review_ref, reviewer_name, rating, offer_end_date, cta_type, expires_at,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    item.client_id,
                    item.kind.to_string(),
                    item.status.to_string(),
                    item.source_text.as_str(),
                    item.draft_text.as_str(),
                    item.review_ref.as_deref(),
                    item.reviewer_name.as_deref(),
                    item.rating.map(|r| r as i64),
                    item.offer_end_date.map(|d| d.to_rfc3339()),
                    item.cta_type.as_deref(),
                    item.expires_at.map(|d| d.to_rfc3339()),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("insert_item", e))?;

        let id = self.conn().last_insert_rowid();
        Ok(WorkflowItem {
            id,
            client_id: item.client_id,
            kind: item.kind,
            status: item.status,
            source_text: item.source_text.clone(),
            draft_text: item.draft_text.clone(),
            custom_text: None,
            review_ref: item.review_ref.clone(),
            reviewer_name: item.reviewer_name.clone(),
            rating: item.rating,
            offer_end_date: item.offer_end_date,
            cta_type: item.cta_type.clone(),
            remote_ref: None,
            revision_count: 0,
            expires_at: item.expires_at,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_item(&self, id: i64) -> Result<Option<WorkflowItem>, DatabaseError> {
        fetch_one_item(
            self.conn(),
            "get_item",
            format!("SELECT {ITEM_COLUMNS} FROM workflow_items WHERE id = ?1"),
            params![id],
        )
        .await
    }

    async fn find_item_in_status(
        &self,
        client_id: i64,
        kind: ItemKind,
        status: ItemStatus,
    ) -> Result<Option<WorkflowItem>, DatabaseError> {
        fetch_one_item(
            self.conn(),
            "find_item_in_status",
            format!(
                "SELECT {ITEM_COLUMNS} FROM workflow_items
                 WHERE client_id = ?1 AND kind = ?2 AND status = ?3
                 ORDER BY id DESC LIMIT 1"
            ),
            params![client_id, kind.to_string(), status.to_string()],
        )
        .await
    }

    async fn find_active_item(
        &self,
        client_id: i64,
        kind: ItemKind,
    ) -> Result<Option<WorkflowItem>, DatabaseError> {
        fetch_one_item(
            self.conn(),
            "find_active_item",
            format!(
                "SELECT {ITEM_COLUMNS} FROM workflow_items
                 WHERE client_id = ?1 AND kind = ?2 AND status IN {ACTIVE_STATUSES_SQL}
                 ORDER BY id DESC LIMIT 1"
            ),
            params![client_id, kind.to_string()],
        )
        .await
    }

    async fn find_item_by_review_ref(
        &self,
        review_ref: &str,
    ) -> Result<Option<WorkflowItem>, DatabaseError> {
        fetch_one_item(
            self.conn(),
            "find_item_by_review_ref",
            format!("SELECT {ITEM_COLUMNS} FROM workflow_items WHERE review_ref = ?1 LIMIT 1"),
            params![review_ref],
        )
        .await
    }

    async fn transition_item(
        &self,
        id: i64,
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE workflow_items SET status = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = ?2",
                params![
                    id,
                    from.to_string(),
                    to.to_string(),
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| query_err("transition_item", e))?;
        Ok(changed > 0)
    }

    async fn update_item_draft(&self, id: i64, draft: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE workflow_items
                 SET draft_text = ?2, status = 'pending',
                     revision_count = revision_count + 1, updated_at = ?3
                 WHERE id = ?1 AND status = 'awaiting_edit'",
                params![id, draft, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("update_item_draft", e))?;
        Ok(changed > 0)
    }

    async fn set_item_custom_text(&self, id: i64, text: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE workflow_items SET custom_text = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'awaiting_custom_reply'",
                params![id, text, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("set_item_custom_text", e))?;
        Ok(changed > 0)
    }

    async fn set_item_remote_ref(
        &self,
        id: i64,
        remote_ref: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE workflow_items SET remote_ref = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, remote_ref, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("set_item_remote_ref", e))?;
        Ok(())
    }

    async fn supersede_active_item(
        &self,
        client_id: i64,
        kind: ItemKind,
    ) -> Result<usize, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE workflow_items SET status = 'skipped', updated_at = ?3
                     WHERE client_id = ?1 AND kind = ?2 AND status IN {ACTIVE_STATUSES_SQL}"
                ),
                params![client_id, kind.to_string(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("supersede_active_item", e))?;
        Ok(changed as usize)
    }

    async fn expire_due_items(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE workflow_items SET status = 'expired', updated_at = ?1
                     WHERE status IN {ACTIVE_STATUSES_SQL}
                       AND expires_at IS NOT NULL AND expires_at <= ?1"
                ),
                params![now.to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("expire_due_items", e))?;
        Ok(changed as usize)
    }

    // ── Activity log ────────────────────────────────────────────────

    async fn insert_activity(
        &self,
        client_id: i64,
        kind: ActivityKind,
        status: ActivityStatus,
        detail: Option<serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO activity_log (client_id, kind, status, detail, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    client_id,
                    kind.to_string(),
                    status.to_string(),
                    detail.map(|d| d.to_string()),
                    error,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| query_err("insert_activity", e))?;
        Ok(())
    }

    async fn list_activity_since(
        &self,
        client_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, client_id, kind, status, detail, error, created_at
                 FROM activity_log
                 WHERE client_id = ?1 AND created_at >= ?2
                 ORDER BY id DESC",
                params![client_id, since.to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("list_activity_since", e))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_activity(&row).map_err(|e| query_err("list_activity_since", e))?);
        }
        Ok(records)
    }

    // ── Armed intents ───────────────────────────────────────────────

    async fn arm_intent(&self, client_id: i64, intent: IntentKind) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO armed_intents (client_id, intent, armed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(client_id) DO UPDATE SET
                     intent = excluded.intent, armed_at = excluded.armed_at",
                params![client_id, intent.to_string(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("arm_intent", e))?;
        Ok(())
    }

    async fn take_intent(&self, client_id: i64) -> Result<Option<IntentKind>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "DELETE FROM armed_intents WHERE client_id = ?1 RETURNING intent",
                params![client_id],
            )
            .await
            .map_err(|e| query_err("take_intent", e))?;

        match rows.next().await.map_err(|e| query_err("take_intent", e))? {
            Some(row) => {
                let intent: String = row.get(0).map_err(|e| query_err("take_intent", e))?;
                Ok(intent.parse().ok())
            }
            None => Ok(None),
        }
    }

    // ── Job leases ──────────────────────────────────────────────────

    async fn acquire_job_lease(
        &self,
        name: &str,
        holder: &str,
        ttl_secs: i64,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(ttl_secs);

        // Insert, or take over only when the previous lease has expired.
        let changed = self
            .conn()
            .execute(
                "INSERT INTO job_leases (job_name, holder, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(job_name) DO UPDATE SET
                     holder = excluded.holder,
                     acquired_at = excluded.acquired_at,
                     expires_at = excluded.expires_at
                 WHERE job_leases.expires_at <= ?3",
                params![name, holder, now.to_rfc3339(), expires.to_rfc3339()],
            )
            .await
            .map_err(|e| query_err("acquire_job_lease", e))?;

        Ok(changed > 0)
    }

    async fn release_job_lease(&self, name: &str, holder: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM job_leases WHERE job_name = ?1 AND holder = ?2",
                params![name, holder],
            )
            .await
            .map_err(|e| query_err("release_job_lease", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn test_client(address: &str) -> NewClient {
        NewClient {
            address: address.to_string(),
            status: ClientStatus::Active,
            business_name: "Murphy Electrical".to_string(),
            trade_type: "electrician".to_string(),
            county: "Kildare".to_string(),
            listing_account_id: Some("accounts/1".to_string()),
            listing_location_id: Some("locations/2".to_string()),
            place_id: Some("place-xyz".to_string()),
            site_repo: Some("murphys/site".to_string()),
            site_summary: None,
            service_areas: vec!["Naas".to_string(), "Newbridge".to_string()],
            services: vec!["rewiring".to_string()],
        }
    }

    #[tokio::test]
    async fn event_ledger_rejects_replay() {
        let db = backend().await;
        assert!(db.record_event_if_new("wamid.1").await.unwrap());
        assert!(!db.record_event_if_new("wamid.1").await.unwrap());
        assert!(db.record_event_if_new("wamid.2").await.unwrap());
    }

    #[tokio::test]
    async fn client_roundtrip() {
        let db = backend().await;
        let created = db.insert_client(&test_client("353871111111")).await.unwrap();

        let found = db
            .find_client_by_address("353871111111")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.business_name, "Murphy Electrical");
        assert_eq!(found.status, ClientStatus::Active);
        assert_eq!(found.service_areas, vec!["Naas", "Newbridge"]);
        assert_eq!(found.listing_refs(), Some(("accounts/1", "locations/2")));

        assert!(
            db.find_client_by_address("353879999999")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_active_clients_filters_status() {
        let db = backend().await;
        db.insert_client(&test_client("353871111111")).await.unwrap();
        let mut paused = test_client("353872222222");
        paused.status = ClientStatus::Paused;
        db.insert_client(&paused).await.unwrap();

        let active = db.list_active_clients().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].address, "353871111111");
    }

    #[tokio::test]
    async fn second_active_item_violates_constraint() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();

        db.insert_item(&NewWorkflowItem::post(client.id, "brief", "draft"))
            .await
            .unwrap();

        let err = db
            .insert_item(&NewWorkflowItem::post(client.id, "brief2", "draft2"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation(), "expected unique violation: {err}");

        // Supersede frees the slot.
        assert_eq!(
            db.supersede_active_item(client.id, ItemKind::Post)
                .await
                .unwrap(),
            1
        );
        db.insert_item(&NewWorkflowItem::post(client.id, "brief2", "draft2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transition_guard_rejects_stale() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();
        let item = db
            .insert_item(&NewWorkflowItem::post(client.id, "brief", "draft"))
            .await
            .unwrap();

        assert!(
            db.transition_item(item.id, ItemStatus::Pending, ItemStatus::Approved)
                .await
                .unwrap()
        );
        // Second identical transition is stale.
        assert!(
            !db.transition_item(item.id, ItemStatus::Pending, ItemStatus::Approved)
                .await
                .unwrap()
        );

        let stored = db.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Approved);
    }

    #[tokio::test]
    async fn draft_update_requires_awaiting_edit() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();
        let item = db
            .insert_item(&NewWorkflowItem::post(client.id, "brief", "draft"))
            .await
            .unwrap();

        assert!(!db.update_item_draft(item.id, "revised").await.unwrap());

        db.transition_item(item.id, ItemStatus::Pending, ItemStatus::AwaitingEdit)
            .await
            .unwrap();
        assert!(db.update_item_draft(item.id, "revised").await.unwrap());

        let stored = db.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Pending);
        assert_eq!(stored.draft_text, "revised");
        assert_eq!(stored.source_text, "brief");
        assert_eq!(stored.revision_count, 1);
    }

    #[tokio::test]
    async fn expiry_sweep_is_idempotent() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        db.insert_item(&NewWorkflowItem::review(
            client.id, "reviews/1", "great", "Aoife", 5, "thanks", past,
        ))
        .await
        .unwrap();

        assert_eq!(db.expire_due_items(Utc::now()).await.unwrap(), 1);
        assert_eq!(db.expire_due_items(Utc::now()).await.unwrap(), 0);

        let item = db.find_item_by_review_ref("reviews/1").await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Expired);
    }

    #[tokio::test]
    async fn custom_text_only_lands_while_awaiting() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();
        let item = db
            .insert_item(&NewWorkflowItem::review(
                client.id,
                "reviews/9",
                "great",
                "Aoife",
                5,
                "thanks",
                Utc::now() + chrono::Duration::hours(48),
            ))
            .await
            .unwrap();

        // Not yet awaiting a custom reply: the write is refused.
        assert!(!db.set_item_custom_text(item.id, "too early").await.unwrap());

        assert!(
            db.transition_item(item.id, ItemStatus::Pending, ItemStatus::AwaitingCustomReply)
                .await
                .unwrap()
        );
        assert!(db.set_item_custom_text(item.id, "my own reply").await.unwrap());

        // Once settled (here via expiry) the item is immutable.
        assert!(
            db.transition_item(item.id, ItemStatus::AwaitingCustomReply, ItemStatus::Expired)
                .await
                .unwrap()
        );
        assert!(!db.set_item_custom_text(item.id, "after expiry").await.unwrap());

        let stored = db.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(stored.custom_text.as_deref(), Some("my own reply"));
    }

    #[tokio::test]
    async fn expiry_leaves_undated_items_alone() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();
        let item = db
            .insert_item(&NewWorkflowItem::post(client.id, "brief", "draft"))
            .await
            .unwrap();

        assert_eq!(db.expire_due_items(Utc::now()).await.unwrap(), 0);
        let stored = db.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn find_active_item_picks_newest_non_terminal() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();

        let first = db
            .insert_item(&NewWorkflowItem::post(client.id, "one", "d1"))
            .await
            .unwrap();
        db.transition_item(first.id, ItemStatus::Pending, ItemStatus::Skipped)
            .await
            .unwrap();
        let second = db
            .insert_item(&NewWorkflowItem::post(client.id, "two", "d2"))
            .await
            .unwrap();

        let active = db
            .find_active_item(client.id, ItemKind::Post)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);

        assert!(
            db.find_active_item(client.id, ItemKind::Offer)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn armed_intent_take_removes() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();

        assert!(db.take_intent(client.id).await.unwrap().is_none());

        db.arm_intent(client.id, IntentKind::PostBrief).await.unwrap();
        // Re-arming overwrites.
        db.arm_intent(client.id, IntentKind::OfferBrief).await.unwrap();

        assert_eq!(
            db.take_intent(client.id).await.unwrap(),
            Some(IntentKind::OfferBrief)
        );
        assert!(db.take_intent(client.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_lease_blocks_and_expires() {
        let db = backend().await;

        assert!(db.acquire_job_lease("poll", "holder-a", 60).await.unwrap());
        // Unexpired lease cannot be taken by another holder.
        assert!(!db.acquire_job_lease("poll", "holder-b", 60).await.unwrap());
        // A different job name is independent.
        assert!(db.acquire_job_lease("digest", "holder-b", 60).await.unwrap());

        db.release_job_lease("poll", "holder-a").await.unwrap();
        assert!(db.acquire_job_lease("poll", "holder-b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let db = backend().await;

        assert!(db.acquire_job_lease("poll", "holder-a", -1).await.unwrap());
        assert!(db.acquire_job_lease("poll", "holder-b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn activity_window_query() {
        let db = backend().await;
        let client = db.insert_client(&test_client("353871111111")).await.unwrap();

        db.insert_activity(
            client.id,
            ActivityKind::PostPublished,
            ActivityStatus::Success,
            Some(serde_json::json!({"remote_ref": "localPosts/9"})),
            None,
        )
        .await
        .unwrap();
        db.insert_activity(
            client.id,
            ActivityKind::ReviewReplied,
            ActivityStatus::Failed,
            None,
            Some("listing API 503"),
        )
        .await
        .unwrap();

        let week_ago = Utc::now() - chrono::Duration::days(7);
        let records = db.list_activity_since(client.id, week_ago).await.unwrap();
        assert_eq!(records.len(), 2);
        // Newest first.
        assert_eq!(records[0].kind, ActivityKind::ReviewReplied);
        assert_eq!(records[0].status, ActivityStatus::Failed);
        assert_eq!(records[0].error.as_deref(), Some("listing API 503"));
        assert_eq!(records[1].kind, ActivityKind::PostPublished);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(db.list_activity_since(client.id, future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local-engine.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_client(&test_client("353871111111")).await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let found = db.find_client_by_address("353871111111").await.unwrap();
        assert!(found.is_some());
    }
}
