//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'onboarding',
                business_name TEXT NOT NULL,
                trade_type TEXT NOT NULL,
                county TEXT NOT NULL,
                listing_account_id TEXT,
                listing_location_id TEXT,
                place_id TEXT,
                site_repo TEXT,
                site_summary TEXT,
                service_areas TEXT NOT NULL DEFAULT '[]',
                services TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_clients_address ON clients(address);
            CREATE INDEX IF NOT EXISTS idx_clients_status ON clients(status);

            CREATE TABLE IF NOT EXISTS workflow_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id),
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                source_text TEXT NOT NULL,
                draft_text TEXT NOT NULL,
                custom_text TEXT,
                review_ref TEXT,
                reviewer_name TEXT,
                rating INTEGER,
                offer_end_date TEXT,
                cta_type TEXT,
                remote_ref TEXT,
                revision_count INTEGER NOT NULL DEFAULT 0,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_items_client_kind
                ON workflow_items(client_id, kind);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_items_review_ref
                ON workflow_items(review_ref) WHERE review_ref IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_items_expires
                ON workflow_items(expires_at) WHERE expires_at IS NOT NULL;

            CREATE TABLE IF NOT EXISTS processed_events (
                event_id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id),
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                error TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_activity_client ON activity_log(client_id);
            CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "one_active_item_constraint",
        sql: r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_items_one_active
                ON workflow_items(client_id, kind)
                WHERE status IN ('pending', 'awaiting_photo', 'awaiting_edit',
                                 'awaiting_custom_reply');
        "#,
    },
    Migration {
        version: 3,
        name: "armed_intents_and_job_leases",
        sql: r#"
            CREATE TABLE IF NOT EXISTS armed_intents (
                client_id INTEGER PRIMARY KEY REFERENCES clients(id),
                intent TEXT NOT NULL,
                armed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS job_leases (
                job_name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "clients",
            "workflow_items",
            "processed_events",
            "activity_log",
            "armed_intents",
            "job_leases",
            "_migrations",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn one_active_item_index_enforced() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO clients (address, status, business_name, trade_type, county)
             VALUES ('353871234567', 'active', 'Test Electric', 'electrician', 'Dublin')",
            (),
        )
        .await
        .unwrap();

        conn.execute(
            "INSERT INTO workflow_items (client_id, kind, status, source_text, draft_text, created_at, updated_at)
             VALUES (1, 'post', 'pending', 'brief', 'draft', datetime('now'), datetime('now'))",
            (),
        )
        .await
        .unwrap();

        // Second active post for the same client must violate the index.
        let err = conn
            .execute(
                "INSERT INTO workflow_items (client_id, kind, status, source_text, draft_text, created_at, updated_at)
                 VALUES (1, 'post', 'pending', 'brief2', 'draft2', datetime('now'), datetime('now'))",
                (),
            )
            .await;
        assert!(err.is_err());

        // A terminal one is fine, as is an active item of a different kind.
        conn.execute(
            "INSERT INTO workflow_items (client_id, kind, status, source_text, draft_text, created_at, updated_at)
             VALUES (1, 'post', 'skipped', 'brief3', 'draft3', datetime('now'), datetime('now'))",
            (),
        )
        .await
        .unwrap();
        conn.execute(
            "INSERT INTO workflow_items (client_id, kind, status, source_text, draft_text, created_at, updated_at)
             VALUES (1, 'offer', 'pending', 'brief4', 'draft4', datetime('now'), datetime('now'))",
            (),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn review_ref_uniqueness() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO clients (address, status, business_name, trade_type, county)
             VALUES ('353871234567', 'active', 'Test Electric', 'electrician', 'Dublin')",
            (),
        )
        .await
        .unwrap();

        conn.execute(
            "INSERT INTO workflow_items (client_id, kind, status, source_text, draft_text, review_ref, created_at, updated_at)
             VALUES (1, 'review', 'approved', 'great job', 'thanks', 'reviews/abc', datetime('now'), datetime('now'))",
            (),
        )
        .await
        .unwrap();

        let err = conn
            .execute(
                "INSERT INTO workflow_items (client_id, kind, status, source_text, draft_text, review_ref, created_at, updated_at)
                 VALUES (1, 'review', 'pending', 'great job', 'thanks', 'reviews/abc', datetime('now'), datetime('now'))",
                (),
            )
            .await;
        assert!(err.is_err());
    }
}
