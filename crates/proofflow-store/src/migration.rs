//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each migration runs in
//! its own transaction and only once.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "workflow history",
        sql: r#"
            CREATE TABLE workflow_history (
                id            TEXT PRIMARY KEY,
                description   TEXT NOT NULL,
                steps         TEXT NOT NULL,
                status        TEXT NOT NULL CHECK(status IN ('completed','failed')),
                transfer_ids  TEXT NOT NULL DEFAULT '[]',
                proof_summary TEXT NOT NULL DEFAULT '{}',
                created_at    INTEGER NOT NULL
            );
            CREATE INDEX idx_history_created ON workflow_history(created_at DESC);
        "#,
    },
    Migration {
        version: 2,
        description: "failure detail on history entries",
        sql: "ALTER TABLE workflow_history ADD COLUMN error TEXT;",
    },
];

pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        debug!(current_version = current, "history schema is up to date");
        return Ok(());
    }

    info!(current_version = current, pending = pending.len(), "running pending migrations");
    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied version, 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })
}

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    let failed = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    // `&Connection` cannot open a `Transaction`, so the statements are explicit.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| failed(format!("failed to begin transaction: {e}")))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| failed(format!("SQL execution failed: {e}")))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![migration.version, migration.description, chrono::Utc::now().timestamp()],
            )
            .map(|_| ())
            .map_err(|e| failed(format!("failed to record migration: {e}")))
        });

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| failed(format!("failed to commit: {e}")))?;
            info!(version = migration.version, description = migration.description, "migration applied");
            Ok(())
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}
