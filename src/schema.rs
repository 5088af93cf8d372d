//! Database schema management for `piliseed`.
//!
//! Ensures the document table and its indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// All collections share the `documents` table: `collection` names the
/// logical collection, `seq` gives the newest-first ordering and `body`
/// holds the JSON document. Safe to call on every startup; no-op if objects
/// already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            seq         BIGSERIAL   PRIMARY KEY,
            id          UUID        NOT NULL UNIQUE,
            collection  TEXT        NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            body        JSONB       NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Newest-first scans per collection
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_collection_seq
            ON documents (collection, seq DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Sensor-scoped history lookups
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_data_sensor_id
            ON documents (collection, (body #>> '{data,sensor_id}'));
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
