use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{DocId, Document, DocumentStore, Filter, StoreResult};

// ---

/// Document store backed by the `documents` JSONB table (see `schema.rs`).
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Append `AND body #> '{a,b}' = <value>` for every clause.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    // ---
    for (path, value) in filter.clauses() {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        qb.push(" AND body #> ");
        qb.push_bind(segments);
        qb.push(" = ");
        qb.push_bind(Json(value.clone()));
    }
}

/// Newest-first selection, optionally limited.
fn select_query(collection: &str, filter: &Filter, limit: Option<usize>) -> QueryBuilder<'static, Postgres> {
    // ---
    let mut qb = QueryBuilder::<Postgres>::new("SELECT id, body FROM documents WHERE collection = ");
    qb.push_bind(collection.to_string());
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY seq DESC");
    if let Some(limit) = limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    qb
}

fn delete_query(collection: &str, filter: &Filter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM documents WHERE collection = ");
    qb.push_bind(collection.to_string());
    push_filter(&mut qb, filter);
    qb
}

// jsonb `||` replaces top-level keys, matching a shallow $set
const MERGE_SQL: &str = "UPDATE documents SET body = body || $1 WHERE collection = $2 AND id = $3";

fn to_document((id, body): (Uuid, Json<Value>)) -> Document {
    Document {
        id: DocId::from(id),
        body: body.0,
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, collection: &str, body: Value) -> StoreResult<DocId> {
        // ---
        let id = DocId::new();
        sqlx::query(
            r#"
            INSERT INTO documents (id, collection, body)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id.as_uuid())
        .bind(collection)
        .bind(Json(body))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_by_id(&self, collection: &str, id: DocId) -> StoreResult<Option<Document>> {
        // ---
        let row: Option<(Uuid, Json<Value>)> = sqlx::query_as(
            r#"
            SELECT id, body FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(to_document))
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        Ok(self.find_many(collection, filter, Some(1)).await?.into_iter().next())
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Document>> {
        // ---
        let mut qb = select_query(collection, filter, limit);
        let rows: Vec<(Uuid, Json<Value>)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(to_document).collect())
    }

    async fn update_one(
        &self,
        collection: &str,
        id: DocId,
        set: Map<String, Value>,
    ) -> StoreResult<bool> {
        // ---
        let result = sqlx::query(MERGE_SQL)
            .bind(Json(Value::Object(set)))
            .bind(collection)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        // ---
        let mut qb = delete_query(collection, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_select_binds_one_path_and_value_per_clause() {
        // ---
        let filter = Filter::new()
            .eq("data.sensor_id", "s-1")
            .eq("data.user_id", "u-1");
        let qb = select_query("crop_recommendations", &filter, Some(10));
        assert_eq!(
            qb.sql(),
            "SELECT id, body FROM documents WHERE collection = $1 \
             AND body #> $2 = $3 AND body #> $4 = $5 ORDER BY seq DESC LIMIT $6"
        );

        let qb = select_query("users", &Filter::new(), None);
        assert_eq!(
            qb.sql(),
            "SELECT id, body FROM documents WHERE collection = $1 ORDER BY seq DESC"
        );
    }

    #[test]
    fn test_delete_uses_same_filter_shape() {
        // ---
        let filter = Filter::new().eq("data.sensor_id", "s-1");
        let qb = delete_query("location_analysis", &filter);
        assert_eq!(
            qb.sql(),
            "DELETE FROM documents WHERE collection = $1 AND body #> $2 = $3"
        );
    }

    #[test]
    fn test_update_is_a_shallow_jsonb_merge() {
        // ---
        assert!(MERGE_SQL.contains("SET body = body || $1"));
        assert!(MERGE_SQL.ends_with("WHERE collection = $2 AND id = $3"));
    }
}
