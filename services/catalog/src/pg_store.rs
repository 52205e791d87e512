use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::record_store::{Document, DocumentQuery, Filter, FilterValue, RecordStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const ORDER_BY_ID: &str = " ORDER BY CASE WHEN jsonb_typeof(body -> 'id') = 'number' \
     THEN (body ->> 'id')::numeric END NULLS FIRST, key";

/// Record store keeping JSON documents in a PostgreSQL `documents` table
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

/// Append one filter predicate. Field names and operands are always bound,
/// so `next_param` advances by two.
fn push_filter(sql: &mut String, filter: &Filter, next_param: &mut usize) {
    let field = *next_param + 1;
    let value = *next_param + 2;
    *next_param += 2;
    let op = filter.op.as_sql();

    let predicate = match filter.value {
        FilterValue::Number(_) => format!(
            " AND CASE WHEN jsonb_typeof(body -> ${field}) = 'number' \
             THEN (body ->> ${field})::float8 {op} ${value} ELSE FALSE END"
        ),
        FilterValue::Text(_) => format!(
            " AND jsonb_typeof(body -> ${field}) = 'string' AND (body ->> ${field}) {op} ${value}"
        ),
        FilterValue::Bool(_) => format!(
            " AND CASE WHEN jsonb_typeof(body -> ${field}) = 'boolean' \
             THEN (body ->> ${field})::boolean {op} ${value} ELSE FALSE END"
        ),
    };
    sql.push_str(&predicate);
}

/// Compile a query to SQL. `$1` is always the collection.
fn build_query_sql(query: &DocumentQuery) -> String {
    let mut sql = String::from("SELECT key, body FROM documents WHERE collection = $1");
    let mut param_count = 1;

    for filter in &query.filters {
        push_filter(&mut sql, filter, &mut param_count);
    }

    sql.push_str(ORDER_BY_ID);

    if query.limit.is_some() {
        param_count += 1;
        sql.push_str(&format!(" LIMIT ${}", param_count));
    }

    param_count += 1;
    sql.push_str(&format!(" OFFSET ${}", param_count));

    sql
}

fn into_document((key, body): (String, Value)) -> Document {
    Document { key, body }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let sql = format!(
            "SELECT key, body FROM documents WHERE collection = $1{}",
            ORDER_BY_ID
        );
        let rows = sqlx::query_as::<_, (String, Value)>(&sql)
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(into_document).collect())
    }

    #[instrument(skip(self, query), fields(filters = query.filters.len()))]
    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let sql = build_query_sql(query);
        debug!(sql = %sql, "Executing document query");

        let mut query_builder = sqlx::query_as::<_, (String, Value)>(&sql).bind(collection);

        for filter in &query.filters {
            query_builder = query_builder.bind(filter.field.as_str());
            query_builder = match &filter.value {
                FilterValue::Number(n) => query_builder.bind(*n),
                FilterValue::Text(t) => query_builder.bind(t.as_str()),
                FilterValue::Bool(b) => query_builder.bind(*b),
            };
        }
        if let Some(limit) = query.limit {
            query_builder = query_builder.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        query_builder = query_builder.bind(i64::try_from(query.offset).unwrap_or(i64::MAX));

        let rows = query_builder.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(into_document).collect())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, (String, Value)>(
            "SELECT key, body FROM documents WHERE collection = $1 AND key = $2",
        )
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_document))
    }

    #[instrument(skip(self, body))]
    async fn set(&self, collection: &str, key: &str, body: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, key, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key)
            DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(&body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add(&self, collection: &str, body: Value) -> Result<String, StoreError> {
        let key = Uuid::new_v4().simple().to_string();

        sqlx::query("INSERT INTO documents (collection, key, body) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&key)
            .bind(&body)
            .execute(&self.pool)
            .await?;

        Ok(key)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND key = $2")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::FilterOp;

    #[test]
    fn test_unfiltered_query_sql() {
        let sql = build_query_sql(&DocumentQuery::default());
        assert!(sql.starts_with("SELECT key, body FROM documents WHERE collection = $1 ORDER BY"));
        assert!(sql.ends_with(" OFFSET $2"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_filters_are_parameterized() {
        let query = DocumentQuery {
            filters: vec![
                Filter::new("price", FilterOp::Gte, FilterValue::Number(5.0)),
                Filter::eq("category", FilterValue::Text("Dairy'; DROP TABLE documents".into())),
            ],
            offset: 10,
            limit: Some(10),
        };
        let sql = build_query_sql(&query);

        assert!(sql.contains("(body ->> $2)::float8 >= $3"));
        assert!(sql.contains("(body ->> $4) = $5"));
        assert!(sql.contains("LIMIT $6 OFFSET $7"));
        assert!(!sql.contains("Dairy"));
        assert!(!sql.contains("price"));
    }

    #[test]
    fn test_bool_filter_sql() {
        let mut sql = String::new();
        let mut next = 1;
        push_filter(
            &mut sql,
            &Filter::eq("vegetarian", FilterValue::Bool(true)),
            &mut next,
        );
        assert_eq!(next, 3);
        assert!(sql.contains("(body ->> $2)::boolean = $3"));
    }
}
