//! JSONB document store on Postgres.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;

use super::{Collection, DocumentStore, StoreError};

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let sql = format!("SELECT data FROM {} WHERE id = $1", collection.table());
        let row: Option<Json<Value>> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|Json(data)| data))
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET data = data || $2, updated_at = NOW() WHERE id = $1",
            collection.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(Json(Value::Object(fields)))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing {
                collection,
                id: id.to_string(),
            });
        }
        log::debug!("Updated {}/{}", collection, id);
        Ok(())
    }
}
