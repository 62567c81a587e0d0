use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions};

use super::{Collection, DocumentStore, ReadStamp, Versioned, WriteOp};
use crate::error::StoreError;

const UNIQUE_VIOLATION: &str = "23505";

const CREATE_DOCUMENTS: &str = r#"CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    version BIGINT NOT NULL,
    data JSONB NOT NULL,
    PRIMARY KEY (collection, id)
)"#;

/// Postgres-backed document store: one JSONB row per document.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_DOCUMENTS)
            .execute(&self.pool)
            .await
            .context("Failed to create documents table")?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn conflict(collection: Collection, id: &str) -> StoreError {
    StoreError::Conflict {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn row_to_versioned(row: &sqlx::postgres::PgRow) -> Result<Versioned, StoreError> {
    let version: i64 = row.try_get("version")?;
    Ok(Versioned {
        id: row.try_get("id")?,
        version: version as u64,
        data: row.try_get::<Value, _>("data")?,
    })
}

async fn locked_version(
    tx: &mut Transaction<'_, Postgres>,
    collection: Collection,
    id: &str,
) -> Result<Option<u64>, StoreError> {
    let row = sqlx::query(r#"SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE"#)
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(tx.as_mut())
        .await?;
    Ok(match row {
        Some(r) => Some(r.try_get::<i64, _>("version")? as u64),
        None => None,
    })
}

async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    collection: Collection,
    id: &str,
    data: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"INSERT INTO documents (collection, id, version, data) VALUES ($1, $2, 1, $3)"#)
        .bind(collection.as_str())
        .bind(id)
        .bind(data)
        .execute(tx.as_mut())
        .await?;
    Ok(())
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Versioned>, StoreError> {
        let row = sqlx::query(r#"SELECT id, version, data FROM documents WHERE collection = $1 AND id = $2"#)
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_versioned).transpose()
    }

    async fn query_eq(
        &self,
        collection: Collection,
        path: &str,
        value: &str,
    ) -> Result<Vec<Versioned>, StoreError> {
        let path: Vec<String> = path.split('.').map(str::to_string).collect();
        let rows = sqlx::query(
            r#"SELECT id, version, data FROM documents
               WHERE collection = $1 AND data #>> $2 = $3
               ORDER BY id"#,
        )
        .bind(collection.as_str())
        .bind(path)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_versioned).collect()
    }

    async fn commit(&self, mut reads: Vec<ReadStamp>, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        // stable lock order across concurrent commits
        reads.sort_by(|a, b| (a.collection, &a.id).cmp(&(b.collection, &b.id)));
        let mut tx = self.pool.begin().await?;

        // Lock every existing document the transaction read and check its version.
        // Absent-at-read documents cannot be locked; their writes below use a plain
        // INSERT so a concurrent creation trips the primary key instead.
        let mut expected: HashMap<(Collection, &str), Option<u64>> = HashMap::new();
        for read in &reads {
            let current = locked_version(&mut tx, read.collection, &read.id).await?;
            if current != read.version {
                return Err(conflict(read.collection, &read.id));
            }
            expected.insert((read.collection, read.id.as_str()), read.version);
        }

        for write in &writes {
            match write {
                WriteOp::Create {
                    collection,
                    id,
                    data,
                } => {
                    if let Err(e) = insert(&mut tx, *collection, id, data).await {
                        if is_unique_violation(&e) {
                            return Err(StoreError::AlreadyExists {
                                collection: collection.to_string(),
                                id: id.clone(),
                            });
                        }
                        return Err(e.into());
                    }
                }
                WriteOp::Put {
                    collection,
                    id,
                    data,
                } => match expected.get(&(*collection, id.as_str())) {
                    Some(None) => {
                        if let Err(e) = insert(&mut tx, *collection, id, data).await {
                            if is_unique_violation(&e) {
                                return Err(conflict(*collection, id));
                            }
                            return Err(e.into());
                        }
                    }
                    Some(Some(_)) | None => {
                        sqlx::query(
                            r#"INSERT INTO documents (collection, id, version, data) VALUES ($1, $2, 1, $3)
                               ON CONFLICT (collection, id) DO UPDATE
                               SET data = EXCLUDED.data, version = documents.version + 1"#,
                        )
                        .bind(collection.as_str())
                        .bind(id)
                        .bind(data)
                        .execute(tx.as_mut())
                        .await?;
                    }
                },
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
