//! MetadataStore: SQLite-backed record collections and the key-ring row.
//!
//! Two append/query collections hold one record per archived variant
//! (`image_list` for plain uploads, `edit_list` for edited derivatives). A
//! third table holds the durable key-ring document under a fixed name.

use crate::models::image::{Collection, ImageRecord};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// The durable key-ring document and its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringBlob {
    pub revision: i64,
    pub data: Vec<u8>,
}

#[derive(Clone)]
pub struct MetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema, one statement at a time.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Append one archived-variant record.
    pub async fn insert(&self, collection: Collection, record: &ImageRecord) -> MetadataResult<()> {
        let sql = format!(
            "INSERT INTO {} (
                id, image, local_path, bucket, remote_id, size_bytes, mimetype,
                timestamp, description, orig, checked, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            collection.table()
        );
        sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.image)
            .bind(&record.path.path)
            .bind(&record.path.bucket)
            .bind(&record.path.id)
            .bind(record.size)
            .bind(&record.mimetype)
            .bind(&record.timestamp)
            .bind(&record.desc)
            .bind(&record.orig)
            .bind(&record.checked)
            .bind(record.created_at)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Every record in a collection, oldest first.
    pub async fn list(&self, collection: Collection) -> MetadataResult<Vec<ImageRecord>> {
        let sql = format!(
            "SELECT id, image, local_path, bucket, remote_id, size_bytes, mimetype,
                    timestamp, description, orig, checked, created_at
             FROM {} ORDER BY created_at ASC",
            collection.table()
        );
        let rows = sqlx::query_as::<_, ImageRecord>(&sql)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Load the named key-ring document, if one was ever written.
    pub async fn load_keyring(&self, name: &str) -> MetadataResult<Option<KeyringBlob>> {
        let row: Option<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT revision, data FROM keyring WHERE name = ?")
                .bind(name)
                .fetch_optional(&*self.db)
                .await?;
        Ok(row.map(|(revision, data)| KeyringBlob { revision, data }))
    }

    /// Upsert the key-ring document unless a newer revision is already stored.
    ///
    /// Returns whether this revision was written.
    pub async fn save_keyring(&self, name: &str, blob: &KeyringBlob) -> MetadataResult<bool> {
        let result = sqlx::query(
            "INSERT INTO keyring (name, revision, data, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                revision = excluded.revision,
                data = excluded.data,
                updated_at = excluded.updated_at
             WHERE excluded.revision > keyring.revision",
        )
        .bind(name)
        .bind(blob.revision)
        .bind(&blob.data)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lightweight connectivity probe.
    pub async fn ping(&self) -> MetadataResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?)
    }
}
