//! SQLite-backed vector index.
//!
//! Points live in SQLite with their embeddings as little-endian f32 blobs;
//! search is a brute-force scan of one collection.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{
    check_batch_dims, rank, CollectionSpec, IndexedPoint, Metric, Payload, ScoredPoint,
    VectorIndex,
};
use crate::rag::error::IndexError;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl SqliteVectorIndex {
    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(IndexError::backend)?;

        let index = Self {
            pool,
            db_path: Some(db_path.to_path_buf()),
        };
        index.init_schema().await?;
        Ok(index)
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub async fn in_memory() -> Result<Self, IndexError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(IndexError::backend)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(IndexError::backend)?;

        let index = Self {
            pool,
            db_path: None,
        };
        index.init_schema().await?;
        Ok(index)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn init_schema(&self) -> Result<(), IndexError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                metric TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(IndexError::backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_points (
                collection TEXT NOT NULL,
                point_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                embedding BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (collection, point_id),
                FOREIGN KEY (collection) REFERENCES vector_collections(name) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(IndexError::backend)?;

        Ok(())
    }

    async fn load_spec(&self, name: &str) -> Result<Option<CollectionSpec>, IndexError> {
        let row = sqlx::query("SELECT dims, metric FROM vector_collections WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(IndexError::backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let dims: i64 = row.get("dims");
        let metric: String = row.get("metric");
        let metric = Metric::parse(&metric)
            .ok_or_else(|| IndexError::Backend(format!("unknown metric '{}' stored", metric)))?;
        Ok(Some(CollectionSpec::new(name, dims as usize, metric)))
    }

    async fn require_spec(&self, name: &str) -> Result<CollectionSpec, IndexError> {
        self.load_spec(name)
            .await?
            .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<(), IndexError> {
        sqlx::query(
            "INSERT OR IGNORE INTO vector_collections (name, dims, metric) VALUES (?1, ?2, ?3)",
        )
        .bind(&spec.name)
        .bind(spec.dims as i64)
        .bind(spec.metric.as_str())
        .execute(&self.pool)
        .await
        .map_err(IndexError::backend)?;

        let existing = self.require_spec(&spec.name).await?;
        spec.check_matches(&existing)
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<(), IndexError> {
        let spec = self.require_spec(collection).await?;
        check_batch_dims(&spec, &points)?;
        if points.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(IndexError::backend)?;
        for point in &points {
            let payload = serde_json::to_string(&point.payload).map_err(IndexError::backend)?;
            sqlx::query(
                "INSERT OR REPLACE INTO vector_points (collection, point_id, payload, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(collection)
            .bind(point.id.to_string())
            .bind(&payload)
            .bind(Self::serialize_embedding(&point.vector))
            .execute(&mut *tx)
            .await
            .map_err(IndexError::backend)?;
        }
        tx.commit().await.map_err(IndexError::backend)?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let spec = self.require_spec(collection).await?;
        spec.check_dims(query)?;

        let rows = sqlx::query(
            "SELECT point_id, payload, embedding FROM vector_points WHERE collection = ?1",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::backend)?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("point_id");
            let id = Uuid::parse_str(&id).map_err(IndexError::backend)?;
            let payload: String = row.get("payload");
            let payload: Payload = serde_json::from_str(&payload).map_err(IndexError::backend)?;
            let embedding: Vec<u8> = row.get("embedding");
            points.push((id, Self::deserialize_embedding(&embedding), payload));
        }

        let candidates = points
            .iter()
            .map(|(id, vector, payload)| (*id, vector.as_slice(), payload));
        Ok(rank(spec.metric, query, candidates, k))
    }

    async fn count(&self, collection: &str) -> Result<usize, IndexError> {
        self.require_spec(collection).await?;
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM vector_points WHERE collection = ?1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map(|r| r.get(0))
            .map_err(IndexError::backend)?;
        Ok(count as usize)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
