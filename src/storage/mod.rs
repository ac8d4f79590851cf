//! Artifact Store (§4.2). Content-addressed blob store with a SQLite metadata
//! index, grounded on `original_source/.../services/storage.py` and the sqlx
//! usage pattern of the teacher's `persistence.rs`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::ArtifactMetadata;
use crate::error::{Error, Result};

pub struct ArtifactStore {
    pool: SqlitePool,
    root: PathBuf,
}

impl ArtifactStore {
    pub async fn new(db_path: &Path, root: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        // `mode=rwc` creates the database file if it does not yet exist.
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                deployment_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                created_at TEXT NOT NULL,
                path TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_deployment ON artifacts(deployment_id)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_sha256 ON artifacts(sha256)")
            .execute(&pool)
            .await?;

        tokio::fs::create_dir_all(&root).await.ok();

        Ok(Self { pool, root })
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect()
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn save(
        &self,
        deployment_id: &str,
        filename: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<ArtifactMetadata> {
        let id = Uuid::new_v4().to_string();
        let sha256 = hex::encode(Sha256::digest(content));
        let size = content.len() as i64;

        let dir = self.root.join(deployment_id);
        tokio::fs::create_dir_all(&dir).await?;

        let disk_name = format!("{id}_{}", Self::sanitize(filename));
        let path = dir.join(&disk_name);

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        let created_at = Utc::now();
        let path_str = path.to_string_lossy().to_string();

        sqlx::query(
            "INSERT INTO artifacts (id, deployment_id, filename, content_type, size, sha256, created_at, path) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(deployment_id)
        .bind(filename)
        .bind(content_type)
        .bind(size)
        .bind(&sha256)
        .bind(created_at.to_rfc3339())
        .bind(&path_str)
        .execute(&self.pool)
        .await?;

        Ok(ArtifactMetadata {
            id,
            deployment_id: deployment_id.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size,
            sha256,
            created_at,
            path: path_str,
        })
    }

    fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<ArtifactMetadata> {
        let created_at: String = row.try_get("created_at")?;
        Ok(ArtifactMetadata {
            id: row.try_get("id")?,
            deployment_id: row.try_get("deployment_id")?,
            filename: row.try_get("filename")?,
            content_type: row.try_get("content_type")?,
            size: row.try_get("size")?,
            sha256: row.try_get("sha256")?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            path: row.try_get("path")?,
        })
    }

    /// Reads the file, recomputes the hash, and fails with `IntegrityError` on
    /// mismatch. A missing file with an existing row is `CorruptStore`.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, artifact_id: &str) -> Result<Option<(ArtifactMetadata, Vec<u8>)>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = ?")
            .bind(artifact_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let metadata = Self::row_to_metadata(&row)?;

        let content = match tokio::fs::read(&metadata.path).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::error!(artifact_id, path = %metadata.path, "artifact row exists without file");
                return Err(Error::CorruptStore);
            }
        };

        let actual = hex::encode(Sha256::digest(&content));
        if actual != metadata.sha256 {
            tracing::error!(artifact_id, expected = %metadata.sha256, actual = %actual, "artifact integrity mismatch");
            return Err(Error::IntegrityError {
                artifact_id: artifact_id.to_string(),
            });
        }

        Ok(Some((metadata, content)))
    }

    pub async fn list(
        &self,
        deployment_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ArtifactMetadata>> {
        if !(1..=1000).contains(&limit) {
            return Err(Error::ValidationError("limit must be in [1, 1000]".into()));
        }
        if offset < 0 {
            return Err(Error::ValidationError("offset must be >= 0".into()));
        }

        let rows = if let Some(deployment_id) = deployment_id {
            sqlx::query(
                "SELECT * FROM artifacts WHERE deployment_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(deployment_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT * FROM artifacts ORDER BY created_at DESC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        };

        rows.iter().map(Self::row_to_metadata).collect()
    }

    pub async fn delete(&self, artifact_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT path FROM artifacts WHERE id = ?")
            .bind(artifact_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let path: String = row.try_get("path")?;
        tokio::fs::remove_file(&path).await.ok();

        sqlx::query("DELETE FROM artifacts WHERE id = ?")
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    pub async fn delete_deployment(&self, deployment_id: &str) -> Result<usize> {
        let artifacts = self.list(Some(deployment_id), 1000, 0).await?;
        for artifact in &artifacts {
            self.delete(&artifact.id).await?;
        }
        let dir = self.root.join(deployment_id);
        tokio::fs::remove_dir(&dir).await.ok();
        Ok(artifacts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(&dir.path().join("artifacts.sqlite"), dir.path().join("blobs"))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_then_get_round_trips_content_and_hash() {
        let (store, _dir) = store().await;
        let metadata = store
            .save("dep-1", "hello.txt", b"hello world", "text/plain")
            .await
            .unwrap();

        let (fetched, content) = store.get(&metadata.id).await.unwrap().unwrap();
        assert_eq!(fetched.sha256, metadata.sha256);
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn get_missing_id_returns_none() {
        let (store, _dir) = store().await;
        assert!(store.get("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_file_fails_integrity_check() {
        let (store, _dir) = store().await;
        let metadata = store
            .save("dep-1", "hello.txt", b"hello world", "text/plain")
            .await
            .unwrap();

        tokio::fs::write(&metadata.path, b"tampered").await.unwrap();

        let err = store.get(&metadata.id).await.unwrap_err();
        assert!(matches!(err, Error::IntegrityError { .. }));
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let (store, _dir) = store().await;
        let metadata = store.save("dep-1", "a.txt", b"data", "text/plain").await.unwrap();
        assert!(store.delete(&metadata.id).await.unwrap());
        assert!(!store.delete(&metadata.id).await.unwrap());
        assert!(store.get(&metadata.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_rejects_out_of_range_limit() {
        let (store, _dir) = store().await;
        let err = store.list(None, 0, 0).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        let err = store.list(None, 5, -1).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn delete_deployment_removes_all_rows() {
        let (store, _dir) = store().await;
        store.save("dep-1", "a.txt", b"a", "text/plain").await.unwrap();
        store.save("dep-1", "b.txt", b"b", "text/plain").await.unwrap();
        store.save("dep-2", "c.txt", b"c", "text/plain").await.unwrap();

        let removed = store.delete_deployment("dep-1").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list(Some("dep-1"), 10, 0).await.unwrap().len(), 0);
        assert_eq!(store.list(Some("dep-2"), 10, 0).await.unwrap().len(), 1);
    }
}
