// crates/db/src/queries/documents.rs
//! Document reconciler: makes the store's contents for a repository exactly
//! match the latest run's output (changed-only upsert + orphan delete).

use std::collections::{HashMap, HashSet};

use docwright_core::{DocumentKind, NewDocument};
use sqlx::Row;

use crate::queries::ReconcileStats;
use crate::{now_ms, Database, DbResult};

/// A stored document as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub job_id: String,
    pub repository: String,
    pub source_key: String,
    pub slug: String,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub chapter_index: Option<i64>,
    pub run_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for StoredDocument {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            repository: row.try_get("repository")?,
            source_key: row.try_get("source_key")?,
            slug: row.try_get("slug")?,
            title: row.try_get("title")?,
            kind: DocumentKind::from_db_str(&kind),
            content: row.try_get("content")?,
            chapter_index: row.try_get("chapter_index")?,
            run_id: row.try_get("run_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Database {
    /// Idempotently reconcile one run's document batch into the store.
    ///
    /// Repository-scoped: after this returns, the documents stored for
    /// `repository` are exactly the surviving members of `batch`; stale
    /// documents from any older job for the same repository are deleted
    /// too. Reconciling the same batch twice is a no-op on the second pass
    /// (all skips).
    pub async fn reconcile_documents(
        &self,
        job_id: &str,
        repository: &str,
        run_id: &str,
        batch: &[NewDocument],
    ) -> DbResult<ReconcileStats> {
        let mut stats = ReconcileStats::default();
        let mut tx = self.pool().begin().await?;

        // Existing state, keyed by source_key.
        let existing: Vec<(String, String, String, Option<i64>)> = sqlx::query_as(
            "SELECT id, source_key, content, chapter_index FROM documents WHERE repository = ?1",
        )
        .bind(repository)
        .fetch_all(&mut *tx)
        .await?;
        let mut existing_by_key: HashMap<&str, (&str, &str, Option<i64>)> = existing
            .iter()
            .map(|(id, key, content, chapter)| (key.as_str(), (id.as_str(), content.as_str(), *chapter)))
            .collect();

        let now = now_ms();
        let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());

        for doc in batch {
            // Articles and tutorials with no substance never reach the store.
            if doc.kind.requires_content() && doc.content.trim().is_empty() {
                stats.rejected += 1;
                continue;
            }
            // Within-batch duplicate: first occurrence wins.
            if !seen.insert(doc.source_key.as_str()) {
                stats.skipped += 1;
                continue;
            }

            let chapter = doc.chapter_index.map(|v| v as i64);
            match existing_by_key.remove(doc.source_key.as_str()) {
                Some((id, content, stored_chapter)) => {
                    if content == doc.content && stored_chapter == chapter {
                        // Unchanged, so no write.
                        stats.skipped += 1;
                    } else {
                        sqlx::query(
                            r#"
                            UPDATE documents SET
                                job_id = ?1, slug = ?2, title = ?3, kind = ?4,
                                content = ?5, chapter_index = ?6, run_id = ?7,
                                updated_at = ?8
                            WHERE id = ?9
                            "#,
                        )
                        .bind(job_id)
                        .bind(&doc.slug)
                        .bind(&doc.title)
                        .bind(doc.kind.as_str())
                        .bind(&doc.content)
                        .bind(chapter)
                        .bind(run_id)
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                        stats.updated += 1;
                    }
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (
                            id, job_id, repository, source_key, slug, title,
                            kind, content, chapter_index, run_id,
                            created_at, updated_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                        "#,
                    )
                    .bind(uuid::Uuid::new_v4().to_string())
                    .bind(job_id)
                    .bind(repository)
                    .bind(&doc.source_key)
                    .bind(&doc.slug)
                    .bind(&doc.title)
                    .bind(doc.kind.as_str())
                    .bind(&doc.content)
                    .bind(chapter)
                    .bind(run_id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    stats.inserted += 1;
                }
            }
        }

        // Orphan cleanup: whatever the batch did not claim no longer exists
        // in the latest run.
        for (id, _, _) in existing_by_key.into_values() {
            sqlx::query("DELETE FROM documents WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            stats.deleted += 1;
        }

        tx.commit().await?;

        tracing::debug!(
            repository,
            run_id,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            rejected = stats.rejected,
            deleted = stats.deleted,
            "reconciled document batch"
        );
        Ok(stats)
    }

    /// All stored documents for a repository, ordered for display.
    pub async fn list_documents(&self, repository: &str) -> DbResult<Vec<StoredDocument>> {
        let rows: Vec<StoredDocument> = sqlx::query_as(
            r#"
            SELECT id, job_id, repository, source_key, slug, title, kind,
                   content, chapter_index, run_id, created_at, updated_at
            FROM documents
            WHERE repository = ?1
            ORDER BY kind, chapter_index, slug
            "#,
        )
        .bind(repository)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
