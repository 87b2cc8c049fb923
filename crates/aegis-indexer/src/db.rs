//! Relational storage for documents and chunks
//!
//! All writes validate field names against whitelists at the boundary;
//! unknown update fields and order-by columns are rejected with a
//! warning and no state mutation.

use aegis_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Fields an update may touch
const ALLOWED_UPDATE_FIELDS: &[&str] = &[
    "status",
    "title",
    "author",
    "language",
    "page_count",
    "word_count",
    "char_count",
    "chunk_count",
    "processing_error",
    "summary",
    "key_topics",
    "category_id",
    "space_id",
    "embedding_model",
];

/// Columns the listing may sort by
const ALLOWED_ORDER_FIELDS: &[&str] = &["uploaded_at", "filename", "title", "file_size", "status"];

/// A document row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub file_extension: String,
    pub content_hash: String,
    pub file_hash: String,
    pub status: String,
    pub uploaded_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: String,
    pub page_count: Option<i32>,
    pub word_count: i32,
    pub char_count: i32,
    pub chunk_count: Option<i32>,
    pub category_id: Option<i32>,
    pub space_id: Option<Uuid>,
    pub summary: Option<String>,
    pub key_topics: Option<Vec<String>>,
    pub processing_error: Option<String>,
    pub embedding_model: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields required to create a document row
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub file_extension: String,
    pub content_hash: String,
    pub file_hash: String,
    pub status: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: String,
    pub page_count: Option<i32>,
    pub word_count: i32,
    pub char_count: i32,
}

/// Child chunk row handed to `save_children`
#[derive(Debug, Clone)]
pub struct ChildRecord {
    pub id: Uuid,
    pub parent_chunk_id: Uuid,
    pub chunk_index: i32,
    pub child_index: i32,
    pub text: String,
    pub char_start: i32,
    pub char_end: i32,
    pub word_count: i32,
}

/// Listing filters for the documents API
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub status: Option<String>,
    pub category_id: Option<i32>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: String,
    pub order_dir: String,
}

/// Chunk row joined with document metadata, used by the migration
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub child_index: i32,
    pub parent_chunk_id: Uuid,
    pub text: String,
    pub document_name: String,
    pub space_id: Option<Uuid>,
    pub category_name: String,
}

/// Knowledge-space fields carried in the vector payload
#[derive(Debug, Clone, Default)]
pub struct SpaceInfo {
    pub space_id: Option<Uuid>,
    pub space_name: String,
    pub space_slug: String,
}

#[derive(Clone)]
pub struct DocumentDb {
    pool: PgPool,
}

impl DocumentDb {
    pub fn new(pool: PgPool) -> Self {
        DocumentDb { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ================= document rows =================

    pub async fn create(&self, new: &NewDocument) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO documents (
                id, filename, original_filename, file_path, file_size,
                mime_type, file_extension, content_hash, file_hash, status,
                title, author, language, page_count, word_count, char_count
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(id)
        .bind(&new.filename)
        .bind(&new.original_filename)
        .bind(&new.file_path)
        .bind(new.file_size)
        .bind(&new.mime_type)
        .bind(&new.file_extension)
        .bind(&new.content_hash)
        .bind(&new.file_hash)
        .bind(&new.status)
        .bind(&new.title)
        .bind(&new.author)
        .bind(&new.language)
        .bind(new.page_count)
        .bind(new.word_count)
        .bind(new.char_count)
        .execute(&self.pool)
        .await?;
        info!("Created document record: {}", id);
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<DocumentRow>> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn by_content_hash(&self, content_hash: &str) -> Result<Option<DocumentRow>> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE content_hash = $1 AND deleted_at IS NULL",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn by_file_hash(&self, file_hash: &str) -> Result<Option<DocumentRow>> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE file_hash = $1 AND deleted_at IS NULL",
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// List live documents with filters and pagination
    pub async fn list(&self, params: &ListParams) -> Result<(Vec<DocumentRow>, i64)> {
        let order_by = if ALLOWED_ORDER_FIELDS.contains(&params.order_by.as_str()) {
            params.order_by.as_str()
        } else {
            warn!("Rejected order_by field: {}", params.order_by);
            "uploaded_at"
        };
        let order_dir = if params.order_dir.eq_ignore_ascii_case("asc") {
            "ASC"
        } else {
            "DESC"
        };

        let mut count_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM documents WHERE deleted_at IS NULL");
        let mut list_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM documents WHERE deleted_at IS NULL");

        for builder in [&mut count_query, &mut list_query] {
            if let Some(status) = &params.status {
                builder.push(" AND status = ").push_bind(status.clone());
            }
            if let Some(category_id) = params.category_id {
                builder.push(" AND category_id = ").push_bind(category_id);
            }
            if let Some(search) = &params.search {
                let pattern = format!("%{search}%");
                builder
                    .push(" AND (filename ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR title ILIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
        }

        let total: i64 = count_query.build().fetch_one(&self.pool).await?.get(0);

        list_query
            .push(format!(" ORDER BY {order_by} {order_dir} LIMIT "))
            .push_bind(params.limit.clamp(1, 100))
            .push(" OFFSET ")
            .push_bind(params.offset.max(0));
        let rows = list_query
            .build_query_as::<DocumentRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }

    /// Whitelisted dynamic update; unknown fields are dropped with a
    /// warning, and an update with no valid fields is a no-op.
    pub async fn update_fields(
        &self,
        id: Uuid,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        let valid: Vec<(&String, &serde_json::Value)> = updates
            .iter()
            .filter(|(key, _)| {
                let allowed = ALLOWED_UPDATE_FIELDS.contains(&key.as_str());
                if !allowed {
                    warn!("Attempted to update non-whitelisted field: {}", key);
                }
                allowed
            })
            .collect();
        if valid.is_empty() {
            warn!("No valid fields to update after whitelist filtering");
            return Ok(false);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE documents SET ");
        let mut first = true;
        for (key, value) in valid {
            if !first {
                builder.push(", ");
            }
            first = false;
            builder.push(format!("{key} = "));
            match value {
                serde_json::Value::Null => {
                    builder.push("NULL");
                }
                serde_json::Value::String(s) => {
                    builder.push_bind(s.clone());
                }
                serde_json::Value::Number(n) if n.is_i64() => {
                    match key.as_str() {
                        // Integer-typed columns
                        "page_count" | "word_count" | "char_count" | "chunk_count"
                        | "category_id" => builder.push_bind(n.as_i64().unwrap() as i32),
                        _ => builder.push_bind(n.as_i64().unwrap()),
                    };
                }
                serde_json::Value::Number(n) => {
                    builder.push_bind(n.as_f64().unwrap_or(0.0));
                }
                serde_json::Value::Array(items) => {
                    let strings: Vec<String> = items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect();
                    builder.push_bind(strings);
                }
                other => {
                    builder.push_bind(other.to_string());
                }
            }
        }
        builder.push(" WHERE id = ").push_bind(id);
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Status transition with its timestamps; `failed` increments the
    /// retry counter.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: &str,
        error: Option<&str>,
        chunk_count: Option<i32>,
    ) -> Result<()> {
        match status {
            "processing" => {
                sqlx::query(
                    "UPDATE documents
                     SET status = 'processing', processing_started_at = NOW(),
                         processing_error = NULL
                     WHERE id = $1",
                )
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            "indexed" => {
                sqlx::query(
                    "UPDATE documents
                     SET status = 'indexed', processing_completed_at = NOW(),
                         indexed_at = NOW(), chunk_count = $2, processing_error = NULL
                     WHERE id = $1",
                )
                .bind(id)
                .bind(chunk_count)
                .execute(&self.pool)
                .await?;
            }
            "failed" => {
                sqlx::query(
                    "UPDATE documents
                     SET status = 'failed', processing_error = $2,
                         retry_count = retry_count + 1
                     WHERE id = $1",
                )
                .bind(id)
                .bind(error)
                .execute(&self.pool)
                .await?;
            }
            other => {
                sqlx::query("UPDATE documents SET status = $2 WHERE id = $1")
                    .bind(id)
                    .bind(other)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Operator action: back to pending with a fresh retry budget
    pub async fn reset_for_reindex(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents
             SET status = 'pending', retry_count = 0, processing_error = NULL
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Tombstone; rows are never hard-deleted automatically
    pub async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET deleted_at = NOW(), status = 'deleted' WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Aggregate statistics for the status surface
    pub async fn statistics(&self) -> Result<serde_json::Value> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM documents
             WHERE deleted_at IS NULL GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut by_status = serde_json::Map::new();
        let mut total = 0i64;
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            total += n;
            by_status.insert(status, serde_json::json!(n));
        }

        let totals = sqlx::query(
            "SELECT COALESCE(SUM(word_count), 0)::BIGINT AS words,
                    COALESCE(SUM(chunk_count), 0)::BIGINT AS chunks,
                    COALESCE(SUM(file_size), 0)::BIGINT AS bytes
             FROM documents WHERE deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(serde_json::json!({
            "total_documents": total,
            "by_status": by_status,
            "total_words": totals.get::<i64, _>("words"),
            "total_chunks": totals.get::<i64, _>("chunks"),
            "total_bytes": totals.get::<i64, _>("bytes"),
        }))
    }

    // ================= chunks =================

    /// Remove prior chunks so a re-run starts clean; vector points are
    /// overwritten by deterministic ids and need no delete here.
    pub async fn delete_chunks(&self, document_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM parent_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist parent chunks; returns parent_index -> row id
    pub async fn save_parents(
        &self,
        document_id: Uuid,
        parents: &[crate::chunker::ParentChunk],
    ) -> Result<HashMap<usize, Uuid>> {
        let mut ids = HashMap::with_capacity(parents.len());
        for parent in parents {
            let id = Uuid::new_v5(
                &document_id,
                format!("parent:{}", parent.parent_index).as_bytes(),
            );
            sqlx::query(
                "INSERT INTO parent_chunks
                   (id, document_id, parent_index, text, char_start, char_end, word_count)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO UPDATE
                   SET text = EXCLUDED.text, char_start = EXCLUDED.char_start,
                       char_end = EXCLUDED.char_end, word_count = EXCLUDED.word_count",
            )
            .bind(id)
            .bind(document_id)
            .bind(parent.parent_index as i32)
            .bind(&parent.text)
            .bind(parent.char_start as i32)
            .bind(parent.char_end as i32)
            .bind(parent.word_count as i32)
            .execute(&self.pool)
            .await?;
            ids.insert(parent.parent_index, id);
        }
        Ok(ids)
    }

    pub async fn save_children(&self, document_id: Uuid, records: &[ChildRecord]) -> Result<()> {
        for record in records {
            sqlx::query(
                "INSERT INTO document_chunks
                   (id, document_id, parent_chunk_id, chunk_index, child_index,
                    text, char_start, char_end, word_count)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (id) DO UPDATE
                   SET text = EXCLUDED.text, char_start = EXCLUDED.char_start,
                       char_end = EXCLUDED.char_end, word_count = EXCLUDED.word_count",
            )
            .bind(record.id)
            .bind(document_id)
            .bind(record.parent_chunk_id)
            .bind(record.chunk_index)
            .bind(record.child_index)
            .bind(&record.text)
            .bind(record.char_start)
            .bind(record.char_end)
            .bind(record.word_count)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn count_chunks(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM document_chunks dc
             JOIN documents d ON dc.document_id = d.id
             WHERE d.deleted_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// One page of live chunks joined with document metadata, in the
    /// stable migration order.
    pub async fn fetch_chunk_batch(&self, offset: i64, limit: i64) -> Result<Vec<MigrationChunk>> {
        Ok(sqlx::query_as::<_, MigrationChunk>(
            "SELECT dc.id, dc.document_id, dc.chunk_index, dc.child_index,
                    dc.parent_chunk_id, dc.text,
                    d.filename AS document_name, d.space_id,
                    COALESCE(cat.name, 'Allgemein') AS category_name
             FROM document_chunks dc
             JOIN documents d ON dc.document_id = d.id
             LEFT JOIN document_categories cat ON d.category_id = cat.id
             WHERE d.deleted_at IS NULL
             ORDER BY dc.document_id, dc.chunk_index
             OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Every live chunk as `(id, text)` for a BM25 rebuild
    pub async fn chunks_for_rebuild(&self) -> Result<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            "SELECT dc.id, dc.text FROM document_chunks dc
             JOIN documents d ON dc.document_id = d.id
             WHERE d.deleted_at IS NULL
             ORDER BY dc.document_id, dc.chunk_index",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Uuid, _>("id"), r.get::<String, _>("text")))
            .collect())
    }

    // ================= spaces, categories, similarity =================

    pub async fn space_info(&self, document_id: Uuid) -> SpaceInfo {
        let row = sqlx::query(
            "SELECT d.space_id, ks.name AS space_name, ks.slug AS space_slug
             FROM documents d
             LEFT JOIN knowledge_spaces ks ON d.space_id = ks.id
             WHERE d.id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => SpaceInfo {
                space_id: row.get("space_id"),
                space_name: row
                    .try_get::<Option<String>, _>("space_name")
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
                space_slug: row
                    .try_get::<Option<String>, _>("space_slug")
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
            },
            _ => SpaceInfo::default(),
        }
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM document_categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("name")).collect())
    }

    pub async fn category_id_by_name(&self, name: &str) -> Result<Option<i32>> {
        let row = sqlx::query("SELECT id FROM document_categories WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i32, _>("id")))
    }

    /// Upsert a similarity pair in canonical order (smaller id first)
    pub async fn save_similarity(&self, a: Uuid, b: Uuid, score: f32, method: &str) -> Result<()> {
        if a == b {
            return Err(Error::InvalidRequest("self-similarity pair".into()));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        sqlx::query(
            "INSERT INTO document_similarities (document_a, document_b, score, method)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (document_a, document_b)
             DO UPDATE SET score = EXCLUDED.score, computed_at = NOW()",
        )
        .bind(first)
        .bind(second)
        .bind(score)
        .bind(method)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Similar documents for the API, joined with their titles
    pub async fn similar_documents(&self, id: Uuid) -> Result<Vec<serde_json::Value>> {
        let rows = sqlx::query(
            "SELECT CASE WHEN s.document_a = $1 THEN s.document_b ELSE s.document_a END AS other_id,
                    s.score, d.filename, d.title
             FROM document_similarities s
             JOIN documents d
               ON d.id = CASE WHEN s.document_a = $1 THEN s.document_b ELSE s.document_a END
             WHERE (s.document_a = $1 OR s.document_b = $1) AND d.deleted_at IS NULL
             ORDER BY s.score DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                serde_json::json!({
                    "document_id": r.get::<Uuid, _>("other_id"),
                    "score": r.get::<f32, _>("score"),
                    "filename": r.get::<String, _>("filename"),
                    "title": r.get::<Option<String>, _>("title"),
                })
            })
            .collect())
    }
}
