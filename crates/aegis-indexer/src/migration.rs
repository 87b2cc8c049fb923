//! Resumable embedding migration (C11)
//!
//! Re-embeds the corpus into a new vector collection with the target
//! dimension, then swaps the canonical name onto it. Three phases —
//! chunks, swap, extras — checkpointed to a JSON file with atomic
//! write-then-rename on every batch, resumable at any phase boundary.
//! The checkpoint is deleted only on full success.

use crate::db::DocumentDb;
use crate::embeddings::EmbeddingClient;
use crate::vector::VectorStore;
use aegis_common::{Config, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Migration aborts once this many batch errors accumulate
const MAX_TOTAL_ERRORS: u32 = 10;

/// Operator-selected phase subsets
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationFlags {
    pub dry_run: bool,
    pub resume: bool,
    pub skip_swap: bool,
    pub swap_only: bool,
    pub spaces_only: bool,
}

/// Durable progress record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_offset: i64,
    pub phase: String,
    #[serde(default)]
    pub completed_ids: Vec<String>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Checkpoint {
            last_offset: 0,
            phase: "chunks".into(),
            completed_ids: Vec::new(),
        }
    }
}

impl Checkpoint {
    pub fn load(path: &Path) -> Result<Option<Checkpoint>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw)?;
        info!(
            "Loaded checkpoint: phase={}, last_offset={}",
            checkpoint.phase, checkpoint.last_offset
        );
        Ok(Some(checkpoint))
    }

    /// Atomic write-then-rename so a crash never leaves a torn file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn remove(path: &Path) {
        if path.exists() && std::fs::remove_file(path).is_ok() {
            info!("Checkpoint file removed");
        }
    }
}

pub struct Migration {
    config: Config,
    db: DocumentDb,
    vector: VectorStore,
    embeddings: EmbeddingClient,
    new_collection: String,
}

impl Migration {
    pub async fn new(config: Config) -> Result<Self> {
        let pool = aegis_ledger::connect_pool(&config.database).await?;
        let db = DocumentDb::new(pool);
        let vector = VectorStore::connect(&config.vector)?;
        let embeddings = EmbeddingClient::new(config.embedding.clone());
        let new_collection = format!("{}_v2", config.vector.collection);
        Ok(Migration {
            config,
            db,
            vector,
            embeddings,
            new_collection,
        })
    }

    /// Pre-flight: every collaborating service must answer
    pub async fn check_services(&self) -> Result<()> {
        info!("Checking service availability...");

        let health = self.embeddings.health().await?;
        let reported = health["vector_size"].as_u64().unwrap_or(0);
        info!(
            "Embedding service: OK (model={}, vector_size={})",
            health["model"].as_str().unwrap_or("unknown"),
            reported
        );
        if reported != 0 && reported != self.config.vector.vector_size {
            warn!(
                "Embedding service vector_size={} != expected {}",
                reported, self.config.vector.vector_size
            );
        }

        let total = self.db.count_chunks().await?;
        info!("PostgreSQL: OK ({} chunks in document_chunks)", total);

        // Any collection call proves the vector store answers.
        self.vector.collection_exists(&self.new_collection).await?;
        info!("Vector store: OK");
        Ok(())
    }

    /// Run the selected phases
    pub async fn run(&self, flags: MigrationFlags) -> Result<()> {
        let checkpoint_path = self.config.migration.checkpoint_file.clone();

        if flags.swap_only {
            self.swap_collections().await?;
            info!("Collection swap complete!");
            return Ok(());
        }
        if flags.spaces_only {
            self.migrate_extras().await?;
            info!("Auxiliary embedding migration complete!");
            return Ok(());
        }

        let mut checkpoint = if flags.resume {
            Checkpoint::load(&checkpoint_path)?.unwrap_or_default()
        } else {
            Checkpoint::default()
        };

        if checkpoint.phase == "chunks" {
            if !flags.dry_run {
                self.ensure_new_collection().await?;
            }
            self.migrate_chunks(&mut checkpoint, &checkpoint_path, flags.dry_run)
                .await?;
        }

        if checkpoint.phase == "swap" {
            if flags.skip_swap || flags.dry_run {
                info!("Skipping collection swap");
            } else {
                self.swap_collections().await?;
            }
            checkpoint.phase = "extras".into();
            checkpoint.save(&checkpoint_path)?;
        }

        if checkpoint.phase == "extras" {
            if flags.dry_run {
                info!("[DRY RUN] Would re-embed auxiliary columns");
            } else {
                self.migrate_extras().await?;
            }
        }

        if !flags.dry_run {
            Checkpoint::remove(&checkpoint_path);
        }
        info!("Migration complete");
        Ok(())
    }

    async fn ensure_new_collection(&self) -> Result<()> {
        if self.vector.collection_exists(&self.new_collection).await? {
            info!(
                "Collection '{}' already exists, will use it",
                self.new_collection
            );
            return Ok(());
        }
        info!(
            "Creating collection '{}' (vector_size={})",
            self.new_collection, self.config.vector.vector_size
        );
        self.vector
            .create_collection(&self.new_collection, self.config.vector.vector_size)
            .await
    }

    /// Phase 1: page through chunks, re-embed, upsert with the same
    /// ids and payload; checkpoint after every batch.
    async fn migrate_chunks(
        &self,
        checkpoint: &mut Checkpoint,
        checkpoint_path: &Path,
        dry_run: bool,
    ) -> Result<()> {
        let total = self.db.count_chunks().await?;
        let batch_size = self.config.migration.batch_size;
        let mut offset = checkpoint.last_offset;
        if offset > 0 {
            info!("Resuming from offset {}/{}", offset, total);
        }
        info!("Migrating {} chunks (batch_size={})...", total, batch_size);

        let started = Instant::now();
        let mut migrated = 0i64;
        let mut errors = 0u32;

        while offset < total {
            let batch = self.db.fetch_chunk_batch(offset, batch_size).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len() as i64;

            if dry_run {
                info!("[DRY RUN] Would embed {} texts at offset {}", batch_len, offset);
            } else if let Err(e) = self.migrate_batch(&batch).await {
                error!("Error at offset {}: {}", offset, e);
                errors += 1;
                if errors > MAX_TOTAL_ERRORS {
                    error!("Too many errors, stopping migration");
                    checkpoint.last_offset = offset;
                    checkpoint.save(checkpoint_path)?;
                    return Err(e);
                }
                // Retry this batch on the next loop iteration.
                continue;
            }

            migrated += batch_len;
            offset += batch_len;
            checkpoint.last_offset = offset;
            checkpoint.save(checkpoint_path)?;

            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                migrated as f64 / elapsed
            } else {
                0.0
            };
            info!(
                "Progress: {}/{} ({}%) | Rate: {:.1} chunks/s",
                offset,
                total,
                offset * 100 / total.max(1),
                rate
            );
        }

        info!(
            "Chunk migration complete: {} chunks in {:.1}s ({} errors)",
            migrated,
            started.elapsed().as_secs_f64(),
            errors
        );
        checkpoint.phase = "swap".into();
        checkpoint.save(checkpoint_path)?;
        Ok(())
    }

    async fn migrate_batch(&self, batch: &[crate::db::MigrationChunk]) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;

        let mut points = Vec::with_capacity(batch.len());
        for (chunk, vector) in batch.iter().zip(vectors) {
            let text: String = chunk.text.chars().take(500).collect();
            let payload = serde_json::json!({
                "document_id": chunk.document_id.to_string(),
                "document_name": chunk.document_name,
                "chunk_index": chunk.chunk_index,
                "child_index": chunk.child_index,
                "parent_chunk_id": chunk.parent_chunk_id.to_string(),
                "text": text,
                "space_id": chunk.space_id.map(|id| id.to_string()),
                "category": chunk.category_name,
            });
            points.push(VectorStore::make_point(chunk.id, vector, payload)?);
        }
        self.vector.upsert_into(&self.new_collection, points).await
    }

    /// Phase 2: verify-new, delete-old, create-alias — in that frozen
    /// order. Failure after the delete leaves the new collection
    /// reachable under its physical name.
    pub async fn swap_collections(&self) -> Result<()> {
        info!("Swapping collections...");
        let canonical = &self.config.vector.collection;

        let new_count = self.vector.count(&self.new_collection).await?;
        info!("New collection has {} points", new_count);
        if new_count == 0 {
            return Err(Error::VectorStore(
                "new collection is empty, aborting swap".into(),
            ));
        }

        if self.vector.collection_exists(canonical).await? {
            let old_count = self.vector.count(canonical).await.unwrap_or(0);
            info!("Old collection has {} points", old_count);
            if (new_count as f64) < old_count as f64 * 0.8 {
                warn!(
                    "New collection ({}) has significantly fewer points than old ({}). \
                     Continuing anyway...",
                    new_count, old_count
                );
            }
            info!("Deleting old collection '{}'...", canonical);
            self.vector.delete_collection(canonical).await?;
        }

        info!(
            "Creating alias '{}' -> '{}'...",
            canonical, self.new_collection
        );
        if let Err(e) = self.vector.create_alias(canonical, &self.new_collection).await {
            error!(
                "Failed to create alias: {}. The new collection remains accessible as '{}'; \
                 update QDRANT_COLLECTION_NAME or retry with --swap-only.",
                e, self.new_collection
            );
            return Err(e);
        }

        info!(
            "Collection swap complete! '{}' now points to the {}d vectors",
            canonical, self.config.vector.vector_size
        );
        Ok(())
    }

    /// Phase 3: re-embed auxiliary embedding columns; a missing table
    /// is a no-op with an info log.
    pub async fn migrate_extras(&self) -> Result<()> {
        self.reembed_column(
            "knowledge_spaces",
            "description",
            "description_embedding",
        )
        .await?;
        self.reembed_column("company_context", "content", "content_embedding")
            .await?;
        Ok(())
    }

    async fn reembed_column(&self, table: &str, source: &str, target: &str) -> Result<()> {
        info!("Re-embedding {}.{}...", table, target);
        let rows = match sqlx::query(&format!(
            "SELECT id, {source} AS content FROM {table} WHERE {source} IS NOT NULL"
        ))
        .fetch_all(self.db.pool())
        .await
        {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("42P01") => {
                info!("Table {} does not exist, skipping", table);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if rows.is_empty() {
            info!("No {} rows with content found", table);
            return Ok(());
        }

        let texts: Vec<String> = rows.iter().map(|r| r.get::<String, _>("content")).collect();
        let vectors = self.embeddings.embed(&texts).await?;

        for (row, vector) in rows.iter().zip(vectors) {
            let id: uuid::Uuid = row.get("id");
            sqlx::query(&format!("UPDATE {table} SET {target} = $1 WHERE id = $2"))
                .bind(serde_json::to_value(&vector)?)
                .bind(id)
                .execute(self.db.pool())
                .await?;
        }
        info!("Re-embedded {} {} rows", rows.len(), table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn checkpoint_round_trips_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let checkpoint = Checkpoint {
            last_offset: 192,
            phase: "chunks".into(),
            completed_ids: vec!["a".into()],
        };
        checkpoint.save(&path).unwrap();
        // No stray temp file is left behind.
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded.last_offset, 192);
        assert_eq!(loaded.phase, "chunks");

        Checkpoint::remove(&path);
        assert!(!path.exists());
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let dir = tempdir().unwrap();
        assert!(Checkpoint::load(&dir.path().join("none.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn default_checkpoint_starts_at_chunks() {
        let checkpoint = Checkpoint::default();
        assert_eq!(checkpoint.phase, "chunks");
        assert_eq!(checkpoint.last_offset, 0);
    }
}
