//! Dual-index writer (C10)
//!
//! For one document: parents to relational storage, child embeddings
//! to the vector store, child rows to the database, child ids to the
//! BM25 mapping — in that order, all before the document is marked
//! indexed. Ids are deterministic (UUIDv5 of document id and global
//! index) so a re-run overwrites its own points and rows.

use crate::bm25::Bm25Index;
use crate::chunker::{self, ParentChunk};
use crate::db::{ChildRecord, DocumentDb, SpaceInfo};
use crate::embeddings::EmbeddingClient;
use crate::vector::{self, VectorStore};
use aegis_common::{Error, IndexerConfig, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Vector payload text is capped at this many characters
const PAYLOAD_TEXT_LIMIT: usize = 500;

/// Document-level metadata flowing into every child payload
#[derive(Debug, Clone, Default)]
pub struct IndexMeta {
    pub filename: String,
    pub title: String,
    pub language: String,
    pub category: String,
    pub space: SpaceInfo,
}

pub struct DualIndexWriter {
    db: DocumentDb,
    vector: Arc<VectorStore>,
    bm25: Arc<Bm25Index>,
    embeddings: EmbeddingClient,
    config: IndexerConfig,
}

impl DualIndexWriter {
    pub fn new(
        db: DocumentDb,
        vector: Arc<VectorStore>,
        bm25: Arc<Bm25Index>,
        embeddings: EmbeddingClient,
        config: IndexerConfig,
    ) -> Self {
        DualIndexWriter {
            db,
            vector,
            bm25,
            embeddings,
            config,
        }
    }

    /// Deterministic child point id
    pub fn child_id(document_id: Uuid, global_index: usize) -> Uuid {
        Uuid::new_v5(&document_id, format!("chunk:{global_index}").as_bytes())
    }

    /// Index one document end to end; returns the child chunk count
    pub async fn index_document(
        &self,
        document_id: Uuid,
        text: &str,
        meta: &IndexMeta,
    ) -> Result<usize> {
        let parents = chunker::chunk_hierarchical(
            text,
            self.config.parent_chunk_size,
            self.config.child_chunk_size,
            self.config.child_chunk_overlap,
        );
        if parents.is_empty() {
            warn!("No chunks generated for document {}", document_id);
            return Ok(0);
        }
        let total_children: usize = parents.iter().map(|p| p.children.len()).sum();
        info!(
            "Document {}: {} parent chunks, {} child chunks to index",
            document_id,
            parents.len(),
            total_children
        );

        // Re-runs start clean in the relational store; vector points
        // overwrite themselves through deterministic ids.
        self.db.delete_chunks(document_id).await?;
        let parent_ids = self.db.save_parents(document_id, &parents).await?;

        let mut child_records = Vec::with_capacity(total_children);
        let mut bm25_ids = Vec::with_capacity(total_children);

        for parent in &parents {
            let parent_db_id = *parent_ids
                .get(&parent.parent_index)
                .ok_or_else(|| Error::Indexing("parent id missing after save".into()))?;

            for batch in parent.children.chunks(self.embeddings.batch_size().max(1)) {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                let vectors = self.embeddings.embed(&texts).await?;

                let mut points = Vec::with_capacity(batch.len());
                for (child, vector) in batch.iter().zip(vectors) {
                    let chunk_id = Self::child_id(document_id, child.global_index);
                    let payload = self.child_payload(document_id, meta, parent, child, parent_db_id, total_children);
                    points.push(vector::VectorStore::make_point(chunk_id, vector, payload)?);

                    child_records.push(ChildRecord {
                        id: chunk_id,
                        parent_chunk_id: parent_db_id,
                        chunk_index: child.global_index as i32,
                        child_index: child.child_index as i32,
                        text: child.text.clone(),
                        char_start: child.char_start as i32,
                        char_end: child.char_end as i32,
                        word_count: child.word_count as i32,
                    });
                    bm25_ids.push(chunk_id);
                }
                self.vector.upsert(points).await?;
            }
        }

        self.db.save_children(document_id, &child_records).await?;

        // Keyword index last; failure is non-critical because the next
        // rebuild recomputes from the database anyway.
        if let Err(e) = self.bm25.append_ids(&bm25_ids) {
            warn!("BM25 index update failed (non-critical): {}", e);
        }

        info!(
            "Indexed {} child chunks for document {}",
            child_records.len(),
            document_id
        );
        Ok(child_records.len())
    }

    fn child_payload(
        &self,
        document_id: Uuid,
        meta: &IndexMeta,
        parent: &ParentChunk,
        child: &crate::chunker::ChildChunk,
        parent_db_id: Uuid,
        total_chunks: usize,
    ) -> serde_json::Value {
        let text: String = child.text.chars().take(PAYLOAD_TEXT_LIMIT).collect();
        serde_json::json!({
            "document_id": document_id.to_string(),
            "document_name": meta.filename,
            "chunk_index": child.global_index,
            "child_index": child.child_index,
            "parent_chunk_id": parent_db_id.to_string(),
            "parent_index": parent.parent_index,
            "total_chunks": total_chunks,
            "text": text,
            "title": meta.title,
            "category": meta.category,
            "language": meta.language,
            "space_id": meta.space.space_id.map(|id| id.to_string()),
            "space_name": meta.space.space_name,
            "space_slug": meta.space.space_slug,
            "indexed_at": Utc::now().timestamp() as f64,
        })
    }

    /// Similarity linking: query with one representative child vector,
    /// keep the best score per other document, persist the top 10.
    pub async fn link_similar(&self, document_id: Uuid) -> Result<usize> {
        let Some(query_vector) = self.vector.first_vector_of_document(document_id).await? else {
            debug!("No stored vector for document {}, skipping similarity", document_id);
            return Ok(0);
        };

        let results = self
            .vector
            .search(query_vector, 15, Some(self.config.similarity_threshold))
            .await?;

        let mut best: std::collections::HashMap<Uuid, f32> = std::collections::HashMap::new();
        for point in &results {
            let Some(other) = vector::payload_str(point, "document_id")
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            if other == document_id {
                continue;
            }
            let entry = best.entry(other).or_insert(0.0);
            if point.score > *entry {
                *entry = point.score;
            }
        }

        let mut ranked: Vec<(Uuid, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(10);

        for (other, score) in &ranked {
            self.db
                .save_similarity(document_id, *other, *score, "semantic")
                .await?;
        }
        if !ranked.is_empty() {
            info!(
                "Saved {} similarity relationships for document {}",
                ranked.len(),
                document_id
            );
        }
        Ok(ranked.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_ids_are_deterministic_and_distinct() {
        let doc = Uuid::new_v4();
        let a = DualIndexWriter::child_id(doc, 0);
        let b = DualIndexWriter::child_id(doc, 0);
        let c = DualIndexWriter::child_id(doc, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let other_doc = Uuid::new_v4();
        assert_ne!(a, DualIndexWriter::child_id(other_doc, 0));
    }
}
