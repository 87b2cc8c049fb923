//! Document ingest pipeline (C8)
//!
//! Periodic object-store scans feed content-addressed rows: reject
//! oversized files with an audit row, dedup by content hash, resume
//! pending rows in place, and drive the chunker and dual-index writer.
//! A document that keeps failing stops retrying at the retry budget.

use crate::db::NewDocument;
use crate::writer::IndexMeta;
use crate::Indexer;
use aegis_common::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Failed documents stop retrying at this count
pub const MAX_RETRIES: i32 = 3;
/// The status error ring keeps this many entries
const ERROR_RING: usize = 20;

/// Live snapshot of the pipeline, served by `GET /status`
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestStatus {
    pub running: bool,
    pub last_scan: Option<chrono::DateTime<Utc>>,
    pub documents_processed: u64,
    pub documents_pending: u64,
    pub documents_failed: u64,
    pub current_document: Option<String>,
    pub errors: Vec<IngestError>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestError {
    pub file: String,
    pub error: String,
    pub timestamp: chrono::DateTime<Utc>,
}

pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn file_hash(path: &str, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{path}:{size}").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

fn mime_type_of(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

impl Indexer {
    /// One full scan over the object store
    pub async fn scan_and_index(&self) -> Result<()> {
        let objects = self.store.list().await?;
        let mut pending = 0u64;

        for object in objects {
            let path = object.location.to_string();
            match self.process_object(&path, object.size as u64).await {
                Ok(true) => {}
                Ok(false) => pending += 1,
                Err(e) => {
                    error!("Error processing {}: {}", path, e);
                    pending += 1;
                }
            }
        }

        {
            let mut status = self.status.lock();
            status.documents_pending = pending;
            status.last_scan = Some(Utc::now());
        }
        info!("Scan and index cycle completed");
        Ok(())
    }

    /// Process one object; Ok(true) means indexed or already done
    async fn process_object(&self, path: &str, size: u64) -> Result<bool> {
        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        let extension = extension_of(&filename);
        if !crate::parsers::is_supported(&extension) {
            debug!("Skipping unsupported file: {}", filename);
            return Ok(true);
        }

        let file_hash = file_hash(path, size);

        // Size gate before download: strictly greater than the limit
        // rejects, equality is accepted.
        let limit = self.config.max_file_size_bytes();
        if size > limit {
            return self.reject_oversize(path, &filename, &extension, size, &file_hash).await;
        }

        let data = self.store.fetch(&object_store::path::Path::from(path)).await?;
        let content_hash = content_hash(&data);

        // Dedup and resume by content hash first.
        if let Some(existing) = self.db.by_content_hash(&content_hash).await? {
            match existing.status.as_str() {
                "indexed" => {
                    info!("Document already indexed (content match): {}", filename);
                    return Ok(true);
                }
                "failed" if existing.retry_count >= MAX_RETRIES => {
                    debug!(
                        "Document {} exhausted its retry budget ({}), skipping",
                        filename, existing.retry_count
                    );
                    return Ok(true);
                }
                // pending, processing (stale run), or failed with
                // budget left: index into the same row.
                _ => {
                    info!("Found existing document, will index: {}", filename);
                    return self
                        .index_into_row(existing.id, &data, &filename, &extension)
                        .await
                        .map(|_| true);
                }
            }
        }

        // Path-based resume: same path and size, changed or unknown
        // content.
        if let Some(existing) = self.db.by_file_hash(&file_hash).await? {
            match existing.status.as_str() {
                "indexed" => {
                    debug!("Document already indexed: {}", filename);
                    return Ok(true);
                }
                "failed" if existing.retry_count >= MAX_RETRIES => {
                    return Ok(true);
                }
                _ => {
                    info!("Found pending document by path, will index: {}", filename);
                    let mut updates = serde_json::Map::new();
                    updates.insert("status".into(), serde_json::json!("pending"));
                    self.db.update_fields(existing.id, &updates).await?;
                    return self
                        .index_into_row(existing.id, &data, &filename, &extension)
                        .await
                        .map(|_| true);
                }
            }
        }

        // First sight of this content: create the row, then index.
        let text = self.parse_with_ocr(&data, &filename, &extension).await?;
        let metadata = crate::metadata::extract(&data, &filename, &extension, &text);
        let doc_id = self
            .db
            .create(&NewDocument {
                filename: filename.clone(),
                original_filename: filename.clone(),
                file_path: path.to_string(),
                file_size: data.len() as i64,
                mime_type: mime_type_of(&filename),
                file_extension: extension.clone(),
                content_hash,
                file_hash,
                status: "pending".into(),
                title: metadata.title.clone(),
                author: metadata.author.clone(),
                language: metadata.language.clone(),
                page_count: metadata.page_count,
                word_count: metadata.word_count,
                char_count: metadata.char_count,
            })
            .await?;

        self.index_parsed(doc_id, &text, &filename, &metadata).await?;
        Ok(true)
    }

    async fn reject_oversize(
        &self,
        path: &str,
        filename: &str,
        extension: &str,
        size: u64,
        file_hash: &str,
    ) -> Result<bool> {
        let size_mb = size as f64 / (1024.0 * 1024.0);
        let limit_mb = self.config.max_file_size_mb;
        warn!(
            "File {} exceeds max size ({:.1}MB > {}MB), skipping. \
             Set DOCUMENT_MAX_SIZE_MB to increase the limit.",
            filename, size_mb, limit_mb
        );

        let message = format!("File size ({size_mb:.1}MB) exceeds {limit_mb}MB limit");
        match self.db.by_file_hash(file_hash).await? {
            Some(existing) if existing.retry_count >= MAX_RETRIES => Ok(true),
            Some(existing) => {
                self.db
                    .set_status(existing.id, "failed", Some(&message), None)
                    .await?;
                Ok(true)
            }
            None => {
                // Audit row: the rejection is visible in the listing.
                let doc_id = self
                    .db
                    .create(&NewDocument {
                        filename: filename.to_string(),
                        original_filename: filename.to_string(),
                        file_path: path.to_string(),
                        file_size: size as i64,
                        mime_type: mime_type_of(filename),
                        file_extension: extension.to_string(),
                        content_hash: file_hash.to_string(),
                        file_hash: file_hash.to_string(),
                        status: "pending".into(),
                        title: None,
                        author: None,
                        language: "de".into(),
                        page_count: None,
                        word_count: 0,
                        char_count: 0,
                    })
                    .await?;
                self.db.set_status(doc_id, "failed", Some(&message), None).await?;
                Ok(true)
            }
        }
    }

    /// Resume indexing into an existing row
    async fn index_into_row(
        &self,
        doc_id: Uuid,
        data: &[u8],
        filename: &str,
        extension: &str,
    ) -> Result<()> {
        let result: Result<()> = async {
            let text = self.parse_with_ocr(data, filename, extension).await?;
            let metadata = crate::metadata::extract(data, filename, extension, &text);
            self.index_parsed(doc_id, &text, filename, &metadata).await
        }
        .await;

        if let Err(e) = &result {
            self.mark_failed(doc_id, filename, e).await;
        }
        result
    }

    /// Shared indexing tail once text and metadata exist
    async fn index_parsed(
        &self,
        doc_id: Uuid,
        text: &str,
        filename: &str,
        metadata: &crate::metadata::DocumentMetadata,
    ) -> Result<()> {
        {
            let mut status = self.status.lock();
            status.current_document = Some(filename.to_string());
        }

        let result: Result<()> = async {
            self.db.set_status(doc_id, "processing", None, None).await?;

            // Category, summary, topics
            let mut category = "Allgemein".to_string();
            let mut updates = serde_json::Map::new();
            if self.config.enable_ai_analysis {
                info!("Running AI analysis for {}", filename);
                let categories = self.db.categories().await.unwrap_or_default();
                let analysis = self
                    .analyzer
                    .analyze(text, filename, metadata.title.as_deref(), &categories)
                    .await;
                if let Some(summary) = &analysis.summary {
                    updates.insert("summary".into(), serde_json::json!(summary));
                }
                if !analysis.key_topics.is_empty() {
                    updates.insert("key_topics".into(), serde_json::json!(analysis.key_topics));
                }
                if let Some(name) = &analysis.category {
                    if let Some(category_id) = self.db.category_id_by_name(name).await? {
                        updates.insert("category_id".into(), serde_json::json!(category_id));
                        category = name.clone();
                    }
                }
            } else {
                let topics = crate::metadata::extract_key_topics(text, 10);
                if !topics.is_empty() {
                    updates.insert("key_topics".into(), serde_json::json!(topics));
                }
            }
            if !updates.is_empty() {
                self.db.update_fields(doc_id, &updates).await?;
            }

            let space = self.db.space_info(doc_id).await;
            let meta = IndexMeta {
                filename: filename.to_string(),
                title: metadata
                    .title
                    .clone()
                    .unwrap_or_else(|| filename.to_string()),
                language: metadata.language.clone(),
                category,
                space,
            };

            let chunk_count = self.writer.index_document(doc_id, text, &meta).await?;
            self.db
                .set_status(doc_id, "indexed", None, Some(chunk_count as i32))
                .await?;
            let mut updates = serde_json::Map::new();
            updates.insert(
                "embedding_model".into(),
                serde_json::json!(self.embeddings.model()),
            );
            self.db.update_fields(doc_id, &updates).await?;

            {
                let mut status = self.status.lock();
                status.documents_processed += 1;
            }
            info!(
                "Successfully indexed document: {} ({} chunks)",
                filename, chunk_count
            );

            if self.config.enable_similarity {
                if let Err(e) = self.writer.link_similar(doc_id).await {
                    warn!("Similarity calculation failed for {}: {}", filename, e);
                }
            }
            Ok(())
        }
        .await;

        {
            let mut status = self.status.lock();
            status.current_document = None;
        }
        if let Err(e) = &result {
            self.mark_failed(doc_id, filename, e).await;
        }
        result
    }

    async fn parse_with_ocr(
        &self,
        data: &[u8],
        filename: &str,
        extension: &str,
    ) -> Result<String> {
        let text = crate::parsers::parse(data, extension)?;
        if extension == ".pdf" && crate::ocr::needs_ocr(&text) {
            info!("Sparse PDF text for {}, routing through OCR", filename);
            match self.ocr.extract_pdf(data).await {
                Some(ocr_text) => return Ok(ocr_text),
                None => {
                    warn!("No OCR engine available, accepting sparse text for {}", filename);
                }
            }
        }
        Ok(text)
    }

    async fn mark_failed(&self, doc_id: Uuid, filename: &str, error: &aegis_common::Error) {
        error!("Error processing {}: {}", filename, error);
        if let Err(e) = self
            .db
            .set_status(doc_id, "failed", Some(&error.to_string()), None)
            .await
        {
            error!("Failed to record failure for {}: {}", filename, e);
        }
        let mut status = self.status.lock();
        status.documents_failed += 1;
        status.errors.push(IngestError {
            file: filename.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        let overflow = status.errors.len().saturating_sub(ERROR_RING);
        if overflow > 0 {
            status.errors.drain(..overflow);
        }
    }

    /// Operator deletion: fan out to all three stores, then tombstone
    pub async fn delete_document(&self, doc_id: Uuid) -> Result<bool> {
        let Some(document) = self.db.get(doc_id).await? else {
            return Ok(false);
        };

        self.vector.delete_document(doc_id).await?;
        self.store.delete(&document.file_path).await;
        self.db.soft_delete(doc_id).await?;
        info!("Deleted document: {}", doc_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_hash_identically() {
        let a = content_hash(b"same bytes");
        let b = content_hash(b"same bytes");
        assert_eq!(a, b);
        assert_ne!(a, content_hash(b"other bytes"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn file_hash_covers_path_and_size() {
        assert_eq!(file_hash("a/b.pdf", 100), file_hash("a/b.pdf", 100));
        assert_ne!(file_hash("a/b.pdf", 100), file_hash("a/b.pdf", 101));
        assert_ne!(file_hash("a/b.pdf", 100), file_hash("a/c.pdf", 100));
    }

    #[test]
    fn extension_extraction_lowercases() {
        assert_eq!(extension_of("Bericht.PDF"), ".pdf");
        assert_eq!(extension_of("notes.md"), ".md");
        assert_eq!(extension_of("no_extension"), "");
    }
}
