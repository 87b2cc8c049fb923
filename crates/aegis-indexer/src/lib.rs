//! Content-addressed document retrieval engine for the Aegis appliance
//!
//! Watches the object store, parses and deduplicates documents, chunks
//! them hierarchically, and fans out to the vector store, the
//! relational store, and the BM25 keyword index. A resumable offline
//! migration re-embeds the corpus into a new vector collection.

pub mod analysis;
pub mod api;
pub mod bm25;
pub mod chunker;
pub mod db;
pub mod embeddings;
pub mod ingest;
pub mod metadata;
pub mod migration;
pub mod ocr;
pub mod parsers;
pub mod store;
pub mod vector;
pub mod writer;

pub use ingest::{IngestStatus, MAX_RETRIES};

use aegis_common::{Config, IndexerConfig, Result};
use aegis_ledger::Ledger;
use analysis::DocumentAnalyzer;
use bm25::Bm25Index;
use db::DocumentDb;
use embeddings::EmbeddingClient;
use ocr::OcrService;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::DocumentStore;
use tracing::{error, info};
use vector::VectorStore;
use writer::DualIndexWriter;

/// The document indexer: scan loop, writer, and management surface
pub struct Indexer {
    pub(crate) config: IndexerConfig,
    pub(crate) db: DocumentDb,
    pub(crate) store: DocumentStore,
    pub(crate) vector: Arc<VectorStore>,
    pub(crate) bm25: Arc<Bm25Index>,
    pub(crate) embeddings: EmbeddingClient,
    pub(crate) analyzer: DocumentAnalyzer,
    pub(crate) ocr: OcrService,
    pub(crate) writer: DualIndexWriter,
    pub(crate) status: Mutex<IngestStatus>,
    scanning: AtomicBool,
}

impl Indexer {
    /// Connect all stores and prepare the canonical collection
    pub async fn new(config: &Config, ledger: Ledger) -> Result<Arc<Indexer>> {
        info!("Initializing document indexer...");

        let db = DocumentDb::new(ledger.pool().clone());
        let store = DocumentStore::new(&config.object_store)?;
        let vector = Arc::new(VectorStore::connect(&config.vector)?);
        vector.ensure_collection().await?;
        let bm25 = Arc::new(Bm25Index::load(&config.indexer.bm25_index_path));
        let embeddings = EmbeddingClient::new(config.embedding.clone());
        let analyzer = DocumentAnalyzer::new(config.llm.clone());
        let ocr = OcrService::new(config.indexer.ocr_engine_priority.clone());

        let writer = DualIndexWriter::new(
            db.clone(),
            vector.clone(),
            bm25.clone(),
            embeddings.clone(),
            config.indexer.clone(),
        );

        info!("Document indexer initialized");
        Ok(Arc::new(Indexer {
            config: config.indexer.clone(),
            db,
            store,
            vector,
            bm25,
            embeddings,
            analyzer,
            ocr,
            writer,
            status: Mutex::new(IngestStatus {
                running: true,
                ..Default::default()
            }),
            scanning: AtomicBool::new(false),
        }))
    }

    /// Spawn the periodic scan loop; scans are strictly sequential
    /// within the task.
    pub fn spawn_scan_loop(self: &Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let indexer = self.clone();
        info!("Starting document scan loop (interval: {}s)", interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                indexer.run_scan_once().await;
            }
        })
    }

    /// One-shot scan used by `POST /scan`; refuses to overlap a
    /// running scan.
    pub fn trigger_scan(self: &Arc<Self>) -> bool {
        if self.scanning.load(Ordering::SeqCst) {
            return false;
        }
        let indexer = self.clone();
        tokio::spawn(async move {
            indexer.run_scan_once().await;
        });
        true
    }

    async fn run_scan_once(&self) {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Err(e) = self.scan_and_index().await {
            error!("Scan error: {}", e);
        }
        self.scanning.store(false, Ordering::SeqCst);
    }

    /// Merged status: in-memory pipeline state, database statistics,
    /// and vector collection counters.
    pub async fn status_snapshot(&self) -> serde_json::Value {
        let status = self.status.lock().clone();
        let statistics = self.db.statistics().await.unwrap_or_else(|e| {
            serde_json::json!({ "error": e.to_string() })
        });
        let vector_status = match self.vector.count(self.vector.collection()).await {
            Ok(points) => serde_json::json!({
                "collection": self.vector.collection(),
                "points_count": points,
            }),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        serde_json::json!({
            "indexer": status,
            "statistics": statistics,
            "vector_store": vector_status,
            "bm25": {
                "ready": self.bm25.is_ready(),
                "tracked_chunks": self.bm25.size(),
                "indexed_chunks": self.bm25.indexed_size(),
            },
        })
    }

    /// Rebuild the BM25 inverted index from live chunks
    pub async fn rebuild_bm25(&self) -> Result<usize> {
        let chunks = self.db.chunks_for_rebuild().await?;
        self.bm25.rebuild(&chunks)
    }

    /// Semantic search returning top unique documents
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<serde_json::Value>> {
        let query_vector = self.embeddings.embed_one(query).await?;
        let results = self
            .vector
            .search(query_vector, (top_k * 4) as u64, None)
            .await?;

        let mut seen = std::collections::HashSet::new();
        let mut documents = Vec::new();
        for point in results {
            let Some(doc_id) = vector::payload_str(&point, "document_id")
                .and_then(|s| uuid::Uuid::parse_str(s).ok())
            else {
                continue;
            };
            if !seen.insert(doc_id) {
                continue;
            }
            documents.push(serde_json::json!({
                "document_id": doc_id,
                "document_name": vector::payload_str(&point, "document_name"),
                "title": vector::payload_str(&point, "title"),
                "preview": vector::payload_str(&point, "text"),
                "score": point.score,
            }));
            if documents.len() >= top_k {
                break;
            }
        }
        Ok(documents)
    }
}
