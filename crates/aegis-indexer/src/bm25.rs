//! In-process BM25 keyword index with German-aware tokenization
//!
//! The index persists as `params.index.json` (inverted index snapshot)
//! and `chunk_ids.json` (id mapping) side by side; both are replaced
//! atomically via write-then-rename. Incremental appends only extend
//! the id mapping — search always runs against the last rebuilt
//! snapshot, and the rebuild endpoint recomputes the inverted index
//! from the database.

use aegis_common::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const K1: f32 = 1.5;
const B: f32 = 0.75;

const INDEX_FILE: &str = "params.index.json";
const IDS_FILE: &str = "chunk_ids.json";

/// German suffixes stripped during stemming, longest first
const SUFFIXES: &[&str] = &[
    "ungen", "heiten", "keiten", "ung", "heit", "keit", "end", "ern", "em", "en", "er", "es", "e",
    "n", "s",
];

/// The rebuilt, searchable snapshot
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    /// term -> [(position in `ids`, term frequency)]
    postings: HashMap<String, Vec<(u32, u32)>>,
    doc_lengths: Vec<u32>,
    ids: Vec<Uuid>,
}

impl Snapshot {
    fn avg_len(&self) -> f32 {
        if self.doc_lengths.is_empty() {
            return 0.0;
        }
        self.doc_lengths.iter().sum::<u32>() as f32 / self.doc_lengths.len() as f32
    }
}

struct Inner {
    snapshot: Option<Snapshot>,
    chunk_ids: Vec<Uuid>,
}

/// BM25 index guarded by a single writer lock
pub struct Bm25Index {
    path: PathBuf,
    inner: RwLock<Inner>,
}

/// Lowercase alphanumeric tokens with light German suffix stripping
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| stem(&t.to_lowercase()))
        .collect()
}

fn stem(token: &str) -> String {
    for suffix in SUFFIXES {
        if let Some(stripped) = token.strip_suffix(suffix) {
            if stripped.chars().count() >= 3 {
                return stripped.to_string();
            }
        }
    }
    token.to_string()
}

impl Bm25Index {
    /// Open the index directory, loading any persisted snapshot
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut inner = Inner {
            snapshot: None,
            chunk_ids: Vec::new(),
        };

        match read_json::<Vec<Uuid>>(&path.join(IDS_FILE)) {
            Ok(Some(ids)) => inner.chunk_ids = ids,
            Ok(None) => info!("No existing BM25 index found on disk"),
            Err(e) => warn!("Failed to load BM25 id mapping: {}", e),
        }
        match read_json::<Snapshot>(&path.join(INDEX_FILE)) {
            Ok(Some(snapshot)) => {
                info!("BM25 index loaded from disk: {} chunks", snapshot.ids.len());
                inner.snapshot = Some(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load BM25 index from disk: {}", e),
        }

        Bm25Index {
            path,
            inner: RwLock::new(inner),
        }
    }

    /// Incremental append: record new chunk ids only. The inverted
    /// index is refreshed by the next rebuild.
    pub fn append_ids(&self, ids: &[Uuid]) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.chunk_ids.extend_from_slice(ids);
        write_json_atomic(&self.path.join(IDS_FILE), &inner.chunk_ids)?;
        debug!(
            "Added {} chunks to BM25 mapping (rebuild needed for search)",
            ids.len()
        );
        Ok(ids.len())
    }

    /// Full rebuild from `(id, text)` pairs; persists index and id
    /// mapping atomically.
    pub fn rebuild(&self, chunks: &[(Uuid, String)]) -> Result<usize> {
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(chunks.len());
        let mut ids = Vec::with_capacity(chunks.len());

        for (position, (id, text)) in chunks.iter().enumerate() {
            let tokens = tokenize(text);
            doc_lengths.push(tokens.len() as u32);
            ids.push(*id);

            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            for (token, tf) in frequencies {
                postings.entry(token).or_default().push((position as u32, tf));
            }
        }

        let snapshot = Snapshot {
            postings,
            doc_lengths,
            ids: ids.clone(),
        };

        write_json_atomic(&self.path.join(INDEX_FILE), &snapshot)?;
        write_json_atomic(&self.path.join(IDS_FILE), &ids)?;

        let mut inner = self.inner.write();
        inner.chunk_ids = ids;
        inner.snapshot = Some(snapshot);
        info!("BM25 index built with {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Search the last rebuilt snapshot
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(Uuid, f32)> {
        let inner = self.inner.read();
        let Some(snapshot) = &inner.snapshot else {
            return Vec::new();
        };
        let n = snapshot.ids.len();
        if n == 0 {
            return Vec::new();
        }
        let avg_len = snapshot.avg_len();

        let mut scores: HashMap<u32, f32> = HashMap::new();
        for token in tokenize(query) {
            let Some(entries) = snapshot.postings.get(&token) else {
                continue;
            };
            let df = entries.len() as f32;
            let idf = ((n as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (position, tf) in entries {
                let len = snapshot.doc_lengths[*position as usize] as f32;
                let tf = *tf as f32;
                let score = idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * len / avg_len));
                *scores.entry(*position).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(Uuid, f32)> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(position, score)| (snapshot.ids[position as usize], score))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);
        ranked
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().snapshot.is_some()
    }

    /// Number of chunk ids known to the mapping (appends included)
    pub fn size(&self) -> usize {
        self.inner.read().chunk_ids.len()
    }

    /// Number of chunks in the searchable snapshot
    pub fn indexed_size(&self) -> usize {
        self.inner
            .read()
            .snapshot
            .as_ref()
            .map(|s| s.ids.len())
            .unwrap_or(0)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent dir for {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunks(texts: &[&str]) -> Vec<(Uuid, String)> {
        texts.iter().map(|t| (Uuid::new_v4(), t.to_string())).collect()
    }

    #[test]
    fn stemming_strips_common_suffixes() {
        assert_eq!(stem("rechnungen"), "rechn");
        assert_eq!(stem("sicherheit"), "sicher");
        // Short stems stay untouched.
        assert_eq!(stem("en"), "en");
    }

    #[test]
    fn rebuild_then_search_finds_relevant_chunk() {
        let dir = tempdir().unwrap();
        let index = Bm25Index::load(dir.path());
        let data = chunks(&[
            "Der Vertrag regelt die Kündigung des Arbeitsverhältnisses",
            "Rechnungen sind innerhalb von 14 Tagen zu bezahlen",
            "Das Protokoll beschreibt die Netzwerkkonfiguration",
        ]);
        index.rebuild(&data).unwrap();

        let results = index.search("Kündigung Vertrag", 10);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, data[0].0);
    }

    #[test]
    fn incremental_append_does_not_change_search() {
        let dir = tempdir().unwrap();
        let index = Bm25Index::load(dir.path());
        let data = chunks(&["Alpha Dokument über Serverwartung"]);
        index.rebuild(&data).unwrap();

        let appended = Uuid::new_v4();
        index.append_ids(&[appended]).unwrap();

        // The appended id is tracked but not searchable yet.
        assert_eq!(index.size(), 2);
        assert_eq!(index.indexed_size(), 1);
        let results = index.search("Serverwartung", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, data[0].0);
    }

    #[test]
    fn persisted_index_survives_reload() {
        let dir = tempdir().unwrap();
        let data = chunks(&["Wartungsfenster am Wochenende", "Sicherheitsrichtlinie für Passwörter"]);
        {
            let index = Bm25Index::load(dir.path());
            index.rebuild(&data).unwrap();
        }
        let reloaded = Bm25Index::load(dir.path());
        assert!(reloaded.is_ready());
        assert_eq!(reloaded.size(), 2);
        let results = reloaded.search("Sicherheitsrichtlinie", 5);
        assert_eq!(results[0].0, data[1].0);
    }

    #[test]
    fn files_live_side_by_side() {
        let dir = tempdir().unwrap();
        let index = Bm25Index::load(dir.path());
        index.rebuild(&chunks(&["irgendein Text"])).unwrap();
        assert!(dir.path().join("params.index.json").exists());
        assert!(dir.path().join("chunk_ids.json").exists());
    }

    #[test]
    fn empty_index_searches_empty() {
        let dir = tempdir().unwrap();
        let index = Bm25Index::load(dir.path());
        assert!(!index.is_ready());
        assert!(index.search("anything", 5).is_empty());
    }
}
