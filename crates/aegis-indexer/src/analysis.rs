//! AI document analysis
//!
//! When enabled, the local LLM classifies the document into one of the
//! known categories and produces a summary plus key topics. Analysis
//! failure never fails indexing — the TF-based topic extractor is the
//! fallback.

use crate::metadata::extract_key_topics;
use aegis_common::{LlmConfig, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Text beyond this is not worth the inference latency
const ANALYSIS_TEXT_LIMIT: usize = 6000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub category: Option<String>,
    pub category_confidence: f32,
    pub summary: Option<String>,
    pub key_topics: Vec<String>,
}

pub struct DocumentAnalyzer {
    llm: LlmConfig,
    model: String,
    client: reqwest::Client,
}

impl DocumentAnalyzer {
    pub fn new(llm: LlmConfig) -> Self {
        DocumentAnalyzer {
            llm,
            model: std::env::var("DOCUMENT_INDEXER_AI_MODEL")
                .unwrap_or_else(|_| "qwen2.5:7b".to_string()),
            client: reqwest::Client::new(),
        }
    }

    /// Analyze a document; falls back to TF topics on any failure
    pub async fn analyze(
        &self,
        text: &str,
        filename: &str,
        title: Option<&str>,
        categories: &[String],
    ) -> AnalysisResult {
        match self.analyze_with_llm(text, filename, title, categories).await {
            Ok(result) => result,
            Err(e) => {
                warn!("AI analysis failed for {}, using TF topics: {}", filename, e);
                AnalysisResult {
                    key_topics: extract_key_topics(text, 10),
                    ..Default::default()
                }
            }
        }
    }

    async fn analyze_with_llm(
        &self,
        text: &str,
        filename: &str,
        title: Option<&str>,
        categories: &[String],
    ) -> Result<AnalysisResult> {
        let excerpt: String = text.chars().take(ANALYSIS_TEXT_LIMIT).collect();
        let prompt = format!(
            "Du bist ein Dokumenten-Analyst. Analysiere das folgende Dokument und \
             antworte ausschließlich mit einem JSON-Objekt mit den Feldern \
             \"category\" (eine aus: {}), \"category_confidence\" (0.0-1.0), \
             \"summary\" (2-3 Sätze, Sprache des Dokuments) und \
             \"key_topics\" (maximal 10 Stichwörter).\n\n\
             Dateiname: {}\nTitel: {}\n\nDokument:\n{}",
            categories.join(", "),
            filename,
            title.unwrap_or("unbekannt"),
            excerpt
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.llm.base_url()))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json",
            }))
            .timeout(Duration::from_secs(120))
            .send()
            .await?
            .error_for_status()
            .map_err(aegis_common::Error::from)?;

        let body: serde_json::Value = response.json().await?;
        let raw = body["response"]
            .as_str()
            .ok_or_else(|| aegis_common::Error::Parse("LLM response missing text".into()))?;
        let mut result: AnalysisResult = serde_json::from_str(raw)
            .map_err(|e| aegis_common::Error::Parse(format!("LLM returned non-JSON: {e}")))?;

        // Only accept categories we actually know.
        if let Some(category) = &result.category {
            if !categories.iter().any(|c| c == category) {
                info!("LLM proposed unknown category '{}', dropping", category);
                result.category = None;
                result.category_confidence = 0.0;
            }
        }
        if result.key_topics.is_empty() {
            result.key_topics = extract_key_topics(text, 10);
        }
        Ok(result)
    }
}
