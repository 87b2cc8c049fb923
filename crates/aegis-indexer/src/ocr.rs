//! OCR fallback for scanned PDFs
//!
//! When text extraction comes back below the sanity floor, the pages
//! go through the first available engine from the configured priority
//! list. With no engine on the box the sparse text is accepted as-is.

use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Extraction below these floors routes the document through OCR
const MIN_TEXT_CHARS: usize = 50;
const MIN_ALPHABETIC_CHARS: usize = 25;

/// True when extracted text is too sparse to index directly
pub fn needs_ocr(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.len() < MIN_TEXT_CHARS {
        return true;
    }
    trimmed.chars().filter(|c| c.is_alphabetic()).count() < MIN_ALPHABETIC_CHARS
}

/// Shell-out OCR with engine auto-selection
pub struct OcrService {
    priority: Vec<String>,
    availability: tokio::sync::Mutex<HashMap<String, bool>>,
}

impl OcrService {
    pub fn new(priority: Vec<String>) -> Self {
        OcrService {
            priority,
            availability: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Run the PDF through the best available engine. `None` means no
    /// engine could produce text; the caller keeps the sparse text.
    pub async fn extract_pdf(&self, data: &[u8]) -> Option<String> {
        for engine in &self.priority {
            if !self.engine_available(engine).await {
                continue;
            }
            info!("Running OCR with engine: {}", engine);
            let result = match engine.as_str() {
                "ocrmypdf" => self.run_ocrmypdf(data).await,
                "tesseract" => self.run_tesseract(data).await,
                other => {
                    warn!("Unknown OCR engine in priority list: {}", other);
                    None
                }
            };
            match result {
                Some(text) if !text.trim().is_empty() => return Some(text),
                _ => warn!("OCR engine {} produced no text", engine),
            }
        }
        None
    }

    async fn engine_available(&self, engine: &str) -> bool {
        let mut cache = self.availability.lock().await;
        if let Some(known) = cache.get(engine) {
            return *known;
        }
        let probe_binary = match engine {
            // Tesseract needs the rasterizer too.
            "tesseract" => "pdftoppm",
            other => other,
        };
        let available = probe(probe_binary).await && probe(engine).await;
        if !available {
            info!("OCR engine {} not available on this host", engine);
        }
        cache.insert(engine.to_string(), available);
        available
    }

    async fn run_ocrmypdf(&self, data: &[u8]) -> Option<String> {
        let dir = tempfile::tempdir().ok()?;
        let input = dir.path().join("input.pdf");
        let output = dir.path().join("output.pdf");
        let sidecar = dir.path().join("sidecar.txt");
        tokio::fs::write(&input, data).await.ok()?;

        let status = tokio::time::timeout(
            Duration::from_secs(300),
            Command::new("ocrmypdf")
                .arg("--sidecar")
                .arg(&sidecar)
                .arg("--force-ocr")
                .arg("-l")
                .arg("deu+eng")
                .arg(&input)
                .arg(&output)
                .status(),
        )
        .await
        .ok()?
        .ok()?;
        if !status.success() {
            return None;
        }
        tokio::fs::read_to_string(&sidecar).await.ok()
    }

    async fn run_tesseract(&self, data: &[u8]) -> Option<String> {
        let dir = tempfile::tempdir().ok()?;
        let input = dir.path().join("input.pdf");
        tokio::fs::write(&input, data).await.ok()?;

        // Rasterize, then recognize page by page.
        let prefix = dir.path().join("page");
        let status = tokio::time::timeout(
            Duration::from_secs(120),
            Command::new("pdftoppm")
                .arg("-png")
                .arg("-r")
                .arg("150")
                .arg(&input)
                .arg(&prefix)
                .status(),
        )
        .await
        .ok()?
        .ok()?;
        if !status.success() {
            return None;
        }

        let mut pages: Vec<_> = std::fs::read_dir(dir.path())
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "png").unwrap_or(false))
            .collect();
        pages.sort();

        let mut text_parts = Vec::new();
        for page in pages {
            let output = tokio::time::timeout(
                Duration::from_secs(60),
                Command::new("tesseract")
                    .arg(&page)
                    .arg("stdout")
                    .arg("-l")
                    .arg("deu+eng")
                    .output(),
            )
            .await
            .ok()?
            .ok()?;
            if output.status.success() {
                text_parts.push(String::from_utf8_lossy(&output.stdout).into_owned());
            }
        }
        if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n\n"))
        }
    }
}

async fn probe(binary: &str) -> bool {
    tokio::time::timeout(
        Duration::from_secs(5),
        Command::new(binary).arg("--version").output(),
    )
    .await
    .map(|r| r.map(|o| o.status.success()).unwrap_or(false))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_text_needs_ocr() {
        assert!(needs_ocr(""));
        assert!(needs_ocr("   \n "));
        assert!(needs_ocr("123 456 789 000 111 222 333 444 555 666 777 888"));
    }

    #[test]
    fn dense_text_skips_ocr() {
        let text = "Dieser Vertrag regelt die Zusammenarbeit zwischen den Parteien \
                    und beschreibt alle wesentlichen Pflichten im Detail.";
        assert!(!needs_ocr(text));
    }

    #[test]
    fn boundary_sits_at_alphabetic_floor() {
        // Exactly 25 alphabetic chars and enough length passes.
        let text = format!("{} {}", "a".repeat(25), "1".repeat(40));
        assert!(!needs_ocr(&text));
        let text = format!("{} {}", "a".repeat(24), "1".repeat(40));
        assert!(needs_ocr(&text));
    }
}
