//! Metadata extraction and language detection
//!
//! Per-format extraction of title, author, page counts, and word/char
//! counts, plus the small bag-of-words German/English heuristic. The
//! default language is German.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Extracted document metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: String,
    pub page_count: Option<i32>,
    pub word_count: i32,
    pub char_count: i32,
    pub keywords: Vec<String>,
    pub preview: String,
}

const GERMAN_MARKERS: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "mit", "für", "auf", "ein", "eine", "von", "zu",
    "den", "im", "werden", "bei", "oder", "auch", "sind",
];

const ENGLISH_MARKERS: &[&str] = &[
    "the", "and", "is", "of", "to", "in", "that", "it", "for", "with", "as", "on", "at", "this",
    "are", "be", "by", "from",
];

/// Extract metadata for a parsed document. `text` is the full parsed
/// text; `data` is used for format-specific headers (PDF info
/// dictionary, Markdown front matter).
pub fn extract(data: &[u8], filename: &str, extension: &str, text: &str) -> DocumentMetadata {
    let mut metadata = DocumentMetadata {
        language: "de".to_string(),
        ..Default::default()
    };

    match extension {
        ".pdf" => extract_pdf(data, &mut metadata),
        ".docx" => extract_docx(data, &mut metadata),
        ".md" | ".markdown" => extract_markdown(text, &mut metadata),
        _ => {}
    }

    metadata.char_count = text.chars().count() as i32;
    metadata.word_count = text.split_whitespace().count() as i32;
    metadata.preview = text.chars().take(2000).collect();

    if metadata.title.as_deref().map(str::is_empty).unwrap_or(true) {
        metadata.title = Some(title_from_filename(filename));
    }
    if !metadata.preview.is_empty() {
        metadata.language = detect_language(&metadata.preview).to_string();
    }

    metadata
}

fn extract_pdf(data: &[u8], metadata: &mut DocumentMetadata) {
    let Ok(document) = lopdf::Document::load_mem(data) else {
        debug!("PDF info dictionary unavailable");
        return;
    };
    metadata.page_count = Some(document.get_pages().len() as i32);

    let Ok(info_ref) = document.trailer.get(b"Info") else {
        return;
    };
    let Ok(info) = info_ref
        .as_reference()
        .and_then(|id| document.get_dictionary(id))
    else {
        return;
    };

    let read_string = |key: &[u8]| -> Option<String> {
        info.get(key)
            .ok()
            .and_then(|o| o.as_str().ok())
            .map(|s| String::from_utf8_lossy(s).trim().to_string())
            .filter(|s| !s.is_empty())
    };

    metadata.title = read_string(b"Title");
    metadata.author = read_string(b"Author");
    if let Some(keywords) = read_string(b"Keywords") {
        metadata.keywords = keywords
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
    }
}

/// Read docProps/core.xml from the DOCX package: title, creator, and
/// keywords live there.
fn extract_docx(data: &[u8], metadata: &mut DocumentMetadata) {
    use quick_xml::events::Event;
    use std::io::Read;

    let Ok(mut archive) = zip::ZipArchive::new(std::io::Cursor::new(data)) else {
        return;
    };
    let mut core_xml = String::new();
    let Ok(mut file) = archive.by_name("docProps/core.xml") else {
        debug!("DOCX has no core properties part");
        return;
    };
    if file.read_to_string(&mut core_xml).is_err() {
        return;
    }

    let mut reader = quick_xml::Reader::from_reader(core_xml.as_bytes());
    let mut buf = Vec::new();
    let mut current: Option<&'static str> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current = match e.name().as_ref() {
                    b"dc:title" => Some("title"),
                    b"dc:creator" => Some("creator"),
                    b"cp:keywords" => Some("keywords"),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) => {
                if let (Some(field), Ok(value)) = (current, t.unescape()) {
                    let value = value.trim().to_string();
                    if value.is_empty() {
                        continue;
                    }
                    match field {
                        "title" => metadata.title = Some(value),
                        "creator" => metadata.author = Some(value),
                        "keywords" => {
                            metadata.keywords = value
                                .split([',', ';'])
                                .map(|k| k.trim().to_string())
                                .filter(|k| !k.is_empty())
                                .collect();
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
}

fn extract_markdown(text: &str, metadata: &mut DocumentMetadata) {
    // Optional YAML front matter between --- fences
    if let Some(rest) = text.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---") {
            for line in rest[..end].lines() {
                if let Some(value) = line.strip_prefix("title:") {
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if !value.is_empty() {
                        metadata.title = Some(value.to_string());
                    }
                } else if let Some(value) = line.strip_prefix("author:") {
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if !value.is_empty() {
                        metadata.author = Some(value.to_string());
                    }
                }
            }
        }
    }

    // First heading as title when front matter had none
    if metadata.title.is_none() {
        metadata.title = text
            .lines()
            .find_map(|l| l.strip_prefix("# "))
            .map(|t| t.trim().to_string());
    }
}

fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    let cleaned: String = stem
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let result = if collapsed.is_empty() {
        filename.to_string()
    } else {
        collapsed
    };
    result.chars().take(200).collect()
}

/// Bag-of-words language heuristic; German wins ties (the appliance's
/// corpus is predominantly German).
pub fn detect_language(text: &str) -> &'static str {
    let mut german = 0usize;
    let mut english = 0usize;
    for token in text
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .take(500)
    {
        if GERMAN_MARKERS.contains(&token.as_str()) {
            german += 1;
        }
        if ENGLISH_MARKERS.contains(&token.as_str()) {
            english += 1;
        }
    }
    if english > german {
        "en"
    } else {
        "de"
    }
}

const STOPWORDS: &[&str] = &[
    // German
    "aber", "alle", "auch", "auf", "aus", "bei", "das", "dass", "dem", "den", "der", "des", "die",
    "durch", "ein", "eine", "einem", "einen", "einer", "eines", "für", "haben", "hat", "ist",
    "kann", "mit", "nach", "nicht", "noch", "nur", "oder", "sich", "sind", "über", "und", "vom",
    "von", "vor", "war", "werden", "wird", "wie", "zum", "zur", "zu",
    // English
    "about", "after", "also", "and", "are", "been", "but", "for", "from", "has", "have", "his",
    "its", "more", "not", "other", "than", "that", "the", "their", "they", "this", "was", "were",
    "which", "will", "with", "would",
];

/// TF-based topic extraction used when AI analysis is disabled
pub fn extract_key_topics(text: &str, max_topics: usize) -> Vec<String> {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let mut frequencies: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for token in text
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| t.chars().count() >= 4)
        .map(|t| t.to_lowercase())
    {
        if stopwords.contains(token.as_str()) {
            continue;
        }
        *frequencies.entry(token).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(max_topics)
        .map(|(word, _)| word)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn german_text_is_detected() {
        let text = "Der Vertrag ist mit allen Parteien abgestimmt und wird von der \
                    Geschäftsführung nicht beanstandet.";
        assert_eq!(detect_language(text), "de");
    }

    #[test]
    fn english_text_is_detected() {
        let text = "The agreement was signed by all parties and will be reviewed \
                    by the board with their counsel.";
        assert_eq!(detect_language(text), "en");
    }

    #[test]
    fn ambiguous_text_defaults_to_german() {
        assert_eq!(detect_language("Lorem ipsum dolor sit amet"), "de");
    }

    #[test]
    fn filename_title_cleanup() {
        assert_eq!(
            title_from_filename("vertrags-entwurf_final_v2.pdf"),
            "vertrags entwurf final v2"
        );
    }

    #[test]
    fn markdown_front_matter_title_wins() {
        let text = "---\ntitle: \"Betriebsanleitung\"\nauthor: QA\n---\n# Anderer Titel\n\nInhalt";
        let metadata = extract(text.as_bytes(), "datei.md", ".md", text);
        assert_eq!(metadata.title.as_deref(), Some("Betriebsanleitung"));
        assert_eq!(metadata.author.as_deref(), Some("QA"));
    }

    #[test]
    fn markdown_heading_fallback() {
        let text = "# Wartungsplan\n\nInhalt des Dokuments";
        let metadata = extract(text.as_bytes(), "datei.md", ".md", text);
        assert_eq!(metadata.title.as_deref(), Some("Wartungsplan"));
    }

    #[test]
    fn topics_skip_stopwords_and_short_words() {
        let text = "Wartung Wartung Wartung Netzwerk Netzwerk der die das und ist mit ab";
        let topics = extract_key_topics(text, 5);
        assert_eq!(topics[0], "wartung");
        assert!(topics.contains(&"netzwerk".to_string()));
        assert!(!topics.iter().any(|t| t == "der" || t == "und"));
    }
}
