//! Document parsers for the supported formats
//!
//! PDF via text extraction (OCR fallback lives in `ocr`), DOCX via the
//! package XML (paragraphs plus pipe-joined table rows), Markdown kept
//! verbatim because its structure helps retrieval, and plain text with
//! an encoding ladder.

use aegis_common::{Error, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::debug;

/// Extensions the pipeline accepts
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".pdf", ".txt", ".md", ".markdown", ".docx"];

pub fn is_supported(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension)
}

/// Dispatch on extension
pub fn parse(data: &[u8], extension: &str) -> Result<String> {
    match extension {
        ".pdf" => parse_pdf(data),
        ".docx" => parse_docx(data),
        ".md" | ".markdown" => parse_markdown(data),
        ".txt" => parse_txt(data),
        other => Err(Error::Parse(format!("Unsupported file type: {other}"))),
    }
}

/// Extract text from a PDF
pub fn parse_pdf(data: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(data)
        .map_err(|e| Error::Parse(format!("PDF extraction failed: {e}")))?;
    Ok(text.trim().to_string())
}

/// Extract paragraphs and table rows from a DOCX package
pub fn parse_docx(data: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| Error::Parse(format!("DOCX is not a valid package: {e}")))?;
    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| Error::Parse(format!("DOCX missing document.xml: {e}")))?
        .read_to_string(&mut document_xml)
        .map_err(|e| Error::Parse(format!("DOCX document.xml unreadable: {e}")))?;

    let mut reader = Reader::from_reader(document_xml.as_bytes());
    let mut parts: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut row_cells: Vec<String> = Vec::new();
    let mut in_text = false;
    let mut in_table = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tbl" => in_table = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Parse(format!("DOCX text unescape: {e}")))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" if !in_table => {
                    if !paragraph.trim().is_empty() {
                        parts.push(paragraph.trim().to_string());
                    }
                    paragraph.clear();
                }
                b"w:tc" => {
                    row_cells.push(paragraph.trim().to_string());
                    paragraph.clear();
                }
                b"w:tr" => {
                    let row = row_cells.join(" | ");
                    if !row.trim().is_empty() {
                        parts.push(row);
                    }
                    row_cells.clear();
                }
                b"w:tbl" => in_table = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Parse(format!("DOCX XML error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    let full = parts.join("\n\n");
    debug!("Parsed DOCX: {} characters", full.len());
    Ok(full.trim().to_string())
}

/// Markdown keeps its formatting; headers and lists carry structure
/// that retrieval benefits from.
pub fn parse_markdown(data: &[u8]) -> Result<String> {
    parse_txt(data)
}

/// Plain text with an encoding ladder: strict UTF-8 first, then the
/// single-byte fallbacks (CP1252 strict, Latin-1 last — it accepts
/// any byte sequence).
pub fn parse_txt(data: &[u8]) -> Result<String> {
    if let Ok(text) = std::str::from_utf8(data) {
        return Ok(text.trim().to_string());
    }
    if let Some(text) =
        encoding_rs::WINDOWS_1252.decode_without_bom_handling_and_without_replacement(data)
    {
        return Ok(text.trim().to_string());
    }
    Ok(encoding_rs::mem::decode_latin1(data).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_text_round_trips() {
        let text = "Straße über Änderung";
        assert_eq!(parse_txt(text.as_bytes()).unwrap(), text);
    }

    #[test]
    fn latin1_text_is_decoded() {
        // "Straße" in Latin-1: ß = 0xDF
        let bytes = b"Stra\xdfe";
        assert_eq!(parse_txt(bytes).unwrap(), "Straße");
    }

    #[test]
    fn markdown_is_kept_verbatim() {
        let md = "# Titel\n\n- eins\n- zwei";
        assert_eq!(parse_markdown(md.as_bytes()).unwrap(), md);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(parse(b"data", ".exe").is_err());
        assert!(is_supported(".pdf"));
        assert!(!is_supported(".exe"));
    }
}
