use std::io::{Cursor, Read};

use regex::Regex;
use thiserror::Error;
use zip::ZipArchive;

use crate::models::document::{Document, DocumentMetadata};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    Unsupported(String),
    #[error("Could not determine the file type")]
    UnknownType,
    #[error("Failed to read archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read PDF: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("Malformed document: {0}")]
    Malformed(String),
}

/// Pick the MIME type for an upload. A declared content type wins unless it
/// is the generic octet-stream, otherwise the filename extension decides.
pub fn resolve_mime_type(content_type: Option<&str>, filename: Option<&str>) -> Option<String> {
    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    if declared.is_some() {
        return declared;
    }

    let filename = filename?;
    if filename.to_ascii_lowercase().ends_with(".md") {
        return Some(MIME_MARKDOWN.to_string());
    }
    mime_guess::from_path(filename)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// Extract plain text from file bytes of the given MIME type.
pub fn extract_text(bytes: &[u8], mime_type: &str) -> Result<String, ExtractError> {
    match mime_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_TEXT | MIME_MARKDOWN => Ok(decode_text(bytes)),
        MIME_CSV => extract_csv(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

/// Build a document from an uploaded file. Missing `name` and `mimeType`
/// metadata are filled from the upload itself.
pub fn document_from_upload(
    bytes: &[u8],
    content_type: Option<&str>,
    filename: Option<&str>,
    metadata: Option<DocumentMetadata>,
) -> Result<Document, ExtractError> {
    let mime_type = resolve_mime_type(content_type, filename).ok_or(ExtractError::UnknownType)?;
    let text = extract_text(bytes, &mime_type)?;

    let mut metadata = metadata.unwrap_or_default();
    metadata.merge_missing(DocumentMetadata {
        name: filename.map(str::to_string),
        mime_type: Some(mime_type),
        ..Default::default()
    });

    Ok(Document {
        id: None,
        text,
        metadata: Some(metadata),
    })
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut text = String::new();
    for record in reader.records() {
        let record = record?;
        let fields: Vec<&str> = record.iter().collect();
        text.push_str(&fields.join(" "));
        text.push('\n');
    }
    Ok(text)
}

/// Page texts in page order, separated by a blank line.
fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pdf = lopdf::Document::load_mem(bytes)?;
    let mut pages = Vec::new();
    for page_number in pdf.get_pages().into_keys() {
        let text = pdf.extract_text(&[page_number])?;
        let text = text.trim();
        if !text.is_empty() {
            pages.push(text.to_string());
        }
    }
    Ok(pages.join("\n\n"))
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String, ExtractError> {
    let mut entry = archive.by_name(name)?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let run = text_run_pattern("w")?;

    let paragraphs: Vec<String> = xml
        .split("</w:p>")
        .map(|p| collect_runs(&run, p, ""))
        .filter(|p| !p.is_empty())
        .collect();
    Ok(paragraphs.join("\n"))
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    let run = text_run_pattern("a")?;
    let mut text = String::new();
    for (_, name) in slides {
        let xml = read_entry(&mut archive, &name)?;
        let slide_text = collect_runs(&run, &xml, " ");
        if !slide_text.is_empty() {
            text.push_str(&slide_text);
            text.push('\n');
        }
    }
    Ok(text)
}

/// Matches `<ns:t>` text runs without catching `<ns:tab/>` or `<ns:tbl>`.
fn text_run_pattern(ns: &str) -> Result<Regex, ExtractError> {
    Regex::new(&format!(r"<{ns}:t(?:\s[^>]*)?>([^<]*)</{ns}:t>"))
        .map_err(|e| ExtractError::Malformed(e.to_string()))
}

fn collect_runs(run: &Regex, xml: &str, separator: &str) -> String {
    let runs: Vec<String> = run
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .collect();
    runs.join(separator).trim().to_string()
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_resolve_mime_type() {
        assert_eq!(
            resolve_mime_type(Some("text/plain; charset=utf-8"), None).as_deref(),
            Some(MIME_TEXT)
        );
        assert_eq!(
            resolve_mime_type(Some("application/octet-stream"), Some("notes.md")).as_deref(),
            Some(MIME_MARKDOWN)
        );
        assert_eq!(resolve_mime_type(None, Some("table.csv")).as_deref(), Some(MIME_CSV));
        assert_eq!(resolve_mime_type(None, Some("deck.pptx")).as_deref(), Some(MIME_PPTX));
        assert_eq!(resolve_mime_type(None, None), None);
    }

    #[test]
    fn test_plain_text_is_lossy() {
        let text = extract_text(b"caf\xC3\xA9 \xFF end", MIME_TEXT).unwrap();
        assert!(text.starts_with("café "));
        assert!(text.ends_with(" end"));
    }

    #[test]
    fn test_csv_joins_fields() {
        let text = extract_text(b"name,role\nAda,engineer\n\"Grace, H\",admiral\n", MIME_CSV).unwrap();
        assert_eq!(text, "name role\nAda engineer\nGrace, H admiral\n");
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:tab/><w:t>Fish &amp; chips</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let bytes = build_zip(&[("word/document.xml", xml)]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "Hello world\nFish & chips");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let bytes = build_zip(&[
            ("ppt/slides/slide10.xml", "<p:sld><a:t>Ten</a:t></p:sld>"),
            ("ppt/slides/slide2.xml", "<p:sld><a:t>Two</a:t><a:t>again</a:t></p:sld>"),
            ("ppt/slides/_rels/slide2.xml.rels", "<Relationships/>"),
        ]);
        let text = extract_text(&bytes, MIME_PPTX).unwrap();
        assert_eq!(text, "Two again\nTen\n");
    }

    #[test]
    fn test_pdf_pages_in_order() {
        let bytes = testing::build_pdf(&["Durian needs water", "Rice needs sun"]);
        let text = extract_text(&bytes, MIME_PDF).unwrap();
        let (first, second) = text.split_once("\n\n").unwrap();
        assert!(first.contains("Durian needs water"));
        assert!(second.contains("Rice needs sun"));
    }

    #[test]
    fn test_broken_pdf_is_an_error() {
        let err = extract_text(b"%PDF-1.4 truncated", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_unsupported_type() {
        let err = extract_text(b"\x89PNG\r\n", "image/png").unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(ref t) if t == "image/png"));
    }

    #[test]
    fn test_document_from_upload_fills_metadata() {
        let metadata = DocumentMetadata {
            name: Some("custom".to_string()),
            ..Default::default()
        };
        let doc = document_from_upload(b"hello", None, Some("a.txt"), Some(metadata)).unwrap();
        let meta = doc.metadata.unwrap();
        assert_eq!(doc.text, "hello");
        assert_eq!(meta.name.as_deref(), Some("custom"));
        assert_eq!(meta.mime_type.as_deref(), Some(MIME_TEXT));

        let err = document_from_upload(b"hello", None, Some("noext"), None).unwrap_err();
        assert!(matches!(err, ExtractError::UnknownType));
    }
}
