//! Page-oriented text extraction for uploaded documents.
//!
//! Turns raw file bytes into a list of pages so front-matter pages can be
//! detected and dropped before chunking. The content type is derived from
//! the file extension:
//!
//! | Extension | Pages |
//! |-----------|-------|
//! | `.pdf` | `pdf-extract` output split on form feeds |
//! | `.docx` | `word/document.xml` text, split on explicit page breaks |
//! | `.pptx` | one page per slide |
//! | `.txt`, `.md` | UTF-8 text split on form feeds |
//!
//! PDFs also yield the non-empty fields of their document information
//! dictionary (title, author, subject, ...), read with `lopdf`. Missing or
//! unreadable info is not an error.
//!
//! Extraction never panics; every failure is a [`QaError::Extraction`].

use std::io::Read;
use std::path::Path;

use lopdf::Object;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;

use docqa_core::models::Metadata;
use docqa_core::{QaError, QaResult};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const FORM_FEED: char = '\u{000C}';

/// Extractor output: page texts in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    pub content_type: &'static str,
    /// Document-level fields; only non-empty values.
    pub metadata: Metadata,
}

/// PDF info dictionary keys and the metadata names they are stored under.
const PDF_INFO_FIELDS: &[(&[u8], &str)] = &[
    (b"Title", "title"),
    (b"Author", "author"),
    (b"Subject", "subject"),
    (b"Keywords", "keywords"),
    (b"Creator", "creator"),
    (b"Producer", "producer"),
    (b"CreationDate", "creation_date"),
    (b"ModDate", "mod_date"),
];

/// Bytes + filename → pages.
///
/// Implementations are synchronous; the ingestion pipeline runs them on
/// the blocking thread pool.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], filename: &str) -> QaResult<ExtractedText>;
}

/// Extension-dispatching extractor for PDF, DOCX, PPTX, and plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> QaResult<ExtractedText> {
        let content_type = content_type_for(filename).ok_or_else(|| {
            QaError::extraction(format!("unsupported file type: {}", filename))
        })?;
        let (pages, metadata) = match content_type {
            MIME_PDF => (extract_pdf(bytes)?, pdf_metadata(bytes)),
            MIME_DOCX => (extract_docx(bytes)?, Metadata::new()),
            MIME_PPTX => (extract_pptx(bytes)?, Metadata::new()),
            _ => (extract_plain(bytes)?, Metadata::new()),
        };
        Ok(ExtractedText {
            pages,
            content_type,
            metadata,
        })
    }
}

/// MIME type for a supported file extension (case-insensitive).
pub fn content_type_for(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        "txt" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

fn split_form_feeds(text: &str) -> Vec<String> {
    text.split(FORM_FEED).map(str::to_string).collect()
}

fn extract_pdf(bytes: &[u8]) -> QaResult<Vec<String>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| QaError::extraction(format!("PDF extraction failed: {}", e)))?;
    Ok(split_form_feeds(&text))
}

/// Non-empty info dictionary fields plus the `format` (`"PDF 1.7"`).
pub fn pdf_metadata(bytes: &[u8]) -> Metadata {
    let mut meta = Metadata::new();
    let Ok(doc) = lopdf::Document::load_mem(bytes) else {
        return meta;
    };
    if !doc.version.is_empty() {
        meta.insert("format".into(), Value::from(format!("PDF {}", doc.version)));
    }

    let info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_object(*id).ok(),
        Ok(obj) => Some(obj),
        Err(_) => None,
    };
    let Some(Object::Dictionary(info)) = info else {
        return meta;
    };
    for &(key, name) in PDF_INFO_FIELDS {
        let value = match info.get(key) {
            Ok(Object::String(raw, _)) => decode_pdf_string(raw),
            _ => continue,
        };
        let value = value.trim();
        if !value.is_empty() {
            meta.insert(name.into(), Value::from(value));
        }
    }
    meta
}

/// UTF-16BE when BOM-prefixed, otherwise byte-per-char (PDFDocEncoding's
/// printable range matches Latin-1).
fn decode_pdf_string(raw: &[u8]) -> String {
    match raw {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => raw.iter().map(|&b| b as char).collect(),
    }
}

fn extract_plain(bytes: &[u8]) -> QaResult<Vec<String>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| QaError::extraction(format!("file is not valid UTF-8: {}", e)))?;
    Ok(split_form_feeds(text))
}

fn ooxml_err<E: std::fmt::Display>(e: E) -> QaError {
    QaError::extraction(format!("OOXML extraction failed: {}", e))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> QaResult<Vec<u8>> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= max_bytes {
        return Err(ooxml_err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> QaResult<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_pages(&doc_xml)
}

fn is_page_break(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"br"
        && e.attributes().any(|a| {
            a.as_ref()
                .map(|a| a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page")
                .unwrap_or(false)
        })
}

/// `<w:t>` runs joined per paragraph; `<w:br w:type="page"/>` starts a new page.
fn docx_pages(xml: &[u8]) -> QaResult<Vec<String>> {
    let mut pages = Vec::new();
    let mut page = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                page.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => page.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if is_page_break(&e) => {
                pages.push(std::mem::take(&mut page));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    pages.push(page);
    Ok(pages)
}

fn extract_pptx(bytes: &[u8]) -> QaResult<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut pages = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        pages.push(extract_a_t_elements(&xml)?);
    }
    Ok(pages)
}

fn extract_a_t_elements(xml: &[u8]) -> QaResult<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("Manual.PDF"), Some(MIME_PDF));
        assert_eq!(content_type_for("notes.md"), Some(MIME_MARKDOWN));
        assert_eq!(content_type_for("sheet.xlsx"), None);
        assert_eq!(content_type_for("noext"), None);
    }

    #[test]
    fn unsupported_type_is_extraction_error() {
        let err = DocumentExtractor.extract(b"foo", "data.bin").unwrap_err();
        assert!(matches!(err, QaError::Extraction(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = DocumentExtractor.extract(b"not a pdf", "a.pdf").unwrap_err();
        assert!(matches!(err, QaError::Extraction(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = DocumentExtractor.extract(b"not a zip", "a.docx").unwrap_err();
        assert!(matches!(err, QaError::Extraction(_)));
    }

    #[test]
    fn plain_text_pages_split_on_form_feed() {
        let out = DocumentExtractor
            .extract(b"page one\x0cpage two", "a.txt")
            .unwrap();
        assert_eq!(out.pages, vec!["page one", "page two"]);
        assert_eq!(out.content_type, MIME_TEXT);
    }

    fn pdf_with_info(info: lopdf::Dictionary) -> Vec<u8> {
        use lopdf::{dictionary, Document};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(info);
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn pdf_info_fields_become_metadata() {
        use lopdf::dictionary;

        let mut title_utf16 = vec![0xFE, 0xFF];
        for unit in "Manuel de la pompe".encode_utf16() {
            title_utf16.extend_from_slice(&unit.to_be_bytes());
        }
        let bytes = pdf_with_info(lopdf::dictionary! {
            "Title" => Object::String(title_utf16, lopdf::StringFormat::Hexadecimal),
            "Author" => Object::string_literal("Ops Team"),
            "Subject" => Object::string_literal("  "),
            "Trapped" => "False",
        });

        let meta = pdf_metadata(&bytes);
        assert_eq!(meta["title"], "Manuel de la pompe");
        assert_eq!(meta["author"], "Ops Team");
        assert_eq!(meta["format"], "PDF 1.5");
        assert!(!meta.contains_key("subject"));
        assert!(!meta.contains_key("keywords"));
    }

    #[test]
    fn unreadable_pdf_has_no_metadata() {
        assert!(pdf_metadata(b"not a pdf").is_empty());
    }

    #[test]
    fn docx_page_breaks() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>First page</w:t></w:r></w:p>
            <w:p><w:r><w:br w:type="page"/><w:t>Second page</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let out = DocumentExtractor.extract(&bytes, "a.docx").unwrap();
        assert_eq!(out.pages.len(), 2);
        assert!(out.pages[0].contains("First page"));
        assert!(out.pages[1].contains("Second page"));
    }

    #[test]
    fn pptx_one_page_per_slide_in_order() {
        let slide = |t: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:t>{t}</a:t></p:sld>"#);
        let s1 = slide("one");
        let s2 = slide("two");
        let s10 = slide("ten");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        let out = DocumentExtractor.extract(&bytes, "deck.pptx").unwrap();
        assert_eq!(out.pages, vec!["one", "two", "ten"]);
    }
}
