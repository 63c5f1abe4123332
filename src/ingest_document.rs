//! Built-in `document_ingest` plugin for binary document formats.
//!
//! Extracts plain text from PDF and OOXML files (docx, pptx, xlsx), then
//! chunks it exactly like `text_ingest`. OOXML parsing reads the relevant
//! archive entries with size bounds, so a malformed or hostile file fails
//! the ingest instead of exhausting memory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::ingest_text::{chunk_into_documents, chunking_parameters, ChunkingParams};
use crate::models::IngestedDocument;
use crate::plugin::{file_extension, IngestPlugin, PluginKind};

/// Maximum decompressed bytes read from a single archive entry.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets processed per workbook.
const MAX_SHEETS: usize = 100;
/// Maximum cells processed per worksheet.
const MAX_CELLS_PER_SHEET: usize = 100_000;

/// Ingests PDF and Office documents.
pub struct DocumentIngest;

#[async_trait]
impl IngestPlugin for DocumentIngest {
    fn name(&self) -> &str {
        "document_ingest"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::FileIngest
    }

    fn description(&self) -> &str {
        "Extract text from PDF and Office documents and split it into chunks"
    }

    fn supported_file_types(&self) -> &[&str] {
        &["pdf", "docx", "pptx", "xlsx"]
    }

    fn parameters(&self) -> Value {
        Value::Object(chunking_parameters(1000))
    }

    async fn ingest(&self, file_path: &Path, params: &Value) -> Result<Vec<IngestedDocument>> {
        let bytes = std::fs::read(file_path)
            .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
        let extension = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(file_extension)
            .unwrap_or_default();

        let text = extract_document_text(&bytes, &extension)?;
        let chunking = ChunkingParams::from_params(params)?;
        chunk_into_documents(&text, file_path, params, &chunking)
    }
}

/// Dispatches extraction by file extension.
pub fn extract_document_text(bytes: &[u8], extension: &str) -> Result<String> {
    match extension {
        "pdf" => pdf_text(bytes),
        "docx" => docx_text(bytes),
        "pptx" => pptx_text(bytes),
        "xlsx" => xlsx_text(bytes),
        other => bail!("Unsupported document type: '{}'", other),
    }
}

fn pdf_text(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| anyhow::anyhow!("PDF text extraction failed: {}", e))
}

fn docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Not a valid docx archive")?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    body_text(&xml)
}

fn pptx_text(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Not a valid pptx archive")?;

    let mut slides: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slides.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut parts = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_entry(&mut archive, &name)?;
        let text = body_text(&xml)?;
        if !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
    Ok(parts.join("\n\n"))
}

/// Collects `<t>` run text from a WordprocessingML or DrawingML body,
/// breaking lines at paragraph ends. The local names are the same in both
/// vocabularies (`w:t`/`w:p` and `a:t`/`a:p`).
fn body_text(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"br" {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("Malformed document XML: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn xlsx_text(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Not a valid xlsx archive")?;
    let shared = shared_strings(&mut archive)?;

    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheets.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut parts = Vec::new();
    for name in sheets.into_iter().take(MAX_SHEETS) {
        let xml = read_entry(&mut archive, &name)?;
        let text = sheet_cells(&xml, &shared)?;
        if !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
    Ok(parts.join("\n\n"))
}

/// The workbook's shared-string table, or empty when the part is absent.
fn shared_strings(archive: &mut zip::ZipArchive<Cursor<&[u8]>>) -> Result<Vec<String>> {
    let xml = match archive.by_name("xl/sharedStrings.xml") {
        Ok(entry) => read_bounded(entry, "xl/sharedStrings.xml")?,
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(e) => return Err(anyhow::anyhow!("Failed to open xl/sharedStrings.xml: {}", e)),
    };

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_text = false;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_text = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("Malformed shared strings XML: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Cell values of one worksheet: rows become lines, cells join with spaces.
/// Shared-string cells resolve through the table; other cells keep their
/// raw value.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut cell_is_shared = false;
    let mut row_has_cells = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_is_shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_value => {
                let raw = t.unescape().unwrap_or_default();
                let value = raw.trim();
                let resolved = if cell_is_shared {
                    value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .cloned()
                } else if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                if let Some(text) = resolved {
                    if row_has_cells {
                        out.push(' ');
                    }
                    out.push_str(&text);
                    row_has_cells = true;
                    cell_count += 1;
                }
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => cell_is_shared = false,
                b"row" => {
                    if row_has_cells {
                        out.push('\n');
                        row_has_cells = false;
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("Malformed worksheet XML: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .with_context(|| format!("Archive entry not found: {}", name))?;
    read_bounded(entry, name)
}

fn read_bounded(entry: zip::read::ZipFile<'_>, name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .with_context(|| format!("Failed to read archive entry: {}", name))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        bail!("Archive entry {} exceeds size limit ({} bytes)", name, MAX_ENTRY_BYTES);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = extract_document_text(b"data", "csv").unwrap_err();
        assert!(err.to_string().contains("Unsupported document type"));
    }

    #[test]
    fn invalid_pdf_is_an_error() {
        assert!(extract_document_text(b"not a pdf", "pdf").is_err());
    }

    #[test]
    fn invalid_archive_is_an_error() {
        let err = extract_document_text(b"not a zip", "docx").unwrap_err();
        assert!(err.to_string().contains("docx archive"));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> world</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = extract_document_text(&bytes, "docx").unwrap();
        assert_eq!(text, "Hello world\nSecond paragraph\n");
    }

    #[test]
    fn docx_without_document_xml_is_an_error() {
        let bytes = zip_with(&[("word/other.xml", "<x/>")]);
        let err = extract_document_text(&bytes, "docx").unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn pptx_slides_sort_numerically() {
        let slide = |text: &str| {
            format!(
                r#"<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
<a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#,
                text
            )
        };
        let s1 = slide("First");
        let s2 = slide("Second");
        let s10 = slide("Tenth");
        // Insertion order deliberately scrambled; slide10 must sort after slide2.
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
        ]);
        let text = extract_document_text(&bytes, "pptx").unwrap();
        assert_eq!(text, "First\n\nSecond\n\nTenth");
    }

    #[test]
    fn xlsx_resolves_shared_strings_and_numbers() {
        let shared = r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<si><t>name</t></si><si><t>widget</t></si></sst>"#;
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<sheetData>
<row><c t="s"><v>0</v></c><c><v>42</v></c></row>
<row><c t="s"><v>1</v></c><c><v>3.5</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = extract_document_text(&bytes, "xlsx").unwrap();
        assert_eq!(text, "name 42\nwidget 3.5");
    }

    #[test]
    fn xlsx_without_shared_strings_still_reads_numbers() {
        let sheet = r#"<worksheet><sheetData>
<row><c><v>1</v></c><c><v>2</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_with(&[("xl/worksheets/sheet1.xml", sheet)]);
        let text = extract_document_text(&bytes, "xlsx").unwrap();
        assert_eq!(text, "1 2");
    }

    #[tokio::test]
    async fn plugin_chunks_docx_content() {
        let doc = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body><w:p><w:r><w:t>Quarterly report body text.</w:t></w:r></w:p></w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        std::fs::write(&path, &bytes).unwrap();

        let plugin = DocumentIngest;
        let params = crate::plugin::validate_params(&plugin.parameters(), &serde_json::json!({}))
            .unwrap();
        let docs = plugin.ingest(&path, &params).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.contains("Quarterly report"));
        assert_eq!(docs[0].metadata["extension"], "docx");
        assert_eq!(docs[0].metadata["chunk_count"], 1);
    }
}
