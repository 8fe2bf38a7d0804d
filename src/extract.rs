//! Multi-format text extraction, dispatched by file name.
//!
//! Callers supply raw bytes plus the original file name; this module returns
//! plain UTF-8 text. ZIP archives are expanded and every supported entry is
//! extracted in archive order. A failing entry fails the whole archive.
//! Legacy `.xls` workbooks are read with `calamine`; the OOXML formats are
//! walked directly with `quick-xml`.

use std::io::Read;

use crate::models::file_extension;

/// Maximum sheets to process in a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Archives nested deeper than this are skipped.
const MAX_ARCHIVE_DEPTH: usize = 2;

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx", "pptx", "xls", "xlsx", "zip"];

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "yaml", "yml", "rst", "html", "htm", "xml",
    "log",
];

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Pdf(String),
    Ooxml(String),
    Spreadsheet(String),
    Archive(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(name) => write!(f, "unsupported file type: {}", name),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
            ExtractError::Spreadsheet(e) => write!(f, "spreadsheet extraction failed: {}", e),
            ExtractError::Archive(e) => write!(f, "archive extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// True if [`extract_text`] has a handler for this file name.
pub fn is_supported(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| supported_extensions().any(|s| s == ext))
        .unwrap_or(false)
}

/// Every lowercase extension [`extract_text`] handles.
pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
    DOCUMENT_EXTENSIONS
        .iter()
        .chain(PLAIN_TEXT_EXTENSIONS.iter())
        .copied()
}

/// Extract plain text from a file's bytes, choosing the format by extension.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    extract_at_depth(bytes, filename, 0)
}

fn extract_at_depth(bytes: &[u8], filename: &str, depth: usize) -> Result<String, ExtractError> {
    let ext = file_extension(filename).unwrap_or_default();
    match ext.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        "pptx" => extract_pptx(bytes),
        "xls" => extract_xls(bytes),
        "xlsx" => extract_xlsx(bytes),
        "zip" => extract_zip(bytes, depth),
        e if PLAIN_TEXT_EXTENSIONS.contains(&e) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Err(ExtractError::UnsupportedFormat(filename.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_zip(bytes: &[u8], depth: usize) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))?;

    let names: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/') && is_supported(n))
        .map(|s| s.to_string())
        .collect();

    let mut parts = Vec::new();
    for name in names {
        if depth + 1 >= MAX_ARCHIVE_DEPTH && file_extension(&name).as_deref() == Some("zip") {
            tracing::warn!(entry = %name, depth, "skipping archive nested too deep");
            continue;
        }
        let entry_bytes = read_zip_entry_bounded(&mut archive, &name, MAX_ZIP_ENTRY_BYTES)
            .map_err(|e| ExtractError::Archive(format!("{}: {}", name, e)))?;
        let text = extract_at_depth(&entry_bytes, &name, depth + 1)
            .map_err(|e| ExtractError::Archive(format!("{}: {}", name, e)))?;
        if !text.trim().is_empty() {
            parts.push(text);
        }
    }
    Ok(parts.join("\n\n"))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if archive.index_for_name("word/document.xml").is_none() {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_ZIP_ENTRY_BYTES)?;
    extract_paragraph_text(&doc_xml)
}

/// Collect `<w:t>` runs, separating `<w:p>` paragraphs with newlines.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let slide_names = numbered_entries(&archive, "ppt/slides/slide");
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_ZIP_ENTRY_BYTES)?;
        let text = extract_paragraph_text(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push('\n');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, sorted by `n`.
fn numbered_entries(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheet_names = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut out = String::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_ZIP_ENTRY_BYTES)?;
        let cell_texts = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if !out.is_empty() && !cell_texts.is_empty() {
            out.push('\n');
        }
        out.push_str(&cell_texts);
    }
    Ok(out)
}

fn extract_xls(bytes: &[u8]) -> Result<String, ExtractError> {
    use calamine::{Reader, Xls};

    let mut workbook: Xls<_> = Xls::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
    let mut out = String::new();
    for name in workbook.sheet_names().into_iter().take(XLSX_MAX_SHEETS) {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ExtractError::Spreadsheet(format!("{}: {}", name, e)))?;
        let cells: Vec<String> = range
            .used_cells()
            .map(|(_, _, c)| c.to_string().trim().to_string())
            .filter(|s| !s.is_empty())
            .take(XLSX_MAX_CELLS_PER_SHEET)
            .collect();
        if !out.is_empty() && !cells.is_empty() {
            out.push('\n');
        }
        out.push_str(&cells.join(" "));
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_ZIP_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    current = Some(String::new());
                } else if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if let Some(s) = current.as_mut() {
                            s.push_str(te.unescape().unwrap_or_default().as_ref());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Shared-string and inline cell values of one sheet, space separated.
fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut cell_is_shared_str = false;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_value => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    if cell_is_shared_str {
                        if let Some(shared) = s.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                            cells.push(shared.clone());
                        }
                    } else {
                        cells.push(s.to_string());
                    }
                }
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_is_shared_str = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}
