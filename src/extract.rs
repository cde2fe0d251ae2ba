//! Format-aware conversion of uploaded bytes into normalized text.
//!
//! The format is picked from the filename extension. PDF and OOXML documents
//! go through dedicated extractors; text-like files are decoded as UTF-8.
//! Unknown extensions get a best-effort UTF-8 decode and are rejected when the
//! bytes are clearly binary.

use std::io::Read;

use quick_xml::events::Event;
use scraper::{ElementRef, Html, Node};
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_UNKNOWN: &str = "application/octet-stream";

/// Decompressed size cap for a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "log", "csv", "tsv", "json", "yaml", "yml", "toml", "ini", "xml", "rst",
    "rs", "py", "js", "ts", "go", "java", "c", "h", "cpp", "sh", "sql",
];
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx"];
const HTML_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];
/// Extensions that are never worth a text decode attempt.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "mp3", "mp4", "wav", "mov", "avi", "zip",
    "gz", "tar", "7z", "rar", "exe", "dll", "so", "dylib", "bin", "doc", "ppt", "xls",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Text extracted from an upload, with the content type it was read as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub content_type: &'static str,
    pub text: String,
}

/// Content type implied by the filename extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = extension(filename);
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        e if MARKDOWN_EXTENSIONS.contains(&e) => MIME_MARKDOWN,
        e if HTML_EXTENSIONS.contains(&e) => MIME_HTML,
        e if TEXT_EXTENSIONS.contains(&e) => MIME_TEXT,
        _ => MIME_UNKNOWN,
    }
}

/// Convert raw bytes into normalized text.
///
/// The result may be empty; the caller decides whether that is an error.
pub fn extract(filename: &str, bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let content_type = content_type_for(filename);
    let raw = match content_type {
        MIME_PDF => extract_pdf(bytes)?,
        MIME_DOCX => extract_docx(bytes)?,
        MIME_PPTX => extract_pptx(bytes)?,
        MIME_XLSX => extract_xlsx(bytes)?,
        MIME_HTML => html_to_text(&decode_lossy(bytes)),
        MIME_TEXT | MIME_MARKDOWN => decode_lossy(bytes),
        _ => {
            if BINARY_EXTENSIONS.contains(&extension(filename).as_str()) {
                return Err(ExtractError::UnsupportedFormat(format!(
                    "{}: binary file type",
                    filename
                )));
            }
            decode_best_effort(filename, bytes)?
        }
    };

    Ok(Extracted {
        content_type: if content_type == MIME_UNKNOWN {
            MIME_TEXT
        } else {
            content_type
        },
        text: normalize_text(&raw),
    })
}

fn extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn decode_lossy(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Strict UTF-8 decode that rejects bytes that look binary.
fn decode_best_effort(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|_| {
        ExtractError::UnsupportedFormat(format!("{}: not decodable as UTF-8 text", filename))
    })?;

    let control = text
        .chars()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
        .count();
    if text.contains('\0') || control * 10 > text.chars().count().max(1) {
        return Err(ExtractError::UnsupportedFormat(format!(
            "{}: binary content",
            filename
        )));
    }
    Ok(text.to_string())
}

/// Replace tabs, unify line endings, trim trailing spaces and collapse runs
/// of blank lines to a single paragraph break.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n").replace('\t', " ");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Elements whose content is never visible text.
const HTML_SKIPPED: &[&str] = &["script", "style", "noscript", "template"];

/// Elements that start a new line in the extracted text.
const HTML_BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p",
    "pre", "section", "table", "td", "th", "title", "tr", "ul",
];

/// Visible text of an HTML document. Entities are decoded by the parser.
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    collect_html_text(document.root_element(), &mut out);
    out
}

fn collect_html_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if HTML_SKIPPED.contains(&name) {
                    continue;
                }
                let block = HTML_BLOCKS.contains(&name);
                if block {
                    out.push('\n');
                }
                if let Some(child) = ElementRef::wrap(child) {
                    collect_html_text(child, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed documents.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::Pdf("malformed document".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `{prefix}{n}.xml`, sorted by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
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

/// Collect the text of every `<t>` element, starting a new paragraph whenever
/// an element named `paragraph` closes.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.ends_with("\n\n") && !out.is_empty()
                {
                    out.push_str("\n\n");
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if !text.trim().is_empty() {
            slides.push(text.trim().to_string());
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let has_shared = archive
        .file_names()
        .any(|n| n == "xl/sharedStrings.xml");
    let shared = if has_shared {
        let xml = read_entry(&mut archive, "xl/sharedStrings.xml")?;
        shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        sheets.push(sheet_rows(&xml, &shared)?);
    }
    Ok(sheets.join("\n\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// One line per row, cells separated by tabs (later normalized to spaces).
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared_cell = false;
    let mut cells = 0usize;
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    let cell = if shared_cell {
                        value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(cell) = cell {
                        row.push(cell);
                        cells += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join("\t")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn plain_text_is_normalized() {
        let out = extract("notes.txt", b"a\tb\r\nline two  \n\n\n\nnext").unwrap();
        assert_eq!(out.content_type, MIME_TEXT);
        assert_eq!(out.text, "a b\nline two\n\nnext");
    }

    #[test]
    fn unknown_extension_decodes_text() {
        let out = extract("README", b"hello there").unwrap();
        assert_eq!(out.text, "hello there");
    }

    #[test]
    fn unknown_extension_rejects_binary() {
        let err = extract("blob.dat", &[0u8, 159, 146, 150, 0, 1, 2]).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn known_binary_extension_rejected() {
        let err = extract("photo.png", b"\x89PNG\r\n").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract("doc.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract("doc.docx", b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let xml = r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>First para</w:t></w:r></w:p><w:p><w:r><w:t>Second para</w:t></w:r></w:p></w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let out = extract("doc.docx", &bytes).unwrap();
        assert_eq!(out.content_type, MIME_DOCX);
        assert_eq!(out.text, "First para\n\nSecond para");
    }

    #[test]
    fn xlsx_rows_use_shared_strings() {
        let shared = r#"<sst><si><t>name</t></si><si><t>Paris</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData><row><c t="s"><v>0</v></c><c><v>42</v></c></row><row><c t="s"><v>1</v></c></row></sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let out = extract("book.xlsx", &bytes).unwrap();
        assert_eq!(out.text, "name 42\nParis");
    }

    #[test]
    fn html_tags_are_stripped() {
        let html = b"<html><head><style>p{}</style></head><body><p>Hello &amp; bye</p><script>x()</script></body></html>";
        let out = extract("page.html", html).unwrap();
        assert_eq!(out.text, "Hello & bye");
    }

    #[test]
    fn html_angle_brackets_in_text_survive() {
        let out = extract("page.html", b"<p>1 < 2 and 3 > 2 holds</p>").unwrap();
        assert_eq!(out.text, "1 < 2 and 3 > 2 holds");
    }

    #[test]
    fn html_entities_are_decoded_once() {
        let out = extract("page.html", b"<p>Write &amp;lt; to escape</p>").unwrap();
        assert_eq!(out.text, "Write &lt; to escape");

        let out = extract("page.html", b"<p>caf&eacute; &#8212; &#x41;</p>").unwrap();
        assert_eq!(out.text, "caf\u{e9} \u{2014} A");
    }

    #[test]
    fn html_blocks_become_lines() {
        let html = b"<ul><li>one</li><li>two</li></ul><div>three<br>four</div>";
        let out = extract("list.htm", html).unwrap();
        assert_eq!(out.text, "one\n\ntwo\n\nthree\n\nfour");
    }
}
