//! Document text extraction
//!
//! Turns uploaded PDF bytes into an ordered list of page texts. The rest of
//! the pipeline only depends on the `DocumentExtractor` trait, not on the PDF
//! format itself.

use crate::errors::AppError;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Text extracted from a single page, 1-based page numbering
#[derive(Debug, Clone)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
}

/// Extracts page-ordered text from raw document bytes
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, AppError>;
}

/// PDF extractor backed by lopdf
pub struct PdfExtractor;

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>, AppError> {
        if bytes.is_empty() {
            return Err(AppError::ExtractionFailed("empty document".to_string()));
        }

        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| AppError::ExtractionFailed(format!("failed to parse PDF: {}", e)))?;

        let page_count = doc.get_pages().len();
        debug!(page_count, "Extracting text from PDF");

        let mut pages = Vec::new();
        for (idx, page_id) in doc.page_iter().enumerate() {
            let page_number = idx + 1;
            match doc.get_page_content(page_id) {
                Ok(content) => {
                    let raw = extract_text_from_content(&content);
                    let cleaned = clean_page_text(&raw);
                    // Only keep pages that actually yielded text
                    if !cleaned.trim().is_empty() {
                        pages.push(PageText {
                            page_number,
                            text: cleaned,
                        });
                    }
                }
                Err(e) => {
                    warn!(page = page_number, error = %e, "Failed to read page content, skipping");
                }
            }
        }

        if pages.is_empty() {
            return Err(AppError::ExtractionFailed(
                "no text content extracted from document".to_string(),
            ));
        }

        debug!(pages = pages.len(), "Text extraction complete");
        Ok(pages)
    }
}

/// Extract text from a PDF content stream
///
/// Collects text shown between BT/ET operators via Tj, TJ, ' and ".
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push('\n');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
                current_text.push(' ');
            }
        }
    }

    text
}

/// Extract text from a PDF text-showing operator line
fn extract_text_from_operator(line: &str) -> Option<String> {
    // (text) Tj, (text) ' and (text) "
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        if let Some(start) = line.find('(') {
            if let Some(end) = line.rfind(')') {
                if end > start {
                    return Some(decode_pdf_string(&line[start + 1..end]));
                }
            }
        }
    }

    // [(text) num (text) num] TJ
    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                '(' => in_paren = true,
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('(') => result.push('('),
                Some(')') => result.push(')'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

fn page_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)page \d+").expect("static regex"))
}

/// Clean extracted page text.
///
/// Collapses runs of spaces/tabs and blank lines but keeps line breaks, since
/// the chunker uses paragraph and line boundaries as preferred split points.
/// Removes `Page N` header/footer artifacts and fixes the `|` -> `I` OCR
/// mistake. Digits are left untouched.
pub fn clean_page_text(text: &str) -> String {
    let without_markers = page_marker_regex().replace_all(text, "");
    let fixed = without_markers.replace('|', "I");

    let mut out = String::with_capacity(fixed.len());
    let mut blank_run = 0usize;
    for line in fixed.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            // Keep at most one blank line so paragraph breaks survive
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&collapsed);
        }
    }

    out.trim().to_string()
}
