//! Fallback document analysis: recover structure from plain OCR text.
//!
//! When the active OCR provider has no native document-analysis capability,
//! the engine runs plain OCR and hands the result here. Four deterministic
//! heuristics run in order: group lines into blocks, type each block, detect
//! delimiter-aligned tables, detect `key: value` form fields, then classify
//! the document from keywords. Everything is a pure function over the OCR
//! output — independently testable, no I/O.
//!
//! Confidences are conservative fixed constants, capped below what a native
//! document backend reports, so downstream consumers can tell a heuristic
//! reconstruction from a real layout analysis.

use crate::options::DocumentOptions;
use crate::output::{
    Block, BlockType, Cell, DocumentMetadata, DocumentResult, DocumentType, Form, FormField, Page,
    Table,
};
use once_cell::sync::Lazy;
use regex::Regex;

/// Overall confidence reported for a recovered (non-native) analysis.
pub const FALLBACK_CONFIDENCE: f32 = 0.7;
/// Confidence assigned to a detected table as a whole.
const TABLE_CONFIDENCE: f32 = 0.7;
/// Estimated confidence for an individual table cell.
const CELL_CONFIDENCE: f32 = 0.8;
/// Estimated confidence for a detected form field.
const FIELD_CONFIDENCE: f32 = 0.8;

static RE_LIST_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([-*]|\d+\.|\w+\))\s").unwrap());

static RE_KEY_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^:=]+)[:=]\s*(.*)$").unwrap());

static RE_PLEASE_FILL: Lazy<Regex> = Lazy::new(|| Regex::new(r"please\s+fill").unwrap());

static RE_HEADING_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][a-z]").unwrap());

/// Recover document structure from a plain OCR result.
///
/// `options` must already be resolved by the engine: `extract_tables` /
/// `extract_forms` gate their respective passes.
pub fn recover(ocr: &crate::output::OcrResult, options: &DocumentOptions) -> DocumentResult {
    let blocks = group_lines_into_blocks(&ocr.lines);

    let tables = if options.tables_enabled() {
        detect_tables_from_text(&ocr.text)
    } else {
        Vec::new()
    };

    let forms = if options.forms_enabled() {
        detect_forms_from_text(&ocr.text)
    } else {
        Vec::new()
    };

    DocumentResult {
        text: ocr.text.clone(),
        pages: vec![Page {
            page_number: 1,
            width: None,
            height: None,
            blocks: blocks
                .into_iter()
                .map(|b| Block {
                    block_type: guess_block_type(&b.text),
                    text: b.text,
                    confidence: b.confidence,
                    bbox: None,
                })
                .collect(),
        }],
        tables,
        forms,
        metadata: DocumentMetadata {
            document_type: guess_document_type(&ocr.text),
            confidence: FALLBACK_CONFIDENCE,
        },
    }
}

struct RawBlock {
    text: String,
    confidence: f32,
    line_count: usize,
}

/// Group consecutive non-blank lines into blocks; a blank line (or end of
/// input) closes the current block. Block confidence is the running mean of
/// its constituent line confidences.
fn group_lines_into_blocks(lines: &[crate::output::Line]) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<RawBlock> = None;

    for line in lines {
        if line.text.trim().is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }

        match current.as_mut() {
            None => {
                current = Some(RawBlock {
                    text: line.text.clone(),
                    confidence: line.confidence,
                    line_count: 1,
                });
            }
            Some(block) => {
                block.text.push('\n');
                block.text.push_str(&line.text);
                block.confidence = (block.confidence * block.line_count as f32
                    + line.confidence)
                    / (block.line_count + 1) as f32;
                block.line_count += 1;
            }
        }
    }

    if let Some(block) = current.take() {
        blocks.push(block);
    }

    blocks
}

/// Classify a block as heading, list, or paragraph.
///
/// Heading: short (< 100 chars), single line, and either fully upper-case or
/// opening with `[A-Z][a-z]`. List: every line starts with a bullet or
/// numbering marker. Everything else is a paragraph.
pub fn guess_block_type(text: &str) -> BlockType {
    if text.len() < 100
        && !text.contains('\n')
        && (is_all_uppercase(text) || RE_HEADING_START.is_match(text))
    {
        return BlockType::Heading;
    }

    if !text.is_empty() && text.lines().all(|line| RE_LIST_LINE.is_match(line)) {
        return BlockType::List;
    }

    BlockType::Paragraph
}

fn is_all_uppercase(text: &str) -> bool {
    !text.chars().any(|c| c.is_lowercase())
}

/// A line that qualifies as a table row, with its winning delimiter.
struct RowCandidate<'a> {
    text: &'a str,
    delimiter: char,
}

/// Detect delimiter-aligned tables in raw text.
///
/// A line qualifies as a table row when its most frequent delimiter (tab,
/// pipe, or comma) occurs at least twice; ties break in that order.
/// Consecutive qualifying lines sharing a delimiter form one table; a
/// delimiter change starts a new one.
pub fn detect_tables_from_text(text: &str) -> Vec<Table> {
    let mut candidates: Vec<RowCandidate<'_>> = Vec::new();

    for line in text.lines() {
        let tabs = line.matches('\t').count();
        let pipes = line.matches('|').count();
        let commas = line.matches(',').count();
        let max = tabs.max(pipes).max(commas);
        if max < 2 {
            continue;
        }
        // Tie-break order: tab, then pipe, then comma.
        let delimiter = if tabs == max {
            '\t'
        } else if pipes == max {
            '|'
        } else {
            ','
        };
        candidates.push(RowCandidate {
            text: line,
            delimiter,
        });
    }

    let mut tables: Vec<(char, Vec<Vec<String>>)> = Vec::new();
    for candidate in candidates {
        let row: Vec<String> = candidate
            .text
            .split(candidate.delimiter)
            .map(|cell| cell.trim().to_string())
            .collect();
        match tables.last_mut() {
            Some((delim, rows)) if *delim == candidate.delimiter => rows.push(row),
            _ => tables.push((candidate.delimiter, vec![row])),
        }
    }

    tables
        .into_iter()
        .map(|(_, rows)| {
            let row_count = rows.len();
            let column_count = rows.iter().map(Vec::len).max().unwrap_or(0);
            let mut cells = Vec::new();
            for (r, row) in rows.iter().enumerate() {
                for (c, text) in row.iter().take(column_count).enumerate() {
                    cells.push(Cell {
                        row: r,
                        col: c,
                        text: text.clone(),
                        confidence: CELL_CONFIDENCE,
                    });
                }
            }
            Table {
                row_count,
                column_count,
                cells,
                confidence: TABLE_CONFIDENCE,
            }
        })
        .collect()
}

/// Detect `key: value` / `key = value` form fields, one per matching line.
///
/// Zero matches yields no form block at all, not an empty one.
pub fn detect_forms_from_text(text: &str) -> Vec<Form> {
    let fields: Vec<FormField> = text
        .lines()
        .filter_map(|line| {
            RE_KEY_VALUE.captures(line).map(|caps| FormField {
                key: caps[1].trim().to_string(),
                value: caps[2].trim().to_string(),
                confidence: FIELD_CONFIDENCE,
            })
        })
        .collect();

    if fields.is_empty() {
        Vec::new()
    } else {
        vec![Form { fields }]
    }
}

/// Classify the document from keywords, first match wins.
///
/// The priority order is significant and fixed: Invoice → Receipt →
/// Contract → Resume → Form → Document. A text containing both "invoice"
/// and "signature" is an Invoice, not a Form.
pub fn guess_document_type(text: &str) -> DocumentType {
    let lower = text.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("invoice") || has("bill") || has("amount due") {
        return DocumentType::Invoice;
    }
    if has("receipt") || has("payment received") {
        return DocumentType::Receipt;
    }
    if has("contract") || has("agreement") || has("terms and conditions") {
        return DocumentType::Contract;
    }
    if (has("resume") || has("cv")) && has("experience") && has("education") {
        return DocumentType::Resume;
    }
    if has("form") || RE_PLEASE_FILL.is_match(&lower) || has("signature") {
        return DocumentType::Form;
    }
    DocumentType::Document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Line, OcrResult};

    fn ocr_with_lines(lines: &[(&str, f32)]) -> OcrResult {
        OcrResult {
            text: lines
                .iter()
                .map(|(t, _)| *t)
                .collect::<Vec<_>>()
                .join("\n"),
            confidence: 0.9,
            lines: lines.iter().map(|(t, c)| Line::new(*t, *c)).collect(),
            ..Default::default()
        }
    }

    // ── Block grouping ───────────────────────────────────────────────────

    #[test]
    fn blank_line_closes_block() {
        let ocr = ocr_with_lines(&[("first", 0.9), ("", 0.0), ("second", 0.8)]);
        let result = recover(&ocr, &DocumentOptions::default());
        assert_eq!(result.pages[0].blocks.len(), 2);
        assert_eq!(result.pages[0].blocks[0].text, "first");
        assert_eq!(result.pages[0].blocks[1].text, "second");
    }

    #[test]
    fn block_confidence_is_mean_of_lines() {
        let ocr = ocr_with_lines(&[("one two three words here", 0.8), ("and some more here", 0.6)]);
        let result = recover(&ocr, &DocumentOptions::default());
        assert_eq!(result.pages[0].blocks.len(), 1);
        let c = result.pages[0].blocks[0].confidence;
        assert!((c - 0.7).abs() < 1e-6, "got {c}");
    }

    // ── Block typing ─────────────────────────────────────────────────────

    #[test]
    fn all_caps_short_line_is_heading() {
        assert_eq!(guess_block_type("INVOICE SUMMARY"), BlockType::Heading);
    }

    #[test]
    fn title_case_short_line_is_heading() {
        assert_eq!(guess_block_type("Quarterly Report"), BlockType::Heading);
    }

    #[test]
    fn multiline_is_not_heading() {
        assert_eq!(
            guess_block_type("Quarterly Report\ncontinued"),
            BlockType::Paragraph
        );
    }

    #[test]
    fn long_line_is_not_heading() {
        let long = "A".repeat(120);
        assert_eq!(guess_block_type(&long), BlockType::Paragraph);
    }

    #[test]
    fn bulleted_lines_are_list() {
        assert_eq!(
            guess_block_type("- first item\n- second item\n* third"),
            BlockType::List
        );
    }

    #[test]
    fn numbered_lines_are_list() {
        assert_eq!(
            guess_block_type("1. alpha beta gamma delta\n2. epsilon zeta eta theta"),
            BlockType::List
        );
    }

    #[test]
    fn mixed_lines_are_paragraph() {
        assert_eq!(
            guess_block_type("- item\nplain prose continues here afterwards"),
            BlockType::Paragraph
        );
    }

    // ── Table detection ──────────────────────────────────────────────────

    #[test]
    fn tab_table_three_by_three() {
        let tables = detect_tables_from_text("A\tB\tC\n1\t2\t3\n4\t5\t6");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].row_count, 3);
        assert_eq!(tables[0].column_count, 3);
        assert_eq!(tables[0].cells.len(), 9);
        assert_eq!(tables[0].cells[0].text, "A");
        assert_eq!(tables[0].cells[8].text, "6");
    }

    #[test]
    fn delimiter_change_starts_new_table() {
        let tables = detect_tables_from_text("a\tb\tc\nx|y|z");
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn single_delimiter_line_does_not_qualify() {
        assert!(detect_tables_from_text("just one, comma here").is_empty());
    }

    #[test]
    fn tab_wins_tie_against_comma() {
        // Two tabs and two commas on the same line: tab is the defining
        // delimiter, so the commas stay inside the cells.
        let tables = detect_tables_from_text("a,1\tb,2\tc\nd\te\tf");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].cells[0].text, "a,1");
    }

    #[test]
    fn ragged_rows_use_max_column_count() {
        let tables = detect_tables_from_text("a,b,c,d\ne,f,g");
        assert_eq!(tables[0].column_count, 4);
        // Second row contributes only its own 3 cells.
        assert_eq!(tables[0].cells.len(), 7);
    }

    #[test]
    fn table_confidence_distinct_from_cell_confidence() {
        let tables = detect_tables_from_text("a\tb\tc");
        assert!((tables[0].confidence - TABLE_CONFIDENCE).abs() < 1e-6);
        assert!((tables[0].cells[0].confidence - CELL_CONFIDENCE).abs() < 1e-6);
        assert_ne!(TABLE_CONFIDENCE, CELL_CONFIDENCE);
    }

    // ── Form detection ───────────────────────────────────────────────────

    #[test]
    fn detects_key_value_fields() {
        let forms = detect_forms_from_text("Name: John Doe\nDate: 2023-06-15");
        assert_eq!(forms.len(), 1);
        let fields = &forms[0].fields;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].key, "Name");
        assert_eq!(fields[0].value, "John Doe");
        assert_eq!(fields[1].key, "Date");
        assert_eq!(fields[1].value, "2023-06-15");
    }

    #[test]
    fn equals_sign_also_matches() {
        let forms = detect_forms_from_text("total = 42");
        assert_eq!(forms[0].fields[0].key, "total");
        assert_eq!(forms[0].fields[0].value, "42");
    }

    #[test]
    fn no_matches_yields_no_form_block() {
        assert!(detect_forms_from_text("nothing here").is_empty());
    }

    // ── Document typing ──────────────────────────────────────────────────

    #[test]
    fn invoice_keywords() {
        assert_eq!(guess_document_type("Amount due: $10"), DocumentType::Invoice);
    }

    #[test]
    fn invoice_priority_beats_form() {
        assert_eq!(
            guess_document_type("invoice ... signature required"),
            DocumentType::Invoice
        );
    }

    #[test]
    fn receipt_and_contract() {
        assert_eq!(
            guess_document_type("Payment received, thank you"),
            DocumentType::Receipt
        );
        assert_eq!(
            guess_document_type("This Agreement is made between"),
            DocumentType::Contract
        );
    }

    #[test]
    fn resume_needs_experience_and_education() {
        assert_eq!(
            guess_document_type("resume: work experience and education"),
            DocumentType::Resume
        );
        assert_eq!(
            guess_document_type("my resume has experience only"),
            DocumentType::Document
        );
    }

    #[test]
    fn form_keywords() {
        assert_eq!(
            guess_document_type("Please  fill in the blanks"),
            DocumentType::Form
        );
        assert_eq!(guess_document_type("signature: ____"), DocumentType::Form);
    }

    #[test]
    fn default_is_document() {
        assert_eq!(guess_document_type("hello world"), DocumentType::Document);
    }

    // ── Recover integration ──────────────────────────────────────────────

    #[test]
    fn recover_respects_option_gates() {
        let ocr = ocr_with_lines(&[("A\tB\tC", 0.9), ("Name: Jo", 0.9)]);
        let opts = DocumentOptions {
            extract_tables: Some(false),
            extract_forms: Some(false),
            ..Default::default()
        };
        let result = recover(&ocr, &opts);
        assert!(result.tables.is_empty());
        assert!(result.forms.is_empty());
    }

    #[test]
    fn recover_caps_confidence() {
        let ocr = ocr_with_lines(&[("hello there everyone", 0.99)]);
        let result = recover(&ocr, &DocumentOptions::default());
        assert!((result.metadata.confidence - FALLBACK_CONFIDENCE).abs() < 1e-6);
    }
}
