//! Normalisation: extracted Markdown → classifier text.
//!
//! The classifier sees a single line of prose. Everything that is layout
//! rather than language (tables, rules, URLs, code, reference markers) is
//! removed by a fixed sequence of regex rules, then the text is cut to the
//! model's input window at a sentence boundary.
//!
//! ## Rule Order
//!
//! Tables and rules are matched line-wise, so they must go before newlines
//! are collapsed. Reference markers are removed before bare brackets so the
//! numbers inside them disappear with them. Fenced code is removed after
//! collapsing, which turns every fence into a single-line span.

use crate::error::ArchiveError;
use crate::output::RawContent;
use once_cell::sync::Lazy;
use regex::Regex;

/// Sentence terminators recognised by [`truncate_at_sentence`].
const TERMINATORS: [char; 2] = ['。', '.'];

/// Turn extracted content into Markdown, converting HTML first.
pub fn to_markdown(raw: RawContent) -> Result<String, ArchiveError> {
    match raw {
        RawContent::Markdown(md) => Ok(md),
        RawContent::Html(html) => html_to_markdown(&html),
    }
}

/// Convert readability HTML to Markdown.
pub fn html_to_markdown(html: &str) -> Result<String, ArchiveError> {
    htmd::convert(html)
        .map_err(|e| ArchiveError::ConversionFailed(format!("HTML → Markdown: {e}")))
}

/// Cleanse Markdown into classifier input and cut it to `limit` characters.
///
/// Rules (applied in order):
/// 1. Strip table rows and rule-delimited regions
/// 2. Collapse newlines, tabs and runs of whitespace
/// 3. Strip reference markers, then bare brackets
/// 4. Strip bare and parenthesised http(s) URLs
/// 5. Strip fenced code
/// 6. Map full-width punctuation to ASCII
///
/// Finally whitespace is collapsed once more and the result truncated with
/// [`truncate_at_sentence`].
pub fn to_cleansed_text(markdown: &str, limit: usize) -> String {
    let s = strip_tables_and_rules(markdown);
    let s = collapse_whitespace(&s);
    let s = strip_reference_markers(&s);
    let s = strip_urls(&s);
    let s = strip_fenced_code(&s);
    let s = normalise_full_width(&s);
    let s = RE_MULTI_SPACE.replace_all(&s, " ");
    truncate_at_sentence(s.trim(), limit)
}

// ── Rule 1: Tables and rules ─────────────────────────────────────────────────

static RE_TABLE_OR_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\|.*[^\n].*\|)|(-.\n.*-)").unwrap());

fn strip_tables_and_rules(input: &str) -> String {
    RE_TABLE_OR_RULE.replace_all(input, " ").into_owned()
}

// ── Rule 2: Whitespace controls ──────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\n\r\t]|\s{2,}").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").into_owned()
}

// ── Rule 3: Reference markers ────────────────────────────────────────────────

static RE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+(?:\s*[,\-–]\s*\d+)*\]").unwrap());

fn strip_reference_markers(input: &str) -> String {
    let s = RE_REFERENCE.replace_all(input, "");
    s.replace(['[', ']'], " ")
}

// ── Rule 4: URLs ─────────────────────────────────────────────────────────────

static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(?https?://[^\s]+\)?").unwrap());

fn strip_urls(input: &str) -> String {
    RE_URL.replace_all(input, "").into_owned()
}

// ── Rule 5: Fenced code ──────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());

fn strip_fenced_code(input: &str) -> String {
    RE_FENCE.replace_all(input, " ").into_owned()
}

// ── Rule 6: Full-width punctuation ───────────────────────────────────────────

fn normalise_full_width(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '（' => '(',
            '）' => ')',
            '，' => ',',
            '：' => ':',
            '！' => '!',
            '？' => '?',
            other => other,
        })
        .collect()
}

static RE_MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Cut `text` to at most `limit` characters.
///
/// Text within the limit is returned unchanged. Otherwise the cut is made
/// just after the last `。` or `.` among the first `limit` characters, or at
/// exactly `limit` characters when there is none. Counts are in `char`s.
pub fn truncate_at_sentence(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let window: String = text.chars().take(limit).collect();
    match window.rfind(TERMINATORS) {
        Some(byte_idx) => {
            // Terminators are single chars, so the end is the next char boundary.
            let end = byte_idx
                + window[byte_idx..]
                    .chars()
                    .next()
                    .map_or(0, char::len_utf8);
            window[..end].to_string()
        }
        None => window,
    }
}

// ── Heading pre-pass ─────────────────────────────────────────────────────────

static RE_EMPTY_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(#{1,6})[ \t]+$").unwrap());

/// Rewrite whitespace-only heading lines to a bare heading marker.
///
/// The block converter would otherwise emit a heading with an empty
/// rich-text span, which the destination rejects.
pub fn fix_empty_headings(markdown: &str) -> String {
    RE_EMPTY_HEADING.replace_all(markdown, "$1").into_owned()
}
