//! Text helpers for article assembly: slugs, excerpts and word counts.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::char::{decompose_compatible, is_combining_mark};

/// Maximum slug length in characters.
pub const MAX_SLUG_LEN: usize = 80;

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[^\p{L}\p{M}\p{N}]+").expect("Invalid regex for slug separators")
    })
}

fn markdown_regexes() -> &'static [(Regex, &'static str)] {
    static RES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            // images before links so the leading '!' goes too
            (
                Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("Invalid regex for images"),
                "$1",
            ),
            (
                Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("Invalid regex for links"),
                "$1",
            ),
            (
                Regex::new(r"(?m)^\s{0,3}#{1,6}\s*").expect("Invalid regex for headings"),
                "",
            ),
            (
                Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+").expect("Invalid regex for list markers"),
                "",
            ),
            (
                Regex::new(r"(?m)^\s*>\s?").expect("Invalid regex for blockquotes"),
                "",
            ),
            (Regex::new(r"[*_`~]+").expect("Invalid regex for emphasis"), ""),
            (Regex::new(r"\s+").expect("Invalid regex for whitespace"), " "),
        ]
    })
}

/// Replaces Latin letters carrying diacritics with their ASCII base
/// ("Café" -> "Cafe"). Characters of other scripts are kept as they are.
fn fold_accents(input: &str) -> String {
    let mut folded = String::with_capacity(input.len());
    for c in input.chars() {
        let mut base = String::new();
        let mut ascii_only = true;
        decompose_compatible(c, |d| {
            if d.is_ascii() {
                base.push(d);
            } else if !is_combining_mark(d) {
                ascii_only = false;
            }
        });

        if ascii_only && !base.is_empty() {
            folded.push_str(&base);
        } else {
            folded.push(c);
        }
    }
    folded
}

/// Converts `input` into a URL slug: lowercase letters and digits joined by
/// single hyphens, at most [`MAX_SLUG_LEN`] characters, never ending in '-'.
///
/// Accented Latin letters are folded to ASCII; letters of other scripts are
/// kept, so a title in Japanese or Cyrillic still yields a slug.
pub fn slugify(input: &str) -> String {
    let lowered = fold_accents(input).to_lowercase();
    let slug = separator_regex().replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');

    if slug.chars().count() <= MAX_SLUG_LEN {
        return slug.to_string();
    }

    let truncated: String = slug.chars().take(MAX_SLUG_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}

/// Strips common markdown syntax, leaving single-spaced plain text.
pub fn strip_markdown(markdown: &str) -> String {
    let mut text = markdown.to_string();
    for (re, replacement) in markdown_regexes() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text.trim().to_string()
}

/// Truncates `text` to at most `max_chars` characters, cutting at a word
/// boundary and appending "..." when anything was removed.
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(3);
    let head: String = text.chars().take(budget).collect();
    let cut = match head.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &head[..idx],
        _ => head.as_str(),
    };

    format!(
        "{}...",
        cut.trim_end_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
    )
}

/// Counts whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}
