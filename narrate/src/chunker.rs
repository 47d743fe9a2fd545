//! Splits input text into bounded synthesis units.
//!
//! Text is normalised first (compound hyphens, parenthetical asides and
//! slashes are rewritten into forms the engine reads with better prosody),
//! then broken into sections on blank lines, then into sentences, and
//! finally grouped into chunks of a few sentences each.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Sentences per chunk when the caller has no preference
pub const DEFAULT_MAX_SENTENCES: usize = 2;

/// Upper bound on rewrite passes for transforms whose matches can overlap
const MAX_REWRITE_PASSES: usize = 32;

// Patterns are held as Option so a bad pattern turns its transform into a no-op.
static HYPHEN_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\p{L})-(\p{L})").ok());
static SLASH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\p{L})/(\p{L})").ok());
static PAREN_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\(([^()]*)\)([.!?,;:]?)").ok());
static SENTENCE_END: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"([.!?]["'\x{201D}\x{2019}]?)\s+"#).ok());

/// One synthesis unit of source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position in the utterance
    pub index: usize,
    pub text: String,
}

/// Normalise and split `text` into ordered chunks of at most
/// `max_sentences` sentences.
pub fn chunk(text: &str, max_sentences: usize) -> Vec<Chunk> {
    let max_sentences = max_sentences.max(1);
    let normalized = normalize(text);

    let mut groups = Vec::new();
    for section in sections(&normalized) {
        let sentences = split_sentences(&section);
        for group in sentences.chunks(max_sentences) {
            groups.push(group.join(" "));
        }
    }

    if groups.is_empty() {
        let collapsed = collapse_lines(&normalized);
        if !collapsed.is_empty() {
            groups.push(collapsed);
        }
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { index, text })
        .collect()
}

/// Apply all text normalisation transforms in order
pub fn normalize(text: &str) -> String {
    let text = join_hyphenated(text);
    let text = convert_parentheticals(&text);
    convert_slashes(&text)
}

/// `well-known` becomes `well known`
pub fn join_hyphenated(text: &str) -> String {
    rewrite_until_stable(text, HYPHEN_PATTERN.as_ref(), "$1 $2")
}

/// `and/or` becomes `and - or`
pub fn convert_slashes(text: &str) -> String {
    rewrite_until_stable(text, SLASH_PATTERN.as_ref(), "$1 - $2")
}

/// Turn `(aside)` into a dash-delimited clause.
///
/// When the aside closes its clause (terminal punctuation follows it, or
/// nothing does) the closing dash is replaced by that punctuation.
pub fn convert_parentheticals(text: &str) -> String {
    let Some(pattern) = PAREN_PATTERN.as_ref() else {
        return text.to_string();
    };

    pattern
        .replace_all(text, |caps: &Captures| {
            let content = caps[1].trim();
            let punct = &caps[2];
            // Only the rest of the current line decides whether the clause ends here
            let rest_of_line = caps
                .get(0)
                .and_then(|m| text[m.end()..].split('\n').next())
                .unwrap_or("");

            if !punct.is_empty() {
                format!("- {}{}", content, punct)
            } else if rest_of_line.trim().is_empty() {
                format!("- {}", content)
            } else {
                format!("- {} -", content)
            }
        })
        .into_owned()
}

fn rewrite_until_stable(text: &str, pattern: Option<&Regex>, replacement: &str) -> String {
    let Some(pattern) = pattern else {
        return text.to_string();
    };

    // A single pass leaves `a-b-c` as `a b-c`, since matches cannot overlap.
    let mut current = text.to_string();
    for _ in 0..MAX_REWRITE_PASSES {
        if !pattern.is_match(&current) {
            break;
        }
        current = pattern.replace_all(&current, replacement).into_owned();
    }
    current
}

/// Group lines into sections separated by blank lines.
///
/// A heading (a lone line followed by a blank line) therefore always ends
/// up in a section of its own instead of merging into the next paragraph.
fn sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                sections.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        sections.push(current.join(" "));
    }

    sections
}

/// Split a section into trimmed, non-empty sentences
pub fn split_sentences(text: &str) -> Vec<String> {
    let Some(pattern) = SENTENCE_END.as_ref() else {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    };

    let mut sentences = Vec::new();
    let mut start = 0;

    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(punct)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_sentence(&mut sentences, &text[start..punct.end()]);
        start = whole.end();
    }
    push_sentence(&mut sentences, &text[start..]);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

fn collapse_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
