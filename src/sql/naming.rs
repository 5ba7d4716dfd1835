//! Names for derived objects, e.g. the table created by a copy.

use lazy_static::lazy_static;
use regex::Regex;

pub const COPY_SUFFIX: &str = "_copy";

/// PostgreSQL truncates identifiers longer than this many bytes
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

lazy_static! {
    pub static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LENGTH && IDENTIFIER_RE.is_match(name)
}

fn sanitize(original: &str) -> String {
    let sanitized: String = original
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    match sanitized.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => sanitized,
        _ => format!("t_{sanitized}"),
    }
}

/// Split `name` into the part before a trailing `_copy`/`_copyN` and the suffix
/// to use for the next copy.
fn next_copy(name: &str) -> (&str, String) {
    if let Some(pos) = name.rfind(COPY_SUFFIX) {
        let counter = &name[pos + COPY_SUFFIX.len()..];
        let next = if counter.is_empty() {
            Some(2)
        } else if counter.bytes().all(|b| b.is_ascii_digit()) {
            counter.parse::<u64>().ok().and_then(|n| n.checked_add(1))
        } else {
            None
        };

        if let Some(n) = next {
            return (&name[..pos], format!("{COPY_SUFFIX}{n}"));
        }
    }
    (name, COPY_SUFFIX.to_string())
}

/// Longest prefix of `text` that fits in `max_len` bytes without splitting a char
fn truncate(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// A valid identifier for a copy of `original`, different from `original`.
pub fn copy_name(original: &str) -> String {
    let sanitized = sanitize(original);
    let (base, suffix) = next_copy(&sanitized);
    let base = truncate(base, MAX_IDENTIFIER_LENGTH - suffix.len());
    format!("{base}{suffix}")
}

/// Same suffix scheme as [`copy_name`], for free-form display names (database
/// names can be any text, so nothing gets sanitized).
pub fn copy_label(original: &str) -> String {
    let (base, suffix) = next_copy(original);
    format!("{base}{suffix}")
}
