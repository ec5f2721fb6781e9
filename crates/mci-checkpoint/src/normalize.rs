//! Key normalization for chunk planning

use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Normalize a keyword-like key
///
/// Lowercases, applies compatibility decomposition (NFKD) so accented
/// letters and ligatures reduce to their ASCII base, drops anything that is
/// not an ASCII letter, digit or whitespace (combining marks included), and
/// collapses runs of whitespace.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.to_lowercase().nfkd() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if ch.is_whitespace() && !out.is_empty() && !out.ends_with(' ') {
            out.push(' ');
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Normalize and de-duplicate keys, keeping first-occurrence order
///
/// Keys that normalize to the empty string are discarded.
pub fn dedup_keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    keys.into_iter()
        .map(|k| normalize_key(k.as_ref()))
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}
