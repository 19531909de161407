//! Tag value sanitization
//!
//! EKS only accepts Unicode letters, digits, white-space and `_ . : + / = \ @ -`
//! in tag values. Anything else is dropped before a tag is written back.

use std::collections::BTreeMap;
use tracing::warn;

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || matches!(c, '_' | '.' | ':' | '+' | '/' | '=' | '\\' | '@' | '-')
}

/// Strip disallowed characters; the flag reports whether anything changed
pub fn sanitize(value: &str) -> (String, bool) {
    let cleaned: String = value.chars().filter(|c| is_allowed(*c)).collect();
    let modified = cleaned.len() != value.len();
    (cleaned, modified)
}

/// Sanitize every value of a tag map, warning about each altered value
pub fn sanitize_tags(tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.iter()
        .map(|(key, value)| {
            let (cleaned, modified) = sanitize(value);
            if modified {
                warn!(
                    tag = %key,
                    original = %value,
                    sanitized = %cleaned,
                    "Tag value changed because it contained characters that are not allowed in EKS tag values"
                );
            }
            (key.clone(), cleaned)
        })
        .collect()
}
