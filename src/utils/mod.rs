//! Utility functions and helpers.

pub mod http;

use sha2::{Digest, Sha256};

/// Derive a filesystem/object-store safe key from an arbitrary id.
///
/// Carrier event ids embed timestamps (`ARR-2024-01-01T00:00:00Z`), whose
/// colons are not portable in file names.
pub fn hashed_key(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

/// Validate a document id before it is used as a path segment.
pub fn is_safe_segment(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Escape text for inclusion in an HTML body.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_key_is_stable() {
        let a = hashed_key("ARR-2024-01-01T00:00:00Z");
        let b = hashed_key("ARR-2024-01-01T00:00:00Z");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hashed_key("DEP-2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_safe_segment() {
        assert!(is_safe_segment("shp_123-A"));
        assert!(!is_safe_segment("../etc"));
        assert!(!is_safe_segment("a/b"));
        assert!(!is_safe_segment(""));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>A&B</b>"), "&lt;b&gt;A&amp;B&lt;/b&gt;");
    }
}
