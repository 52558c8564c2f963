//! Constrained identifier tags.
//!
//! Bundle IDs, slugs, model preset IDs, provider names and friends all share
//! one rule: lowercase ASCII letters, digits, `-` and `_`, at most 64 bytes.

pub const MAX_TAG_LEN: usize = 64;

/// Validates a catalog tag: `^[a-z0-9_-]{1,64}$`.
pub fn is_valid_tag(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_TAG_LEN {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Validates a JSON-schema name: `^[A-Za-z0-9_-]{1,64}$` (uppercase allowed).
pub fn is_valid_schema_name(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_TAG_LEN {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_tags() {
        assert!(is_valid_tag("git-helper"));
        assert!(is_valid_tag("bundle_01"));
        assert!(is_valid_tag("a"));
        assert!(is_valid_tag(&"x".repeat(64)));
        // Minted skill IDs (hyphenated lowercase UUIDs) satisfy the tag rule.
        assert!(is_valid_tag("0190b5a2-4f00-7cc3-9a3e-000000000001"));
    }

    #[test]
    fn invalid_tags() {
        assert!(!is_valid_tag(""));
        assert!(!is_valid_tag("Uppercase"));
        assert!(!is_valid_tag("has space"));
        assert!(!is_valid_tag("dot.dot"));
        assert!(!is_valid_tag(&"x".repeat(65)));
    }

    #[test]
    fn schema_names_allow_uppercase() {
        assert!(is_valid_schema_name("WeatherReport_v2"));
        assert!(!is_valid_schema_name("no spaces"));
        assert!(!is_valid_schema_name(""));
    }
}
