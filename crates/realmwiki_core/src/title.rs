//! Title normalization shared by the cache, the batch checker and the
//! orchestrator. Every component compares titles through these functions.

const APOSTROPHE_VARIANTS: [&str; 6] = ["&#39;", "&#039;", "&apos;", "'", "\u{2019}", "\u{2018}"];

/// Display form sent to the wiki: underscores become spaces, whitespace runs
/// collapse to one space, casing is preserved.
pub fn canonical_title(title: &str) -> String {
    title
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key and primary comparison key: canonical form, lowercased.
pub fn title_key(title: &str) -> String {
    canonical_title(title).to_lowercase()
}

/// Secondary comparison key: `title_key` with every apostrophe spelling
/// removed, so `Bob's`, `Bob&#39;s` and `Bob’s` meet.
pub fn loose_title_key(title: &str) -> String {
    let mut key = title_key(title);
    for variant in APOSTROPHE_VARIANTS {
        key = key.replace(variant, "");
    }
    key
}

/// Both comparison passes, in order.
pub fn titles_match(left: &str, right: &str) -> bool {
    title_key(left) == title_key(right) || loose_title_key(left) == loose_title_key(right)
}

/// File-system safe stem for review output.
pub fn title_to_file_stem(title: &str) -> String {
    canonical_title(title)
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_title_collapses_separators() {
        assert_eq!(canonical_title("  Golden_Apple  "), "Golden Apple");
        assert_eq!(canonical_title("Out  Of\tBounds"), "Out Of Bounds");
        assert_eq!(canonical_title("peep."), "peep.");
    }

    #[test]
    fn title_key_is_case_insensitive() {
        assert_eq!(title_key("Golden_apple"), title_key("golden Apple"));
    }

    #[test]
    fn loose_key_absorbs_apostrophe_encodings() {
        assert_eq!(loose_title_key("Bob's Hat"), "bobs hat");
        assert_eq!(loose_title_key("Bob&#39;s Hat"), "bobs hat");
        assert_eq!(loose_title_key("Bob\u{2019}s Hat"), "bobs hat");
        assert!(titles_match("Bob's Hat", "bob&#039;s hat"));
        assert!(!titles_match("Bob's Hat", "Bobs Cap"));
    }

    #[test]
    fn file_stem_replaces_reserved_characters() {
        assert_eq!(title_to_file_stem("What?/Why*"), "What__Why_");
    }
}
