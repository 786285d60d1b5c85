//! Label normalization, similarity scoring and filesystem-safe sanitation.
//!
//! These helpers underpin taxonomy matching: labels are normalized before
//! they are compared, stored or fuzzy-matched against the canonical
//! catalogue.

/// Trailing tokens that carry no categorization signal ("Graphics files"
/// should match "Graphics").
const TRAILING_STOPWORDS: &[&str] = &[
    "file",
    "files",
    "doc",
    "docs",
    "document",
    "documents",
    "image",
    "images",
    "photo",
    "photos",
    "pic",
    "pics",
];

/// Characters that never appear in a category label destined for a folder
/// name.
const FORBIDDEN_PATH_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Lowercases the input, keeps alphanumerics, and collapses whitespace runs
/// into single spaces. Any other character is dropped.
pub fn normalize_label(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_space = true;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            result.extend(ch.to_lowercase());
            last_was_space = false;
        } else if ch.is_whitespace() && !last_was_space {
            result.push(' ');
            last_was_space = true;
        }
    }
    while result.ends_with(' ') {
        result.pop();
    }
    result
}

/// Removes trailing stop-word tokens from a normalized label, but never the
/// only remaining token.
pub fn strip_trailing_stopwords(normalized: &str) -> String {
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.len() <= 1 {
        return normalized.to_string();
    }
    while tokens.len() > 1 && TRAILING_STOPWORDS.contains(tokens.last().unwrap()) {
        tokens.pop();
    }
    tokens.join(" ")
}

/// Levenshtein similarity in `[0, 1]`.
///
/// Equal strings score 1 (including two empty strings); an empty string
/// against a non-empty one scores 0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (m, n) = (a_chars.len(), b_chars.len());

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let dist = prev[n] as f64;
    let max_len = m.max(n) as f64;
    1.0 - dist / max_len
}

/// Strips characters that are unsafe in folder names (control characters
/// plus `<>:"/\|?*`) and trims surrounding whitespace.
pub fn sanitize_path_label(input: &str) -> String {
    input
        .chars()
        .filter(|ch| !ch.is_control() && !FORBIDDEN_PATH_CHARS.contains(ch))
        .collect::<String>()
        .trim()
        .to_string()
}
