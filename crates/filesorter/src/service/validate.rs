//! Validation predicates for category labels destined to become folder
//! names.

const MAX_LABEL_LENGTH: usize = 80;

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Device names Windows refuses as file or folder names.
const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

fn contains_only_allowed_chars(value: &str) -> bool {
    value
        .chars()
        .all(|ch| !ch.is_control() && !FORBIDDEN_CHARS.contains(&ch))
}

fn has_leading_or_trailing_space(value: &str) -> bool {
    let first = value.chars().next();
    let last = value.chars().next_back();
    first.map(char::is_whitespace).unwrap_or(false)
        || last.map(char::is_whitespace).unwrap_or(false)
}

fn is_reserved_windows_name(value: &str) -> bool {
    RESERVED_WINDOWS_NAMES.contains(&value.to_lowercase().as_str())
}

/// A `.xyz` tail of one to five letters reads as a file extension, which
/// means the model echoed the file name instead of categorizing it.
fn looks_like_extension(value: &str) -> bool {
    let Some(dot_pos) = value.rfind('.') else {
        return false;
    };
    let ext = &value[dot_pos + 1..];
    if ext.is_empty() || ext.chars().count() > 5 {
        return false;
    }
    ext.chars().all(|ch| ch.is_alphabetic())
}

/// Validates a category/subcategory pair. Returns the failure reason used
/// in progress events and logs.
pub(crate) fn validate_labels(category: &str, subcategory: &str) -> Result<(), &'static str> {
    if category.is_empty() || subcategory.is_empty() {
        return Err("Category or subcategory is empty");
    }
    if category.chars().count() > MAX_LABEL_LENGTH || subcategory.chars().count() > MAX_LABEL_LENGTH
    {
        return Err("Category or subcategory exceeds max length");
    }
    if !contains_only_allowed_chars(category) || !contains_only_allowed_chars(subcategory) {
        return Err("Category or subcategory contains disallowed characters");
    }
    if looks_like_extension(category) || looks_like_extension(subcategory) {
        return Err("Category or subcategory looks like a file extension");
    }
    if is_reserved_windows_name(category) || is_reserved_windows_name(subcategory) {
        return Err("Category or subcategory is a reserved name");
    }
    if has_leading_or_trailing_space(category) || has_leading_or_trailing_space(subcategory) {
        return Err("Category or subcategory has leading/trailing whitespace");
    }
    if category.to_lowercase() == subcategory.to_lowercase() {
        return Err("Category and subcategory are identical");
    }
    Ok(())
}
