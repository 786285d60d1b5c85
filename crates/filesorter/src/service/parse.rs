//! Pure parser for free-form model replies.
//!
//! Accepts labeled lines (`Category: X` / `Subcategory: Y`), inline pairs
//! (`X : Y`, `X:Y`) and bare single-line answers, in that order of
//! preference. Both labels come back path-sanitized.

use crate::labels::sanitize_path_label;

/// Strips `- `, `* `, `1.` and `1)` list prefixes.
fn strip_list_prefix(line: &str) -> &str {
    let line = line.trim();
    if line.is_empty() {
        return line;
    }

    let mut chars = line.char_indices();
    if let Some((_, first)) = chars.next() {
        if first == '-' || first == '*' {
            if let Some((idx, second)) = chars.next() {
                if second.is_whitespace() {
                    return line[idx..].trim();
                }
            }
        }
    }

    let digits_end = line
        .char_indices()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .map(|(idx, ch)| idx + ch.len_utf8())
        .last();
    if let Some(end) = digits_end {
        let rest = &line[end..];
        let mut rest_chars = rest.chars();
        if let (Some(marker), Some(space)) = (rest_chars.next(), rest_chars.next()) {
            if (marker == '.' || marker == ')') && space.is_whitespace() {
                return rest[marker.len_utf8()..].trim();
            }
        }
    }

    line
}

fn has_alpha(value: &str) -> bool {
    value.chars().any(|ch| ch.is_alphabetic())
}

/// Splits a line on `" : "` or `":"` into a plausible label pair.
fn split_inline_pair(line: &str) -> Option<(String, String)> {
    for delimiter in [" : ", ":"] {
        let Some(pos) = line.find(delimiter) else {
            continue;
        };
        let left = line[..pos].trim();
        let right = line[pos + delimiter.len()..].trim();
        if left.chars().count() < 2 || right.is_empty() {
            continue;
        }
        if !has_alpha(left) || !has_alpha(right) {
            continue;
        }
        return Some((left.to_string(), right.to_string()));
    }
    None
}

/// Parses a reply into `(category, subcategory)`. The subcategory may come
/// back empty; validation decides what to do with that.
pub(crate) fn parse_category_reply(input: &str) -> (String, String) {
    let lines: Vec<&str> = input
        .lines()
        .map(strip_list_prefix)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return (sanitize_path_label(input.trim()), String::new());
    }

    let mut category = String::new();
    let mut subcategory = String::new();

    // Labeled "key: value" lines take precedence.
    for line in &lines {
        let Some(colon) = line.find(':') else {
            continue;
        };
        let key = line[..colon].trim().to_lowercase();
        let value = line[colon + 1..].trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "category" | "main category" => category = value.to_string(),
            "subcategory" | "sub category" => subcategory = value.to_string(),
            _ => {}
        }
    }

    // Otherwise look for an inline "left : right" pair.
    if category.is_empty() || subcategory.is_empty() {
        for line in &lines {
            let Some((parsed_category, parsed_subcategory)) = split_inline_pair(line) else {
                continue;
            };
            if category.is_empty() {
                category = parsed_category;
            }
            if subcategory.is_empty() {
                subcategory = parsed_subcategory;
            }
            if !category.is_empty() && !subcategory.is_empty() {
                break;
            }
        }
    }

    if category.is_empty() {
        category = lines[0].to_string();
    }

    (
        sanitize_path_label(&category),
        sanitize_path_label(&subcategory),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_lines() {
        assert_eq!(
            parse_category_reply("Category: Images\nSubcategory: Photos"),
            ("Images".to_string(), "Photos".to_string())
        );
        assert_eq!(
            parse_category_reply("Main category: Documents\nSub category: Reports"),
            ("Documents".to_string(), "Reports".to_string())
        );
    }

    #[test]
    fn test_inline_pair_forms_agree() {
        let spaced = parse_category_reply("Documents : Spreadsheets");
        let tight = parse_category_reply("Documents:Spreadsheets");
        assert_eq!(spaced, ("Documents".to_string(), "Spreadsheets".to_string()));
        assert_eq!(spaced, tight);
    }

    #[test]
    fn test_list_prefixes_are_stripped() {
        assert_eq!(
            parse_category_reply("- Images : Photos"),
            ("Images".to_string(), "Photos".to_string())
        );
        assert_eq!(
            parse_category_reply("1. Images : Photos"),
            ("Images".to_string(), "Photos".to_string())
        );
        assert_eq!(
            parse_category_reply("2) Images : Photos"),
            ("Images".to_string(), "Photos".to_string())
        );
        assert_eq!(
            parse_category_reply("* Images : Photos"),
            ("Images".to_string(), "Photos".to_string())
        );
    }

    #[test]
    fn test_bare_line_becomes_category() {
        assert_eq!(
            parse_category_reply("Miscellaneous"),
            ("Miscellaneous".to_string(), String::new())
        );
    }

    #[test]
    fn test_empty_reply() {
        assert_eq!(parse_category_reply(""), (String::new(), String::new()));
        assert_eq!(parse_category_reply("  \n \n"), (String::new(), String::new()));
    }

    #[test]
    fn test_left_side_needs_two_chars_and_letters() {
        // "5:2" has no letters on either side; the first line wins as a
        // bare category instead.
        assert_eq!(
            parse_category_reply("5:2"),
            ("52".to_string(), String::new())
        );
    }

    #[test]
    fn test_labels_are_path_sanitized() {
        assert_eq!(
            parse_category_reply("Category: Ima/ges\nSubcategory: Pho*tos"),
            ("Images".to_string(), "Photos".to_string())
        );
    }

    #[test]
    fn test_noise_before_pair() {
        let (category, subcategory) =
            parse_category_reply("Here is my answer\nImages : Photos");
        assert_eq!(category, "Images");
        assert_eq!(subcategory, "Photos");
    }
}
