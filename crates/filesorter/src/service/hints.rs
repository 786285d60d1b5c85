//! Consistency-hint bookkeeping.
//!
//! Hints bias the model toward reusing labels it already assigned to
//! similar entries. "Similar" means the same file signature: file entries
//! bucket by lowercased extension, directories all share one bucket.

use std::collections::{HashMap, VecDeque};

use crate::db::{cache, Database};
use crate::labels::sanitize_path_label;
use crate::types::FileType;

pub(crate) const MAX_CONSISTENCY_HINTS: usize = 5;

pub(crate) type CategoryPair = (String, String);

/// Per-signature recent assignments, most recent first. Process-scoped:
/// lives for one orchestrator run.
pub(crate) type SessionHistory = HashMap<String, VecDeque<CategoryPair>>;

/// Lowercased extension including the leading dot, or empty when absent.
pub(crate) fn extract_extension(file_name: &str) -> String {
    cache::extension_of(file_name)
}

/// `"FILE:.ext"` / `"FILE:<none>"` / `"DIR:<none>"` hint bucket key.
pub(crate) fn make_file_signature(file_type: FileType, extension: &str) -> String {
    let type_tag = match file_type {
        FileType::Directory => "DIR",
        FileType::File => "FILE",
    };
    let normalized_extension = if extension.is_empty() {
        "<none>"
    } else {
        extension
    };
    format!("{}:{}", type_tag, normalized_extension)
}

/// Sanitizes a candidate pair and appends it when it is new. An empty
/// subcategory falls back to the category itself. Returns whether the pair
/// was added.
pub(crate) fn append_unique_hint(target: &mut Vec<CategoryPair>, candidate: &CategoryPair) -> bool {
    let category = sanitize_path_label(&candidate.0);
    if category.is_empty() {
        return false;
    }
    let mut subcategory = sanitize_path_label(&candidate.1);
    if subcategory.is_empty() {
        subcategory = category.clone();
    }
    let normalized = (category, subcategory);
    if target.contains(&normalized) {
        return false;
    }
    target.push(normalized);
    true
}

/// Moves the assignment to the front of its signature history, keeping at
/// most [`MAX_CONSISTENCY_HINTS`] entries.
pub(crate) fn record_session_assignment(history: &mut VecDeque<CategoryPair>, pair: &CategoryPair) {
    let category = sanitize_path_label(&pair.0);
    if category.is_empty() {
        return;
    }
    let mut subcategory = sanitize_path_label(&pair.1);
    if subcategory.is_empty() {
        subcategory = category.clone();
    }
    let normalized = (category, subcategory);

    history.retain(|existing| *existing != normalized);
    history.push_front(normalized);
    if history.len() > MAX_CONSISTENCY_HINTS {
        history.pop_back();
    }
}

/// Gathers up to five unique hints for a signature: session history first,
/// then topped up from the cache's recent rows for the same extension.
pub(crate) fn collect_consistency_hints(
    db: &Database,
    signature: &str,
    session_history: &SessionHistory,
    extension: &str,
    file_type: FileType,
) -> Vec<CategoryPair> {
    let mut hints = Vec::new();
    if signature.is_empty() {
        return hints;
    }

    if let Some(history) = session_history.get(signature) {
        for entry in history {
            if append_unique_hint(&mut hints, entry) && hints.len() == MAX_CONSISTENCY_HINTS {
                return hints;
            }
        }
    }

    if hints.len() < MAX_CONSISTENCY_HINTS {
        let remaining = MAX_CONSISTENCY_HINTS - hints.len();
        match cache::recent_categories_for_extension(db, extension, file_type, remaining) {
            Ok(db_hints) => {
                for entry in &db_hints {
                    if append_unique_hint(&mut hints, entry) && hints.len() == MAX_CONSISTENCY_HINTS
                    {
                        break;
                    }
                }
            }
            Err(err) => {
                log::warn!("Failed to read recent categories for hints: {}", err);
            }
        }
    }

    hints
}

/// Renders the hint block appended to the prompt.
pub(crate) fn format_hint_block(hints: &[CategoryPair]) -> String {
    if hints.is_empty() {
        return String::new();
    }

    let mut block = String::from("Recent assignments for similar items:\n");
    for (category, subcategory) in hints {
        let sub = if subcategory.is_empty() {
            category
        } else {
            subcategory
        };
        block.push_str(&format!("- {} : {}\n", category, sub));
    }
    block.push_str(
        "Prefer one of the above when it fits; otherwise, choose the closest consistent alternative.",
    );
    block
}
