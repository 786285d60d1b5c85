//! Rename-only persistence scenarios: rows that carry a rename decision
//! but no categorization must survive pruning and re-runs.

mod common;

use filesorter::db::cache;
use filesorter::{Database, FileType, ResolvedCategory};

fn empty_labels() -> ResolvedCategory {
    ResolvedCategory {
        taxonomy_id: 0,
        category: String::new(),
        subcategory: String::new(),
    }
}

#[test]
fn test_rename_only_rows_survive_pruning() {
    let db = Database::open_in_memory().unwrap();
    let dir_path = "/sample";

    cache::upsert(
        &db,
        "rename.png",
        FileType::File,
        dir_path,
        &empty_labels(),
        false,
        "rename_suggestion.png",
        true,
        false,
    )
    .unwrap();
    cache::upsert(
        &db,
        "empty.png",
        FileType::File,
        dir_path,
        &empty_labels(),
        false,
        "",
        false,
        false,
    )
    .unwrap();

    let removed = cache::prune_empty(&db, dir_path).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].file_name, "empty.png");

    let entries = cache::list(&db, dir_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_name, "rename.png");
    assert!(entries[0].rename_only);
    assert!(!entries[0].rename_applied);
    assert_eq!(entries[0].suggested_name, "rename_suggestion.png");
    assert!(entries[0].category.is_empty());
    assert!(entries[0].subcategory.is_empty());
}

#[test]
fn test_suggestion_only_rows_survive_pruning() {
    let db = Database::open_in_memory().unwrap();
    let dir_path = "/sample";

    cache::upsert(
        &db,
        "suggested.png",
        FileType::File,
        dir_path,
        &empty_labels(),
        false,
        "suggested_name.png",
        false,
        false,
    )
    .unwrap();

    assert!(cache::prune_empty(&db, dir_path).unwrap().is_empty());

    let entries = cache::list(&db, dir_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].rename_only);
    assert_eq!(entries[0].suggested_name, "suggested_name.png");
}

#[test]
fn test_rename_only_row_downgraded_to_empty_is_pruned() {
    let db = Database::open_in_memory().unwrap();
    let dir_path = "/sample";

    cache::upsert(
        &db,
        "rename.png",
        FileType::File,
        dir_path,
        &empty_labels(),
        false,
        "rename_suggestion.png",
        true,
        false,
    )
    .unwrap();

    // A later upsert clears both the suggestion and the rename marker; the
    // row no longer carries any decision.
    cache::upsert(
        &db,
        "rename.png",
        FileType::File,
        dir_path,
        &empty_labels(),
        false,
        "",
        false,
        false,
    )
    .unwrap();

    let removed = cache::prune_empty(&db, dir_path).unwrap();
    assert_eq!(removed.len(), 1);
    assert!(cache::list(&db, dir_path).unwrap().is_empty());
}

#[test]
fn test_rename_applied_survives_relabeling() {
    let db = Database::open_in_memory().unwrap();
    let dir_path = "/sample";

    cache::upsert(
        &db,
        "photo.jpg",
        FileType::File,
        dir_path,
        &empty_labels(),
        false,
        "photo_renamed.jpg",
        true,
        true,
    )
    .unwrap();

    // A later categorization of the renamed file keeps the applied flag.
    let labels = ResolvedCategory {
        taxonomy_id: 0,
        category: "Images".to_string(),
        subcategory: "Photos".to_string(),
    };
    cache::upsert(
        &db,
        "photo.jpg",
        FileType::File,
        dir_path,
        &labels,
        false,
        "photo_renamed.jpg",
        false,
        false,
    )
    .unwrap();

    let row = cache::get(&db, dir_path, "photo.jpg", FileType::File)
        .unwrap()
        .unwrap();
    assert!(row.rename_applied);
    assert!(!row.rename_only);
    assert_eq!(row.category, "Images");
}
