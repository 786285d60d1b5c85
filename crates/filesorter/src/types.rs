//! Shared record types flowing through the categorization pipeline.

use serde::{Deserialize, Serialize};

/// Whether a scanned entry is a regular file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    /// Single-letter code stored in the cache database.
    pub fn code(self) -> &'static str {
        match self {
            FileType::File => "F",
            FileType::Directory => "D",
        }
    }

    /// Inverse of [`FileType::code`]. Unknown codes map to `File`.
    pub fn from_code(code: &str) -> Self {
        if code == "D" {
            FileType::Directory
        } else {
            FileType::File
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::File => write!(f, "file"),
            FileType::Directory => write!(f, "directory"),
        }
    }
}

/// A single filesystem entry submitted for categorization.
///
/// Immutable for the duration of a run; paths are carried as UTF-8 strings
/// because they double as cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub full_path: String,
    pub file_name: String,
    pub file_type: FileType,
}

impl FileEntry {
    pub fn new(
        full_path: impl Into<String>,
        file_name: impl Into<String>,
        file_type: FileType,
    ) -> Self {
        Self {
            full_path: full_path.into(),
            file_name: file_name.into(),
            file_type,
        }
    }
}

/// A categorization decision, either freshly produced or read back from the
/// cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizedFile {
    pub dir_path: String,
    pub file_name: String,
    pub file_type: FileType,
    pub category: String,
    pub subcategory: String,
    pub taxonomy_id: i64,
    pub from_cache: bool,
    pub used_consistency_hints: bool,
    pub suggested_name: String,
    pub rename_only: bool,
    pub rename_applied: bool,
}

impl CategorizedFile {
    pub fn new(
        dir_path: impl Into<String>,
        file_name: impl Into<String>,
        file_type: FileType,
        category: impl Into<String>,
        subcategory: impl Into<String>,
        taxonomy_id: i64,
    ) -> Self {
        Self {
            dir_path: dir_path.into(),
            file_name: file_name.into(),
            file_type,
            category: category.into(),
            subcategory: subcategory.into(),
            taxonomy_id,
            from_cache: false,
            used_consistency_hints: false,
            suggested_name: String::new(),
            rename_only: false,
            rename_applied: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_codes_round_trip() {
        assert_eq!(FileType::File.code(), "F");
        assert_eq!(FileType::Directory.code(), "D");
        assert_eq!(FileType::from_code("F"), FileType::File);
        assert_eq!(FileType::from_code("D"), FileType::Directory);
        assert_eq!(FileType::from_code(""), FileType::File);
    }

    #[test]
    fn test_categorized_file_defaults() {
        let entry = CategorizedFile::new("/d", "a.jpg", FileType::File, "Images", "Photos", 3);
        assert!(!entry.from_cache);
        assert!(!entry.rename_only);
        assert!(!entry.rename_applied);
        assert!(entry.suggested_name.is_empty());
    }
}
