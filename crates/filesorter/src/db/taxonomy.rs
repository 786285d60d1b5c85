//! Canonical catalogue of `(category, subcategory)` pairs.
//!
//! Free-form model output is folded into the catalogue through
//! normalization, a fixed synonym table, stop-word stripping, an alias
//! table and finally fuzzy (edit-distance) matching. Unknown pairs become
//! new canonical entries.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};
use crate::labels::{normalize_label, string_similarity, strip_trailing_stopwords};

/// Two labels whose combined similarity reaches this score are treated as
/// the same taxonomy entry.
const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Outcome of resolving a raw label pair.
///
/// `taxonomy_id > 0` references a catalogue entry, `0` means "no labels"
/// (the record may still carry a rename suggestion) and `-1` marks a
/// rejected result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCategory {
    pub taxonomy_id: i64,
    pub category: String,
    pub subcategory: String,
}

/// One canonical catalogue row.
#[derive(Debug, Clone)]
pub struct TaxonomyEntry {
    pub id: i64,
    pub category: String,
    pub subcategory: String,
    pub normalized_category: String,
    pub normalized_subcategory: String,
}

/// Fixed main-category synonym table: normalized spelling to
/// `(normalized target, display target)`.
const CATEGORY_SYNONYMS: &[(&str, (&str, &str))] = &[
    ("archive", ("archives", "Archives")),
    ("archives", ("archives", "Archives")),
    ("backup", ("archives", "Archives")),
    ("backups", ("archives", "Archives")),
    ("backup file", ("archives", "Archives")),
    ("backup files", ("archives", "Archives")),
    ("document", ("documents", "Documents")),
    ("documents", ("documents", "Documents")),
    ("doc", ("documents", "Documents")),
    ("docs", ("documents", "Documents")),
    ("text", ("documents", "Documents")),
    ("texts", ("documents", "Documents")),
    ("paper", ("documents", "Documents")),
    ("papers", ("documents", "Documents")),
    ("report", ("documents", "Documents")),
    ("reports", ("documents", "Documents")),
    ("spreadsheet", ("documents", "Documents")),
    ("spreadsheets", ("documents", "Documents")),
    ("table", ("documents", "Documents")),
    ("tables", ("documents", "Documents")),
    ("office file", ("documents", "Documents")),
    ("office files", ("documents", "Documents")),
    ("software", ("software", "Software")),
    ("application", ("software", "Software")),
    ("applications", ("software", "Software")),
    ("app", ("software", "Software")),
    ("apps", ("software", "Software")),
    ("program", ("software", "Software")),
    ("programs", ("software", "Software")),
    ("installer", ("software", "Software")),
    ("installers", ("software", "Software")),
    ("installation", ("software", "Software")),
    ("installations", ("software", "Software")),
    ("installation file", ("software", "Software")),
    ("installation files", ("software", "Software")),
    ("software installation", ("software", "Software")),
    ("software installations", ("software", "Software")),
    ("software installation file", ("software", "Software")),
    ("software installation files", ("software", "Software")),
    ("setup", ("software", "Software")),
    ("setups", ("software", "Software")),
    ("setup file", ("software", "Software")),
    ("setup files", ("software", "Software")),
    ("update", ("software", "Software")),
    ("updates", ("software", "Software")),
    ("software update", ("software", "Software")),
    ("software updates", ("software", "Software")),
    ("patch", ("software", "Software")),
    ("patches", ("software", "Software")),
    ("upgrade", ("software", "Software")),
    ("upgrades", ("software", "Software")),
    ("updater", ("software", "Software")),
    ("updaters", ("software", "Software")),
    ("image", ("images", "Images")),
    ("images", ("images", "Images")),
    ("image file", ("images", "Images")),
    ("image files", ("images", "Images")),
    ("photo", ("images", "Images")),
    ("photos", ("images", "Images")),
    ("graphic", ("images", "Images")),
    ("graphics", ("images", "Images")),
    ("picture", ("images", "Images")),
    ("pictures", ("images", "Images")),
    ("pic", ("images", "Images")),
    ("pics", ("images", "Images")),
    ("screenshot", ("images", "Images")),
    ("screenshots", ("images", "Images")),
    ("wallpaper", ("images", "Images")),
    ("wallpapers", ("images", "Images")),
];

/// Subcategory spellings that mark a "Media" main category as image
/// content.
const IMAGE_LIKE_LABELS: &[&str] = &[
    "image",
    "images",
    "image file",
    "image files",
    "photo",
    "photos",
    "graphic",
    "graphics",
    "picture",
    "pictures",
    "pic",
    "pics",
    "screenshot",
    "screenshots",
    "wallpaper",
    "wallpapers",
];

fn lookup_synonym(normalized_category: &str) -> Option<(&'static str, &'static str)> {
    CATEGORY_SYNONYMS
        .iter()
        .find(|(key, _)| *key == normalized_category)
        .map(|(_, target)| *target)
}

fn is_image_like(normalized: &str) -> bool {
    if normalized.is_empty() {
        return false;
    }
    IMAGE_LIKE_LABELS.contains(&normalized)
        || IMAGE_LIKE_LABELS.contains(&strip_trailing_stopwords(normalized).as_str())
}

/// Rewrites a normalized main category through the synonym table. Returns
/// the normalized form plus an optional canonical display spelling.
fn canonicalize_category(
    normalized_category: &str,
    normalized_subcategory: &str,
) -> (String, Option<&'static str>) {
    if let Some((norm, display)) = lookup_synonym(normalized_category) {
        return (norm.to_string(), Some(display));
    }
    let stripped = strip_trailing_stopwords(normalized_category);
    if let Some((norm, display)) = lookup_synonym(&stripped) {
        return (norm.to_string(), Some(display));
    }
    // "Media" can be broader than images, so only collapse when the paired
    // subcategory is image-like.
    if (normalized_category == "media" || stripped == "media")
        && is_image_like(normalized_subcategory)
    {
        return ("images".to_string(), Some("Images"));
    }
    (normalized_category.to_string(), None)
}

fn make_key(norm_category: &str, norm_subcategory: &str) -> String {
    format!("{}::{}", norm_category, norm_subcategory)
}

/// Stateful resolver over the `category_taxonomy` and `category_alias`
/// tables.
///
/// The in-memory lookup maps mirror the database and are only updated after
/// a successful write, so a failed insertion leaves the resolver in a state
/// where the next attempt retries cleanly.
pub struct TaxonomyResolver {
    db: Database,
    entries: Vec<TaxonomyEntry>,
    index: HashMap<i64, usize>,
    canonical: HashMap<String, i64>,
    aliases: HashMap<String, i64>,
}

impl TaxonomyResolver {
    /// Loads the catalogue and alias table into memory.
    pub fn load(db: &Database) -> Result<Self, DatabaseError> {
        let mut resolver = Self {
            db: db.clone(),
            entries: Vec::new(),
            index: HashMap::new(),
            canonical: HashMap::new(),
            aliases: HashMap::new(),
        };

        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, canonical_category, canonical_subcategory,
                        normalized_category, normalized_subcategory
                 FROM category_taxonomy",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(TaxonomyEntry {
                    id: row.get(0)?,
                    category: row.get(1)?,
                    subcategory: row.get(2)?,
                    normalized_category: row.get(3)?,
                    normalized_subcategory: row.get(4)?,
                })
            })?;
            for row in rows {
                let entry = row?;
                resolver.index.insert(entry.id, resolver.entries.len());
                resolver.canonical.insert(
                    make_key(&entry.normalized_category, &entry.normalized_subcategory),
                    entry.id,
                );
                resolver.entries.push(entry);
            }

            let mut stmt = conn.prepare(
                "SELECT alias_category_norm, alias_subcategory_norm, taxonomy_id
                 FROM category_alias",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (alias_cat, alias_sub, taxonomy_id) = row?;
                resolver
                    .aliases
                    .insert(make_key(&alias_cat, &alias_sub), taxonomy_id);
            }
            Ok(())
        })?;

        Ok(resolver)
    }

    /// Folds a raw label pair into the catalogue.
    ///
    /// Resolving the same raw pair twice always yields the same id and the
    /// same canonical display strings.
    pub fn resolve(&mut self, category: &str, subcategory: &str) -> ResolvedCategory {
        let mut trimmed_category = category.trim().to_string();
        let mut trimmed_subcategory = subcategory.trim().to_string();
        if trimmed_category.is_empty() {
            trimmed_category = "Uncategorized".to_string();
        }
        if trimmed_subcategory.is_empty() {
            trimmed_subcategory = "General".to_string();
        }

        let raw_norm_category = normalize_label(&trimmed_category);
        let norm_subcategory = normalize_label(&trimmed_subcategory);
        let (norm_category, canonical_display) =
            canonicalize_category(&raw_norm_category, &norm_subcategory);
        if let Some(display) = canonical_display {
            trimmed_category = display.to_string();
        }

        let match_subcategory = strip_trailing_stopwords(&norm_subcategory);
        let key = make_key(&norm_category, &match_subcategory);

        let mut taxonomy_id = self.resolve_existing(&key, &norm_category, &match_subcategory);
        if taxonomy_id.is_none() && match_subcategory != norm_subcategory {
            let raw_key = make_key(&norm_category, &norm_subcategory);
            taxonomy_id = self.resolve_existing(&raw_key, &norm_category, &norm_subcategory);
        }

        self.build_resolved(
            taxonomy_id,
            trimmed_category,
            trimmed_subcategory,
            &norm_category,
            &match_subcategory,
        )
    }

    /// Returns up to `max_entries` canonical pairs in catalogue order.
    /// `max_entries == 0` means all.
    pub fn snapshot(&self, max_entries: usize) -> Vec<(String, String)> {
        let cap = if max_entries == 0 {
            self.entries.len()
        } else {
            max_entries
        };
        self.entries
            .iter()
            .take(cap)
            .map(|entry| (entry.category.clone(), entry.subcategory.clone()))
            .collect()
    }

    fn find_entry(&self, taxonomy_id: i64) -> Option<&TaxonomyEntry> {
        self.index
            .get(&taxonomy_id)
            .and_then(|&idx| self.entries.get(idx))
    }

    /// Alias, canonical and fuzzy lookup, in that order.
    fn resolve_existing(
        &self,
        key: &str,
        norm_category: &str,
        norm_subcategory: &str,
    ) -> Option<i64> {
        if let Some(&id) = self.aliases.get(key) {
            return Some(id);
        }
        if let Some(&id) = self.canonical.get(key) {
            return Some(id);
        }
        self.find_fuzzy_match(norm_category, norm_subcategory)
    }

    /// Best combined-similarity match over all catalogue entries; ties go
    /// to the first entry in insertion order.
    fn find_fuzzy_match(&self, norm_category: &str, norm_subcategory: &str) -> Option<i64> {
        let mut best_score = 0.0;
        let mut best_id = None;
        for entry in &self.entries {
            let category_score = string_similarity(norm_category, &entry.normalized_category);
            let subcategory_score =
                string_similarity(norm_subcategory, &entry.normalized_subcategory);
            let combined = (category_score + subcategory_score) / 2.0;
            if combined > best_score {
                best_score = combined;
                best_id = Some(entry.id);
            }
        }
        best_id.filter(|_| best_score >= SIMILARITY_THRESHOLD)
    }

    fn build_resolved(
        &mut self,
        taxonomy_id: Option<i64>,
        fallback_category: String,
        fallback_subcategory: String,
        norm_category: &str,
        norm_subcategory: &str,
    ) -> ResolvedCategory {
        let taxonomy_id = taxonomy_id.or_else(|| {
            self.create_entry(
                &fallback_category,
                &fallback_subcategory,
                norm_category,
                norm_subcategory,
            )
        });

        match taxonomy_id {
            Some(id) => {
                self.ensure_alias(id, norm_category, norm_subcategory);
                match self.find_entry(id) {
                    Some(entry) => ResolvedCategory {
                        taxonomy_id: entry.id,
                        category: entry.category.clone(),
                        subcategory: entry.subcategory.clone(),
                    },
                    None => ResolvedCategory {
                        taxonomy_id: id,
                        category: fallback_category,
                        subcategory: fallback_subcategory,
                    },
                }
            }
            None => ResolvedCategory {
                taxonomy_id: -1,
                category: fallback_category,
                subcategory: fallback_subcategory,
            },
        }
    }

    /// Inserts a new canonical entry and registers it in the in-memory
    /// caches. Returns `None` when persistence fails.
    fn create_entry(
        &mut self,
        category: &str,
        subcategory: &str,
        norm_category: &str,
        norm_subcategory: &str,
    ) -> Option<i64> {
        let inserted = self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO category_taxonomy
                    (canonical_category, canonical_subcategory,
                     normalized_category, normalized_subcategory, frequency)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![category, subcategory, norm_category, norm_subcategory],
            );
            match result {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(err) if is_unique_violation(&err) => {
                    // Lost a race against an earlier insert of the same
                    // normalized pair; fall back to its id.
                    let existing = conn
                        .query_row(
                            "SELECT id FROM category_taxonomy
                             WHERE normalized_category = ?1 AND normalized_subcategory = ?2
                             LIMIT 1",
                            params![norm_category, norm_subcategory],
                            |row| row.get::<_, i64>(0),
                        )
                        .optional()?;
                    Ok(existing)
                }
                Err(err) => Err(DatabaseError::Sqlite(err)),
            }
        });

        match inserted {
            Ok(Some(id)) => {
                let entry = TaxonomyEntry {
                    id,
                    category: category.to_string(),
                    subcategory: subcategory.to_string(),
                    normalized_category: norm_category.to_string(),
                    normalized_subcategory: norm_subcategory.to_string(),
                };
                self.index.insert(id, self.entries.len());
                self.canonical
                    .insert(make_key(norm_category, norm_subcategory), id);
                self.entries.push(entry);
                Some(id)
            }
            Ok(None) => None,
            Err(err) => {
                log::error!("Failed to insert taxonomy entry: {}", err);
                None
            }
        }
    }

    /// Records `norm pair -> taxonomy_id` in the alias table when the pair
    /// is not already the entry's canonical form.
    fn ensure_alias(&mut self, taxonomy_id: i64, norm_category: &str, norm_subcategory: &str) {
        let key = make_key(norm_category, norm_subcategory);

        if self.canonical.get(&key) == Some(&taxonomy_id) {
            return;
        }
        if self.aliases.contains_key(&key) {
            return;
        }

        let written = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO category_alias
                    (alias_category_norm, alias_subcategory_norm, taxonomy_id)
                 VALUES (?1, ?2, ?3)",
                params![norm_category, norm_subcategory, taxonomy_id],
            )?;
            Ok(())
        });

        match written {
            Ok(()) => {
                self.aliases.insert(key, taxonomy_id);
            }
            Err(err) => {
                log::error!("Failed to insert category alias: {}", err);
            }
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
