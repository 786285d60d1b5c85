//! Cache repository — CRUD operations for the `file_categorization` table.
//!
//! One row per `(file_name, file_type, dir_path)`. A row is only surfaced
//! to callers when it carries labels, a rename suggestion, or the
//! `rename_only` marker; anything else is noise left behind by failed runs
//! and is skipped on read and deleted by [`prune_empty`].

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError, ResolvedCategory};
use crate::types::{CategorizedFile, FileType};

const SELECT_COLUMNS: &str = "dir_path, file_name, file_type, category, subcategory, \
     IFNULL(suggested_name, ''), taxonomy_id, categorization_style, rename_only, rename_applied";

fn from_row(row: &Row<'_>) -> Result<CategorizedFile, rusqlite::Error> {
    let type_code: String = row.get(2)?;
    Ok(CategorizedFile {
        dir_path: row.get(0)?,
        file_name: row.get(1)?,
        file_type: FileType::from_code(&type_code),
        category: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        subcategory: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        suggested_name: row.get(5)?,
        taxonomy_id: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        from_cache: true,
        used_consistency_hints: row.get::<_, Option<i64>>(7)?.unwrap_or(0) != 0,
        rename_only: row.get::<_, Option<i64>>(8)?.unwrap_or(0) != 0,
        rename_applied: row.get::<_, Option<i64>>(9)?.unwrap_or(0) != 0,
    })
}

fn has_content(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Keeps only rows that satisfy the persistence invariant.
fn accept(entry: CategorizedFile) -> Option<CategorizedFile> {
    let has_labels = has_content(&entry.category) && has_content(&entry.subcategory);
    let has_suggestion = has_content(&entry.suggested_name);
    if !entry.rename_only && !has_labels && !has_suggestion {
        return None;
    }
    Some(entry)
}

/// Inserts or updates the row for `(file_name, file_type, dir_path)`.
///
/// `rename_applied` is monotonic: once a row records an applied rename, a
/// later upsert with `rename_applied = false` does not reset it. After a
/// successful write the taxonomy frequency of `resolved.taxonomy_id` is
/// recomputed from the cache.
#[allow(clippy::too_many_arguments)]
pub fn upsert(
    db: &Database,
    file_name: &str,
    file_type: FileType,
    dir_path: &str,
    resolved: &ResolvedCategory,
    used_consistency_hints: bool,
    suggested_name: &str,
    rename_only: bool,
    rename_applied: bool,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let taxonomy_id = (resolved.taxonomy_id > 0).then_some(resolved.taxonomy_id);
        conn.execute(
            "INSERT INTO file_categorization
                (file_name, file_type, dir_path, category, subcategory, suggested_name,
                 taxonomy_id, categorization_style, rename_only, rename_applied)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(file_name, file_type, dir_path)
             DO UPDATE SET
                category = excluded.category,
                subcategory = excluded.subcategory,
                suggested_name = excluded.suggested_name,
                taxonomy_id = excluded.taxonomy_id,
                categorization_style = excluded.categorization_style,
                rename_only = excluded.rename_only,
                rename_applied = CASE
                    WHEN excluded.rename_applied = 1 THEN 1
                    ELSE rename_applied
                END",
            params![
                file_name,
                file_type.code(),
                dir_path,
                resolved.category,
                resolved.subcategory,
                suggested_name,
                taxonomy_id,
                used_consistency_hints as i64,
                rename_only as i64,
                rename_applied as i64,
            ],
        )?;

        if resolved.taxonomy_id > 0 {
            recompute_frequency(conn, resolved.taxonomy_id)?;
        }
        Ok(())
    })
}

/// Sets `frequency` to the number of cache rows referencing the taxonomy
/// entry.
fn recompute_frequency(conn: &Connection, taxonomy_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE category_taxonomy
         SET frequency = (SELECT COUNT(*) FROM file_categorization WHERE taxonomy_id = ?1)
         WHERE id = ?2",
        params![taxonomy_id, taxonomy_id],
    )?;
    Ok(())
}

/// Returns the cached decision for a single entry, if any.
pub fn get(
    db: &Database,
    dir_path: &str,
    file_name: &str,
    file_type: FileType,
) -> Result<Option<CategorizedFile>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM file_categorization
                     WHERE dir_path = ?1 AND file_name = ?2 AND file_type = ?3
                     LIMIT 1"
                ),
                params![dir_path, file_name, file_type.code()],
                from_row,
            )
            .optional()?;
        Ok(row.and_then(accept))
    })
}

/// Returns the raw `(category, subcategory)` pair for an entry without the
/// empty-row filtering, or `None` when the entry has no row at all.
pub fn cached_labels(
    db: &Database,
    dir_path: &str,
    file_name: &str,
    file_type: FileType,
) -> Result<Option<(String, String)>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT IFNULL(category, ''), IFNULL(subcategory, '')
                 FROM file_categorization
                 WHERE dir_path = ?1 AND file_name = ?2 AND file_type = ?3
                 LIMIT 1",
                params![dir_path, file_name, file_type.code()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists the cached decisions directly inside `dir_path`.
pub fn list(db: &Database, dir_path: &str) -> Result<Vec<CategorizedFile>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM file_categorization WHERE dir_path = ?1"
        ))?;
        let rows = stmt.query_map(params![dir_path], from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            if let Some(entry) = accept(row?) {
                entries.push(entry);
            }
        }
        Ok(entries)
    })
}

/// Lists the cached decisions inside `dir_path` and every subdirectory.
pub fn list_recursive(
    db: &Database,
    dir_path: &str,
) -> Result<Vec<CategorizedFile>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM file_categorization
             WHERE dir_path = ?1 OR dir_path LIKE ?2 ESCAPE '\\'"
        ))?;
        let pattern = recursive_dir_pattern(dir_path);
        let rows = stmt.query_map(params![dir_path, pattern], from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            if let Some(entry) = accept(row?) {
                entries.push(entry);
            }
        }
        Ok(entries)
    })
}

/// Deletes the row for a single entry. Returns `true` when a row was
/// removed.
pub fn remove(
    db: &Database,
    dir_path: &str,
    file_name: &str,
    file_type: FileType,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "DELETE FROM file_categorization
             WHERE dir_path = ?1 AND file_name = ?2 AND file_type = ?3",
            params![dir_path, file_name, file_type.code()],
        )?;
        Ok(affected > 0)
    })
}

/// Deletes every row directly inside `dir_path`.
pub fn clear(db: &Database, dir_path: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "DELETE FROM file_categorization WHERE dir_path = ?1",
            params![dir_path],
        )?;
        Ok(affected)
    })
}

/// Deletes rows in `dir_path` whose labels and suggestion are all empty and
/// which are not rename-only markers. Returns the deleted rows.
pub fn prune_empty(db: &Database, dir_path: &str) -> Result<Vec<CategorizedFile>, DatabaseError> {
    let doomed = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT file_name, file_type, IFNULL(category, ''), IFNULL(subcategory, ''), taxonomy_id
             FROM file_categorization
             WHERE dir_path = ?1
               AND (category IS NULL OR TRIM(category) = ''
                    OR subcategory IS NULL OR TRIM(subcategory) = '')
               AND (suggested_name IS NULL OR TRIM(suggested_name) = '')
               AND IFNULL(rename_only, 0) = 0",
        )?;
        let rows = stmt.query_map(params![dir_path], |row| {
            let type_code: String = row.get(1)?;
            let mut entry = CategorizedFile::new(
                dir_path,
                row.get::<_, String>(0)?,
                FileType::from_code(&type_code),
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            );
            entry.from_cache = true;
            Ok(entry)
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    })?;

    for entry in &doomed {
        remove(db, &entry.dir_path, &entry.file_name, entry.file_type)?;
    }
    Ok(doomed)
}

/// Most-recent-first scan of rows of the given type, yielding at most
/// `limit` distinct `(category, subcategory)` pairs whose file-name
/// extension matches `extension` (case-insensitive). An empty `extension`
/// matches names without an extension.
pub fn recent_categories_for_extension(
    db: &Database,
    extension: &str,
    file_type: FileType,
    limit: usize,
) -> Result<Vec<(String, String)>, DatabaseError> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT file_name, IFNULL(category, ''), IFNULL(subcategory, '')
             FROM file_categorization
             WHERE file_type = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;

        // Recent distinct pairs are sparse, so over-fetch before filtering
        // by extension.
        let fetch_limit = (limit * 5).max(limit) as i64;
        let normalized_extension = extension.to_lowercase();
        let wants_extension = !normalized_extension.is_empty();

        let rows = stmt.query_map(params![file_type.code(), fetch_limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut results: Vec<(String, String)> = Vec::new();
        for row in rows {
            let (file_name, category, subcategory) = row?;
            if file_name.is_empty() || category.is_empty() {
                continue;
            }
            let candidate_extension = extension_of(&file_name);
            if wants_extension {
                if candidate_extension != normalized_extension {
                    continue;
                }
            } else if !candidate_extension.is_empty() {
                continue;
            }
            let pair = (category, subcategory);
            if results.contains(&pair) {
                continue;
            }
            results.push(pair);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    })
}

/// Returns the `categorization_style` of the first row in `dir_path`, or
/// `None` when the directory has no cached rows. NULL styles from rows
/// written before the column existed read as `false`.
pub fn directory_style(db: &Database, dir_path: &str) -> Result<Option<bool>, DatabaseError> {
    db.with_conn(|conn| {
        let style = conn
            .query_row(
                "SELECT categorization_style FROM file_categorization
                 WHERE dir_path = ?1 LIMIT 1",
                params![dir_path],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?;
        Ok(style.map(|value| value.unwrap_or(0) != 0))
    })
}

/// Returns whether any row exists for `file_name`, regardless of directory.
pub fn is_file_categorized(db: &Database, file_name: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                "SELECT 1 FROM file_categorization WHERE file_name = ?1 LIMIT 1",
                params![file_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// Returns whether a row exists for `file_name` inside `dir_path`.
pub fn entry_exists(db: &Database, file_name: &str, dir_path: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                "SELECT 1 FROM file_categorization WHERE file_name = ?1 AND dir_path = ?2 LIMIT 1",
                params![file_name, dir_path],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// Lists the file names with cached rows directly inside `dir_path`.
pub fn dir_file_names(db: &Database, dir_path: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT file_name FROM file_categorization WHERE dir_path = ?1")?;
        let rows = stmt.query_map(params![dir_path], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    })
}

/// Lowercased extension of a file name including the leading dot, or an
/// empty string when there is none.
pub(crate) fn extension_of(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(pos) if pos + 1 < file_name.len() => file_name[pos..].to_lowercase(),
        _ => String::new(),
    }
}

/// Escapes `%`, `_` and `\` for a LIKE pattern using backslash escaping.
fn escape_like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    for ch in value.chars() {
        if ch == '\\' || ch == '%' || ch == '_' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Builds the LIKE pattern matching every subdirectory of `dir_path`. The
/// separator is `\` when the input contains one, `/` otherwise.
fn recursive_dir_pattern(dir_path: &str) -> String {
    let mut escaped = escape_like_pattern(dir_path);
    if dir_path.is_empty() {
        escaped.push('%');
        return escaped;
    }
    let sep = if dir_path.contains('\\') { '\\' } else { '/' };
    if dir_path.ends_with(sep) {
        escaped.push('%');
        return escaped;
    }
    if sep == '\\' {
        escaped.push('\\');
    }
    escaped.push(sep);
    escaped.push('%');
    escaped
}
