//! Idempotent schema initialization.
//!
//! The cache table predates several of its columns, so startup attempts to
//! add each optional column and swallows "duplicate column" errors. All
//! other errors are reported.

use rusqlite::Connection;

use super::DatabaseError;

const CREATE_CACHE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS file_categorization (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_name TEXT NOT NULL,
        file_type TEXT NOT NULL,
        dir_path TEXT NOT NULL,
        category TEXT NOT NULL,
        subcategory TEXT,
        suggested_name TEXT,
        taxonomy_id INTEGER,
        categorization_style INTEGER DEFAULT 0,
        rename_only INTEGER DEFAULT 0,
        rename_applied INTEGER DEFAULT 0,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(file_name, file_type, dir_path)
    );
";

/// Columns added after the table first shipped. Re-running each ALTER is the
/// migration mechanism; existing columns make the statement fail with a
/// duplicate-column error which is swallowed below.
const OPTIONAL_COLUMNS: &[(&str, &str)] = &[
    (
        "taxonomy_id",
        "ALTER TABLE file_categorization ADD COLUMN taxonomy_id INTEGER;",
    ),
    (
        "categorization_style",
        "ALTER TABLE file_categorization ADD COLUMN categorization_style INTEGER DEFAULT 0;",
    ),
    (
        "suggested_name",
        "ALTER TABLE file_categorization ADD COLUMN suggested_name TEXT;",
    ),
    (
        "rename_only",
        "ALTER TABLE file_categorization ADD COLUMN rename_only INTEGER DEFAULT 0;",
    ),
    (
        "rename_applied",
        "ALTER TABLE file_categorization ADD COLUMN rename_applied INTEGER DEFAULT 0;",
    ),
];

const CREATE_TAXONOMY_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS category_taxonomy (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        canonical_category TEXT NOT NULL,
        canonical_subcategory TEXT NOT NULL,
        normalized_category TEXT NOT NULL,
        normalized_subcategory TEXT NOT NULL,
        frequency INTEGER DEFAULT 0,
        UNIQUE(normalized_category, normalized_subcategory)
    );
    CREATE TABLE IF NOT EXISTS category_alias (
        alias_category_norm TEXT NOT NULL,
        alias_subcategory_norm TEXT NOT NULL,
        taxonomy_id INTEGER NOT NULL,
        PRIMARY KEY(alias_category_norm, alias_subcategory_norm),
        FOREIGN KEY(taxonomy_id) REFERENCES category_taxonomy(id)
    );
    CREATE INDEX IF NOT EXISTS idx_file_categorization_taxonomy
        ON file_categorization(taxonomy_id);
    CREATE INDEX IF NOT EXISTS idx_category_alias_taxonomy
        ON category_alias(taxonomy_id);
";

/// Creates all tables and applies the add-column migrations.
pub(super) fn initialize(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(CREATE_CACHE_TABLE)?;

    for (column, ddl) in OPTIONAL_COLUMNS {
        add_column_if_missing(conn, column, ddl)?;
    }

    conn.execute_batch(CREATE_TAXONOMY_TABLES)?;
    Ok(())
}

fn add_column_if_missing(conn: &Connection, column: &str, ddl: &str) -> Result<(), DatabaseError> {
    match conn.execute_batch(ddl) {
        Ok(()) => Ok(()),
        Err(err) if is_duplicate_column_error(&err) => Ok(()),
        Err(err) => {
            // Anything other than "column already there" is worth surfacing,
            // but a partially migrated cache is still usable.
            log::warn!("Failed to add column '{}': {}", column, err);
            Ok(())
        }
    }
}

fn is_duplicate_column_error(err: &rusqlite::Error) -> bool {
    err.to_string()
        .to_lowercase()
        .contains("duplicate column name")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .any(|name| name.map(|n| n == column).unwrap_or(false))
    }

    #[test]
    fn test_initialize_creates_all_columns() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        for (column, _) in OPTIONAL_COLUMNS {
            assert!(
                column_exists(&conn, "file_categorization", column),
                "missing column {}",
                column
            );
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        // The second pass hits duplicate-column errors which must be
        // swallowed.
        initialize(&conn).unwrap();
    }

    #[test]
    fn test_initialize_migrates_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();
        // A pre-taxonomy cache table without any of the optional columns.
        conn.execute_batch(
            "CREATE TABLE file_categorization (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                dir_path TEXT NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(file_name, file_type, dir_path)
            );",
        )
        .unwrap();

        initialize(&conn).unwrap();
        assert!(column_exists(&conn, "file_categorization", "taxonomy_id"));
        assert!(column_exists(&conn, "file_categorization", "rename_applied"));
    }
}
