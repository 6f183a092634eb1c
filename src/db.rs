//! Local SQLite store for Barcode Inventory.
//!
//! Uses rusqlite with WAL mode. Holds the singleton `session` record, the
//! `products` collection (indexed by barcode and by name), the
//! `local_settings` key/value table used by the configuration layer, and the
//! `http_cache` table owned by the request cache. Schema creation is gated by
//! `schema_version`, so repeated opens never re-run a migration.

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{Product, ProductPage, ProductPatch, ProductQuery, Session, SESSION_KEY};

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

const DB_FILE_NAME: &str = "inventory.db";

const PRODUCT_COLUMNS: &str =
    "id, name, barcode, quantity_warehouse, quantity_actual, row_index, nomenclature_code";

/// Explicitly constructed store handle. One connection, serialized by the
/// mutex: every public method runs inside a single lock scope, and every
/// mutating method inside a single transaction.
pub struct LocalStore {
    conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl LocalStore {
    /// Open (creating if absent) the store at `{data_dir}/inventory.db`.
    ///
    /// Creates the directory if needed, sets pragmas and runs any pending
    /// migrations. A file SQLite reports as corrupt or not a database is
    /// deleted and recreated once; any other failure (busy, locked, a failed
    /// migration) is returned and the file is left alone.
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|e| AppError::Storage(format!("Failed to create data dir: {e}")))?;

        let db_path = data_dir.join(DB_FILE_NAME);
        info!("Opening database at {}", db_path.display());

        let conn = match open_and_configure(&db_path) {
            Ok(c) => c,
            Err(first_err) if is_corruption(&first_err) => {
                warn!(
                    "Database file is corrupt ({}), deleting and retrying once",
                    first_err
                );
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
                open_and_configure(&db_path).map_err(|e| {
                    AppError::Storage(format!("Database open failed after retry: {e}"))
                })?
            }
            Err(e) => return Err(AppError::Storage(format!("sqlite open: {e}"))),
        };
        run_migrations(&conn)?;

        info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// In-memory store with the full schema (tests, dry runs).
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Close the connection, flushing the WAL.
    pub fn close(self) -> AppResult<()> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close().map_err(|(_, e)| AppError::from(e))?;
        debug!("Database closed");
        Ok(())
    }

    pub(crate) fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            error!("database lock poisoned: {e}");
            AppError::Storage("database lock poisoned".into())
        })
    }

    // -----------------------------------------------------------------------
    // Products
    // -----------------------------------------------------------------------

    /// Replace the whole products collection in one transaction.
    ///
    /// Either every new record becomes visible or, on failure, the previous
    /// collection is left exactly as it was.
    pub fn save_products(&self, products: &[Product]) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM products", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO products (
                     id, position, name, barcode, quantity_warehouse, quantity_actual,
                     row_index, nomenclature_code, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            let now = Utc::now().to_rfc3339();
            for (position, product) in products.iter().enumerate() {
                stmt.execute(params![
                    product.id,
                    position as i64,
                    product.name,
                    product.barcode,
                    product.quantity_warehouse,
                    product.quantity_actual,
                    product.row_index,
                    product.nomenclature_code,
                    now,
                ])
                .map_err(|e| {
                    warn!(id = %product.id, error = %e, "save_products insert failed, rolling back");
                    AppError::from(e)
                })?;
            }
        }
        tx.commit()?;
        info!(count = products.len(), "Products collection replaced");
        Ok(())
    }

    /// Every product in ingestion order. Empty when nothing was ingested.
    pub fn get_all_products(&self) -> AppResult<Vec<Product>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY position, id"
        ))?;
        let products = stmt
            .query_map([], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    pub fn get_product_by_id(&self, id: &str) -> AppResult<Product> {
        let conn = self.lock()?;
        load_product(&conn, id)?.ok_or_else(|| AppError::product_not_found(id))
    }

    /// Product currently holding `barcode`, if any.
    pub fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<Product>> {
        let conn = self.lock()?;
        let product = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE barcode = ?1 LIMIT 1"),
                params![barcode],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    /// Read-modify-write of one record in a single transaction.
    pub fn update_product(&self, id: &str, patch: &ProductPatch) -> AppResult<Product> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let product = apply_patch(&tx, id, patch)?;
        tx.commit()?;
        debug!(id = %id, barcode = ?product.barcode, "Product updated");
        Ok(product)
    }

    /// Like [`LocalStore::update_product`], and the stored session counts are
    /// recomputed in the same transaction.
    pub fn update_product_with_session(&self, id: &str, patch: &ProductPatch) -> AppResult<Product> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let product = apply_patch(&tx, id, patch)?;
        let (total, with_barcode) = product_counts(&tx)?;
        tx.execute(
            "UPDATE session
                SET total_products = ?2, products_with_barcode = ?3, updated_at = ?4
              WHERE id = ?1",
            params![SESSION_KEY, total, with_barcode, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        debug!(id = %id, barcode = ?product.barcode, with_barcode, "Product and session updated");
        Ok(product)
    }

    /// Filtered, paged listing plus the unpaged match count.
    pub fn query_products(&self, query: &ProductQuery) -> AppResult<ProductPage> {
        let mut clauses: Vec<&str> = Vec::new();
        match query.has_barcode {
            Some(true) => clauses.push("barcode IS NOT NULL"),
            Some(false) => clauses.push("barcode IS NULL"),
            None => {}
        }
        // SQLite's LIKE/LOWER only fold ASCII, so the name match is done in
        // Rust to keep Cyrillic search case-insensitive.
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products {where_sql} ORDER BY position, id"
        ))?;
        let candidates = stmt
            .query_map([], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let needle = query.search_text().map(str::to_lowercase);
        let matching: Vec<Product> = candidates
            .into_iter()
            .filter(|p| match &needle {
                Some(n) => p.name.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .collect();

        let total = matching.len() as i64;
        let products = matching
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .collect();
        Ok(ProductPage { products, total })
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Overwrite the singleton session. Counts are recomputed from the
    /// products collection in the same transaction; the stored record is
    /// returned.
    pub fn save_session(&self, session: &Session) -> AppResult<Session> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let (total, with_barcode) = product_counts(&tx)?;
        let now = Utc::now().to_rfc3339();
        // created_at survives re-saves of the same upload
        let previous: Option<(String, Option<String>, String)> = tx
            .query_row(
                "SELECT filename, upload_id, created_at FROM session WHERE id = ?1",
                params![SESSION_KEY],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let kept = previous
            .filter(|(filename, upload_id, _)| {
                *filename == session.filename && *upload_id == session.upload_id
            })
            .map(|(_, _, created_at)| created_at);
        let created_at = session
            .created_at
            .clone()
            .or(kept)
            .unwrap_or_else(|| now.clone());

        tx.execute(
            "INSERT INTO session (
                 id, filename, total_products, products_with_barcode, upload_id,
                 created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 filename = excluded.filename,
                 total_products = excluded.total_products,
                 products_with_barcode = excluded.products_with_barcode,
                 upload_id = excluded.upload_id,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at",
            params![
                SESSION_KEY,
                session.filename,
                total,
                with_barcode,
                session.upload_id,
                created_at,
                now
            ],
        )?;
        tx.commit()?;

        Ok(Session {
            id: SESSION_KEY.to_string(),
            filename: session.filename.clone(),
            total_products: total,
            products_with_barcode: with_barcode,
            upload_id: session.upload_id.clone(),
            created_at: Some(created_at),
            updated_at: Some(now),
        })
    }

    /// The current session, `None` before anything was ingested.
    pub fn get_session(&self) -> AppResult<Option<Session>> {
        let conn = self.lock()?;
        let session = conn
            .query_row(
                "SELECT id, filename, total_products, products_with_barcode, upload_id,
                        created_at, updated_at
                   FROM session WHERE id = ?1",
                params![SESSION_KEY],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        filename: row.get(1)?,
                        total_products: row.get(2)?,
                        products_with_barcode: row.get(3)?,
                        upload_id: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Remove the session record (the backend reported none).
    pub fn clear_session(&self) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM session WHERE id = ?1", params![SESSION_KEY])?;
        Ok(())
    }

    /// Current `(total, with_barcode)` counts of the products collection.
    pub fn product_counts(&self) -> AppResult<(i64, i64)> {
        let conn = self.lock()?;
        product_counts(&conn)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn get_setting(&self, category: &str, key: &str) -> Option<String> {
        let conn = self.lock().ok()?;
        get_setting(&conn, category, key)
    }

    pub fn set_setting(&self, category: &str, key: &str, value: &str) -> AppResult<()> {
        let conn = self.lock()?;
        set_setting(&conn, category, key, value)
    }

    pub fn get_all_settings(&self) -> AppResult<serde_json::Value> {
        let conn = self.lock()?;
        get_all_settings(&conn)
    }
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        barcode: row.get(2)?,
        quantity_warehouse: row.get(3)?,
        quantity_actual: row.get(4)?,
        row_index: row.get(5)?,
        nomenclature_code: row.get(6)?,
    })
}

fn load_product(conn: &Connection, id: &str) -> AppResult<Option<Product>> {
    let product = conn
        .query_row(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
            params![id],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

fn apply_patch(conn: &Connection, id: &str, patch: &ProductPatch) -> AppResult<Product> {
    let mut product = load_product(conn, id)?.ok_or_else(|| AppError::product_not_found(id))?;
    product.apply(patch);
    conn.execute(
        "UPDATE products
            SET barcode = ?2, quantity_actual = ?3, updated_at = ?4
          WHERE id = ?1",
        params![
            product.id,
            product.barcode,
            product.quantity_actual,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(product)
}

fn product_counts(conn: &Connection) -> AppResult<(i64, i64)> {
    let counts = conn.query_row(
        "SELECT COUNT(*), COUNT(barcode) FROM products",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

// ---------------------------------------------------------------------------
// Open + migrations
// ---------------------------------------------------------------------------

/// Open the database file and apply pragmas. The schema read at the end
/// surfaces a corrupt or foreign file here rather than mid-migration.
fn open_and_configure(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(conn)
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
        }
        _ => false,
    }
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> AppResult<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| AppError::Storage(format!("create schema_version: {e}")))?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current >= CURRENT_SCHEMA_VERSION {
        debug!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: session, products and local settings.
fn migrate_v1(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "
        BEGIN;

        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- session (singleton, id = 'current')
        CREATE TABLE IF NOT EXISTS session (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            total_products INTEGER NOT NULL DEFAULT 0,
            products_with_barcode INTEGER NOT NULL DEFAULT 0,
            upload_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- products
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            name TEXT NOT NULL CHECK (length(trim(name)) > 0),
            barcode TEXT,
            quantity_warehouse REAL,
            quantity_actual REAL,
            row_index INTEGER,
            nomenclature_code TEXT,
            updated_at TEXT NOT NULL
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_products_barcode ON products(barcode);
        CREATE INDEX IF NOT EXISTS idx_products_name ON products(name);
        CREATE INDEX IF NOT EXISTS idx_products_position ON products(position);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        AppError::Storage(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: persistent HTTP response cache.
fn migrate_v2(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "
        BEGIN;

        -- http_cache (request key -> last successful response, per generation)
        CREATE TABLE IF NOT EXISTS http_cache (
            generation TEXT NOT NULL,
            cache_key TEXT NOT NULL,
            status INTEGER NOT NULL,
            content_type TEXT,
            body BLOB NOT NULL,
            stored_at TEXT NOT NULL,
            PRIMARY KEY (generation, cache_key)
        );

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);

        COMMIT;
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        AppError::Storage(format!("migration v2: {e}"))
    })?;

    info!("Applied migration v2 (http_cache table)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> AppResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| AppError::Storage(format!("set_setting: {e}")))?;
    Ok(())
}

/// Get all settings grouped by category as JSON.
pub fn get_all_settings(conn: &Connection) -> AppResult<serde_json::Value> {
    let mut stmt = conn.prepare(
        "SELECT setting_category, setting_key, setting_value FROM local_settings ORDER BY setting_category, setting_key",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut result = serde_json::Map::new();
    for (cat, key, val) in rows.flatten() {
        let category = result.entry(cat).or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = category {
            map.insert(key, serde_json::Value::String(val));
        }
    }

    Ok(serde_json::Value::Object(result))
}

// ===========================================================================
// Tests
// ===========================================================================
