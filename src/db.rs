//! Local SQLite mirror of orders and reservations.
//!
//! Uses rusqlite with WAL mode. Records keep their local `id` plus the
//! backend's `remote_id`, and lookups accept either, so a gateway reference
//! that carries the backend id still resolves against the mirror. An exact
//! local id wins over another row's remote id. Status updates only ever
//! address the local id.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::entity::{Order, OrderStatus, Reservation, ReservationStatus};
use crate::error::StoreError;
use crate::store::{OrderStore, ReservationStore, StoreKind};

pub struct DbState {
    pub conn: Mutex<Connection>,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Open (or create) the mirror database at `path`.
///
/// A corrupt file, or one that is not SQLite at all, is deleted and the open
/// retried once. Any other failure (locked, permissions, I/O) is returned
/// and the file is left alone.
pub fn init(path: &Path) -> Result<DbState, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| StoreError::Database(format!("Failed to create data dir: {e}")))?;
    }
    info!("Opening mirror database at {}", path.display());

    let conn = match open_and_configure(path) {
        Ok(c) => c,
        Err(first_err) if is_corruption(&first_err) => {
            warn!(
                "Mirror database is corrupt ({}), deleting and retrying once",
                first_err
            );
            let _ = fs::remove_file(path);
            let _ = fs::remove_file(path.with_extension("db-wal"));
            let _ = fs::remove_file(path.with_extension("db-shm"));
            open_and_configure(path).map_err(|e| {
                StoreError::Database(format!("Database open failed after reset: {e}"))
            })?
        }
        Err(err) => return Err(err.into()),
    };

    run_migrations(&conn)?;

    Ok(DbState {
        conn: Mutex::new(conn),
    })
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

/// In-memory mirror, used by tests and throwaway tooling.
pub fn open_in_memory() -> Result<DbState, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
    })
}

fn open_and_configure(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating mirror database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: order and reservation tables.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending',
            payload TEXT NOT NULL DEFAULT '{}',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS reservations (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending',
            payload TEXT NOT NULL DEFAULT '{}',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

/// Migration v2: backend ids.
fn migrate_v2(conn: &Connection) -> Result<(), StoreError> {
    for table in ["orders", "reservations"] {
        if !column_exists(conn, table, "remote_id")? {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN remote_id TEXT;"))?;
        }
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_remote_id ON {table}(remote_id);"
        ))?;
    }
    conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect::<Vec<_>>();
    Ok(names.iter().any(|n| n == column))
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

fn table_for(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::Order => "orders",
        StoreKind::Reservation => "reservations",
    }
}

/// Rebuild the record JSON (`payload` plus `id` and `status`).
fn load_record(conn: &Connection, kind: StoreKind, id: &str) -> Result<Value, StoreError> {
    let table = table_for(kind);
    let row = conn
        .query_row(
            &format!(
                "SELECT id, status, payload FROM {table}
                 WHERE id = ?1 OR remote_id = ?1
                 ORDER BY (id = ?1) DESC
                 LIMIT 1"
            ),
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let (local_id, status, payload) =
        row.ok_or_else(|| StoreError::not_found(kind.as_str(), id))?;

    let mut record = match serde_json::from_str::<Value>(&payload) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    record.insert("id".into(), Value::String(local_id));
    record.insert("status".into(), Value::String(status));
    Ok(Value::Object(record))
}

fn set_status(
    conn: &Connection,
    kind: StoreKind,
    id: &str,
    status: &str,
) -> Result<Value, StoreError> {
    let table = table_for(kind);
    let changed = conn.execute(
        &format!("UPDATE {table} SET status = ?1, updated_at = ?2 WHERE id = ?3"),
        params![status, Utc::now().to_rfc3339(), id],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found(kind.as_str(), id));
    }
    load_record(conn, kind, id)
}

fn decode<T: serde::de::DeserializeOwned>(record: Value) -> Result<T, StoreError> {
    serde_json::from_value(record).map_err(|e| StoreError::Decode(e.to_string()))
}

fn payload_text(payload: &Map<String, Value>) -> String {
    Value::Object(payload.clone()).to_string()
}

impl DbState {
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        f(&conn)
    }

    /// Insert or replace an order in the mirror.
    pub fn upsert_order(&self, order: &Order, remote_id: Option<&str>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO orders (id, remote_id, status, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    remote_id = excluded.remote_id,
                    status = excluded.status,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at",
                params![
                    order.id,
                    remote_id,
                    order.status.as_str(),
                    payload_text(&order.payload),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn upsert_reservation(
        &self,
        reservation: &Reservation,
        remote_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reservations (id, remote_id, status, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    remote_id = excluded.remote_id,
                    status = excluded.status,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at",
                params![
                    reservation.id,
                    remote_id,
                    reservation.status.as_str(),
                    payload_text(&reservation.payload),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }
}

#[async_trait]
impl OrderStore for DbState {
    async fn find_order(&self, id: &str) -> Result<Order, StoreError> {
        let record = self.with_conn(|conn| load_record(conn, StoreKind::Order, id))?;
        decode(record)
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let record =
            self.with_conn(|conn| set_status(conn, StoreKind::Order, id, status.as_str()))?;
        decode(record)
    }
}

#[async_trait]
impl ReservationStore for DbState {
    async fn find_reservation(&self, id: &str) -> Result<Reservation, StoreError> {
        let record = self.with_conn(|conn| load_record(conn, StoreKind::Reservation, id))?;
        decode(record)
    }

    async fn update_reservation_status(
        &self,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        let record = self
            .with_conn(|conn| set_status(conn, StoreKind::Reservation, id, status.as_str()))?;
        decode(record)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_version(db: &DbState) -> i32 {
        let conn = db.conn.lock().unwrap();
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_migrations_reach_latest_and_are_idempotent() {
        let db = open_in_memory().expect("open mirror");
        assert_eq!(schema_version(&db), CURRENT_SCHEMA_VERSION);

        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).expect("second run is a no-op");
        assert!(column_exists(&conn, "orders", "remote_id").unwrap());
        assert!(column_exists(&conn, "reservations", "remote_id").unwrap());
    }

    #[tokio::test]
    async fn test_order_lookup_by_local_or_remote_id() {
        let db = open_in_memory().unwrap();
        let mut order = Order::new("ord-1", OrderStatus::Pending);
        order
            .payload
            .insert("total_amount".into(), serde_json::json!(42.5));
        db.upsert_order(&order, Some("77")).unwrap();

        let by_local = db.find_order("ord-1").await.unwrap();
        let by_remote = db.find_order("77").await.unwrap();
        assert_eq!(by_local, by_remote);
        assert_eq!(by_remote.id, "ord-1");
        assert_eq!(by_remote.payload["total_amount"], 42.5);

        let missing = db.find_order("78").await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_reservation_status_update_persists() {
        let db = open_in_memory().unwrap();
        db.upsert_reservation(
            &Reservation::new("RES-1001", ReservationStatus::Pending),
            None,
        )
        .unwrap();

        let updated = db
            .update_reservation_status("RES-1001", ReservationStatus::Failed)
            .await
            .unwrap();
        assert_eq!(updated.status, ReservationStatus::Failed);
        let reread = db.find_reservation("RES-1001").await.unwrap();
        assert_eq!(reread.status, ReservationStatus::Failed);
    }

    #[tokio::test]
    async fn test_update_of_unknown_id_is_not_found() {
        let db = open_in_memory().unwrap();
        let err = db
            .update_order_status("nope", OrderStatus::Failed)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_stored_status_is_a_decode_error() {
        let db = open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO orders (id, status, payload) VALUES ('x', 'teleported', '{}')",
                [],
            )
            .unwrap();
        }
        let err = db.find_order("x").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn test_local_id_wins_over_another_rows_remote_id() {
        let db = open_in_memory().unwrap();
        db.upsert_order(&Order::new("9", OrderStatus::Pending), None)
            .unwrap();
        db.upsert_order(&Order::new("ord-x", OrderStatus::Paid), Some("9"))
            .unwrap();

        assert_eq!(db.find_order("9").await.unwrap().id, "9");

        let updated = db
            .update_order_status("9", OrderStatus::Failed)
            .await
            .unwrap();
        assert_eq!(updated.id, "9");
        assert_eq!(updated.status, OrderStatus::Failed);
        assert_eq!(
            db.find_order("ord-x").await.unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_update_by_remote_id_only_is_not_found() {
        let db = open_in_memory().unwrap();
        db.upsert_order(&Order::new("ord-1", OrderStatus::Pending), Some("77"))
            .unwrap();

        let err = db
            .update_order_status("77", OrderStatus::Failed)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            db.find_order("ord-1").await.unwrap().status,
            OrderStatus::Pending
        );
    }

    #[test]
    fn test_only_corruption_triggers_reset() {
        let failure = |code| rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None);
        assert!(is_corruption(&failure(rusqlite::ffi::SQLITE_CORRUPT)));
        assert!(is_corruption(&failure(rusqlite::ffi::SQLITE_NOTADB)));
        assert!(!is_corruption(&failure(rusqlite::ffi::SQLITE_BUSY)));
        assert!(!is_corruption(&failure(rusqlite::ffi::SQLITE_CANTOPEN)));
        assert!(!is_corruption(&failure(rusqlite::ffi::SQLITE_PERM)));
    }

    #[tokio::test]
    async fn test_init_replaces_file_that_is_not_a_database() {
        let dir = std::env::temp_dir().join(format!("checkout-return-db-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mirror.db");
        fs::write(&path, "not a database ".repeat(512)).unwrap();

        let db = init(&path).expect("reset and reopen");
        assert_eq!(schema_version(&db), CURRENT_SCHEMA_VERSION);
        db.upsert_order(&Order::new("1", OrderStatus::Pending), None)
            .unwrap();
        assert!(db.find_order("1").await.is_ok());
        drop(db);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_init_failure_that_is_not_corruption_keeps_files() {
        let dir = std::env::temp_dir().join(format!("checkout-return-db-{}", uuid::Uuid::new_v4()));
        // A directory where the database file should be cannot be opened.
        let path = dir.join("mirror.db");
        fs::create_dir_all(path.join("keep")).unwrap();

        assert!(init(&path).is_err());
        assert!(path.join("keep").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_init_creates_file_database() {
        let dir = std::env::temp_dir().join(format!("checkout-return-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("mirror.db");
        let db = init(&path).expect("init file db");
        assert!(path.exists());
        assert_eq!(schema_version(&db), CURRENT_SCHEMA_VERSION);
        drop(db);
        let _ = fs::remove_dir_all(&dir);
    }
}
