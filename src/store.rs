// Ledger store: SQLite persistence for contributors and movements.
// Settlement reads `list_movements` (date ASC, id ASC — chronological
// replay); the recent-first ordering exists for display only and must
// never be fed to the engine.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::model::{
    Category, Contributor, Direction, Movement, MovementKind, NewMovement, TransferRequest,
    REFERENCE_TOLERANCE,
};

/// Contributors seeded on first open; `INSERT OR IGNORE` keeps
/// reopening idempotent. Role assignment happens in `SettlementConfig`,
/// not here.
const SEED_CONTRIBUTORS: [&str; 4] = ["Gerardo", "Néstor", "Leandro", "Emilse"];

const SELECT_MOVEMENTS: &str = "SELECT m.id, m.date, m.contributor_id, c.name,
        m.direction, m.category, m.kind,
        m.amount_local, m.currency, m.fx_rate, m.amount_reference,
        m.bank, m.transfer_key, m.description
 FROM movements m
 JOIN contributors c ON c.id = m.contributor_id";

// ============================================================================
// SCHEMA
// ============================================================================

/// Open (or create) the ledger file, switch on WAL and make sure the
/// schema and seed contributors exist.
pub fn open_ledger(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; foreign keys are per-connection in SQLite.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contributors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS movements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            contributor_id INTEGER NOT NULL,
            direction TEXT NOT NULL CHECK(direction IN ('IN','OUT')),
            category TEXT NOT NULL CHECK(category IN ('HOUSEHOLD','SIBLING_ASSET')),
            kind TEXT NOT NULL DEFAULT 'NORMAL'
                CHECK(kind IN ('NORMAL','TRANSFER','ADJUSTMENT')),
            amount_local REAL NOT NULL,
            currency TEXT NOT NULL,
            fx_rate REAL NOT NULL,
            amount_reference REAL NOT NULL,
            bank TEXT,
            transfer_key TEXT,
            description TEXT NOT NULL DEFAULT '',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (contributor_id) REFERENCES contributors(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movements_date ON movements(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movements_contributor ON movements(contributor_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movements_bank ON movements(bank)",
        [],
    )?;

    let mut seed = conn.prepare("INSERT OR IGNORE INTO contributors (name) VALUES (?1)")?;
    for name in SEED_CONTRIBUTORS {
        seed.execute(params![name])?;
    }

    Ok(())
}

// ============================================================================
// CONTRIBUTORS
// ============================================================================

pub fn list_contributors(conn: &Connection) -> Result<Vec<Contributor>> {
    let mut stmt = conn.prepare("SELECT id, name FROM contributors ORDER BY id")?;
    let contributors = stmt
        .query_map([], |row| {
            Ok(Contributor {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(contributors)
}

pub fn get_contributor(conn: &Connection, id: i64) -> Result<Option<Contributor>> {
    let contributor = conn
        .query_row(
            "SELECT id, name FROM contributors WHERE id = ?1",
            params![id],
            |row| {
                Ok(Contributor {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(contributor)
}

/// Name lookup with ASCII case folding, matching the role matching in
/// `SettlementConfig`.
pub fn find_contributor(conn: &Connection, name: &str) -> Result<Option<Contributor>> {
    let contributor = conn
        .query_row(
            "SELECT id, name FROM contributors WHERE name = ?1 COLLATE NOCASE",
            params![name],
            |row| {
                Ok(Contributor {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(contributor)
}

// ============================================================================
// MOVEMENTS
// ============================================================================

/// Full movement history in settlement order: date ASC, id ASC
/// (insertion order breaks same-day ties).
pub fn list_movements(conn: &Connection) -> Result<Vec<Movement>> {
    query_movements(conn, "ORDER BY m.date ASC, m.id ASC")
}

/// Recent-first ordering for the panel tables. Display only; the
/// settlement fold needs `list_movements`.
pub fn list_movements_recent(conn: &Connection) -> Result<Vec<Movement>> {
    query_movements(conn, "ORDER BY m.date DESC, m.id DESC")
}

fn query_movements(conn: &Connection, order_clause: &str) -> Result<Vec<Movement>> {
    let sql = format!("{SELECT_MOVEMENTS} {order_clause}");
    let mut stmt = conn.prepare(&sql)?;
    let mut movements = stmt
        .query_map([], map_movement_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    heal_reference_amounts(&mut movements);
    Ok(movements)
}

fn map_movement_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Movement> {
    let date_text: String = row.get(1)?;
    let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d")
        .map_err(|e| column_error(1, Box::new(e)))?;

    let direction_code: String = row.get(4)?;
    let direction =
        Direction::parse_code(&direction_code).map_err(|e| column_error(4, Box::new(e)))?;

    let category_code: String = row.get(5)?;
    let category =
        Category::parse_code(&category_code).map_err(|e| column_error(5, Box::new(e)))?;

    let kind_code: String = row.get(6)?;
    let kind = MovementKind::parse_code(&kind_code).map_err(|e| column_error(6, Box::new(e)))?;

    Ok(Movement {
        id: row.get(0)?,
        date,
        contributor_id: row.get(2)?,
        contributor_name: row.get(3)?,
        direction,
        category,
        kind,
        amount_local: row.get(7)?,
        currency: row.get(8)?,
        fx_rate: row.get(9)?,
        amount_reference: row.get(10)?,
        bank: row.get(11)?,
        transfer_key: row.get(12)?,
        description: row.get(13)?,
    })
}

fn column_error(
    index: usize,
    err: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err)
}

/// The stored reference amount is reporting redundancy; the division is
/// authoritative. Rows that drifted (old migrations, manual edits) are
/// served recomputed, with a warning.
fn heal_reference_amounts(movements: &mut [Movement]) {
    for movement in movements {
        if movement.has_reference_drift() {
            let recomputed = movement.recomputed_reference();
            warn!(
                movement = movement.id,
                stored = movement.amount_reference,
                recomputed,
                "amount_reference drifted from amount_local / fx_rate; serving recomputed value"
            );
            movement.amount_reference = recomputed;
        }
    }
}

/// Insert one movement. All validation happens before the write, so a
/// failure never leaves a partial row behind. Returns the new id.
pub fn insert_movement(conn: &Connection, entry: &NewMovement) -> Result<i64> {
    entry.validate()?;
    if get_contributor(conn, entry.contributor_id)?.is_none() {
        return Err(LedgerError::Validation(format!(
            "unknown contributor id {}",
            entry.contributor_id
        )));
    }

    conn.execute(
        "INSERT INTO movements
         (date, contributor_id, direction, category, kind,
          amount_local, currency, fx_rate, amount_reference,
          bank, transfer_key, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entry.date.to_string(),
            entry.contributor_id,
            entry.direction.as_code(),
            entry.category.as_code(),
            entry.kind.as_code(),
            entry.amount_local,
            entry.currency.trim().to_uppercase(),
            entry.fx_rate,
            entry.amount_reference(),
            entry.normalized_bank(),
            Option::<String>::None,
            entry.description.trim(),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// One transfer submission becomes exactly two rows written in a single
/// SQLite transaction: an outflow from `bank_from` and an inflow to
/// `bank_to`, linked by a fresh uuid. Both legs carry kind TRANSFER, so
/// settlement ignores them; only the bank ledger moves.
pub fn insert_transfer(conn: &mut Connection, transfer: &TransferRequest) -> Result<(i64, i64)> {
    transfer.validate()?;
    if get_contributor(conn, transfer.contributor_id)?.is_none() {
        return Err(LedgerError::Validation(format!(
            "unknown contributor id {}",
            transfer.contributor_id
        )));
    }

    let transfer_key = Uuid::new_v4().to_string();
    let amount_reference = transfer.amount_local / transfer.fx_rate;
    let currency = transfer.currency.trim().to_uppercase();

    let tx = conn.transaction()?;
    let mut leg_ids = [0i64; 2];
    let legs = [
        (Direction::Outflow, transfer.bank_from.trim()),
        (Direction::Inflow, transfer.bank_to.trim()),
    ];
    for (slot, (direction, bank)) in leg_ids.iter_mut().zip(legs) {
        tx.execute(
            "INSERT INTO movements
             (date, contributor_id, direction, category, kind,
              amount_local, currency, fx_rate, amount_reference,
              bank, transfer_key, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                transfer.date.to_string(),
                transfer.contributor_id,
                direction.as_code(),
                // Category is irrelevant for TRANSFER rows; tagged
                // HOUSEHOLD so the panel groups them with house cash.
                Category::Household.as_code(),
                MovementKind::Transfer.as_code(),
                transfer.amount_local,
                currency,
                transfer.fx_rate,
                amount_reference,
                bank,
                transfer_key,
                transfer.description.trim(),
            ],
        )?;
        *slot = tx.last_insert_rowid();
    }
    tx.commit()?;

    Ok((leg_ids[0], leg_ids[1]))
}

/// Idempotent delete: removing an absent id is a successful no-op.
/// Returns whether a row actually existed.
pub fn delete_movement(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM movements WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn count_movements(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM movements", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// INTEGRITY & BACKUP
// ============================================================================

/// A row whose stored reference amount no longer matches
/// `amount_local / fx_rate`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReferenceDrift {
    pub movement_id: i64,
    pub stored: f64,
    pub recomputed: f64,
}

/// Round-trip check over every persisted row, reading the raw columns so
/// the healing in `list_movements` cannot mask a drifting store.
pub fn verify_reference_amounts(conn: &Connection) -> Result<Vec<ReferenceDrift>> {
    let mut stmt = conn.prepare(
        "SELECT id, amount_local, fx_rate, amount_reference FROM movements ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut drifts = Vec::new();
    for (movement_id, amount_local, fx_rate, stored) in rows {
        let recomputed = amount_local / fx_rate;
        let scale = recomputed.abs().max(1.0);
        if (stored - recomputed).abs() > REFERENCE_TOLERANCE * scale {
            drifts.push(ReferenceDrift {
                movement_id,
                stored,
                recomputed,
            });
        }
    }
    Ok(drifts)
}

/// Snapshot the ledger to `dest`. `VACUUM INTO` writes a consistent
/// copy even while WAL is active; it fails if `dest` already exists.
pub fn backup_to(conn: &Connection, dest: &Path) -> Result<()> {
    let dest_sql = dest.to_string_lossy().into_owned();
    conn.execute("VACUUM INTO ?1", params![dest_sql])?;
    Ok(())
}

/// Copy a snapshot over the ledger file. Call with no connection open;
/// stale WAL sidecars of the replaced database are removed so they
/// cannot shadow the restored file.
pub fn restore_from(src: &Path, db_path: &Path) -> Result<()> {
    if !src.exists() {
        return Err(LedgerError::Validation(format!(
            "backup file `{}` not found",
            src.display()
        )));
    }
    fs::copy(src, db_path)?;
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_ledger() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
    }

    fn create_test_entry(
        contributor_id: i64,
        day: &str,
        direction: Direction,
        category: Category,
        amount: f64,
    ) -> NewMovement {
        NewMovement {
            date: date(day),
            contributor_id,
            direction,
            category,
            kind: MovementKind::Normal,
            amount_local: amount,
            currency: "usd".to_string(),
            fx_rate: 1.0,
            bank: None,
            description: String::new(),
        }
    }

    #[test]
    fn test_seeds_family_once() {
        let conn = create_test_ledger();
        let contributors = list_contributors(&conn).unwrap();
        assert_eq!(
            contributors.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Gerardo", "Néstor", "Leandro", "Emilse"]
        );

        // Reopening must not duplicate the seed rows.
        setup_database(&conn).unwrap();
        assert_eq!(list_contributors(&conn).unwrap().len(), 4);
    }

    #[test]
    fn test_settlement_order_is_date_then_id() {
        let conn = create_test_ledger();
        insert_movement(
            &conn,
            &create_test_entry(1, "2024-02-10", Direction::Inflow, Category::Household, 100.0),
        )
        .unwrap();
        insert_movement(
            &conn,
            &create_test_entry(2, "2024-01-05", Direction::Inflow, Category::Household, 50.0),
        )
        .unwrap();
        // Same date as the first row: must replay after it (larger id).
        insert_movement(
            &conn,
            &create_test_entry(3, "2024-02-10", Direction::Inflow, Category::Household, 25.0),
        )
        .unwrap();

        let chronological = list_movements(&conn).unwrap();
        assert_eq!(
            chronological.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![2, 1, 3]
        );

        let recent = list_movements_recent(&conn).unwrap();
        assert_eq!(recent.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn test_insert_validates_before_writing() {
        let conn = create_test_ledger();

        let mut bad = create_test_entry(1, "2024-01-05", Direction::Inflow, Category::Household, 100.0);
        bad.fx_rate = 0.0;
        assert!(matches!(
            insert_movement(&conn, &bad),
            Err(LedgerError::Validation(_))
        ));

        let unknown = create_test_entry(99, "2024-01-05", Direction::Inflow, Category::Household, 100.0);
        assert!(matches!(
            insert_movement(&conn, &unknown),
            Err(LedgerError::Validation(_))
        ));

        let transfer_kind = {
            let mut e = create_test_entry(1, "2024-01-05", Direction::Outflow, Category::Household, 100.0);
            e.kind = MovementKind::Transfer;
            e
        };
        assert!(matches!(
            insert_movement(&conn, &transfer_kind),
            Err(LedgerError::Validation(_))
        ));

        // No partial writes from any of the rejected inserts.
        assert_eq!(count_movements(&conn).unwrap(), 0);
    }

    #[test]
    fn test_insert_normalizes_currency_and_bank() {
        let conn = create_test_ledger();
        let mut e = create_test_entry(1, "2024-01-05", Direction::Inflow, Category::Household, 100.0);
        e.currency = "ars".to_string();
        e.bank = Some("   ".to_string());
        insert_movement(&conn, &e).unwrap();

        let movements = list_movements(&conn).unwrap();
        assert_eq!(movements[0].currency, "ARS");
        assert_eq!(movements[0].bank, None);
        assert_eq!(movements[0].contributor_name, "Gerardo");
    }

    #[test]
    fn test_delete_idempotent() {
        let conn = create_test_ledger();
        let id = insert_movement(
            &conn,
            &create_test_entry(1, "2024-01-05", Direction::Inflow, Category::Household, 100.0),
        )
        .unwrap();

        assert!(delete_movement(&conn, id).unwrap());
        assert!(!delete_movement(&conn, id).unwrap());
        assert!(!delete_movement(&conn, 424_242).unwrap());
        assert_eq!(count_movements(&conn).unwrap(), 0);
    }

    #[test]
    fn test_transfer_creates_two_linked_rows() {
        let mut conn = create_test_ledger();
        let household = find_contributor(&conn, "emilse").unwrap().unwrap();

        let (out_id, in_id) = insert_transfer(
            &mut conn,
            &TransferRequest {
                date: date("2024-03-01"),
                contributor_id: household.id,
                bank_from: "Galicia".to_string(),
                bank_to: "Santander".to_string(),
                amount_local: 500.0,
                currency: "ars".to_string(),
                fx_rate: 1000.0,
                description: "monthly sweep".to_string(),
            },
        )
        .unwrap();

        let movements = list_movements(&conn).unwrap();
        assert_eq!(movements.len(), 2);

        let out_leg = movements.iter().find(|m| m.id == out_id).unwrap();
        let in_leg = movements.iter().find(|m| m.id == in_id).unwrap();

        assert_eq!(out_leg.direction, Direction::Outflow);
        assert_eq!(out_leg.bank.as_deref(), Some("Galicia"));
        assert_eq!(in_leg.direction, Direction::Inflow);
        assert_eq!(in_leg.bank.as_deref(), Some("Santander"));

        for leg in [out_leg, in_leg] {
            assert_eq!(leg.kind, MovementKind::Transfer);
            assert_eq!(leg.contributor_id, household.id);
            assert_eq!(leg.amount_local, 500.0);
            assert_eq!(leg.currency, "ARS");
        }
        assert!(out_leg.transfer_key.is_some());
        assert_eq!(out_leg.transfer_key, in_leg.transfer_key);
        println!("✅ Test passed: transfer legs share key {:?}", out_leg.transfer_key);
    }

    #[test]
    fn test_rejected_transfer_writes_nothing() {
        let mut conn = create_test_ledger();
        let result = insert_transfer(
            &mut conn,
            &TransferRequest {
                date: date("2024-03-01"),
                contributor_id: 4,
                bank_from: "Galicia".to_string(),
                bank_to: "galicia".to_string(),
                amount_local: 500.0,
                currency: "ARS".to_string(),
                fx_rate: 1000.0,
                description: String::new(),
            },
        );
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(count_movements(&conn).unwrap(), 0);
    }

    #[test]
    fn test_reference_drift_flagged_and_healed() {
        let conn = create_test_ledger();
        let id = insert_movement(&conn, &{
            let mut e = create_test_entry(1, "2024-01-05", Direction::Inflow, Category::Household, 100_000.0);
            e.currency = "ARS".to_string();
            e.fx_rate = 1000.0;
            e
        })
        .unwrap();

        // Simulate a row left inconsistent by an old migration.
        conn.execute(
            "UPDATE movements SET amount_reference = 90.0 WHERE id = ?1",
            params![id],
        )
        .unwrap();

        let drifts = verify_reference_amounts(&conn).unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].movement_id, id);
        assert_eq!(drifts[0].stored, 90.0);
        assert_eq!(drifts[0].recomputed, 100.0);

        // Reads serve the recomputed value.
        let movements = list_movements(&conn).unwrap();
        assert_eq!(movements[0].amount_reference, 100.0);

        // A clean store reports nothing.
        conn.execute(
            "UPDATE movements SET amount_reference = 100.0 WHERE id = ?1",
            params![id],
        )
        .unwrap();
        assert!(verify_reference_amounts(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_backup_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("pozo.db");
        let backup_path = dir.path().join("pozo-backup.db");

        let conn = open_ledger(&db_path).unwrap();
        insert_movement(
            &conn,
            &create_test_entry(1, "2024-01-05", Direction::Inflow, Category::Household, 100.0),
        )
        .unwrap();
        insert_movement(
            &conn,
            &create_test_entry(2, "2024-01-06", Direction::Inflow, Category::Household, 50.0),
        )
        .unwrap();

        backup_to(&conn, &backup_path).unwrap();

        // Diverge after the snapshot, then roll back to it.
        insert_movement(
            &conn,
            &create_test_entry(3, "2024-01-07", Direction::Inflow, Category::Household, 25.0),
        )
        .unwrap();
        assert_eq!(count_movements(&conn).unwrap(), 3);
        drop(conn);

        restore_from(&backup_path, &db_path).unwrap();
        let restored = open_ledger(&db_path).unwrap();
        assert_eq!(count_movements(&restored).unwrap(), 2);
        println!("✅ Test passed: snapshot restored with 2 movements");
    }

    #[test]
    fn test_restore_requires_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");
        let db_path = dir.path().join("pozo.db");
        assert!(matches!(
            restore_from(&missing, &db_path),
            Err(LedgerError::Validation(_))
        ));
    }
}
