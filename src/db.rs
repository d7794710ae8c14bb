use std::path::Path;

use rusqlite::Connection;

use crate::error::UpdateError;

pub const LODGING_TABLE: &str = "market_stats";
pub const NIGHTS_TABLE: &str = "tcd_stay_nights";

pub fn open(path: &Path) -> Result<Connection, UpdateError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

// ── Row types ──

/// One month × region observation. `pref_code` "00" is the derived
/// nationwide row; counts are NULL when the source cell was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct LodgingRow {
    pub ym: String,
    pub pref_code: String,
    pub pref_name: String,
    pub total: Option<f64>,
    pub jp: Option<f64>,
    pub foreign: Option<f64>,
}

/// One nights-stayed survey observation, keyed by
/// (period_key, release_type, segment, nights_bin) within one source
/// file. Two workbooks may legitimately carry the same period (an annual
/// release repeating a quarterly section), so uniqueness is scoped per
/// source_url.
#[derive(Debug, Clone, PartialEq)]
pub struct NightsRow {
    pub period_type: String,
    pub period_key: String,
    pub period_label: String,
    pub release_type: String,
    pub segment: String,
    pub nights_bin: String,
    pub value: f64,
    pub source_url: String,
    pub source_title: String,
    pub source_sha256: String,
}

// ── Full-table replace ──
//
// Each pipeline's table is rebuilt from scratch every run: rows for
// months/periods that vanished upstream must not survive. The new table
// is built under a staging name and swapped in inside one transaction,
// so readers never see an empty or half-filled table and a failure rolls
// back to the previous contents.

pub fn replace_lodging(conn: &Connection, rows: &[LodgingRow]) -> Result<(), UpdateError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS market_stats__new;
         CREATE TABLE market_stats__new (
             ym        TEXT NOT NULL,
             pref_code TEXT NOT NULL,
             pref_name TEXT NOT NULL,
             total     REAL,
             jp        REAL,
             \"foreign\" REAL
         );",
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO market_stats__new (ym, pref_code, pref_name, total, jp, \"foreign\")
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.ym, r.pref_code, r.pref_name, r.total, r.jp, r.foreign,
            ])?;
        }
    }
    tx.execute_batch(
        "DROP TABLE IF EXISTS market_stats;
         ALTER TABLE market_stats__new RENAME TO market_stats;
         CREATE UNIQUE INDEX idx_market_stats_key ON market_stats(ym, pref_code);
         CREATE INDEX idx_market_stats_ym ON market_stats(ym);
         CREATE INDEX idx_market_stats_pref ON market_stats(pref_code);",
    )?;
    tx.commit()?;
    Ok(())
}

pub fn replace_nights(conn: &Connection, rows: &[NightsRow]) -> Result<(), UpdateError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS tcd_stay_nights__new;
         CREATE TABLE tcd_stay_nights__new (
             period_type   TEXT NOT NULL,
             period_key    TEXT NOT NULL,
             period_label  TEXT NOT NULL,
             release_type  TEXT NOT NULL,
             segment       TEXT NOT NULL,
             nights_bin    TEXT NOT NULL,
             value         REAL NOT NULL,
             source_url    TEXT NOT NULL,
             source_title  TEXT NOT NULL,
             source_sha256 TEXT NOT NULL
         );",
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO tcd_stay_nights__new
             (period_type, period_key, period_label, release_type, segment,
              nights_bin, value, source_url, source_title, source_sha256)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.period_type,
                r.period_key,
                r.period_label,
                r.release_type,
                r.segment,
                r.nights_bin,
                r.value,
                r.source_url,
                r.source_title,
                r.source_sha256,
            ])?;
        }
    }
    tx.execute_batch(
        "DROP TABLE IF EXISTS tcd_stay_nights;
         ALTER TABLE tcd_stay_nights__new RENAME TO tcd_stay_nights;
         CREATE UNIQUE INDEX idx_tcd_stay_nights_key
             ON tcd_stay_nights(period_key, release_type, segment, nights_bin, source_url);
         CREATE INDEX idx_tcd_stay_nights_period ON tcd_stay_nights(period_type, period_key);
         CREATE INDEX idx_tcd_stay_nights_release ON tcd_stay_nights(release_type);
         CREATE INDEX idx_tcd_stay_nights_source ON tcd_stay_nights(source_url, source_sha256);",
    )?;
    tx.commit()?;
    Ok(())
}

// ── Queries ──

fn table_exists(conn: &Connection, table: &str) -> Result<bool, UpdateError> {
    let n: usize = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn row_count(conn: &Connection, table: &str) -> Result<usize, UpdateError> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let n: usize = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(n)
}

pub fn lodging_row_count(conn: &Connection) -> Result<usize, UpdateError> {
    row_count(conn, LODGING_TABLE)
}

pub fn nights_row_count(conn: &Connection) -> Result<usize, UpdateError> {
    row_count(conn, NIGHTS_TABLE)
}

pub fn fetch_lodging_range(
    conn: &Connection,
    min_ym: &str,
    max_ym: &str,
) -> Result<Vec<LodgingRow>, UpdateError> {
    let mut stmt = conn.prepare(
        "SELECT ym, pref_code, pref_name, total, jp, \"foreign\"
         FROM market_stats
         WHERE ym >= ?1 AND ym <= ?2
         ORDER BY ym, pref_code",
    )?;
    let rows = stmt
        .query_map([min_ym, max_ym], |row| {
            Ok(LodgingRow {
                ym: row.get(0)?,
                pref_code: row.get(1)?,
                pref_name: row.get(2)?,
                total: row.get(3)?,
                jp: row.get(4)?,
                foreign: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Previously stored rows for one source file, identified by (url, sha256).
/// Used to carry unchanged files across a partial rebuild without
/// re-parsing them.
pub fn fetch_nights_for_source(
    conn: &Connection,
    source_url: &str,
    source_sha256: &str,
) -> Result<Vec<NightsRow>, UpdateError> {
    if !table_exists(conn, NIGHTS_TABLE)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT period_type, period_key, period_label, release_type, segment,
                nights_bin, value, source_url, source_title, source_sha256
         FROM tcd_stay_nights
         WHERE source_url = ?1 AND source_sha256 = ?2",
    )?;
    let rows = stmt
        .query_map([source_url, source_sha256], |row| {
            Ok(NightsRow {
                period_type: row.get(0)?,
                period_key: row.get(1)?,
                period_label: row.get(2)?,
                release_type: row.get(3)?,
                segment: row.get(4)?,
                nights_bin: row.get(5)?,
                value: row.get(6)?,
                source_url: row.get(7)?,
                source_title: row.get(8)?,
                source_sha256: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct StoreStats {
    pub lodging_rows: usize,
    pub lodging_months: usize,
    pub nights_rows: usize,
    pub nights_periods: usize,
}

pub fn get_stats(conn: &Connection) -> Result<StoreStats, UpdateError> {
    let lodging_rows = lodging_row_count(conn)?;
    let lodging_months = if lodging_rows > 0 {
        conn.query_row("SELECT COUNT(DISTINCT ym) FROM market_stats", [], |r| {
            r.get(0)
        })?
    } else {
        0
    };
    let nights_rows = nights_row_count(conn)?;
    let nights_periods = if nights_rows > 0 {
        conn.query_row(
            "SELECT COUNT(DISTINCT period_key) FROM tcd_stay_nights",
            [],
            |r| r.get(0),
        )?
    } else {
        0
    };
    Ok(StoreStats {
        lodging_rows,
        lodging_months,
        nights_rows,
        nights_periods,
    })
}
