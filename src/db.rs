use crate::clock::format_millis;
use crate::error::{BillingError, BillingResult};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Scan history row. Written once per scan, only ever deleted by retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: i64,
    pub scan_timestamp: i64,
    pub plate_num: String,
    /// 0 when the plate is not a known vehicle
    pub account_id: i32,
    pub toll_loc: String,
    pub toll_lane_num: String,
    pub toll_amount: Decimal,
    pub toll_reason: String,
    pub scan_fee_amount: Decimal,
    pub total_amount: Decimal,
}

impl ScanRecord {
    pub fn has_account(&self) -> bool {
        self.account_id > 0
    }

    pub fn scanned_at(&self) -> String {
        format_millis(self.scan_timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    #[serde(rename = "CREDIT")]
    Credit,
    #[serde(rename = "DEBIT")]
    Debit,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Credit => "CREDIT",
            TxType::Debit => "DEBIT",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "CREDIT" => Some(TxType::Credit),
            "DEBIT" => Some(TxType::Debit),
            _ => None,
        }
    }
}

/// Scan fields copied onto a DEBIT row. CREDIT rows (top-ups) carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanLink {
    pub scan_id: i64,
    pub scan_timestamp: i64,
    pub plate_num: String,
    pub toll_loc: String,
    pub toll_lane_num: String,
}

/// Account history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub acct_tx_id: i64,
    pub acct_tx_timestamp: i64,
    pub account_id: i32,
    pub scan: Option<ScanLink>,
    pub toll_amount: Option<Decimal>,
    pub toll_reason: String,
    pub tx_fee_amount: Option<Decimal>,
    pub total_amount: Decimal,
    pub tx_type: TxType,
}

impl AccountTransaction {
    /// Signed effect on the balance: credits add, debits subtract
    pub fn balance_delta(&self) -> Decimal {
        match self.tx_type {
            TxType::Credit => self.total_amount,
            TxType::Debit => -self.total_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: i32,
    pub balance: Decimal,
    pub auto_topup: bool,
    pub active: bool,
}

// ============================================================================
// CONNECTION + SCHEMA
// ============================================================================

/// Open a database file and configure it for concurrent lanes
pub fn open_database(path: &Path, busy_timeout: Duration) -> BillingResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> BillingResult<()> {
    // Enable WAL mode for crash recovery and concurrent lanes
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Reference data: read-only from the procedures' point of view
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS toll_locations (
            toll_loc TEXT PRIMARY KEY,
            base_fare TEXT NOT NULL,
            toll_loc_status INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS vehicle_types (
            vehicle_class TEXT PRIMARY KEY,
            toll_multip TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS known_vehicles (
            plate_num TEXT PRIMARY KEY,
            account_id INTEGER NOT NULL,
            vehicle_type TEXT,
            exempt_status INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS parameters (
            parameter_name TEXT PRIMARY KEY,
            parameter_value TEXT NOT NULL
        );",
    )?;

    // Mutable state + append-only history
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            account_id INTEGER PRIMARY KEY,
            balance TEXT NOT NULL,
            auto_topup INTEGER NOT NULL DEFAULT 0,
            account_status INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS scan_history (
            scan_id INTEGER PRIMARY KEY,
            scan_timestamp INTEGER NOT NULL,
            plate_num TEXT NOT NULL,
            account_id INTEGER NOT NULL,
            toll_loc TEXT NOT NULL,
            toll_lane_num TEXT NOT NULL,
            toll_amount TEXT NOT NULL,
            toll_reason TEXT NOT NULL,
            scan_fee_amount TEXT NOT NULL,
            total_amount TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS account_history (
            acct_tx_id INTEGER PRIMARY KEY,
            acct_tx_timestamp INTEGER NOT NULL,
            account_id INTEGER NOT NULL,
            plate_num TEXT,
            scan_id INTEGER,
            scan_timestamp INTEGER,
            toll_loc TEXT,
            toll_lane_num TEXT,
            toll_amount TEXT,
            toll_reason TEXT NOT NULL,
            tx_fee_amount TEXT,
            total_amount TEXT NOT NULL,
            tx_type TEXT NOT NULL CHECK (tx_type IN ('CREDIT', 'DEBIT'))
        );",
    )?;

    // Export hand-off tables (append-only, consumed by billing integrations)
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS top_up_export (
            export_id INTEGER PRIMARY KEY AUTOINCREMENT,
            acct_tx_id INTEGER NOT NULL,
            acct_tx_timestamp INTEGER NOT NULL,
            account_id INTEGER NOT NULL,
            amount TEXT NOT NULL,
            handoff_key TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bill_by_mail_export (
            export_id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id INTEGER NOT NULL,
            scan_timestamp INTEGER NOT NULL,
            plate_num TEXT NOT NULL,
            toll_loc TEXT NOT NULL,
            toll_lane_num TEXT NOT NULL,
            toll_amount TEXT NOT NULL,
            toll_reason TEXT NOT NULL,
            scan_fee_amount TEXT,
            tx_fee_amount TEXT,
            shortfall TEXT,
            total_amount TEXT NOT NULL,
            handoff_key TEXT UNIQUE NOT NULL
        );",
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scan_plate_ts ON scan_history(plate_num, scan_timestamp, scan_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_account_history_account ON account_history(account_id, acct_tx_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

/// Run `work` inside one IMMEDIATE transaction.
///
/// Commits when `work` returns `Ok`. On `Err` (or a panic) the transaction
/// handle is dropped without commit, and rusqlite rolls it back, so no
/// write from a failed invocation survives.
pub fn in_transaction<T, E, F>(conn: &mut Connection, work: F) -> Result<T, E>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = work(&tx)?;
    tx.commit()?;
    Ok(value)
}

// ============================================================================
// MONEY COLUMNS
// ============================================================================

/// Canonical text form for a money column
pub fn money_to_sql(amount: Decimal) -> String {
    amount.to_string()
}

pub fn money_from_sql(column: &'static str, raw: &str) -> BillingResult<Decimal> {
    Decimal::from_str(raw.trim()).map_err(|_| BillingError::CorruptColumn {
        column,
        value: raw.to_string(),
    })
}

fn opt_money_from_sql(column: &'static str, raw: Option<String>) -> BillingResult<Option<Decimal>> {
    raw.map(|s| money_from_sql(column, &s)).transpose()
}

// ============================================================================
// SCAN HISTORY
// ============================================================================

pub fn insert_scan(conn: &Connection, scan: &ScanRecord) -> BillingResult<()> {
    conn.execute(
        "INSERT INTO scan_history (
            scan_id, scan_timestamp, plate_num, account_id, toll_loc, toll_lane_num,
            toll_amount, toll_reason, scan_fee_amount, total_amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            scan.scan_id,
            scan.scan_timestamp,
            scan.plate_num,
            scan.account_id,
            scan.toll_loc,
            scan.toll_lane_num,
            money_to_sql(scan.toll_amount),
            scan.toll_reason,
            money_to_sql(scan.scan_fee_amount),
            money_to_sql(scan.total_amount),
        ],
    )?;

    Ok(())
}

/// Delete at most `limit` scans of `plate` older than `cutoff_millis`,
/// oldest first (timestamp, then id). `keep_scan_id` is never deleted.
pub fn prune_scan_history(
    conn: &Connection,
    plate: &str,
    cutoff_millis: i64,
    keep_scan_id: i64,
    limit: usize,
) -> BillingResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM scan_history
         WHERE scan_id IN (
             SELECT scan_id FROM scan_history
             WHERE plate_num = ?1 AND scan_timestamp < ?2 AND scan_id <> ?3
             ORDER BY scan_timestamp ASC, scan_id ASC
             LIMIT ?4
         )",
        params![plate, cutoff_millis, keep_scan_id, limit as i64],
    )?;

    Ok(deleted)
}

const SCAN_COLUMNS: &str = "scan_id, scan_timestamp, plate_num, account_id, toll_loc, toll_lane_num,
                            toll_amount, toll_reason, scan_fee_amount, total_amount";

struct RawScan {
    scan_id: i64,
    scan_timestamp: i64,
    plate_num: String,
    account_id: i32,
    toll_loc: String,
    toll_lane_num: String,
    toll_amount: String,
    toll_reason: String,
    scan_fee_amount: String,
    total_amount: String,
}

impl RawScan {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawScan {
            scan_id: row.get(0)?,
            scan_timestamp: row.get(1)?,
            plate_num: row.get(2)?,
            account_id: row.get(3)?,
            toll_loc: row.get(4)?,
            toll_lane_num: row.get(5)?,
            toll_amount: row.get(6)?,
            toll_reason: row.get(7)?,
            scan_fee_amount: row.get(8)?,
            total_amount: row.get(9)?,
        })
    }

    fn into_record(self) -> BillingResult<ScanRecord> {
        Ok(ScanRecord {
            scan_id: self.scan_id,
            scan_timestamp: self.scan_timestamp,
            plate_num: self.plate_num,
            account_id: self.account_id,
            toll_loc: self.toll_loc,
            toll_lane_num: self.toll_lane_num,
            toll_amount: money_from_sql("toll_amount", &self.toll_amount)?,
            toll_reason: self.toll_reason,
            scan_fee_amount: money_from_sql("scan_fee_amount", &self.scan_fee_amount)?,
            total_amount: money_from_sql("total_amount", &self.total_amount)?,
        })
    }
}

pub fn get_scan(conn: &Connection, scan_id: i64) -> BillingResult<Option<ScanRecord>> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM scan_history WHERE scan_id = ?1", SCAN_COLUMNS),
            [scan_id],
            RawScan::from_row,
        )
        .optional()?;

    raw.map(RawScan::into_record).transpose()
}

/// Most recent scans of a plate, newest first. Location and lane narrow the
/// result when given.
pub fn get_plate_history(
    conn: &Connection,
    plate: &str,
    location: Option<&str>,
    lane: Option<&str>,
    limit: usize,
) -> BillingResult<Vec<ScanRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scan_history
         WHERE plate_num = ?1
           AND (?2 IS NULL OR toll_loc = ?2)
           AND (?3 IS NULL OR toll_lane_num = ?3)
         ORDER BY scan_timestamp DESC, scan_id DESC
         LIMIT ?4",
        SCAN_COLUMNS
    ))?;

    let raws = stmt
        .query_map(params![plate, location, lane, limit as i64], RawScan::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    raws.into_iter().map(RawScan::into_record).collect()
}

/// Most recent scans across all plates, newest first
pub fn get_recent_scans(conn: &Connection, limit: usize) -> BillingResult<Vec<ScanRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scan_history ORDER BY scan_timestamp DESC, scan_id DESC LIMIT ?1",
        SCAN_COLUMNS
    ))?;

    let raws = stmt
        .query_map([limit as i64], RawScan::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    raws.into_iter().map(RawScan::into_record).collect()
}

pub fn count_scans_for_plate(conn: &Connection, plate: &str) -> BillingResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM scan_history WHERE plate_num = ?1",
        [plate],
        |row| row.get(0),
    )?;

    Ok(count)
}

pub fn count_scans(conn: &Connection) -> BillingResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM scan_history", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// ACCOUNTS
// ============================================================================

/// Active account only; inactive and missing look the same
pub fn get_active_account(conn: &Connection, account_id: i32) -> BillingResult<Option<Account>> {
    get_account_where(conn, account_id, "AND account_status = 1")
}

/// Any account, regardless of status (reporting)
pub fn get_account(conn: &Connection, account_id: i32) -> BillingResult<Option<Account>> {
    get_account_where(conn, account_id, "")
}

fn get_account_where(
    conn: &Connection,
    account_id: i32,
    filter: &str,
) -> BillingResult<Option<Account>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT account_id, balance, auto_topup, account_status
                 FROM accounts WHERE account_id = ?1 {}",
                filter
            ),
            [account_id],
            |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            },
        )
        .optional()?;

    raw.map(|(account_id, balance, auto_topup, active)| {
        Ok(Account {
            account_id,
            balance: money_from_sql("balance", &balance)?,
            auto_topup,
            active,
        })
    })
    .transpose()
}

pub fn set_balance(conn: &Connection, account_id: i32, balance: Decimal) -> BillingResult<()> {
    conn.execute(
        "UPDATE accounts SET balance = ?1 WHERE account_id = ?2",
        params![money_to_sql(balance), account_id],
    )?;

    Ok(())
}

// ============================================================================
// ACCOUNT HISTORY
// ============================================================================

pub fn insert_account_transaction(conn: &Connection, tx: &AccountTransaction) -> BillingResult<()> {
    let scan = tx.scan.as_ref();

    conn.execute(
        "INSERT INTO account_history (
            acct_tx_id, acct_tx_timestamp, account_id, plate_num, scan_id, scan_timestamp,
            toll_loc, toll_lane_num, toll_amount, toll_reason, tx_fee_amount,
            total_amount, tx_type
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            tx.acct_tx_id,
            tx.acct_tx_timestamp,
            tx.account_id,
            scan.map(|s| s.plate_num.as_str()),
            scan.map(|s| s.scan_id),
            scan.map(|s| s.scan_timestamp),
            scan.map(|s| s.toll_loc.as_str()),
            scan.map(|s| s.toll_lane_num.as_str()),
            tx.toll_amount.map(money_to_sql),
            tx.toll_reason,
            tx.tx_fee_amount.map(money_to_sql),
            money_to_sql(tx.total_amount),
            tx.tx_type.as_str(),
        ],
    )?;

    Ok(())
}

/// Most recent account transactions, newest first
pub fn get_account_history(
    conn: &Connection,
    account_id: i32,
    limit: usize,
) -> BillingResult<Vec<AccountTransaction>> {
    query_account_history(conn, Some(account_id), limit)
}

/// Most recent transactions across every account, newest first
pub fn get_recent_account_transactions(conn: &Connection, limit: usize) -> BillingResult<Vec<AccountTransaction>> {
    query_account_history(conn, None, limit)
}

fn query_account_history(
    conn: &Connection,
    account_id: Option<i32>,
    limit: usize,
) -> BillingResult<Vec<AccountTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT acct_tx_id, acct_tx_timestamp, account_id, plate_num, scan_id, scan_timestamp,
                toll_loc, toll_lane_num, toll_amount, toll_reason, tx_fee_amount,
                total_amount, tx_type
         FROM account_history
         WHERE ?1 IS NULL OR account_id = ?1
         ORDER BY acct_tx_id DESC
         LIMIT ?2",
    )?;

    let raws = stmt
        .query_map(params![account_id, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i32>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, String>(12)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raws.into_iter()
        .map(
            |(
                acct_tx_id,
                acct_tx_timestamp,
                account_id,
                plate_num,
                scan_id,
                scan_timestamp,
                toll_loc,
                toll_lane_num,
                toll_amount,
                toll_reason,
                tx_fee_amount,
                total_amount,
                tx_type,
            )| {
                let scan = match (plate_num, scan_id, scan_timestamp, toll_loc, toll_lane_num) {
                    (Some(plate_num), Some(scan_id), Some(scan_timestamp), Some(toll_loc), Some(toll_lane_num)) => {
                        Some(ScanLink {
                            scan_id,
                            scan_timestamp,
                            plate_num,
                            toll_loc,
                            toll_lane_num,
                        })
                    }
                    _ => None,
                };

                let tx_type = TxType::parse(&tx_type).ok_or_else(|| BillingError::CorruptColumn {
                    column: "tx_type",
                    value: tx_type.clone(),
                })?;

                Ok(AccountTransaction {
                    acct_tx_id,
                    acct_tx_timestamp,
                    account_id,
                    scan,
                    toll_amount: opt_money_from_sql("toll_amount", toll_amount)?,
                    toll_reason,
                    tx_fee_amount: opt_money_from_sql("tx_fee_amount", tx_fee_amount)?,
                    total_amount: money_from_sql("total_amount", &total_amount)?,
                    tx_type,
                })
            },
        )
        .collect()
}

/// Net effect of every recorded transaction on an account
pub fn account_history_net(conn: &Connection, account_id: i32) -> BillingResult<Decimal> {
    let history = get_account_history(conn, account_id, usize::MAX >> 1)?;
    Ok(history.iter().map(AccountTransaction::balance_delta).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_scan(scan_id: i64, plate: &str, ts: i64) -> ScanRecord {
        ScanRecord {
            scan_id,
            scan_timestamp: ts,
            plate_num: plate.to_string(),
            account_id: 7,
            toll_loc: "Infinity Bridge".to_string(),
            toll_lane_num: "01".to_string(),
            toll_amount: dec!(5.00),
            toll_reason: "STANDARD TOLL (Car)".to_string(),
            scan_fee_amount: dec!(0),
            total_amount: dec!(5.00),
        }
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(count_scans(&conn).unwrap(), 0);
    }

    #[test]
    fn test_scan_roundtrip_keeps_exact_decimals() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut scan = sample_scan(1, "X001", 1_000);
        scan.toll_amount = dec!(6.2500);
        scan.total_amount = dec!(6.2500);
        insert_scan(&conn, &scan).unwrap();

        let loaded = get_scan(&conn, 1).unwrap().unwrap();
        assert_eq!(loaded, scan);
        assert!(get_scan(&conn, 2).unwrap().is_none());
    }

    #[test]
    fn test_plate_history_newest_first_with_filters() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        insert_scan(&conn, &sample_scan(1, "X001", 1_000)).unwrap();
        insert_scan(&conn, &sample_scan(2, "X001", 2_000)).unwrap();
        let mut other_lane = sample_scan(3, "X001", 3_000);
        other_lane.toll_lane_num = "02".to_string();
        insert_scan(&conn, &other_lane).unwrap();
        insert_scan(&conn, &sample_scan(4, "X002", 4_000)).unwrap();

        let all = get_plate_history(&conn, "X001", None, None, 10).unwrap();
        assert_eq!(all.iter().map(|s| s.scan_id).collect::<Vec<_>>(), vec![3, 2, 1]);

        let lane_one = get_plate_history(&conn, "X001", Some("Infinity Bridge"), Some("01"), 1).unwrap();
        assert_eq!(lane_one.len(), 1);
        assert_eq!(lane_one[0].scan_id, 2);
    }

    #[test]
    fn test_prune_is_bounded_and_oldest_first() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        // Same timestamp for 2 and 3: id breaks the tie
        insert_scan(&conn, &sample_scan(3, "X001", 100)).unwrap();
        insert_scan(&conn, &sample_scan(2, "X001", 100)).unwrap();
        insert_scan(&conn, &sample_scan(1, "X001", 200)).unwrap();
        insert_scan(&conn, &sample_scan(4, "X001", 10_000)).unwrap();

        let deleted = prune_scan_history(&conn, "X001", 5_000, 4, 2).unwrap();
        assert_eq!(deleted, 2);

        let left: Vec<i64> = get_plate_history(&conn, "X001", None, None, 10)
            .unwrap()
            .iter()
            .map(|s| s.scan_id)
            .collect();
        assert_eq!(left, vec![4, 1]);
    }

    #[test]
    fn test_in_transaction_rolls_back_on_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let result: BillingResult<()> = in_transaction(&mut conn, |tx| {
            insert_scan(tx, &sample_scan(1, "X001", 1_000))?;
            Err(BillingError::InvalidLocation("Nowhere".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(count_scans(&conn).unwrap(), 0);

        let result: BillingResult<()> = in_transaction(&mut conn, |tx| {
            insert_scan(tx, &sample_scan(1, "X001", 1_000))
        });
        assert!(result.is_ok());
        assert_eq!(count_scans(&conn).unwrap(), 1);
    }

    #[test]
    fn test_corrupt_money_column_is_reported() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO accounts (account_id, balance, auto_topup, account_status) VALUES (1, 'lots', 0, 1)",
            [],
        )
        .unwrap();

        match get_active_account(&conn, 1) {
            Err(BillingError::CorruptColumn { column, value }) => {
                assert_eq!(column, "balance");
                assert_eq!(value, "lots");
            }
            other => panic!("expected CorruptColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tx_type_is_reported() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.pragma_update(None, "ignore_check_constraints", true).unwrap();
        conn.execute(
            "INSERT INTO account_history (acct_tx_id, acct_tx_timestamp, account_id, toll_reason, total_amount, tx_type)
             VALUES (1, 1000, 7, 'REFUND', '5.00', 'REFUND')",
            [],
        )
        .unwrap();

        match get_account_history(&conn, 7, 10) {
            Err(BillingError::CorruptColumn { column, value }) => {
                assert_eq!(column, "tx_type");
                assert_eq!(value, "REFUND");
            }
            other => panic!("expected CorruptColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_account_history_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let credit = AccountTransaction {
            acct_tx_id: 10,
            acct_tx_timestamp: 1_000,
            account_id: 7,
            scan: None,
            toll_amount: None,
            toll_reason: "AUTO_TOPUP".to_string(),
            tx_fee_amount: None,
            total_amount: dec!(30.00),
            tx_type: TxType::Credit,
        };
        let debit = AccountTransaction {
            acct_tx_id: 11,
            acct_tx_timestamp: 1_000,
            account_id: 7,
            scan: Some(ScanLink {
                scan_id: 3,
                scan_timestamp: 900,
                plate_num: "X042".to_string(),
                toll_loc: "Infinity Bridge".to_string(),
                toll_lane_num: "01".to_string(),
            }),
            toll_amount: Some(dec!(5.00)),
            toll_reason: "STANDARD TOLL (Car)".to_string(),
            tx_fee_amount: Some(dec!(0)),
            total_amount: dec!(5.00),
            tx_type: TxType::Debit,
        };
        insert_account_transaction(&conn, &credit).unwrap();
        insert_account_transaction(&conn, &debit).unwrap();

        let history = get_account_history(&conn, 7, 10).unwrap();
        assert_eq!(history, vec![debit.clone(), credit]);
        assert_eq!(account_history_net(&conn, 7).unwrap(), dec!(25.00));

        let other = AccountTransaction {
            acct_tx_id: 12,
            account_id: 8,
            ..debit
        };
        insert_account_transaction(&conn, &other).unwrap();
        assert!(get_account_history(&conn, 7, 10).unwrap().iter().all(|tx| tx.account_id == 7));

        let recent = get_recent_account_transactions(&conn, 2).unwrap();
        assert_eq!(recent.iter().map(|tx| tx.acct_tx_id).collect::<Vec<_>>(), vec![12, 11]);
    }
}
