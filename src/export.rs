// 📤 Export Hand-off - top-up and bill-by-mail obligations
//
// Rows here are what an external payment/billing integration picks up.
// Once written inside a committed transaction they are assumed "sent":
// the core never updates or deletes them.

use crate::db::{money_from_sql, money_to_sql};
use crate::error::BillingResult;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// TOP-UP EXPORT
// ============================================================================

/// Charge the account's payment method for an automatic top-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUpExport {
    /// Assigned by the database on insert (0 before)
    pub export_id: i64,
    pub acct_tx_id: i64,
    pub acct_tx_timestamp: i64,
    pub account_id: i32,
    pub amount: Decimal,
    pub handoff_key: String,
}

impl TopUpExport {
    pub fn new(acct_tx_id: i64, acct_tx_timestamp: i64, account_id: i32, amount: Decimal) -> Self {
        let handoff_key = handoff_key(&[
            "TOP_UP",
            &acct_tx_id.to_string(),
            &account_id.to_string(),
            &amount.normalize().to_string(),
        ]);

        TopUpExport {
            export_id: 0,
            acct_tx_id,
            acct_tx_timestamp,
            account_id,
            amount,
            handoff_key,
        }
    }
}

// ============================================================================
// BILL-BY-MAIL EXPORT
// ============================================================================

/// Invoice a plate owner by mail. Used for insufficient balances and,
/// when enabled, for unknown vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillByMailExport {
    pub export_id: i64,
    pub scan_id: i64,
    pub scan_timestamp: i64,
    pub plate_num: String,
    pub toll_loc: String,
    pub toll_lane_num: String,
    pub toll_amount: Decimal,
    pub toll_reason: String,
    pub scan_fee_amount: Option<Decimal>,
    pub tx_fee_amount: Option<Decimal>,
    /// How far below zero the account would have gone (insufficient balance only)
    pub shortfall: Option<Decimal>,
    pub total_amount: Decimal,
    pub handoff_key: String,
}

impl BillByMailExport {
    /// Compute the hand-off key from the identifying fields. Call after all
    /// fields are set.
    pub fn sealed(mut self) -> Self {
        self.handoff_key = handoff_key(&[
            "BILL_BY_MAIL",
            &self.scan_id.to_string(),
            &self.plate_num,
            &self.toll_reason,
            &self.total_amount.normalize().to_string(),
        ]);
        self
    }
}

/// SHA-256 over the fields, unit-separated so ("ab","c") != ("a","bc")
pub fn handoff_key(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn insert_top_up_export(conn: &Connection, export: &TopUpExport) -> BillingResult<i64> {
    conn.execute(
        "INSERT INTO top_up_export (acct_tx_id, acct_tx_timestamp, account_id, amount, handoff_key)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            export.acct_tx_id,
            export.acct_tx_timestamp,
            export.account_id,
            money_to_sql(export.amount),
            export.handoff_key,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn insert_bill_by_mail_export(conn: &Connection, export: &BillByMailExport) -> BillingResult<i64> {
    conn.execute(
        "INSERT INTO bill_by_mail_export (
            scan_id, scan_timestamp, plate_num, toll_loc, toll_lane_num, toll_amount,
            toll_reason, scan_fee_amount, tx_fee_amount, shortfall, total_amount, handoff_key
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            export.scan_id,
            export.scan_timestamp,
            export.plate_num,
            export.toll_loc,
            export.toll_lane_num,
            money_to_sql(export.toll_amount),
            export.toll_reason,
            export.scan_fee_amount.map(money_to_sql),
            export.tx_fee_amount.map(money_to_sql),
            export.shortfall.map(money_to_sql),
            money_to_sql(export.total_amount),
            export.handoff_key,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_top_up_exports(conn: &Connection, account_id: Option<i32>) -> BillingResult<Vec<TopUpExport>> {
    let mut stmt = conn.prepare(
        "SELECT export_id, acct_tx_id, acct_tx_timestamp, account_id, amount, handoff_key
         FROM top_up_export
         WHERE ?1 IS NULL OR account_id = ?1
         ORDER BY export_id",
    )?;

    let raws = stmt
        .query_map([account_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raws.into_iter()
        .map(|(export_id, acct_tx_id, acct_tx_timestamp, account_id, amount, handoff_key)| {
            Ok(TopUpExport {
                export_id,
                acct_tx_id,
                acct_tx_timestamp,
                account_id,
                amount: money_from_sql("amount", &amount)?,
                handoff_key,
            })
        })
        .collect()
}

pub fn get_bill_by_mail_exports(conn: &Connection, plate: Option<&str>) -> BillingResult<Vec<BillByMailExport>> {
    let mut stmt = conn.prepare(
        "SELECT export_id, scan_id, scan_timestamp, plate_num, toll_loc, toll_lane_num,
                toll_amount, toll_reason, scan_fee_amount, tx_fee_amount, shortfall,
                total_amount, handoff_key
         FROM bill_by_mail_export
         WHERE ?1 IS NULL OR plate_num = ?1
         ORDER BY export_id",
    )?;

    let raws = stmt
        .query_map([plate], |row| {
            Ok((
                (
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ),
                (
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, String>(12)?,
                ),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let opt = |column: &'static str, raw: Option<String>| -> BillingResult<Option<Decimal>> {
        raw.map(|s| money_from_sql(column, &s)).transpose()
    };

    raws.into_iter()
        .map(
            |(
                (export_id, scan_id, scan_timestamp, plate_num, toll_loc, toll_lane_num),
                (toll_amount, toll_reason, scan_fee, tx_fee, shortfall, total_amount, handoff_key),
            )| {
                Ok(BillByMailExport {
                    export_id,
                    scan_id,
                    scan_timestamp,
                    plate_num,
                    toll_loc,
                    toll_lane_num,
                    toll_amount: money_from_sql("toll_amount", &toll_amount)?,
                    toll_reason,
                    scan_fee_amount: opt("scan_fee_amount", scan_fee)?,
                    tx_fee_amount: opt("tx_fee_amount", tx_fee)?,
                    shortfall: opt("shortfall", shortfall)?,
                    total_amount: money_from_sql("total_amount", &total_amount)?,
                    handoff_key,
                })
            },
        )
        .collect()
}
