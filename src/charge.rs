// 💳 Account Charger - debit an account for a recorded scan
//
// Exactly one payment path per charge, decided once from
// (projected balance, auto top-up flag):
//
//   AutoTopUp            projected < threshold AND auto top-up on
//   InsufficientBalance  projected < 0         AND auto top-up off
//   Standard             everything else
//
// Balance update, history rows and export rows commit together or not at all.

use crate::clock::Clock;
use crate::config::ChargePolicy;
use crate::db::{
    get_active_account, in_transaction, insert_account_transaction, set_balance, AccountTransaction, ScanLink,
    TxType,
};
use crate::error::{BillingError, BillingResult};
use crate::export::{insert_bill_by_mail_export, insert_top_up_export, BillByMailExport, TopUpExport};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const REASON_AUTO_TOPUP: &str = "AUTO_TOPUP";
pub const REASON_INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// Charge request built from a recorded scan. Carries the toll only:
/// scan fees apply to unknown plates, which have no account to charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub scan_id: i64,
    pub scan_timestamp: i64,
    pub location: String,
    pub lane: String,
    pub plate_num: String,
    pub account_id: i32,
    pub toll_amount: Decimal,
    pub toll_reason: String,
}

impl ChargeRequest {
    fn scan_link(&self) -> ScanLink {
        ScanLink {
            scan_id: self.scan_id,
            scan_timestamp: self.scan_timestamp,
            plate_num: self.plate_num.clone(),
            toll_loc: self.location.clone(),
            toll_lane_num: self.lane.clone(),
        }
    }
}

/// The payment path chosen for one charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeDecision {
    AutoTopUp { top_up: Decimal },
    InsufficientBalance { admin_fee: Decimal, shortfall: Decimal },
    Standard,
}

impl ChargeDecision {
    /// Pure branch selection. Every (projected, auto_topup) pair lands in
    /// exactly one variant.
    pub fn decide(projected_balance: Decimal, auto_topup: bool, policy: &ChargePolicy) -> Self {
        if auto_topup && projected_balance < policy.low_balance_threshold {
            ChargeDecision::AutoTopUp {
                top_up: policy.top_up_amount,
            }
        } else if !auto_topup && projected_balance < Decimal::ZERO {
            ChargeDecision::InsufficientBalance {
                admin_fee: policy.admin_fee,
                shortfall: projected_balance,
            }
        } else {
            ChargeDecision::Standard
        }
    }

    pub fn fee(&self) -> Decimal {
        match self {
            ChargeDecision::InsufficientBalance { admin_fee, .. } => *admin_fee,
            _ => Decimal::ZERO,
        }
    }

    pub fn credit(&self) -> Decimal {
        match self {
            ChargeDecision::AutoTopUp { top_up } => *top_up,
            _ => Decimal::ZERO,
        }
    }

    /// Amount debited for the toll itself. The top-up does not change it.
    pub fn debit_total(&self, toll_amount: Decimal) -> BillingResult<Decimal> {
        toll_amount
            .checked_add(self.fee())
            .ok_or(BillingError::AmountOverflow { operation: "debit total" })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChargeDecision::AutoTopUp { .. } => "AUTO_TOPUP",
            ChargeDecision::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ChargeDecision::Standard => "STANDARD",
        }
    }
}

/// What a committed charge did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub acct_tx_id: i64,
    pub account_id: i32,
    pub decision: ChargeDecision,
    pub previous_balance: Decimal,
    pub charged_total: Decimal,
    pub new_balance: Decimal,
}

// ============================================================================
// CHARGER
// ============================================================================

pub struct AccountCharger {
    clock: Arc<dyn Clock>,
    policy: ChargePolicy,
}

impl AccountCharger {
    pub fn new(clock: Arc<dyn Clock>, policy: ChargePolicy) -> Self {
        AccountCharger { clock, policy }
    }

    pub fn charge(&self, conn: &mut Connection, req: &ChargeRequest) -> BillingResult<ChargeReceipt> {
        in_transaction(conn, |tx| {
            let acct_tx_id = self.clock.next_id();
            let acct_tx_timestamp = self.clock.now_millis();

            let account = get_active_account(tx, req.account_id)?
                .ok_or(BillingError::InvalidAccount(req.account_id))?;

            let projected = account
                .balance
                .checked_sub(req.toll_amount)
                .ok_or(BillingError::AmountOverflow { operation: "projected balance" })?;
            let decision = ChargeDecision::decide(projected, account.auto_topup, &self.policy);

            match decision {
                ChargeDecision::AutoTopUp { top_up } => {
                    // Top-up gets its own history id so both rows stay unique
                    let credit_tx_id = self.clock.next_id();

                    insert_top_up_export(
                        tx,
                        &TopUpExport::new(credit_tx_id, acct_tx_timestamp, req.account_id, top_up),
                    )?;
                    insert_account_transaction(
                        tx,
                        &AccountTransaction {
                            acct_tx_id: credit_tx_id,
                            acct_tx_timestamp,
                            account_id: req.account_id,
                            scan: None,
                            toll_amount: None,
                            toll_reason: REASON_AUTO_TOPUP.to_string(),
                            tx_fee_amount: None,
                            total_amount: top_up,
                            tx_type: TxType::Credit,
                        },
                    )?;

                    info!(account_id = req.account_id, %top_up, %projected, "auto top-up");
                }
                ChargeDecision::InsufficientBalance { admin_fee, shortfall } => {
                    let export = BillByMailExport {
                        export_id: 0,
                        scan_id: req.scan_id,
                        scan_timestamp: req.scan_timestamp,
                        plate_num: req.plate_num.clone(),
                        toll_loc: req.location.clone(),
                        toll_lane_num: req.lane.clone(),
                        toll_amount: req.toll_amount,
                        toll_reason: REASON_INSUFFICIENT_BALANCE.to_string(),
                        scan_fee_amount: None,
                        tx_fee_amount: Some(admin_fee),
                        shortfall: Some(shortfall),
                        total_amount: decision.debit_total(req.toll_amount)?,
                        handoff_key: String::new(),
                    }
                    .sealed();
                    insert_bill_by_mail_export(tx, &export)?;

                    info!(
                        account_id = req.account_id,
                        scan_id = req.scan_id,
                        %shortfall,
                        "insufficient balance, billed by mail"
                    );
                }
                ChargeDecision::Standard => {}
            }

            let charged_total = decision.debit_total(req.toll_amount)?;
            let new_balance = account
                .balance
                .checked_add(decision.credit())
                .and_then(|topped_up| topped_up.checked_sub(charged_total))
                .ok_or(BillingError::AmountOverflow { operation: "new balance" })?;
            set_balance(tx, req.account_id, new_balance)?;

            insert_account_transaction(
                tx,
                &AccountTransaction {
                    acct_tx_id,
                    acct_tx_timestamp,
                    account_id: req.account_id,
                    scan: Some(req.scan_link()),
                    toll_amount: Some(req.toll_amount),
                    toll_reason: req.toll_reason.clone(),
                    tx_fee_amount: Some(decision.fee()),
                    total_amount: charged_total,
                    tx_type: TxType::Debit,
                },
            )?;

            debug!(
                acct_tx_id,
                account_id = req.account_id,
                path = decision.label(),
                %charged_total,
                %new_balance,
                "account charged"
            );

            Ok(ChargeReceipt {
                acct_tx_id,
                account_id: req.account_id,
                decision,
                previous_balance: account.balance,
                charged_total,
                new_balance,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{account_history_net, get_account, get_account_history, setup_database};
    use crate::export::{get_bill_by_mail_exports, get_top_up_exports};
    use crate::reference::{upsert_account, AccountSeed};
    use rust_decimal_macros::dec;

    fn setup_account(balance: Decimal, auto_topup: bool, active: bool) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        upsert_account(
            &conn,
            &AccountSeed {
                account_id: 42,
                balance,
                auto_topup,
                active,
            },
        )
        .unwrap();
        conn
    }

    fn charger() -> AccountCharger {
        AccountCharger::new(Arc::new(FixedClock::new(1_700_000_000_000)), ChargePolicy::default())
    }

    fn request(toll: Decimal) -> ChargeRequest {
        ChargeRequest {
            scan_id: 99,
            scan_timestamp: 1_699_999_999_000,
            location: "Infinity Bridge".to_string(),
            lane: "01".to_string(),
            plate_num: "X042".to_string(),
            account_id: 42,
            toll_amount: toll,
            toll_reason: "STANDARD TOLL (Car)".to_string(),
        }
    }

    #[test]
    fn test_decide_is_exhaustive_and_exclusive() {
        let policy = ChargePolicy::default();
        let balances = [dec!(-50), dec!(-0.01), dec!(0), dec!(5), dec!(9.99), dec!(10), dec!(10.01), dec!(100)];
        let tolls = [dec!(0), dec!(2.5), dec!(5.00), dec!(15.625), dec!(40)];

        for balance in balances {
            for toll in tolls {
                for auto in [true, false] {
                    let projected = balance - toll;
                    let decision = ChargeDecision::decide(projected, auto, &policy);

                    let top_up = auto && projected < dec!(10.00);
                    let insufficient = !auto && projected < dec!(0);
                    match decision {
                        ChargeDecision::AutoTopUp { top_up: amount } => {
                            assert!(top_up);
                            assert_eq!(amount, dec!(30.00));
                        }
                        ChargeDecision::InsufficientBalance { admin_fee, shortfall } => {
                            assert!(insufficient && !top_up);
                            assert_eq!(admin_fee, dec!(25.00));
                            assert_eq!(shortfall, projected);
                        }
                        ChargeDecision::Standard => assert!(!top_up && !insufficient),
                    }
                }
            }
        }
    }

    #[test]
    fn test_insufficient_balance_scenario() {
        // balance 3.00, toll 5.00, no auto top-up -> fee 25.00, charged 30.00, balance -27.00
        let mut conn = setup_account(dec!(3.00), false, true);
        let receipt = charger().charge(&mut conn, &request(dec!(5.00))).unwrap();

        assert_eq!(
            receipt.decision,
            ChargeDecision::InsufficientBalance {
                admin_fee: dec!(25.00),
                shortfall: dec!(-2.00)
            }
        );
        assert_eq!(receipt.charged_total, dec!(30.00));
        assert_eq!(receipt.new_balance, dec!(-27.00));
        assert_eq!(get_account(&conn, 42).unwrap().unwrap().balance, dec!(-27.00));

        let exports = get_bill_by_mail_exports(&conn, Some("X042")).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].scan_id, 99);
        assert_eq!(exports[0].tx_fee_amount, Some(dec!(25.00)));
        assert_eq!(exports[0].total_amount, dec!(30.00));
        assert!(get_top_up_exports(&conn, None).unwrap().is_empty());

        let history = get_account_history(&conn, 42, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_type, TxType::Debit);
        assert_eq!(history[0].toll_reason, "STANDARD TOLL (Car)");
        assert_eq!(exports[0].toll_reason, "INSUFFICIENT_BALANCE");
        assert_eq!(history[0].tx_fee_amount, Some(dec!(25.00)));
        assert_eq!(history[0].total_amount, dec!(30.00));
        assert_eq!(history[0].scan.as_ref().map(|s| s.scan_id), Some(99));
    }

    #[test]
    fn test_auto_top_up_scenario() {
        // balance 12.00, toll 5.00, auto top-up -> 12 + 30 - 5 = 37
        let mut conn = setup_account(dec!(12.00), true, true);
        let receipt = charger().charge(&mut conn, &request(dec!(5.00))).unwrap();

        assert_eq!(receipt.decision, ChargeDecision::AutoTopUp { top_up: dec!(30.00) });
        assert_eq!(receipt.charged_total, dec!(5.00));
        assert_eq!(receipt.new_balance, dec!(37.00));
        assert_eq!(get_account(&conn, 42).unwrap().unwrap().balance, dec!(37.00));

        let history = get_account_history(&conn, 42, 10).unwrap();
        assert_eq!(history.len(), 2);
        let credit = history.iter().find(|t| t.tx_type == TxType::Credit).unwrap();
        let debit = history.iter().find(|t| t.tx_type == TxType::Debit).unwrap();
        assert_eq!(credit.toll_reason, "AUTO_TOPUP");
        assert_eq!(credit.total_amount, dec!(30.00));
        assert!(credit.scan.is_none());
        assert_ne!(credit.acct_tx_id, debit.acct_tx_id);
        assert_eq!(debit.total_amount, dec!(5.00));
        assert_eq!(debit.toll_reason, "STANDARD TOLL (Car)");

        let exports = get_top_up_exports(&conn, Some(42)).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].amount, dec!(30.00));
        assert!(get_bill_by_mail_exports(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_auto_top_up_even_when_projected_negative() {
        let mut conn = setup_account(dec!(1.00), true, true);
        let receipt = charger().charge(&mut conn, &request(dec!(5.00))).unwrap();

        assert!(matches!(receipt.decision, ChargeDecision::AutoTopUp { .. }));
        assert_eq!(receipt.new_balance, dec!(26.00));
    }

    #[test]
    fn test_standard_charge() {
        let mut conn = setup_account(dec!(50.00), false, true);
        let receipt = charger().charge(&mut conn, &request(dec!(5.00))).unwrap();

        assert_eq!(receipt.decision, ChargeDecision::Standard);
        assert_eq!(receipt.charged_total, dec!(5.00));
        assert_eq!(receipt.new_balance, dec!(45.00));
        assert!(get_top_up_exports(&conn, None).unwrap().is_empty());
        assert!(get_bill_by_mail_exports(&conn, None).unwrap().is_empty());

        let history = get_account_history(&conn, 42, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_fee_amount, Some(dec!(0)));
    }

    #[test]
    fn test_low_balance_without_auto_top_up_is_standard() {
        // Projected 5.00 is under the threshold but not negative
        let mut conn = setup_account(dec!(10.00), false, true);
        let receipt = charger().charge(&mut conn, &request(dec!(5.00))).unwrap();
        assert_eq!(receipt.decision, ChargeDecision::Standard);
        assert_eq!(receipt.new_balance, dec!(5.00));
    }

    #[test]
    fn test_inactive_or_missing_account_is_invalid() {
        let mut conn = setup_account(dec!(50.00), false, false);
        let result = charger().charge(&mut conn, &request(dec!(5.00)));
        assert!(matches!(result, Err(BillingError::InvalidAccount(42))));

        let mut req = request(dec!(5.00));
        req.account_id = 7;
        let result = charger().charge(&mut conn, &req);
        assert!(matches!(result, Err(BillingError::InvalidAccount(7))));

        assert!(get_account_history(&conn, 42, 10).unwrap().is_empty());
        assert_eq!(get_account(&conn, 42).unwrap().unwrap().balance, dec!(50.00));
    }

    #[test]
    fn test_failed_write_rolls_back_export() {
        let mut conn = setup_account(dec!(3.00), false, true);
        // Make the DEBIT insert fail after the export row was queued
        conn.execute_batch(
            "CREATE TRIGGER reject_debits BEFORE INSERT ON account_history
             WHEN NEW.tx_type = 'DEBIT'
             BEGIN SELECT RAISE(ABORT, 'debits disabled'); END;",
        )
        .unwrap();

        let result = charger().charge(&mut conn, &request(dec!(5.00)));
        assert!(matches!(result, Err(BillingError::Database(_))));

        assert!(get_bill_by_mail_exports(&conn, None).unwrap().is_empty());
        assert_eq!(get_account(&conn, 42).unwrap().unwrap().balance, dec!(3.00));
    }

    #[test]
    fn test_balance_matches_history() {
        let opening = dec!(12.00);
        let mut conn = setup_account(opening, true, true);
        let c = charger();

        for toll in [dec!(5.00), dec!(15.625), dec!(2.50), dec!(40.00), dec!(0)] {
            c.charge(&mut conn, &request(toll)).unwrap();
        }

        let balance = get_account(&conn, 42).unwrap().unwrap().balance;
        assert_eq!(balance, opening + account_history_net(&conn, 42).unwrap());
    }

    #[test]
    fn test_overflowing_balance_aborts_charge() {
        let mut conn = setup_account(Decimal::MIN, false, true);
        let result = charger().charge(&mut conn, &request(dec!(5.00)));
        assert!(matches!(result, Err(BillingError::AmountOverflow { .. })));

        assert!(get_account_history(&conn, 42, 10).unwrap().is_empty());
        assert!(get_bill_by_mail_exports(&conn, None).unwrap().is_empty());
        assert_eq!(get_account(&conn, 42).unwrap().unwrap().balance, Decimal::MIN);
    }

    #[test]
    fn test_overflowing_top_up_rolls_back() {
        // Projected MAX - (MAX - 5) = 5 takes the top-up path; MAX + 30 does not fit
        let mut conn = setup_account(Decimal::MAX, true, true);
        let result = charger().charge(&mut conn, &request(Decimal::MAX - dec!(5)));
        assert!(matches!(result, Err(BillingError::AmountOverflow { .. })));

        assert!(get_top_up_exports(&conn, None).unwrap().is_empty());
        assert!(get_account_history(&conn, 42, 10).unwrap().is_empty());
        assert_eq!(get_account(&conn, 42).unwrap().unwrap().balance, Decimal::MAX);
    }

    #[test]
    fn test_charge_uses_toll_amount_only() {
        // The charger never adds a scan fee; it prices from toll_amount alone
        let mut conn = setup_account(dec!(50.00), false, true);
        let mut req = request(dec!(5.00));
        req.toll_reason = "UNKNOWN_VEHICLE".to_string();

        let receipt = charger().charge(&mut conn, &req).unwrap();
        assert_eq!(receipt.charged_total, dec!(5.00));
    }
}
