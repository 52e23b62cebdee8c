// 🛣️ Toll Lane - scan, then charge if the plate belongs to an account
//
// Two separate transactions, in the order a lane controller runs them.
// A failed charge leaves the committed scan in place.

use crate::charge::{AccountCharger, ChargeReceipt, ChargeRequest};
use crate::clock::Clock;
use crate::config::BillingConfig;
use crate::db::ScanRecord;
use crate::error::BillingResult;
use crate::scan::{ScanEvent, ScanProcessor};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaneOutcome {
    Charged { scan: ScanRecord, receipt: ChargeReceipt },
    /// Unknown vehicle: the scan is recorded, nobody to charge
    NoAccount { scan: ScanRecord },
}

impl LaneOutcome {
    pub fn scan(&self) -> &ScanRecord {
        match self {
            LaneOutcome::Charged { scan, .. } | LaneOutcome::NoAccount { scan } => scan,
        }
    }

    pub fn receipt(&self) -> Option<&ChargeReceipt> {
        match self {
            LaneOutcome::Charged { receipt, .. } => Some(receipt),
            LaneOutcome::NoAccount { .. } => None,
        }
    }
}

pub struct TollLane {
    scanner: ScanProcessor,
    charger: AccountCharger,
}

impl TollLane {
    pub fn new(clock: Arc<dyn Clock>, config: &BillingConfig) -> Self {
        TollLane {
            scanner: ScanProcessor::new(clock.clone(), config.toll_policy()),
            charger: AccountCharger::new(clock, config.charge_policy()),
        }
    }

    pub fn scanner(&self) -> &ScanProcessor {
        &self.scanner
    }

    pub fn charger(&self) -> &AccountCharger {
        &self.charger
    }

    pub fn handle(&self, conn: &mut Connection, event: &ScanEvent) -> BillingResult<LaneOutcome> {
        // Charge from the committed row as built; another lane may prune it at any time
        let scan = self.scanner.record(conn, event)?;

        if !scan.has_account() {
            return Ok(LaneOutcome::NoAccount { scan });
        }

        let request = ChargeRequest {
            scan_id: scan.scan_id,
            scan_timestamp: scan.scan_timestamp,
            location: scan.toll_loc.clone(),
            lane: scan.toll_lane_num.clone(),
            plate_num: scan.plate_num.clone(),
            account_id: scan.account_id,
            toll_amount: scan.toll_amount,
            toll_reason: scan.toll_reason.clone(),
        };
        let receipt = self.charger.charge(conn, &request)?;

        Ok(LaneOutcome::Charged { scan, receipt })
    }
}
