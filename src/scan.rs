// 🚗 Scan Processor - price a plate scan and record it
//
// One call = one IMMEDIATE transaction:
//   lookup fare + multiplier -> classify plate -> insert scan -> prune history
// Any error rolls back everything, including the pruning.

use crate::clock::Clock;
use crate::config::TollPolicy;
use crate::db::{in_transaction, insert_scan, money_from_sql, prune_scan_history, ScanRecord};
use crate::error::{BillingError, BillingResult};
use crate::export::{insert_bill_by_mail_export, BillByMailExport};
use crate::reference::RETENTION_PARAMETER;
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Maximum expired scans removed per invocation
pub const PRUNE_BATCH: usize = 2;

pub const REASON_EXEMPT: &str = "EXEMPT";
pub const REASON_UNKNOWN_VEHICLE: &str = "UNKNOWN_VEHICLE";

// ============================================================================
// INPUT
// ============================================================================

/// One plate read at a toll lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub scan_timestamp: i64,
    pub location: String,
    pub lane: String,
    pub plate_num: String,
    pub vehicle_class: String,
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// What the known-vehicle registry says about a plate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleStatus {
    Exempt { account_id: i32 },
    Registered { account_id: i32 },
    /// Not in the registry, or registered but inactive
    Unknown,
}

/// Priced outcome of a scan, one variant per billing rule
#[derive(Debug, Clone, PartialEq)]
pub enum TollAssessment {
    Exempt {
        account_id: i32,
    },
    Standard {
        account_id: i32,
        toll: Decimal,
        vehicle_class: String,
    },
    UnknownVehicle {
        toll: Decimal,
        scan_fee: Decimal,
    },
}

impl TollAssessment {
    pub fn classify(status: VehicleStatus, toll: Decimal, vehicle_class: &str, scan_fee: Decimal) -> Self {
        match status {
            VehicleStatus::Exempt { account_id } => TollAssessment::Exempt { account_id },
            VehicleStatus::Registered { account_id } => TollAssessment::Standard {
                account_id,
                toll,
                vehicle_class: vehicle_class.to_string(),
            },
            VehicleStatus::Unknown => TollAssessment::UnknownVehicle { toll, scan_fee },
        }
    }

    /// 0 for unknown vehicles
    pub fn account_id(&self) -> i32 {
        match self {
            TollAssessment::Exempt { account_id } | TollAssessment::Standard { account_id, .. } => *account_id,
            TollAssessment::UnknownVehicle { .. } => 0,
        }
    }

    pub fn toll_amount(&self) -> Decimal {
        match self {
            TollAssessment::Exempt { .. } => Decimal::ZERO,
            TollAssessment::Standard { toll, .. } | TollAssessment::UnknownVehicle { toll, .. } => *toll,
        }
    }

    pub fn scan_fee(&self) -> Decimal {
        match self {
            TollAssessment::UnknownVehicle { scan_fee, .. } => *scan_fee,
            _ => Decimal::ZERO,
        }
    }

    pub fn total_amount(&self) -> BillingResult<Decimal> {
        self.toll_amount()
            .checked_add(self.scan_fee())
            .ok_or(BillingError::AmountOverflow { operation: "scan total" })
    }

    pub fn reason(&self) -> String {
        match self {
            TollAssessment::Exempt { .. } => REASON_EXEMPT.to_string(),
            TollAssessment::Standard { vehicle_class, .. } => standard_reason(vehicle_class),
            TollAssessment::UnknownVehicle { .. } => REASON_UNKNOWN_VEHICLE.to_string(),
        }
    }
}

pub fn standard_reason(vehicle_class: &str) -> String {
    format!("STANDARD TOLL ({})", vehicle_class)
}

/// Fixed-point toll: base fare times class multiplier, no rounding
pub fn compute_toll(base_fare: Decimal, multiplier: Decimal) -> BillingResult<Decimal> {
    base_fare
        .checked_mul(multiplier)
        .ok_or(BillingError::AmountOverflow { operation: "toll" })
}

/// Scans older than this are expired. None when the window reaches back
/// past the start of representable time, in which case nothing is expired.
pub fn retention_cutoff(now_millis: i64, retention_minutes: i64) -> Option<i64> {
    retention_minutes
        .checked_mul(60_000)
        .and_then(|window| now_millis.checked_sub(window))
}

/// Retention from the parameter table: missing means the default,
/// anything that is not a non-negative integer aborts the scan.
pub fn parse_retention(raw: Option<&str>, default_minutes: i64) -> BillingResult<i64> {
    let Some(raw) = raw else {
        return Ok(default_minutes);
    };

    match raw.trim().parse::<i64>() {
        Ok(minutes) if minutes >= 0 => Ok(minutes),
        _ => Err(BillingError::InvalidConfiguration {
            name: RETENTION_PARAMETER.to_string(),
            value: raw.to_string(),
        }),
    }
}

// ============================================================================
// REFERENCE LOOKUPS
// ============================================================================

fn lookup_base_fare(conn: &Connection, location: &str) -> BillingResult<Decimal> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT base_fare FROM toll_locations WHERE toll_loc = ?1 AND toll_loc_status = 1",
            [location],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => money_from_sql("base_fare", &raw),
        None => Err(BillingError::InvalidLocation(location.to_string())),
    }
}

fn lookup_multiplier(conn: &Connection, vehicle_class: &str) -> BillingResult<Decimal> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT toll_multip FROM vehicle_types WHERE vehicle_class = ?1",
            [vehicle_class],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => money_from_sql("toll_multip", &raw),
        None => Err(BillingError::InvalidVehicleClass(vehicle_class.to_string())),
    }
}

fn lookup_retention(conn: &Connection, default_minutes: i64) -> BillingResult<i64> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT parameter_value FROM parameters WHERE parameter_name = ?1",
            [RETENTION_PARAMETER],
            |row| row.get(0),
        )
        .optional()?;

    parse_retention(raw.as_deref(), default_minutes)
}

fn lookup_vehicle(conn: &Connection, plate: &str) -> BillingResult<VehicleStatus> {
    let row: Option<(i32, bool)> = conn
        .query_row(
            "SELECT account_id, exempt_status FROM known_vehicles WHERE plate_num = ?1 AND active = 1",
            [plate],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(match row {
        Some((account_id, true)) => VehicleStatus::Exempt { account_id },
        Some((account_id, false)) => VehicleStatus::Registered { account_id },
        None => VehicleStatus::Unknown,
    })
}

// ============================================================================
// PROCESSOR
// ============================================================================

pub struct ScanProcessor {
    clock: Arc<dyn Clock>,
    policy: TollPolicy,
}

impl ScanProcessor {
    pub fn new(clock: Arc<dyn Clock>, policy: TollPolicy) -> Self {
        ScanProcessor { clock, policy }
    }

    /// Price, record and prune for one scan. Returns the new scan id.
    pub fn process(&self, conn: &mut Connection, event: &ScanEvent) -> BillingResult<i64> {
        self.record(conn, event).map(|scan| scan.scan_id)
    }

    /// Same as `process`, returning the committed row
    pub fn record(&self, conn: &mut Connection, event: &ScanEvent) -> BillingResult<ScanRecord> {
        in_transaction(conn, |tx| {
            let scan_id = self.clock.next_id();

            let base_fare = lookup_base_fare(tx, &event.location)?;
            let multiplier = lookup_multiplier(tx, &event.vehicle_class)?;
            let toll = compute_toll(base_fare, multiplier)?;

            let retention_minutes = lookup_retention(tx, self.policy.default_retention_minutes)?;

            let status = lookup_vehicle(tx, &event.plate_num)?;
            let assessment = TollAssessment::classify(status, toll, &event.vehicle_class, self.policy.scan_fee);

            let record = ScanRecord {
                scan_id,
                scan_timestamp: event.scan_timestamp,
                plate_num: event.plate_num.clone(),
                account_id: assessment.account_id(),
                toll_loc: event.location.clone(),
                toll_lane_num: event.lane.clone(),
                toll_amount: assessment.toll_amount(),
                toll_reason: assessment.reason(),
                scan_fee_amount: assessment.scan_fee(),
                total_amount: assessment.total_amount()?,
            };
            insert_scan(tx, &record)?;

            if self.policy.export_unknown_vehicles {
                if let TollAssessment::UnknownVehicle { toll, scan_fee } = &assessment {
                    let export = BillByMailExport {
                        export_id: 0,
                        scan_id,
                        scan_timestamp: event.scan_timestamp,
                        plate_num: event.plate_num.clone(),
                        toll_loc: event.location.clone(),
                        toll_lane_num: event.lane.clone(),
                        toll_amount: *toll,
                        toll_reason: REASON_UNKNOWN_VEHICLE.to_string(),
                        scan_fee_amount: Some(*scan_fee),
                        tx_fee_amount: None,
                        shortfall: None,
                        total_amount: record.total_amount,
                        handoff_key: String::new(),
                    }
                    .sealed();
                    insert_bill_by_mail_export(tx, &export)?;
                }
            }

            let pruned = match retention_cutoff(self.clock.now_millis(), retention_minutes) {
                Some(cutoff) => prune_scan_history(tx, &event.plate_num, cutoff, scan_id, PRUNE_BATCH)?,
                None => 0,
            };

            debug!(
                scan_id,
                plate = %event.plate_num,
                location = %event.location,
                reason = %record.toll_reason,
                total = %record.total_amount,
                pruned,
                "scan recorded"
            );

            Ok(record)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{count_scans, count_scans_for_plate, get_plate_history, get_scan, setup_database};
    use crate::export::get_bill_by_mail_exports;
    use crate::reference::{
        set_parameter, upsert_known_vehicle, upsert_toll_location, upsert_vehicle_type, KnownVehicle,
        TollLocation, VehicleType,
    };
    use rust_decimal_macros::dec;

    const NOW: i64 = 1_700_000_000_000;

    fn setup() -> (Connection, Arc<FixedClock>) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        for (name, fare, active) in [
            ("Infinity Bridge", dec!(5.00), true),
            ("Quantum Tunnel", dec!(6.25), true),
            ("Closed Road", dec!(9.00), false),
        ] {
            upsert_toll_location(
                &conn,
                &TollLocation {
                    toll_loc: name.to_string(),
                    base_fare: fare,
                    active,
                },
            )
            .unwrap();
        }
        for (class, multip) in [("Car", dec!(1.0)), ("Large Truck", dec!(2.5)), ("Motorcycle", dec!(0.5))] {
            upsert_vehicle_type(
                &conn,
                &VehicleType {
                    vehicle_class: class.to_string(),
                    toll_multip: multip,
                },
            )
            .unwrap();
        }
        for (plate, account_id, exempt, active) in [
            ("X042", 42, false, true),
            ("X000", 1, true, true),
            ("X999", 999, false, false),
        ] {
            upsert_known_vehicle(
                &conn,
                &KnownVehicle {
                    plate_num: plate.to_string(),
                    account_id,
                    vehicle_type: None,
                    exempt,
                    active,
                },
            )
            .unwrap();
        }

        (conn, Arc::new(FixedClock::new(NOW)))
    }

    fn processor(clock: &Arc<FixedClock>) -> ScanProcessor {
        ScanProcessor::new(clock.clone(), TollPolicy::default())
    }

    fn event(location: &str, plate: &str, class: &str, ts: i64) -> ScanEvent {
        ScanEvent {
            scan_timestamp: ts,
            location: location.to_string(),
            lane: "01".to_string(),
            plate_num: plate.to_string(),
            vehicle_class: class.to_string(),
        }
    }

    #[test]
    fn test_compute_toll_is_exact() {
        assert_eq!(compute_toll(dec!(5.00), dec!(1.0)).unwrap(), dec!(5.00));
        assert_eq!(compute_toll(dec!(6.25), dec!(2.5)).unwrap(), dec!(15.625));
        assert_eq!(compute_toll(dec!(0.10), dec!(3)).unwrap(), dec!(0.30));

        let first = compute_toll(dec!(4.25), dec!(1.5)).unwrap();
        for _ in 0..1_000 {
            assert_eq!(compute_toll(dec!(4.25), dec!(1.5)).unwrap(), first);
        }
    }

    #[test]
    fn test_compute_toll_overflow_is_an_error() {
        let huge = Decimal::from(1_000_000_000_000_000i64);
        assert!(matches!(
            compute_toll(huge, huge),
            Err(BillingError::AmountOverflow { .. })
        ));
    }

    #[test]
    fn test_overflowing_fare_aborts_scan() {
        let (mut conn, clock) = setup();
        upsert_toll_location(
            &conn,
            &TollLocation {
                toll_loc: "Far Side".to_string(),
                base_fare: Decimal::from(1_000_000_000_000_000i64),
                active: true,
            },
        )
        .unwrap();
        upsert_vehicle_type(
            &conn,
            &VehicleType {
                vehicle_class: "Star Freighter".to_string(),
                toll_multip: Decimal::from(1_000_000_000_000_000i64),
            },
        )
        .unwrap();

        let result = processor(&clock).process(&mut conn, &event("Far Side", "X042", "Star Freighter", NOW));
        assert!(matches!(result, Err(BillingError::AmountOverflow { .. })));
        assert_eq!(count_scans(&conn).unwrap(), 0);
    }

    #[test]
    fn test_retention_cutoff() {
        assert_eq!(retention_cutoff(NOW, 10), Some(NOW - 600_000));
        assert_eq!(retention_cutoff(NOW, 0), Some(NOW));
        assert_eq!(retention_cutoff(NOW, 200_000_000_000_000), None);
        assert_eq!(retention_cutoff(i64::MIN + 1, 1), None);
    }

    #[test]
    fn test_huge_retention_keeps_everything() {
        let (mut conn, clock) = setup();
        set_parameter(&conn, RETENTION_PARAMETER, "200000000000000").unwrap();
        let p = processor(&clock);

        let minute_ago = NOW - 60_000;
        clock.set(minute_ago);
        let first = p.process(&mut conn, &event("Infinity Bridge", "K001", "Car", minute_ago)).unwrap();

        clock.set(NOW);
        p.process(&mut conn, &event("Infinity Bridge", "K001", "Car", NOW)).unwrap();

        assert_eq!(count_scans_for_plate(&conn, "K001").unwrap(), 2);
        assert!(get_scan(&conn, first).unwrap().is_some());
    }

    #[test]
    fn test_record_returns_committed_row() {
        let (mut conn, clock) = setup();
        let scan = processor(&clock)
            .record(&mut conn, &event("Quantum Tunnel", "K123", "Car", NOW))
            .unwrap();

        assert_eq!(get_scan(&conn, scan.scan_id).unwrap(), Some(scan.clone()));
        assert_eq!(scan.total_amount, dec!(8.25));
    }

    #[test]
    fn test_parse_retention() {
        assert_eq!(parse_retention(None, 10).unwrap(), 10);
        assert_eq!(parse_retention(Some("15"), 10).unwrap(), 15);
        assert_eq!(parse_retention(Some(" 0 "), 10).unwrap(), 0);

        for bad in ["ten", "1.5", "", "-3"] {
            match parse_retention(Some(bad), 10) {
                Err(BillingError::InvalidConfiguration { value, .. }) => assert_eq!(value, bad),
                other => panic!("expected InvalidConfiguration for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_known_vehicle_standard_toll() {
        let (mut conn, clock) = setup();
        let scan_id = processor(&clock)
            .process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW))
            .unwrap();

        let scan = get_scan(&conn, scan_id).unwrap().unwrap();
        assert_eq!(scan.account_id, 42);
        assert_eq!(scan.toll_amount, dec!(5.00));
        assert_eq!(scan.scan_fee_amount, dec!(0));
        assert_eq!(scan.total_amount, dec!(5.00));
        assert_eq!(scan.toll_reason, "STANDARD TOLL (Car)");
    }

    #[test]
    fn test_exempt_vehicle_pays_nothing() {
        let (mut conn, clock) = setup();
        let p = processor(&clock);

        for (location, class) in [("Infinity Bridge", "Car"), ("Quantum Tunnel", "Large Truck")] {
            let scan_id = p.process(&mut conn, &event(location, "X000", class, NOW)).unwrap();
            let scan = get_scan(&conn, scan_id).unwrap().unwrap();
            assert_eq!(scan.toll_amount, Decimal::ZERO);
            assert_eq!(scan.total_amount, Decimal::ZERO);
            assert_eq!(scan.toll_reason, "EXEMPT");
            assert_eq!(scan.account_id, 1);
        }
    }

    #[test]
    fn test_unknown_and_inactive_plates_pay_scan_fee() {
        let (mut conn, clock) = setup();
        let p = processor(&clock);

        for plate in ["K123", "X999"] {
            let scan_id = p.process(&mut conn, &event("Quantum Tunnel", plate, "Large Truck", NOW)).unwrap();
            let scan = get_scan(&conn, scan_id).unwrap().unwrap();
            assert_eq!(scan.account_id, 0);
            assert_eq!(scan.toll_amount, dec!(15.625));
            assert_eq!(scan.scan_fee_amount, dec!(2.00));
            assert_eq!(scan.total_amount, dec!(17.625));
            assert_eq!(scan.toll_reason, "UNKNOWN_VEHICLE");
        }

        // Export hook is off by default
        assert!(get_bill_by_mail_exports(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_vehicle_export_hook() {
        let (mut conn, clock) = setup();
        let policy = TollPolicy {
            export_unknown_vehicles: true,
            ..TollPolicy::default()
        };
        let p = ScanProcessor::new(clock.clone(), policy);

        let scan_id = p.process(&mut conn, &event("Infinity Bridge", "K001", "Car", NOW)).unwrap();
        p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW)).unwrap();

        let exports = get_bill_by_mail_exports(&conn, None).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].scan_id, scan_id);
        assert_eq!(exports[0].scan_fee_amount, Some(dec!(2.00)));
        assert_eq!(exports[0].total_amount, dec!(7.00));
    }

    #[test]
    fn test_invalid_location_writes_nothing() {
        let (mut conn, clock) = setup();
        let p = processor(&clock);

        for location in ["Atlantis Gate", "Closed Road"] {
            match p.process(&mut conn, &event(location, "X042", "Car", NOW)) {
                Err(BillingError::InvalidLocation(loc)) => assert_eq!(loc, location),
                other => panic!("expected InvalidLocation, got {:?}", other),
            }
        }
        assert_eq!(count_scans(&conn).unwrap(), 0);
    }

    #[test]
    fn test_invalid_vehicle_class_writes_nothing() {
        let (mut conn, clock) = setup();

        let result = processor(&clock).process(&mut conn, &event("Infinity Bridge", "X042", "Hovercraft", NOW));
        assert!(matches!(result, Err(BillingError::InvalidVehicleClass(_))));
        assert_eq!(count_scans(&conn).unwrap(), 0);
    }

    #[test]
    fn test_bad_retention_parameter_aborts() {
        let (mut conn, clock) = setup();
        set_parameter(&conn, RETENTION_PARAMETER, "forever").unwrap();

        let result = processor(&clock).process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW));
        assert!(matches!(result, Err(BillingError::InvalidConfiguration { .. })));
        assert_eq!(count_scans(&conn).unwrap(), 0);
    }

    #[test]
    fn test_retention_prunes_at_most_two_oldest() {
        let (mut conn, clock) = setup();
        let p = processor(&clock);

        // Five scans, 20..16 minutes before NOW
        let mut old_ids = Vec::new();
        for minutes_ago in [20, 19, 18, 17, 16] {
            let ts = NOW - minutes_ago * 60_000;
            clock.set(ts);
            old_ids.push(p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", ts)).unwrap());
        }
        assert_eq!(count_scans_for_plate(&conn, "X042").unwrap(), 5);

        // Default retention is 10 minutes: all five are expired at NOW
        clock.set(NOW);
        let fresh = p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW)).unwrap();

        let left: Vec<i64> = get_plate_history(&conn, "X042", None, None, 10)
            .unwrap()
            .iter()
            .map(|s| s.scan_id)
            .collect();
        assert_eq!(left.len(), 4, "one insert, two deletions");
        assert!(left.contains(&fresh));
        assert!(!left.contains(&old_ids[0]));
        assert!(!left.contains(&old_ids[1]));
        assert!(left.contains(&old_ids[2]));
    }

    #[test]
    fn test_retention_keeps_rows_inside_window() {
        let (mut conn, clock) = setup();
        set_parameter(&conn, RETENTION_PARAMETER, "30").unwrap();
        let p = processor(&clock);

        for minutes_ago in [25, 20, 15] {
            let ts = NOW - minutes_ago * 60_000;
            p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", ts)).unwrap();
        }
        p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW)).unwrap();

        assert_eq!(count_scans_for_plate(&conn, "X042").unwrap(), 4);
    }

    #[test]
    fn test_pruning_is_per_plate() {
        let (mut conn, clock) = setup();
        let p = processor(&clock);

        let old = NOW - 60 * 60_000;
        p.process(&mut conn, &event("Infinity Bridge", "K001", "Car", old)).unwrap();
        p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW)).unwrap();

        assert_eq!(count_scans_for_plate(&conn, "K001").unwrap(), 1);
    }

    #[test]
    fn test_scan_ids_increase() {
        let (mut conn, clock) = setup();
        let p = processor(&clock);

        let a = p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW)).unwrap();
        let b = p.process(&mut conn, &event("Infinity Bridge", "X042", "Car", NOW)).unwrap();
        assert!(b > a);
    }
}
