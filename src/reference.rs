// 🗂️ Reference Data - toll locations, vehicle types, known vehicles, accounts
//
// The procedures only read these tables. This module is how they get filled:
// from the built-in demo set, or from a directory of CSV files.

use crate::db::{in_transaction, money_to_sql};
use crate::error::BillingResult;
use anyhow::{Context as AnyhowContext, Result};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Parameter holding the per-plate scan history retention, in minutes
pub const RETENTION_PARAMETER: &str = "SCAN_HISTORY_RETENTION_MINUTES";

// ============================================================================
// ROW TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TollLocation {
    pub toll_loc: String,
    pub base_fare: Decimal,
    #[serde(deserialize_with = "deserialize_flag")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleType {
    pub vehicle_class: String,
    pub toll_multip: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownVehicle {
    pub plate_num: String,
    pub account_id: i32,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(deserialize_with = "deserialize_flag")]
    pub exempt: bool,
    #[serde(deserialize_with = "deserialize_flag")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSeed {
    pub account_id: i32,
    pub balance: Decimal,
    #[serde(deserialize_with = "deserialize_flag")]
    pub auto_topup: bool,
    #[serde(deserialize_with = "deserialize_flag")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub parameter_name: String,
    pub parameter_value: String,
}

/// CSV flags come as 1/0 (database export) or true/false (hand-written)
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "y" | "yes" => Ok(true),
        "0" | "false" | "n" | "no" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("not a flag: {:?}", other))),
    }
}

// ============================================================================
// UPSERTS
// ============================================================================

pub fn upsert_toll_location(conn: &Connection, loc: &TollLocation) -> BillingResult<()> {
    conn.execute(
        "INSERT INTO toll_locations (toll_loc, base_fare, toll_loc_status) VALUES (?1, ?2, ?3)
         ON CONFLICT(toll_loc) DO UPDATE SET base_fare = excluded.base_fare,
                                             toll_loc_status = excluded.toll_loc_status",
        params![loc.toll_loc, money_to_sql(loc.base_fare), loc.active],
    )?;
    Ok(())
}

pub fn upsert_vehicle_type(conn: &Connection, vt: &VehicleType) -> BillingResult<()> {
    conn.execute(
        "INSERT INTO vehicle_types (vehicle_class, toll_multip) VALUES (?1, ?2)
         ON CONFLICT(vehicle_class) DO UPDATE SET toll_multip = excluded.toll_multip",
        params![vt.vehicle_class, money_to_sql(vt.toll_multip)],
    )?;
    Ok(())
}

pub fn upsert_known_vehicle(conn: &Connection, kv: &KnownVehicle) -> BillingResult<()> {
    conn.execute(
        "INSERT INTO known_vehicles (plate_num, account_id, vehicle_type, exempt_status, active)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(plate_num) DO UPDATE SET account_id = excluded.account_id,
                                              vehicle_type = excluded.vehicle_type,
                                              exempt_status = excluded.exempt_status,
                                              active = excluded.active",
        params![kv.plate_num, kv.account_id, kv.vehicle_type, kv.exempt, kv.active],
    )?;
    Ok(())
}

pub fn upsert_account(conn: &Connection, acct: &AccountSeed) -> BillingResult<()> {
    conn.execute(
        "INSERT INTO accounts (account_id, balance, auto_topup, account_status) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(account_id) DO UPDATE SET balance = excluded.balance,
                                               auto_topup = excluded.auto_topup,
                                               account_status = excluded.account_status",
        params![acct.account_id, money_to_sql(acct.balance), acct.auto_topup, acct.active],
    )?;
    Ok(())
}

pub fn set_parameter(conn: &Connection, name: &str, value: &str) -> BillingResult<()> {
    conn.execute(
        "INSERT INTO parameters (parameter_name, parameter_value) VALUES (?1, ?2)
         ON CONFLICT(parameter_name) DO UPDATE SET parameter_value = excluded.parameter_value",
        params![name, value],
    )?;
    Ok(())
}

pub fn clear_parameter(conn: &Connection, name: &str) -> BillingResult<()> {
    conn.execute("DELETE FROM parameters WHERE parameter_name = ?1", [name])?;
    Ok(())
}

// ============================================================================
// DEMO DATA
// ============================================================================

/// Toll points served by the traffic generator, with their base fares
pub const DEMO_LOCATIONS: &[(&str, Decimal)] = &[
    ("Skyline Toll Plaza", dec!(3.50)),
    ("Nexus Crossing", dec!(4.00)),
    ("Elevation Pass", dec!(2.75)),
    ("Infinity Bridge", dec!(5.00)),
    ("Horizon Bridge", dec!(4.50)),
    ("Echo Lane Station", dec!(2.00)),
    ("Quantum Tunnel", dec!(6.25)),
    ("Tannhäuser Gate", dec!(7.00)),
    ("Astrolink Path", dec!(3.00)),
    ("Orbital Gate", dec!(5.50)),
    ("Lumen Tunnel", dec!(4.25)),
];

pub const DEMO_VEHICLE_TYPES: &[(&str, Decimal)] = &[
    ("Motorcycle", dec!(0.5)),
    ("Car", dec!(1.0)),
    ("Small Truck", dec!(1.5)),
    ("Large Truck", dec!(2.5)),
    ("Bus", dec!(2.0)),
];

/// Known plates are X000..X999, one account each (account id = plate number + 1)
pub const DEMO_PLATE_COUNT: i32 = 1000;

/// Seed the demo reference set in one transaction. Safe to re-run; existing
/// balances are overwritten with the opening values.
pub fn seed_demo_data(conn: &mut Connection) -> BillingResult<usize> {
    in_transaction(conn, |tx| {
        let mut rows = 0;

        for (name, fare) in DEMO_LOCATIONS {
            upsert_toll_location(
                tx,
                &TollLocation {
                    toll_loc: name.to_string(),
                    base_fare: *fare,
                    active: true,
                },
            )?;
            rows += 1;
        }

        for (class, multip) in DEMO_VEHICLE_TYPES {
            upsert_vehicle_type(
                tx,
                &VehicleType {
                    vehicle_class: class.to_string(),
                    toll_multip: *multip,
                },
            )?;
            rows += 1;
        }

        for n in 0..DEMO_PLATE_COUNT {
            let account_id = n + 1;
            upsert_account(
                tx,
                &AccountSeed {
                    account_id,
                    balance: dec!(50.00),
                    auto_topup: n % 3 == 0,
                    active: true,
                },
            )?;
            upsert_known_vehicle(
                tx,
                &KnownVehicle {
                    plate_num: format!("X{:03}", n),
                    account_id,
                    vehicle_type: None,
                    exempt: n % 50 == 0,
                    active: true,
                },
            )?;
            rows += 2;
        }

        set_parameter(tx, RETENTION_PARAMETER, "10")?;
        rows += 1;

        Ok(rows)
    })
}

// ============================================================================
// CSV IMPORT
// ============================================================================

fn read_csv<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let row: T = result.with_context(|| format!("Bad row {} in {:?}", i + 1, path))?;
        rows.push(row);
    }

    Ok(rows)
}

/// Load every reference CSV present in `dir`. Missing files are skipped;
/// all rows land in a single transaction.
pub fn load_reference_dir(conn: &mut Connection, dir: &Path) -> Result<usize> {
    let load = |name: &str| {
        let path = dir.join(name);
        if path.exists() {
            Some(path)
        } else {
            None
        }
    };

    let locations: Vec<TollLocation> = match load("toll_locations.csv") {
        Some(p) => read_csv(&p)?,
        None => Vec::new(),
    };
    let vehicle_types: Vec<VehicleType> = match load("vehicle_types.csv") {
        Some(p) => read_csv(&p)?,
        None => Vec::new(),
    };
    let accounts: Vec<AccountSeed> = match load("accounts.csv") {
        Some(p) => read_csv(&p)?,
        None => Vec::new(),
    };
    let vehicles: Vec<KnownVehicle> = match load("known_vehicles.csv") {
        Some(p) => read_csv(&p)?,
        None => Vec::new(),
    };
    let parameters: Vec<Parameter> = match load("parameters.csv") {
        Some(p) => read_csv(&p)?,
        None => Vec::new(),
    };

    let total = in_transaction(conn, |tx| -> BillingResult<usize> {
        for loc in &locations {
            upsert_toll_location(tx, loc)?;
        }
        for vt in &vehicle_types {
            upsert_vehicle_type(tx, vt)?;
        }
        for acct in &accounts {
            upsert_account(tx, acct)?;
        }
        for kv in &vehicles {
            upsert_known_vehicle(tx, kv)?;
        }
        for p in &parameters {
            set_parameter(tx, &p.parameter_name, &p.parameter_value)?;
        }
        Ok(locations.len() + vehicle_types.len() + accounts.len() + vehicles.len() + parameters.len())
    })
    .context("Failed to store reference data")?;

    Ok(total)
}
