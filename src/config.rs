// ⚙️ Billing Configuration - fees, thresholds, database location
// Loaded from JSON, every field optional

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TOLL_COLLECT_CONFIG";

/// Config file picked up from the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "toll-collect.json";

// ============================================================================
// POLICIES
// ============================================================================

/// Pricing knobs used by the scan procedure
#[derive(Debug, Clone, PartialEq)]
pub struct TollPolicy {
    /// Flat fee added for plates not in the known-vehicle registry
    pub scan_fee: Decimal,
    /// Retention used when the parameter table has no entry
    pub default_retention_minutes: i64,
    /// Hand unknown-vehicle scans to bill-by-mail immediately
    pub export_unknown_vehicles: bool,
}

impl Default for TollPolicy {
    fn default() -> Self {
        BillingConfig::default().toll_policy()
    }
}

/// Payment-path knobs used by the charge procedure
#[derive(Debug, Clone, PartialEq)]
pub struct ChargePolicy {
    pub low_balance_threshold: Decimal,
    pub top_up_amount: Decimal,
    pub admin_fee: Decimal,
}

impl Default for ChargePolicy {
    fn default() -> Self {
        BillingConfig::default().charge_policy()
    }
}

// ============================================================================
// CONFIG FILE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub database_path: PathBuf,
    pub scan_fee: Decimal,
    pub low_balance_threshold: Decimal,
    pub top_up_amount: Decimal,
    pub admin_fee: Decimal,
    pub default_retention_minutes: i64,
    pub export_unknown_vehicles: bool,
    pub busy_timeout_ms: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        BillingConfig {
            database_path: PathBuf::from("tollcollect.db"),
            scan_fee: dec!(2.00),
            low_balance_threshold: dec!(10.00),
            top_up_amount: dec!(30.00),
            admin_fee: dec!(25.00),
            default_retention_minutes: 10,
            export_unknown_vehicles: false,
            busy_timeout_ms: 5_000,
        }
    }
}

impl BillingConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: BillingConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve config: explicit path, then $TOLL_COLLECT_CONFIG, then
    /// ./toll-collect.json, then built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return Self::from_file(path);
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let amounts = [
            ("scan_fee", self.scan_fee),
            ("low_balance_threshold", self.low_balance_threshold),
            ("top_up_amount", self.top_up_amount),
            ("admin_fee", self.admin_fee),
        ];
        for (name, value) in amounts {
            if value.is_sign_negative() && !value.is_zero() {
                bail!("{} must not be negative, got {}", name, value);
            }
        }

        if self.default_retention_minutes < 0 {
            bail!(
                "default_retention_minutes must not be negative, got {}",
                self.default_retention_minutes
            );
        }

        Ok(())
    }

    pub fn toll_policy(&self) -> TollPolicy {
        TollPolicy {
            scan_fee: self.scan_fee,
            default_retention_minutes: self.default_retention_minutes,
            export_unknown_vehicles: self.export_unknown_vehicles,
        }
    }

    pub fn charge_policy(&self) -> ChargePolicy {
        ChargePolicy {
            low_balance_threshold: self.low_balance_threshold,
            top_up_amount: self.top_up_amount,
            admin_fee: self.admin_fee,
        }
    }
}
