// Toll Collect - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod reference;
pub mod export;
pub mod scan;      // Scan processing: toll assessment + retention
pub mod charge;    // Account charging: top-up / insufficient / standard
pub mod lane;
pub mod generator; // Synthetic traffic
pub mod pipeline;  // Concurrent ingestion

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use clock::{format_millis, Clock, FixedClock, SystemClock};
pub use config::{BillingConfig, ChargePolicy, TollPolicy, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
pub use db::{
    Account, AccountTransaction, ScanLink, ScanRecord, TxType,
    open_database, setup_database, in_transaction,
    get_scan, get_plate_history, get_recent_scans, count_scans, count_scans_for_plate,
    get_account, get_active_account, get_account_history, get_recent_account_transactions,
    account_history_net,
};
pub use error::{BillingError, BillingResult};
pub use reference::{
    AccountSeed, KnownVehicle, TollLocation, VehicleType,
    seed_demo_data, load_reference_dir, set_parameter, clear_parameter,
    RETENTION_PARAMETER,
};
pub use export::{
    BillByMailExport, TopUpExport,
    get_bill_by_mail_exports, get_top_up_exports,
};
pub use scan::{ScanEvent, ScanProcessor, TollAssessment, VehicleStatus};
pub use charge::{AccountCharger, ChargeDecision, ChargeReceipt, ChargeRequest};
pub use lane::{LaneOutcome, TollLane};
pub use generator::PlateRecordGenerator;
pub use pipeline::{run_pipeline, PipelineOptions, PipelineReport};
