// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use toll_collect::{
    count_scans, format_millis, get_account, get_account_history, get_plate_history, load_reference_dir,
    open_database, run_pipeline, seed_demo_data, setup_database, AccountTransaction, BillingConfig, Clock,
    LaneOutcome, PipelineOptions, ScanEvent, ScanRecord, SystemClock, TollLane,
};

const HISTORY_ROWS: usize = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = BillingConfig::load(None)?;

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(&config, &args[2..]),
        Some("scan") => run_scan(&config, &args[2..]),
        Some("plate") => run_plate(&config, &args[2..]),
        Some("account") => run_account(&config, &args[2..]),
        Some("simulate") => run_simulate(&config, &args[2..]),
        Some("ui") | None => run_ui_mode(&config),
        Some(other) => {
            print_usage();
            bail!("unknown command: {}", other)
        }
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  toll-collect init [--seed-demo] [--reference DIR]");
    eprintln!("  toll-collect scan <location> <lane> <plate> <vehicle_class>");
    eprintln!("  toll-collect plate <plate> [limit]");
    eprintln!("  toll-collect account <id> [limit]");
    eprintln!("  toll-collect simulate <count> [rate] [workers]");
    eprintln!("  toll-collect ui");
}

fn open(config: &BillingConfig) -> Result<Connection> {
    let path = &config.database_path;
    if !path.exists() {
        eprintln!("❌ Database not found at {:?}", path);
        eprintln!("   Run: toll-collect init --seed-demo");
        bail!("database missing");
    }

    open_database(path, Duration::from_millis(config.busy_timeout_ms))
        .with_context(|| format!("Failed to open {:?}", path))
}

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> Result<Option<T>> {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a number, got {:?}", name, raw)),
        None => Ok(None),
    }
}

fn run_init(config: &BillingConfig, args: &[String]) -> Result<()> {
    println!("🗄️  Toll Collect - Database Setup");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut seed_demo = false;
    let mut reference_dir = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seed-demo" => seed_demo = true,
            "--reference" => {
                reference_dir = Some(iter.next().context("--reference needs a directory")?);
            }
            other => bail!("unknown init option: {}", other),
        }
    }

    println!("\n🔧 Setting up database...");
    let mut conn = open_database(&config.database_path, Duration::from_millis(config.busy_timeout_ms))?;
    setup_database(&conn)?;
    println!("✓ {:?} initialized with WAL mode", config.database_path);

    if seed_demo {
        println!("\n🌱 Seeding demo reference data...");
        let rows = seed_demo_data(&mut conn)?;
        println!("✓ Wrote {} reference rows", rows);
    }

    if let Some(dir) = reference_dir {
        println!("\n📂 Loading reference CSVs from {}...", dir);
        let rows = load_reference_dir(&mut conn, Path::new(dir))?;
        println!("✓ Loaded {} reference rows", rows);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Ready");

    Ok(())
}

fn run_scan(config: &BillingConfig, args: &[String]) -> Result<()> {
    let [location, lane, plate, vehicle_class] = match args {
        [a, b, c, d] => [a, b, c, d],
        _ => {
            print_usage();
            bail!("scan needs <location> <lane> <plate> <vehicle_class>");
        }
    };

    let mut conn = open(config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let toll_lane = TollLane::new(clock.clone(), config);

    let event = ScanEvent {
        scan_timestamp: clock.now_millis(),
        location: location.clone(),
        lane: lane.clone(),
        plate_num: plate.clone(),
        vehicle_class: vehicle_class.clone(),
    };

    let outcome = toll_lane.handle(&mut conn, &event)?;

    println!("🚗 Scan recorded");
    print_scans(std::slice::from_ref(outcome.scan()));

    match &outcome {
        LaneOutcome::Charged { receipt, .. } => {
            println!(
                "\n💳 Account {}: {} → {} ({})",
                receipt.account_id,
                receipt.previous_balance,
                receipt.new_balance,
                receipt.decision.label()
            );
            print_transactions(&get_account_history(&conn, receipt.account_id, HISTORY_ROWS)?);
        }
        LaneOutcome::NoAccount { .. } => {
            println!("\n⚠️  Unknown vehicle: no account charged");
        }
    }

    Ok(())
}

fn run_plate(config: &BillingConfig, args: &[String]) -> Result<()> {
    let plate = args.first().context("plate needs <plate>")?;
    let limit = parse_arg(args, 1, "limit")?.unwrap_or(HISTORY_ROWS);

    let conn = open(config)?;
    let scans = get_plate_history(&conn, plate, None, None, limit)?;

    println!("🔍 Scan history for {} ({} rows)", plate, scans.len());
    print_scans(&scans);
    Ok(())
}

fn run_account(config: &BillingConfig, args: &[String]) -> Result<()> {
    let account_id: i32 = parse_arg(args, 0, "account id")?.context("account needs <id>")?;
    let limit = parse_arg(args, 1, "limit")?.unwrap_or(HISTORY_ROWS);

    let conn = open(config)?;
    let account = get_account(&conn, account_id)?.with_context(|| format!("Account {} not found", account_id))?;

    println!(
        "💳 Account {}  balance {}  auto top-up {}  {}",
        account.account_id,
        account.balance,
        if account.auto_topup { "on" } else { "off" },
        if account.active { "active" } else { "INACTIVE" }
    );
    print_transactions(&get_account_history(&conn, account_id, limit)?);
    Ok(())
}

fn run_simulate(config: &BillingConfig, args: &[String]) -> Result<()> {
    let defaults = PipelineOptions::default();
    let options = PipelineOptions {
        total_scans: parse_arg(args, 0, "count")?.unwrap_or(defaults.total_scans),
        target_rate: parse_arg(args, 1, "rate")?.unwrap_or(defaults.target_rate),
        workers: parse_arg(args, 2, "workers")?.unwrap_or(defaults.workers),
        seed: None,
    };

    // Fail early with the friendly message
    drop(open(config)?);

    println!("🚦 Toll Collect - Traffic Simulation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "   {} scans, {} lanes, rate {}",
        options.total_scans,
        options.workers,
        if options.target_rate == 0 { "unlimited".to_string() } else { format!("{}/s", options.target_rate) }
    );

    let report = run_pipeline(&config.database_path, config, &options)?;

    println!("\n✓ Processed:  {}", report.processed);
    println!("✓ Charged:    {}", report.charged);
    println!("✓ No account: {}", report.no_account);
    println!("✗ Failed:     {}", report.failed());
    for (kind, count) in &report.failures {
        println!("     {:<24} {}", kind, count);
    }
    println!("\n⏱  {:.2}s, {:.0} scans/s", report.elapsed.as_secs_f64(), report.throughput());

    let conn = open(config)?;
    println!("🗃  Scans retained: {}", count_scans(&conn)?);

    Ok(())
}

fn print_scans(scans: &[ScanRecord]) {
    println!(
        "{:<24} {:<6} {:>7} {:<20} {:<4} {:<28} {:>8} {:>8}",
        "TIME", "PLATE", "ACCOUNT", "LOCATION", "LANE", "REASON", "FEE", "TOTAL"
    );
    for s in scans {
        println!(
            "{:<24} {:<6} {:>7} {:<20} {:<4} {:<28} {:>8} {:>8}",
            s.scanned_at(),
            s.plate_num,
            s.account_id,
            s.toll_loc,
            s.toll_lane_num,
            s.toll_reason,
            s.scan_fee_amount,
            s.total_amount
        );
    }
}

fn print_transactions(history: &[AccountTransaction]) {
    println!(
        "{:<24} {:<6} {:<6} {:<28} {:>8} {:>8}",
        "TIME", "TYPE", "PLATE", "REASON", "FEE", "TOTAL"
    );
    for tx in history {
        println!(
            "{:<24} {:<6} {:<6} {:<28} {:>8} {:>8}",
            format_millis(tx.acct_tx_timestamp),
            tx.tx_type.as_str(),
            tx.scan.as_ref().map(|s| s.plate_num.as_str()).unwrap_or("-"),
            tx.toll_reason,
            tx.tx_fee_amount.map(|d| d.to_string()).unwrap_or_default(),
            tx.total_amount
        );
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &BillingConfig) -> Result<()> {
    println!("🖥️  Loading Toll Collect viewer...\n");

    let conn = open(config)?;
    let mut app = ui::App::new(conn, 500)?;

    println!("✓ Loaded {} scans\n", app.scans.len());
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &BillingConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin toll-server --features server");
    std::process::exit(1);
}
