// Toll Collect - Web Server
// REST API over the toll lane with Axum

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use toll_collect::api::{router, AppState};
use toll_collect::{open_database, BillingConfig, Clock, SystemClock, TollLane};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🌐 Toll Collect - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = BillingConfig::load(None)?;

    // Open database
    let db_path = &config.database_path;
    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: toll-collect init --seed-demo");
        bail!("database missing");
    }

    let conn = open_database(db_path, Duration::from_millis(config.busy_timeout_ms))
        .with_context(|| format!("Failed to open database {:?}", db_path))?;
    println!("✓ Database opened: {:?}", db_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let lane = TollLane::new(clock.clone(), &config);
    let app = router(AppState::new(conn, lane, clock));

    // Start server
    let addr = std::env::var("TOLL_COLLECT_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   POST /api/scans");
    println!("   GET  /api/plates/:plate/scans");
    println!("   GET  /api/accounts/:id[/history]");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
