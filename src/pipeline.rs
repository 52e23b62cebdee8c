// 🚦 Ingestion Pipeline - push generated scans through the lanes at a target rate
//
// Each worker is one toll lane: its own connection, its own generator.
// SQLite serializes the write transactions; the busy timeout lets lanes
// queue instead of failing when another lane holds the write lock.

use crate::clock::{Clock, SystemClock};
use crate::config::BillingConfig;
use crate::db::open_database;
use crate::generator::PlateRecordGenerator;
use crate::lane::{LaneOutcome, TollLane};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Total scans across all workers
    pub total_scans: usize,
    /// Scans per second across all workers, 0 = as fast as possible
    pub target_rate: u32,
    pub workers: usize,
    /// Seed for reproducible traffic; each worker derives its own
    pub seed: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            total_scans: 1_000,
            target_rate: 0,
            workers: 4,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub processed: usize,
    pub charged: usize,
    pub no_account: usize,
    /// Error kind -> count
    pub failures: BTreeMap<String, usize>,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    fn merge(&mut self, other: PipelineReport) {
        self.processed += other.processed;
        self.charged += other.charged;
        self.no_account += other.no_account;
        for (kind, n) in other.failures {
            *self.failures.entry(kind).or_default() += n;
        }
    }
}

/// Split `total` into `workers` shares that differ by at most one
fn shares(total: usize, workers: usize) -> Vec<usize> {
    let workers = workers.max(1);
    (0..workers)
        .map(|i| total / workers + usize::from(i < total % workers))
        .collect()
}

fn run_worker(
    worker: usize,
    db_path: &Path,
    config: &BillingConfig,
    clock: Arc<dyn Clock>,
    scans: usize,
    pacing: Option<Duration>,
    seed: Option<u64>,
) -> Result<PipelineReport> {
    let mut conn = open_database(db_path, Duration::from_millis(config.busy_timeout_ms))
        .with_context(|| format!("worker {} failed to open {:?}", worker, db_path))?;

    let lane = TollLane::new(clock.clone(), config);
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
        None => StdRng::from_entropy(),
    };
    let generator = PlateRecordGenerator::new(rng, clock);

    let mut report = PipelineReport::default();
    let started = Instant::now();

    for (i, event) in generator.take(scans).enumerate() {
        if let Some(interval) = pacing {
            let due = interval * i as u32;
            let elapsed = started.elapsed();
            if due > elapsed {
                thread::sleep(due - elapsed);
            }
        }

        report.processed += 1;
        match lane.handle(&mut conn, &event) {
            Ok(LaneOutcome::Charged { .. }) => report.charged += 1,
            Ok(LaneOutcome::NoAccount { .. }) => report.no_account += 1,
            Err(err) => {
                if !err.is_fatal_input() {
                    warn!(worker, plate = %event.plate_num, error = %err, "scan aborted");
                }
                *report.failures.entry(err.kind().to_string()).or_default() += 1;
            }
        }
    }

    Ok(report)
}

/// Run the pipeline against an initialised database file
pub fn run_pipeline(db_path: &Path, config: &BillingConfig, options: &PipelineOptions) -> Result<PipelineReport> {
    let workers = options.workers.max(1);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    // Per-worker interval so the lanes together hit the target rate
    let pacing = if options.target_rate > 0 {
        Some(Duration::from_secs_f64(workers as f64 / options.target_rate as f64))
    } else {
        None
    };

    info!(
        total = options.total_scans,
        workers,
        rate = options.target_rate,
        "starting ingestion pipeline"
    );

    let started = Instant::now();
    let results: Vec<Result<PipelineReport>> = thread::scope(|s| {
        let handles: Vec<_> = shares(options.total_scans, workers)
            .into_iter()
            .enumerate()
            .map(|(worker, scans)| {
                let clock = clock.clone();
                s.spawn(move || run_worker(worker, db_path, config, clock, scans, pacing, options.seed))
            })
            .collect();

        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("pipeline worker panicked")),
            })
            .collect()
    });

    let mut report = PipelineReport::default();
    for result in results {
        report.merge(result?);
    }
    report.elapsed = started.elapsed();

    info!(
        processed = report.processed,
        charged = report.charged,
        no_account = report.no_account,
        failed = report.failed(),
        "ingestion pipeline finished"
    );

    Ok(report)
}
