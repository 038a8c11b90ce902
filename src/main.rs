//! # beacon-collector
//!
//! Passive BLE beacon collector.
//!
//! Scans for advertising devices, smooths each device's RSSI with its own
//! Kalman filter, estimates distance, classifies vendor and device type,
//! drops noisy device classes (phones, laptops), and ships one JSON snapshot
//! per cycle to a collector endpoint.  Delivery failures are retried a few
//! times and then given up on; the loop itself never stops until Ctrl-C.
//!
//! ## Requirements
//!
//! | Platform | Prerequisites |
//! |----------|---------------|
//! | Linux    | BlueZ running, user allowed on the system D-Bus (or root). |
//! | macOS    | Bluetooth permission granted to the terminal. |
//! | Windows  | Windows 10+ with a BLE-capable adapter. |
//!
//! ## Examples
//!
//! ```text
//! cargo run -- --endpoint http://collector.local:8080/ingest
//! cargo run -- --distance-model piecewise --deny-vendor Apple --deny-vendor Microsoft
//! RUST_LOG=debug cargo run            # no endpoint: snapshots go to stdout
//! ```

mod classify;
mod delivery;
mod distance;
mod error;
mod platform;
mod registry;
mod scanner;
mod scheduler;
mod smoothing;
mod snapshot;
mod vendors;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::delivery::{ConsoleTransport, DeliveryClient, DeliveryConfig, HttpTransport, Transport};
use crate::distance::ModelKind;
use crate::registry::{DeviceRegistry, RegistryConfig};
use crate::scanner::{BleScanner, ScanConfig};
use crate::scheduler::{ScanScheduler, SchedulerConfig};
use crate::smoothing::SmootherConfig;
use crate::snapshot::{ExclusionPolicy, SnapshotAssembler};

#[derive(Parser)]
#[command(name = "beacon-collector")]
#[command(version, about = "Passive BLE beacon scanner with RSSI smoothing and snapshot delivery")]
struct Cli {
    /// Seconds each scan pass listens.
    #[arg(long, default_value_t = 2)]
    scan_duration: u64,

    /// Scan passes per cycle.  Sightings from all passes are merged.
    #[arg(long, default_value_t = 3)]
    scan_retries: u32,

    /// Hard limit in seconds on a single scan pass.
    #[arg(long, default_value_t = 10)]
    scan_timeout: u64,

    /// Seconds to sleep between cycles.
    #[arg(short, long, default_value_t = 5)]
    interval: u64,

    /// Assumed RSSI at 1 m reference distance (dBm).
    #[arg(short = 'p', long, default_value_t = distance::DEFAULT_TX_POWER, allow_hyphen_values = true)]
    tx_power: f64,

    /// Path-loss exponent for the log-distance model (2.0 = free space).
    #[arg(short = 'n', long, default_value_t = distance::DEFAULT_PATH_LOSS_EXP)]
    path_loss_exp: f64,

    /// RSSI-to-distance model.
    #[arg(short = 'm', long, value_enum, default_value_t = ModelKind::LogDistance)]
    distance_model: ModelKind,

    /// Kalman process-noise variance.
    #[arg(long, default_value_t = SmootherConfig::default().process_noise)]
    process_noise: f64,

    /// Kalman measurement-noise variance.
    #[arg(long, default_value_t = SmootherConfig::default().measurement_noise)]
    measurement_noise: f64,

    /// Kalman error covariance after the first sample.
    #[arg(long, default_value_t = SmootherConfig::default().initial_error)]
    initial_error: f64,

    /// Vendor-name prefix to leave out of snapshots (repeatable).  Pass an
    /// empty string to report every vendor.
    #[arg(long = "deny-vendor", default_values = ["Apple", "HP"])]
    deny_vendors: Vec<String>,

    /// Advertised-name substring to leave out of snapshots (repeatable).
    #[arg(long = "deny-name")]
    deny_names: Vec<String>,

    /// Collector URL.  Snapshots are printed to stdout when omitted.
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Delivery attempts per snapshot.
    #[arg(long, default_value_t = 3)]
    delivery_retries: u32,

    /// Seconds between delivery attempts.
    #[arg(long, default_value_t = 5)]
    delivery_delay: u64,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    http_timeout: u64,

    /// Forget devices not seen for this many seconds (0 = never).
    #[arg(short = 't', long, default_value_t = 300)]
    ttl_secs: u64,

    /// Do not print the per-cycle device table.
    #[arg(short, long)]
    quiet: bool,
}

fn non_empty(values: Vec<String>) -> Vec<String> {
    values.into_iter().filter(|v| !v.is_empty()).collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    // ── Collaborators ───────────────────────────────────────────────────
    let scan_cfg = ScanConfig {
        duration: Duration::from_secs(cli.scan_duration),
        passes: cli.scan_retries,
        timeout: Duration::from_secs(cli.scan_timeout),
    };

    let scanner = match BleScanner::new(scan_cfg.timeout) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to open Bluetooth adapter: {e}");
            log::error!(
                "Make sure Bluetooth is enabled and this process may access it."
            );
            std::process::exit(1);
        }
    };

    let transport: Box<dyn Transport> = match &cli.endpoint {
        Some(url) => match HttpTransport::new(url.as_str(), Duration::from_secs(cli.http_timeout)) {
            Ok(t) => {
                log::info!("Delivering snapshots to {url}");
                Box::new(t)
            }
            Err(e) => {
                log::error!("Unusable collector endpoint: {e}");
                std::process::exit(1);
            }
        },
        None => {
            log::info!("No endpoint configured; printing snapshots to stdout");
            Box::new(ConsoleTransport)
        }
    };

    let model = distance::build_model(cli.distance_model, cli.tx_power, cli.path_loss_exp);
    let registry = DeviceRegistry::new(
        RegistryConfig {
            smoother: SmootherConfig {
                process_noise: cli.process_noise,
                measurement_noise: cli.measurement_noise,
                initial_error: cli.initial_error,
            },
            ttl: Duration::from_secs(cli.ttl_secs),
        },
        model,
    );

    let policy = ExclusionPolicy {
        deny_vendors: non_empty(cli.deny_vendors),
        deny_names: non_empty(cli.deny_names),
    };
    log::info!(
        "Excluding vendors {:?}, names containing {:?}",
        policy.deny_vendors,
        policy.deny_names
    );

    let delivery = DeliveryClient::new(
        transport,
        DeliveryConfig {
            attempts: cli.delivery_retries,
            retry_delay: Duration::from_secs(cli.delivery_delay),
        },
    );

    let mut scheduler = ScanScheduler::new(
        SchedulerConfig {
            scan: scan_cfg,
            interval: Duration::from_secs(cli.interval),
            print_summary: !cli.quiet,
        },
        Box::new(scanner),
        platform::create_host_info(),
        registry,
        SnapshotAssembler::new(policy),
        delivery,
    );

    // ── Ctrl-C handler ──────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            log::info!("Interrupt received, finishing current cycle …");
            running.store(false, Ordering::Relaxed);
        })
        .expect("Failed to set Ctrl-C handler");
    }

    // ── Scan loop ───────────────────────────────────────────────────────
    scheduler.run(&running);
    log::info!("Done.");
}
