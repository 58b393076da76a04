//! # Warden Binary
//!
//! Operator front-end of the safety-shutdown appliance: loads the TOML
//! configuration, builds the device fleet, starts the main controller and
//! runs until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Simulated devices driven by marker files
//! warden --config /etc/warden/warden.toml --simulate --sim-dir /tmp/warden-sim
//!
//! # Arm as soon as every poller is ready, log triggers as JSON lines
//! warden --config warden.toml -s --arm --trigger-log /var/log/warden/triggers.jsonl
//!
//! # Verbose JSON logs
//! warden --config warden.toml -s -v --json
//! ```

#![deny(warnings)]

mod sim;

use clap::Parser;
use sim::SimulatedItem;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use warden_common::config::{ConfigLoader, LogLevel, WardenConfig};
use warden_common::item::MonitoredItem;
use warden_common::mail::SimulatedMailSender;
use warden_common::store::InMemoryStatusStore;
use warden_common::trigger::{FanoutTrigger, JsonlShutdownTrigger, LogShutdownTrigger, ShutdownTrigger};
use warden_core::context::WardenContext;
use warden_core::controller::MainController;
use warden_core::devices::{DeviceProfile, FleetItems};

/// How long `--arm` waits for the fleet to become armable.
const ARM_WAIT: Duration = Duration::from_secs(60);
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TICK: Duration = Duration::from_millis(200);

/// Warden - supervisory safety-shutdown controller
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Watches devices and peers, fires the shutdown trigger when armed")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/warden/warden.toml")]
    config: PathBuf,

    /// Build simulated devices for every configured item id
    #[arg(short = 's', long)]
    simulate: bool,

    /// Directory holding the simulation marker files
    #[arg(long, value_name = "DIR", default_value = "/tmp/warden-sim")]
    sim_dir: PathBuf,

    /// Append fired shutdown triggers to this JSON lines file
    #[arg(long, value_name = "FILE")]
    trigger_log: Option<PathBuf>,

    /// Arm panic mode once every poller is ready
    #[arg(long)]
    arm: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Warden failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match WardenConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            setup_tracing(&args, LogLevel::Info);
            return Err(format!("{}: {}", args.config.display(), e).into());
        }
    };
    setup_tracing(&args, config.shared.log_level);
    config.validate()?;

    info!(
        service = %config.shared.service_name,
        "Warden v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = WardenContext::with_system_clock(
        Arc::new(InMemoryStatusStore::new()),
        build_trigger(&args)?,
        Arc::new(SimulatedMailSender::new()),
    );
    if !config.mail.simulate {
        warn!("SMTP delivery is not available in this build, mail is simulated");
    }

    let items = build_items(&args, &config)?;
    let controller = MainController::from_config(&config, ctx, items);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    if !controller.start()? {
        warn!("Not every poller started");
    }

    if args.arm {
        arm_when_ready(&controller, &running);
    }

    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(IDLE_TICK);
        if controller.is_unresponsive() {
            error!("Main controller loop unresponsive");
        }
        if last_report.elapsed() >= STATUS_LOG_INTERVAL {
            last_report = Instant::now();
            report(&controller);
        }
    }

    let stopped = controller.stop();
    report(&controller);
    match stopped {
        Ok(true) => info!("Warden shutdown complete"),
        Ok(false) => warn!("Warden stopped, not every poller was monitoring"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn build_trigger(args: &Args) -> Result<Arc<dyn ShutdownTrigger>, std::io::Error> {
    let log: Arc<dyn ShutdownTrigger> = Arc::new(LogShutdownTrigger);
    match &args.trigger_log {
        Some(path) => {
            let jsonl = JsonlShutdownTrigger::open(path)?;
            info!("Trigger log: {}", path.display());
            Ok(Arc::new(FanoutTrigger::new(vec![log, Arc::new(jsonl)])))
        }
        None => Ok(log),
    }
}

/// Simulated items for every configured id, or an empty fleet.
fn build_items(args: &Args, config: &WardenConfig) -> Result<FleetItems, std::io::Error> {
    let mut items = FleetItems::new();
    if !args.simulate {
        let configured: usize = config.pollers().iter().map(|(_, p)| p.items.len()).sum();
        if configured > 0 {
            warn!(configured, "No device drivers in this build, run with --simulate");
        }
        return Ok(items);
    }

    std::fs::create_dir_all(&args.sim_dir)?;
    info!("Simulation mode, markers in {}", args.sim_dir.display());
    for (profile, (section, poller)) in DeviceProfile::ALL.iter().zip(config.pollers()) {
        let family: Vec<Box<dyn MonitoredItem>> = poller
            .items
            .iter()
            .map(|id| {
                Box::new(SimulatedItem::new(id.as_str(), profile.device, &args.sim_dir))
                    as Box<dyn MonitoredItem>
            })
            .collect();
        debug!(poller = section, items = family.len(), "Simulated family");
        items.insert(profile.device, family);
    }
    Ok(items)
}

fn arm_when_ready(controller: &MainController, running: &AtomicBool) {
    let deadline = Instant::now() + ARM_WAIT;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        if controller.can_be_armed() {
            if controller.arm_panic_mode() {
                info!("Panic mode armed");
            } else {
                error!("Arming failed");
            }
            return;
        }
        std::thread::sleep(IDLE_TICK);
    }
    warn!("Fleet not ready within {:?}, staying unarmed", ARM_WAIT);
}

fn report(controller: &MainController) {
    info!(
        status = %controller.status(),
        has_shut_down = controller.has_shut_down(),
        mail = controller.mail_sending_possible(),
        "Controller status"
    );
    match serde_json::to_string(&controller.poller_views()) {
        Ok(rows) => debug!("Pollers: {}", rows),
        Err(e) => warn!("Failed to serialize poller views: {}", e),
    }
    if let Some(snapshot) = controller.countdown_snapshot() {
        debug!(?snapshot, "Countdown");
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG.to_string()
    } else {
        configured.as_directive().to_string()
    };

    let filter = match level.parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env().add_directive(Level::INFO.into()),
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
