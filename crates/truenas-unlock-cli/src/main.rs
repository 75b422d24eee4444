//! truenas-unlock: unlock encrypted ZFS datasets on a TrueNAS appliance.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use truenas_unlock_api::TrueNasProvider;
use truenas_unlock_core::logging::{self, LogFormat};
use truenas_unlock_core::{
    config::EXAMPLE_CONFIG, DatasetStatus, LockState, ReconcileReport, Reconciler, UnlockConfig,
    UnlockError,
};

mod daemon;

/// Command-line options.
#[derive(Parser, Debug)]
#[command(
    name = "truenas-unlock",
    version,
    about = "Unlock encrypted ZFS datasets on TrueNAS."
)]
struct Cli {
    /// Config file path; searched in the standard locations when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show what would be unlocked without unlocking anything.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Keep running and reconcile every `--interval` seconds.
    #[arg(short, long)]
    daemon: bool,

    /// Seconds between runs in daemon mode.
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Print the lock state of every configured dataset and exit.
    #[arg(long, conflicts_with_all = ["daemon", "dry_run"])]
    status: bool,

    /// Validate the configuration file and exit.
    #[arg(long, conflicts_with_all = ["daemon", "status"])]
    check: bool,

    /// Print the configuration JSON schema and exit.
    #[arg(long)]
    schema: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.daemon {
        LogFormat::Json
    } else {
        LogFormat::Plain
    };
    logging::init("info", format);

    if cli.schema {
        println!("{}", to_string_pretty(&schema_for!(UnlockConfig))?);
        return Ok(());
    }

    let config = Arc::new(load_config(cli.config.as_deref())?);
    info!("using config {}", config.path.display());

    if cli.check {
        println!(
            "{} is valid ({} dataset(s) managed)",
            config.path.display(),
            config.datasets.len()
        );
        return Ok(());
    }

    let provider = TrueNasProvider::from_config(&config).context("initialise TrueNAS client")?;
    info!("appliance api at {}", provider.base_url());
    let reconciler = Arc::new(Reconciler::new(config.clone(), provider));

    if cli.status {
        let status = reconciler.status().context("query dataset status")?;
        print_status_table(&status);
        return Ok(());
    }

    if cli.daemon {
        return daemon::run(reconciler, cli.dry_run, Duration::from_secs(cli.interval));
    }

    let report = run_tick(&reconciler, cli.dry_run)?;
    print_report(&report);
    if !report.is_clean() {
        bail!("{} dataset(s) failed to unlock", report.failures.len());
    }
    Ok(())
}

/// Load the config from `path`, or from the standard search locations.
/// A missing config prints an example to stderr.
fn load_config(path: Option<&Path>) -> Result<UnlockConfig> {
    let loaded = match path {
        Some(path) if !path.exists() => Err(UnlockError::ConfigNotFound {
            searched: vec![path.to_path_buf()],
        }),
        Some(path) => UnlockConfig::load(path),
        None => UnlockConfig::discover(),
    };

    match loaded {
        Ok(config) => Ok(config),
        Err(err @ UnlockError::ConfigNotFound { .. }) => {
            eprintln!("Config not found.\n\nCreate ~/.config/truenas-unlock/config.yaml:\n");
            eprintln!("{EXAMPLE_CONFIG}");
            Err(err.into())
        }
        Err(err) => Err(anyhow::Error::new(err).context("failed to load configuration")),
    }
}

/// One reconciliation pass. A listing failure is an error; per-dataset
/// failures are only logged and left in the report.
pub(crate) fn run_tick(
    reconciler: &Reconciler<TrueNasProvider>,
    dry_run: bool,
) -> Result<ReconcileReport> {
    let report = reconciler
        .tick(dry_run)
        .context("list datasets from appliance")?;
    for failure in &report.failures {
        warn!("[{}] {} still locked", failure.code, failure.dataset);
    }
    Ok(report)
}

fn print_report(report: &ReconcileReport) {
    if report.dry_run {
        println!("Dry run:");
        for dataset in &report.unlocked {
            println!("  • would unlock {dataset}");
        }
    } else {
        for dataset in &report.unlocked {
            println!("→ Unlocked {dataset}");
        }
    }
    for dataset in &report.already_unlocked {
        println!("✓ {dataset}");
    }
    for dataset in &report.missing {
        println!("? {dataset} not found on appliance");
    }
    for failure in &report.failures {
        println!("✗ {}: {}", failure.dataset, failure.message);
    }
}

fn print_status_table(status: &[DatasetStatus]) {
    println!("{:<40} STATUS", "DATASET");
    for entry in status {
        let state = match entry.state {
            Some(LockState::Locked) => "locked",
            Some(LockState::Unlocked) => "unlocked",
            None => "not found",
        };
        println!("{:<40} {}", entry.dataset, state);
    }
}
