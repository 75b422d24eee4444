//! Fixed-interval driver for daemon mode. Owns timing and signal handling;
//! each tick runs the blocking reconciler on tokio's blocking pool.

use crate::run_tick;
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::future::{pending, Future};
use std::sync::Arc;
use tokio::task::JoinError;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio::{select, signal};
use truenas_unlock_api::TrueNasProvider;
use truenas_unlock_core::{ReconcileReport, Reconciler};

/// Reconcile every `every` until SIGINT or SIGTERM. Tick errors are logged
/// and never end the loop.
pub fn run(
    reconciler: Arc<Reconciler<TrueNasProvider>>,
    dry_run: bool,
    every: Duration,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    info!("running every {}s", every.as_secs());
    let ticks = runtime.block_on(drive(every, shutdown_signal(), || {
        let reconciler = reconciler.clone();
        async move {
            let joined =
                tokio::task::spawn_blocking(move || run_tick(&reconciler, dry_run)).await;
            log_tick_outcome(joined);
        }
    }));

    // An abandoned tick may still be blocked on the appliance.
    runtime.shutdown_background();
    info!("stopped after {ticks} tick(s)");
    Ok(())
}

/// Log a finished tick. Returns `true` when the tick ran cleanly.
fn log_tick_outcome(joined: Result<Result<ReconcileReport>, JoinError>) -> bool {
    match joined {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            warn!("tick failed: {err:#}");
            false
        }
        Err(err) => {
            error!("tick task aborted: {err}");
            false
        }
    }
}

/// Run `tick` immediately and then once per `every` until `shutdown`
/// resolves. Shutdown during a tick abandons it. Returns the number of ticks
/// that ran to completion.
pub(crate) async fn drive<T, Fut, S>(every: Duration, shutdown: S, mut tick: T) -> u64
where
    T: FnMut() -> Fut,
    Fut: Future<Output = ()>,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut completed = 0;

    loop {
        select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        select! {
            _ = &mut shutdown => {
                info!("interrupted mid-tick; remaining unlocks abandoned");
                break;
            }
            _ = tick() => completed += 1,
        }
    }

    completed
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("unable to listen for ctrl-c: {err}");
            pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("unable to listen for SIGTERM: {err}");
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<()>();

    select! {
        _ = ctrl_c => info!("received interrupt"),
        _ = terminate => info!("received SIGTERM"),
    }
}
