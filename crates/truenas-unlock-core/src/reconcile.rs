//! Reconciliation of the declared dataset mapping against appliance state.

use crate::config::{DesiredState, UnlockConfig};
use crate::error::{UnlockError, UnlockResult};
use crate::provider::{ApplianceProvider, DatasetState, LockState};
use crate::secret::SecretsMode;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A dataset that was eligible for unlock but could not be unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockFailure {
    pub dataset: String,
    pub code: &'static str,
    pub message: String,
}

impl UnlockFailure {
    fn new(dataset: &str, err: &UnlockError) -> Self {
        Self {
            dataset: dataset.to_string(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dry_run: bool,
    /// Datasets unlocked (or, in dry-run mode, that would be), in mapping order.
    pub unlocked: Vec<String>,
    /// Managed datasets the appliance already reports as unlocked.
    pub already_unlocked: Vec<String>,
    /// Managed datasets the appliance did not report at all.
    pub missing: Vec<String>,
    pub failures: Vec<UnlockFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Unlock every dataset that is both declared in `desired` and reported
/// locked in `observed`.
///
/// Targets are visited in `desired` order. A failure on one dataset is
/// logged and recorded, then the next dataset is attempted. With `dry_run`
/// the provider is never asked to unlock anything.
pub fn reconcile<P: ApplianceProvider>(
    desired: &DesiredState,
    observed: &[DatasetState],
    secrets: SecretsMode,
    provider: &P,
    dry_run: bool,
) -> ReconcileReport {
    let mut states: HashMap<&str, LockState> = HashMap::with_capacity(observed.len());
    for dataset in observed {
        let state = states.entry(dataset.name.as_str()).or_insert(dataset.state);
        if dataset.is_locked() {
            *state = LockState::Locked;
        }
    }

    let mut report = ReconcileReport {
        dry_run,
        ..ReconcileReport::default()
    };

    for entry in desired.iter() {
        match states.get(entry.path.as_str()) {
            None => {
                debug!("{} not reported by appliance; skipping", entry.path);
                report.missing.push(entry.path.clone());
            }
            Some(LockState::Unlocked) => {
                info!("{} already unlocked", entry.path);
                report.already_unlocked.push(entry.path.clone());
            }
            Some(LockState::Locked) if dry_run => match entry.passphrase(secrets) {
                Ok(_) => {
                    info!("dry run: would unlock {}", entry.path);
                    report.unlocked.push(entry.path.clone());
                }
                Err(err) => {
                    warn!("dry run: {} has no usable secret: {err}", entry.path);
                    report.failures.push(UnlockFailure::new(&entry.path, &err));
                }
            },
            Some(LockState::Locked) => {
                info!("{} locked, unlocking", entry.path);
                let attempt = entry
                    .passphrase(secrets)
                    .and_then(|passphrase| provider.unlock_dataset(&entry.path, &passphrase));
                match attempt {
                    Ok(()) => {
                        info!("unlocked {}", entry.path);
                        report.unlocked.push(entry.path.clone());
                    }
                    Err(err) => {
                        warn!("unlock failed for {}: {err}", entry.path);
                        report.failures.push(UnlockFailure::new(&entry.path, &err));
                    }
                }
            }
        }
    }

    if log::log_enabled!(log::Level::Debug) {
        let managed: HashSet<&str> = desired.iter().map(|entry| entry.path.as_str()).collect();
        let ignored = observed
            .iter()
            .filter(|ds| ds.is_locked() && !managed.contains(ds.name.as_str()))
            .count();
        if ignored > 0 {
            debug!("ignoring {ignored} locked dataset(s) not declared in config");
        }
    }

    report
}

/// Observed lock state of one managed dataset; `None` when the appliance
/// does not report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStatus {
    pub dataset: String,
    pub state: Option<LockState>,
}

/// Binds the run configuration to a provider and drives single ticks.
pub struct Reconciler<P: ApplianceProvider> {
    config: Arc<UnlockConfig>,
    provider: P,
}

impl<P: ApplianceProvider> Reconciler<P> {
    pub fn new(config: Arc<UnlockConfig>, provider: P) -> Self {
        Self { config, provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Poll the appliance once and reconcile. Listing failures abort the
    /// tick; per-dataset failures are carried in the report.
    pub fn tick(&self, dry_run: bool) -> UnlockResult<ReconcileReport> {
        let observed = self.provider.list_datasets()?;
        debug!("appliance reported {} dataset(s)", observed.len());
        Ok(reconcile(
            &self.config.datasets,
            &observed,
            self.config.secrets,
            &self.provider,
            dry_run,
        ))
    }

    /// Current lock state of every managed dataset, in mapping order.
    pub fn status(&self) -> UnlockResult<Vec<DatasetStatus>> {
        let observed = self.provider.list_datasets()?;
        Ok(self
            .config
            .datasets
            .iter()
            .map(|entry| DatasetStatus {
                dataset: entry.path.clone(),
                state: observed
                    .iter()
                    .filter(|ds| ds.name == entry.path)
                    .map(|ds| ds.state)
                    .reduce(|acc, state| {
                        if state == LockState::Locked {
                            state
                        } else {
                            acc
                        }
                    }),
            })
            .collect())
    }
}
