pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod reconcile;
pub mod secret;

pub use config::{DatasetEntry, DesiredState, Timeouts, UnlockConfig};
pub use error::{UnlockError, UnlockResult};
pub use provider::{ApplianceProvider, DatasetState, LockState, ObservedState};
pub use reconcile::{reconcile, DatasetStatus, ReconcileReport, Reconciler, UnlockFailure};
pub use secret::SecretsMode;
