use crate::error::UnlockResult;

/// Lock status reported by the appliance for an encrypted dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

/// One dataset as observed on the appliance at poll time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetState {
    pub name: String,
    pub state: LockState,
}

impl DatasetState {
    pub fn new(name: impl Into<String>, state: LockState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }
}

/// Snapshot of every dataset the appliance reported during one poll.
pub type ObservedState = Vec<DatasetState>;

/// Abstraction over the appliance management API.
///
/// Both calls are plain request/response; implementations hold no state
/// between calls beyond connection setup, so the reconciler can be exercised
/// against an in-memory fake.
pub trait ApplianceProvider {
    /// List datasets together with their lock status.
    fn list_datasets(&self) -> UnlockResult<ObservedState>;

    /// Unlock `dataset` with the given passphrase.
    fn unlock_dataset(&self, dataset: &str, passphrase: &str) -> UnlockResult<()>;
}
