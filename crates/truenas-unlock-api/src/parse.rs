//! Decoding of `pool/dataset` responses into observed dataset state.

use log::trace;
use serde::Deserialize;
use std::collections::HashSet;
use truenas_unlock_core::error::{UnlockError, UnlockResult};
use truenas_unlock_core::provider::{DatasetState, LockState, ObservedState};

/// The subset of a dataset record the reconciler cares about.
#[derive(Debug, Deserialize)]
struct DatasetRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    locked: Option<bool>,
    #[serde(default)]
    children: Vec<DatasetRecord>,
}

/// Parse a dataset listing, flattening nested `children`.
///
/// Records without a `locked` flag carry no lock state and are skipped. A
/// dataset reported more than once (top level and as a child) keeps its
/// first occurrence.
pub(crate) fn parse_dataset_list(body: &str) -> UnlockResult<ObservedState> {
    let records: Vec<DatasetRecord> = serde_json::from_str(body)
        .map_err(|err| UnlockError::Decode(format!("pool/dataset listing: {err}")))?;

    let mut seen = HashSet::new();
    let mut observed = Vec::new();
    let mut stack: Vec<DatasetRecord> = records.into_iter().rev().collect();
    while let Some(record) = stack.pop() {
        stack.extend(record.children.into_iter().rev());

        let Some(name) = record.name.or(record.id) else {
            trace!("skipping dataset record without a name");
            continue;
        };
        let Some(locked) = record.locked else {
            trace!("{name} reports no lock state");
            continue;
        };
        if !seen.insert(name.clone()) {
            continue;
        }

        let state = if locked {
            LockState::Locked
        } else {
            LockState::Unlocked
        };
        observed.push(DatasetState { name, state });
    }

    Ok(observed)
}
