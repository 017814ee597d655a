//! Reconciliation of a partially owned configuration document.
//!
//! [`reconcile`] computes the full document to send to the server: foreign
//! and platform keys pass through untouched, declared keys are written, and
//! keys owned on the previous pass but no longer declared are reset to the
//! empty string, which the server reads as "delete". [`project`] goes the
//! other way and decides which remote values are reflected into local state.

mod project;

use std::collections::BTreeSet;

use crate::classify::KeyClassifier;
use crate::config_map::{DeclaredConfigMap, OwnedKeySet, RemoteConfigMap};

pub use project::{project, project_with_drift};

/// Result of a reconciliation pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reconciliation {
    /// Complete document to write; the server replaces its copy atomically.
    pub outbound: RemoteConfigMap,
    /// Ownership baseline for the next pass.
    pub new_owned: OwnedKeySet,
    /// Keys whose outbound value differs from the remote document.
    pub delta: ConfigDelta,
}

impl Reconciliation {
    /// Returns true when writing `outbound` would not change the server.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.delta.is_empty()
    }
}

/// Per-key summary of what a reconciliation changes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigDelta {
    /// Keys absent remotely that the write adds.
    pub added: BTreeSet<String>,
    /// Keys present remotely whose value the write changes.
    pub updated: BTreeSet<String>,
    /// Owned keys reset to the empty string.
    pub reset: BTreeSet<String>,
}

impl ConfigDelta {
    /// Returns true when nothing changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.reset.is_empty()
    }

    /// Total number of changed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.reset.len()
    }
}

/// Computes the outbound document and the next ownership set.
///
/// `previous_owned` is empty on first creation, in which case nothing is
/// reset. Keys covered by the classifier's static rules are never written,
/// never reset and never owned, even when declared. Inherited keys only
/// matter for keys the declaration leaves alone, which pass through anyway.
#[must_use]
pub fn reconcile(
    remote: &RemoteConfigMap,
    previous_owned: &OwnedKeySet,
    desired: &DeclaredConfigMap,
    classifier: &KeyClassifier,
) -> Reconciliation {
    let mut outbound = remote.clone();
    let mut delta = ConfigDelta::default();
    let mut new_owned = OwnedKeySet::new();

    for (key, value) in desired.present() {
        if classifier.is_computed(key) {
            continue;
        }
        new_owned.insert(key.to_owned());
        match remote.get(key) {
            Some(current) if current == value => {}
            Some(_) => {
                delta.updated.insert(key.to_owned());
            }
            None => {
                delta.added.insert(key.to_owned());
            }
        }
        outbound.insert(key.to_owned(), value.to_owned());
    }

    for key in previous_owned {
        if desired.has_value(key) || classifier.is_computed(key) {
            continue;
        }
        // Resetting a key that is already empty or missing changes nothing.
        if remote.get(key).is_some_and(|current| !current.is_empty()) {
            delta.reset.insert(key.clone());
        }
        outbound.insert(key.clone(), String::new());
    }

    Reconciliation {
        outbound,
        new_owned,
        delta,
    }
}
