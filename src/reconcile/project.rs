//! Projection of the remote document back into declared state.

use crate::classify::KeyClassifier;
use crate::config_map::{DeclaredConfigMap, DeclaredValue, RemoteConfigMap};

/// Which remote keys a projection may surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scope {
    Declared,
    WithDrift,
}

/// Computes the declared state that mirrors `remote` for the keys in
/// `declared`.
///
/// Keys declared without a value stay [`DeclaredValue::Null`]. Keys with a
/// value take the remote value, including the empty string, or are dropped
/// when the server no longer has them. Keys covered by a static platform
/// rule are only carried when the declaration already had them, and then
/// keep their declared value. Keys only present remotely are never added.
#[must_use]
pub fn project(
    remote: &RemoteConfigMap,
    declared: &DeclaredConfigMap,
    classifier: &KeyClassifier,
) -> DeclaredConfigMap {
    project_scoped(remote, declared, classifier, Scope::Declared)
}

/// Like [`project`], but also surfaces manageable remote keys that are not
/// declared, so out-of-band additions show up as drift. Undeclared keys
/// matched by any rule, inherited ones included, stay hidden. Used for
/// resources whose whole document belongs to a single declaration.
#[must_use]
pub fn project_with_drift(
    remote: &RemoteConfigMap,
    declared: &DeclaredConfigMap,
    classifier: &KeyClassifier,
) -> DeclaredConfigMap {
    project_scoped(remote, declared, classifier, Scope::WithDrift)
}

fn project_scoped(
    remote: &RemoteConfigMap,
    declared: &DeclaredConfigMap,
    classifier: &KeyClassifier,
    scope: Scope,
) -> DeclaredConfigMap {
    let mut projected = DeclaredConfigMap::new();
    for (key, value) in declared.iter() {
        match value {
            DeclaredValue::Absent => {}
            DeclaredValue::Null => projected.insert(key, DeclaredValue::Null),
            DeclaredValue::Value(_) if classifier.is_computed(key) => {
                projected.insert(key, value.clone());
            }
            DeclaredValue::Value(_) => {
                if let Some(current) = remote.get(key) {
                    projected.insert(key, DeclaredValue::Value(current.clone()));
                }
            }
        }
    }

    if scope == Scope::WithDrift {
        for (key, current) in remote {
            if declared.get(key) == &DeclaredValue::Absent && !classifier.is_platform(key) {
                projected.insert(key.clone(), DeclaredValue::Value(current.clone()));
            }
        }
    }

    projected
}
