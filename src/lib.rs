//! Shared configuration reconciliation and lifecycle convergence.
//!
//! Remote instances, volumes and server settings keep their configuration in
//! a single string map that several declarative owners write in parts. The
//! crate computes what one owner may write ([`reconcile()`]), what it should
//! reflect back ([`project()`]), how name-keyed sub-resources change
//! ([`alias::diff`]), and how to wait for an instance to reach a lifecycle
//! state ([`LifecycleOrchestrator`]). Transport lives behind the traits in
//! [`remote`].

pub mod alias;
pub mod classify;
pub mod config_map;
pub mod lifecycle;
pub mod reconcile;
pub mod remote;
pub mod settings;
pub mod sync;
pub mod test_support;

pub use alias::{
    AliasApplySummary, AliasDiff, AliasError, ImageAlias, NamedEntity, apply_alias_diff,
    retain_visible_aliases,
};
pub use classify::{
    Classification, ClassificationError, KeyClassifier, KeyRule, ResourceKind,
    inherited_volume_rules,
};
pub use config_map::{DeclaredConfigMap, DeclaredValue, OwnedKeySet, RemoteConfigMap};
pub use lifecycle::{
    InstanceKind, InstanceState, LifecycleError, LifecycleOrchestrator, PollOutcome,
    StartOutcome, StopOutcome, TargetError, WaitError, WaitPolicy, WaitTarget, Waiter,
};
pub use reconcile::{ConfigDelta, Reconciliation, project, project_with_drift, reconcile};
pub use remote::{
    AliasRemote, ConfigRemote, InstanceRemote, OperationHandle, OperationRemote, PoolRemote,
    RemoteError, RemoteFuture, VersionToken,
};
pub use settings::{SettingsError, WaitSettings};
pub use sync::{ConfigSync, Reflection, SyncError, SyncReport};
