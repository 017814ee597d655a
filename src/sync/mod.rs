//! Read, reconcile, write and reflect a resource configuration.
//!
//! One pass reads the remote document with its version token, reconciles it
//! against the declaration, writes the whole document back with the token,
//! reads it again and projects the result into declared state. The caller
//! must hold whatever lock serialises writers of the same resource for the
//! whole pass; a stale token surfaces as [`SyncError::Conflict`] and is never
//! retried here.

use thiserror::Error;
use tracing::debug;

use crate::classify::{ClassificationError, KeyClassifier, ResourceKind, inherited_volume_rules};
use crate::config_map::{DeclaredConfigMap, OwnedKeySet, RemoteConfigMap};
use crate::reconcile::{ConfigDelta, project, project_with_drift, reconcile};
use crate::remote::{ConfigRemote, PoolRemote, RemoteError, VersionToken};

/// How remote state is reflected back after a write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reflection {
    /// Only declared keys are reflected.
    Declared,
    /// Undeclared manageable keys are reflected as well.
    WithDrift,
}

/// Errors raised by a configuration pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Reading the resource configuration failed.
    #[error("failed to read configuration of {resource:?}: {source}")]
    Read {
        /// Resource identifier.
        resource: String,
        /// Collaborator error.
        #[source]
        source: RemoteError,
    },
    /// Reading the parent storage pool failed.
    #[error("failed to read storage pool {pool:?}: {source}")]
    Pool {
        /// Pool name.
        pool: String,
        /// Collaborator error.
        #[source]
        source: RemoteError,
    },
    /// The resource changed between read and write.
    #[error("configuration of {resource:?} was modified concurrently")]
    Conflict {
        /// Resource identifier.
        resource: String,
    },
    /// Writing the resource configuration failed.
    #[error("failed to write configuration of {resource:?}: {source}")]
    Write {
        /// Resource identifier.
        resource: String,
        /// Collaborator error.
        #[source]
        source: RemoteError,
    },
    /// Inherited pool keys produced an invalid rule.
    #[error(transparent)]
    Classification(#[from] ClassificationError),
}

/// Result of a configuration pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncReport {
    /// Keys added, updated or reset by the write.
    pub delta: ConfigDelta,
    /// Keys owned by the declaration after the pass.
    pub owned: OwnedKeySet,
    /// Declared state reflected from the server after the write.
    pub state: DeclaredConfigMap,
    /// Whether a write was sent.
    pub written: bool,
}

/// Configuration unit of work over a remote.
#[derive(Clone, Debug)]
pub struct ConfigSync<R> {
    remote: R,
}

impl<R> ConfigSync<R>
where
    R: ConfigRemote,
{
    /// Wraps a remote.
    #[must_use]
    pub const fn new(remote: R) -> Self {
        Self { remote }
    }

    /// Remote used for every call.
    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Applies server-wide settings. No key is platform-owned.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when a read or the write fails.
    pub async fn apply_server(
        &self,
        resource: &str,
        previous_owned: &OwnedKeySet,
        desired: &DeclaredConfigMap,
    ) -> Result<SyncReport, SyncError> {
        self.apply(
            resource,
            previous_owned,
            desired,
            &KeyClassifier::for_kind(ResourceKind::Server),
            Reflection::Declared,
        )
        .await
    }

    /// Applies an instance configuration, reflecting drift on manageable
    /// keys.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when a read or the write fails.
    pub async fn apply_instance(
        &self,
        instance: &str,
        previous_owned: &OwnedKeySet,
        desired: &DeclaredConfigMap,
    ) -> Result<SyncReport, SyncError> {
        self.apply(
            instance,
            previous_owned,
            desired,
            &KeyClassifier::for_kind(ResourceKind::Instance),
            Reflection::WithDrift,
        )
        .await
    }

    /// Runs one pass with an explicit classifier.
    ///
    /// A pass whose delta is empty sends no write.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Conflict`] when the version token went stale,
    /// or another [`SyncError`] when a read or the write fails.
    pub async fn apply(
        &self,
        resource: &str,
        previous_owned: &OwnedKeySet,
        desired: &DeclaredConfigMap,
        classifier: &KeyClassifier,
        reflection: Reflection,
    ) -> Result<SyncReport, SyncError> {
        let (current, token) = self.read(resource).await?;
        let plan = reconcile(&current, previous_owned, desired, classifier);

        let written = !plan.is_noop();
        let reflected = if written {
            debug!(
                resource,
                added = plan.delta.added.len(),
                updated = plan.delta.updated.len(),
                reset = plan.delta.reset.len(),
                "writing configuration"
            );
            self.write(resource, &plan.outbound, &token).await?;
            self.read(resource).await?.0
        } else {
            debug!(resource, "configuration already converged");
            current
        };

        Ok(SyncReport {
            delta: plan.delta,
            owned: plan.new_owned,
            state: reflect(&reflected, desired, classifier, reflection),
            written,
        })
    }

    /// Reads the resource and projects it onto `declared` without writing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Read`] when the read fails.
    pub async fn refresh(
        &self,
        resource: &str,
        declared: &DeclaredConfigMap,
        classifier: &KeyClassifier,
        reflection: Reflection,
    ) -> Result<DeclaredConfigMap, SyncError> {
        let (current, _) = self.read(resource).await?;
        Ok(reflect(&current, declared, classifier, reflection))
    }

    async fn read(&self, resource: &str) -> Result<(RemoteConfigMap, VersionToken), SyncError> {
        self.remote
            .get_config(resource)
            .await
            .map_err(|source| SyncError::Read {
                resource: resource.to_owned(),
                source,
            })
    }

    async fn write(
        &self,
        resource: &str,
        config: &RemoteConfigMap,
        token: &VersionToken,
    ) -> Result<(), SyncError> {
        self.remote
            .put_config(resource, config, token)
            .await
            .map_err(|source| {
                if source.is_conflict() {
                    SyncError::Conflict {
                        resource: resource.to_owned(),
                    }
                } else {
                    SyncError::Write {
                        resource: resource.to_owned(),
                        source,
                    }
                }
            })
    }
}

impl<R> ConfigSync<R>
where
    R: ConfigRemote + PoolRemote,
{
    /// Applies a storage volume configuration. Keys the parent pool declares
    /// under `volume.` are read live on every pass. A declared inherited key
    /// is written and reflected from the server like any other; an
    /// undeclared one is never claimed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Pool`] when the pool cannot be read, or another
    /// [`SyncError`] when the volume pass fails.
    pub async fn apply_volume(
        &self,
        pool: &str,
        volume: &str,
        previous_owned: &OwnedKeySet,
        desired: &DeclaredConfigMap,
    ) -> Result<SyncReport, SyncError> {
        let classifier = self.volume_classifier(pool).await?;
        self.apply(
            volume,
            previous_owned,
            desired,
            &classifier,
            Reflection::Declared,
        )
        .await
    }

    /// Classifier for volumes of `pool`: the static volume rules plus the
    /// pool's inherited keys.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Pool`] when the pool cannot be read.
    pub async fn volume_classifier(&self, pool: &str) -> Result<KeyClassifier, SyncError> {
        let pool_config = self
            .remote
            .get_pool_config(pool)
            .await
            .map_err(|source| SyncError::Pool {
                pool: pool.to_owned(),
                source,
            })?;
        let inherited = inherited_volume_rules(&pool_config);
        debug!(pool, inherited = inherited.len(), "loaded inherited volume keys");
        Ok(KeyClassifier::for_kind(ResourceKind::StorageVolume).with_inherited(inherited)?)
    }
}

fn reflect(
    remote: &RemoteConfigMap,
    declared: &DeclaredConfigMap,
    classifier: &KeyClassifier,
    reflection: Reflection,
) -> DeclaredConfigMap {
    match reflection {
        Reflection::Declared => project(remote, declared, classifier),
        Reflection::WithDrift => project_with_drift(remote, declared, classifier),
    }
}
