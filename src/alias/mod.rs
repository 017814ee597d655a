//! Convergence of name-keyed sub-resources such as image aliases.
//!
//! Entities are identified by name alone. A renamed entity is a removal of
//! the old name plus an addition of the new one; attribute changes on a kept
//! name are left to the caller.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use crate::remote::{AliasRemote, RemoteError};

/// An entity identified by a unique name within its parent collection.
pub trait NamedEntity {
    /// Unique name of the entity.
    fn name(&self) -> &str;
}

/// Alias pointing at a cached image.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageAlias {
    /// Alias name.
    pub name: String,
    /// Free-form description.
    pub description: String,
}

impl ImageAlias {
    /// Creates an alias with an empty description.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = value.into();
        self
    }
}

impl NamedEntity for ImageAlias {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Result of diffing two entity sets by name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AliasDiff<T> {
    /// Entities whose name only appears in the new set.
    pub added: Vec<T>,
    /// Entities whose name only appears in the old set.
    pub removed: Vec<T>,
    /// Names present in both sets.
    pub unchanged: BTreeSet<String>,
}

impl<T> AliasDiff<T> {
    /// Returns true when neither additions nor removals are needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diffs `old` against `new` by name. Output lists are sorted by name; when a
/// set repeats a name, the last occurrence wins.
#[must_use]
pub fn diff<T>(old: &[T], new: &[T]) -> AliasDiff<T>
where
    T: NamedEntity + Clone,
{
    let old_by_name = by_name(old);
    let new_by_name = by_name(new);

    let added = new_by_name
        .iter()
        .filter(|(name, _)| !old_by_name.contains_key(*name))
        .map(|(_, entity)| (*entity).clone())
        .collect();
    let removed = old_by_name
        .iter()
        .filter(|(name, _)| !new_by_name.contains_key(*name))
        .map(|(_, entity)| (*entity).clone())
        .collect();
    let unchanged = new_by_name
        .keys()
        .filter(|name| old_by_name.contains_key(*name))
        .map(|name| (*name).to_owned())
        .collect();

    AliasDiff {
        added,
        removed,
        unchanged,
    }
}

fn by_name<T: NamedEntity>(entities: &[T]) -> BTreeMap<&str, &T> {
    entities
        .iter()
        .map(|entity| (entity.name(), entity))
        .collect()
}

/// Errors raised while applying an alias diff.
#[derive(Debug, Error)]
pub enum AliasError {
    /// Raised when an alias to add already exists on the server.
    #[error("alias {name:?} already exists")]
    Collision {
        /// Colliding alias name.
        name: String,
    },
    /// Raised when the server rejects a lookup, deletion or creation.
    #[error("failed to {action} alias {name:?}: {source}")]
    Remote {
        /// Operation being performed.
        action: &'static str,
        /// Alias name.
        name: String,
        /// Underlying collaborator error.
        #[source]
        source: RemoteError,
    },
}

/// Counts of mutations performed by [`apply_alias_diff`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AliasApplySummary {
    /// Aliases deleted.
    pub removed: usize,
    /// Aliases created.
    pub added: usize,
}

/// Applies `changes` for the image identified by `target`.
///
/// Every added name is checked for an existing remote alias before anything
/// is mutated. Removals run before additions. A failed creation aborts the
/// remaining additions; removals already applied are kept.
///
/// # Errors
///
/// Returns [`AliasError::Collision`] for the first added name that already
/// exists, or [`AliasError::Remote`] when the server rejects a call.
pub async fn apply_alias_diff<R>(
    remote: &R,
    target: &str,
    changes: &AliasDiff<ImageAlias>,
) -> Result<AliasApplySummary, AliasError>
where
    R: AliasRemote + ?Sized,
{
    for alias in &changes.added {
        let exists = remote
            .alias_exists(&alias.name)
            .await
            .map_err(|source| AliasError::Remote {
                action: "look up",
                name: alias.name.clone(),
                source,
            })?;
        if exists {
            return Err(AliasError::Collision {
                name: alias.name.clone(),
            });
        }
    }

    let mut summary = AliasApplySummary::default();
    for alias in &changes.removed {
        remote
            .delete_alias(&alias.name)
            .await
            .map_err(|source| AliasError::Remote {
                action: "delete",
                name: alias.name.clone(),
                source,
            })?;
        debug!(alias = %alias.name, "removed image alias");
        summary.removed += 1;
    }

    for alias in &changes.added {
        remote
            .create_alias(target, alias)
            .await
            .map_err(|source| AliasError::Remote {
                action: "create",
                name: alias.name.clone(),
                source,
            })?;
        debug!(alias = %alias.name, target, "created image alias");
        summary.added += 1;
    }

    Ok(summary)
}

/// Filters the aliases reported by the server down to those the declaration
/// should see: aliases it declares, plus any that were not copied over from
/// the source image.
#[must_use]
pub fn retain_visible_aliases(
    remote_aliases: &[ImageAlias],
    declared: &[ImageAlias],
    copied: &BTreeSet<String>,
) -> Vec<ImageAlias> {
    let declared_names = declared
        .iter()
        .map(NamedEntity::name)
        .collect::<BTreeSet<_>>();
    remote_aliases
        .iter()
        .filter(|alias| declared_names.contains(alias.name()) || !copied.contains(alias.name()))
        .cloned()
        .collect()
}
