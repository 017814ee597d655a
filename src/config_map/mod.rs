//! Configuration map types shared by the reconciler and the projector.
//!
//! The remote server stores one flat `key → value` document per resource.
//! Locally, a declaration distinguishes three states for every key: not
//! declared at all, declared without a value, and declared with a value
//! (which may be the empty string). Keeping that distinction explicit is what
//! lets an empty string act as a reset signal without being confused with
//! "leave this key alone".

use std::collections::{BTreeMap, BTreeSet};

/// Configuration document as stored on the remote server.
pub type RemoteConfigMap = BTreeMap<String, String>;

/// Keys a declarative resource wrote on its previous pass.
pub type OwnedKeySet = BTreeSet<String>;

/// Value of a single declared configuration key.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum DeclaredValue {
    /// The key is not part of the declaration.
    #[default]
    Absent,
    /// The key is declared but carries no value (unknown or null).
    Null,
    /// The key is declared with a concrete value, possibly empty.
    Value(String),
}

impl DeclaredValue {
    /// Returns the concrete value when one is present.
    #[must_use]
    pub fn as_value(&self) -> Option<&str> {
        match self {
            Self::Value(value) => Some(value.as_str()),
            Self::Absent | Self::Null => None,
        }
    }

    /// Returns true when the key carries a concrete value, including `""`.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl From<Option<String>> for DeclaredValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Value)
    }
}

impl From<&str> for DeclaredValue {
    fn from(value: &str) -> Self {
        Self::Value(value.to_owned())
    }
}

/// Locally declared configuration with tri-state values.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeclaredConfigMap {
    entries: BTreeMap<String, DeclaredValue>,
}

impl DeclaredConfigMap {
    /// Creates an empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `key` with the given value. Inserting [`DeclaredValue::Absent`]
    /// removes the key instead.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DeclaredValue>) {
        let name = key.into();
        match value.into() {
            DeclaredValue::Absent => {
                self.entries.remove(&name);
            }
            present => {
                self.entries.insert(name, present);
            }
        }
    }

    /// Builder-style variant of [`Self::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DeclaredValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the declared state of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> &DeclaredValue {
        self.entries.get(key).unwrap_or(&DeclaredValue::Absent)
    }

    /// Returns true when `key` carries a concrete value.
    #[must_use]
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key).is_present()
    }

    /// Iterates over declared keys in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeclaredValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Iterates over keys that carry a concrete value.
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.as_value().map(|text| (key.as_str(), text)))
    }

    /// Number of declared keys, including those without a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derives the ownership baseline from this declaration: every key with
    /// a concrete value.
    #[must_use]
    pub fn owned_keys(&self) -> OwnedKeySet {
        self.present().map(|(key, _)| key.to_owned()).collect()
    }
}

impl<K, V> FromIterator<(K, V)> for DeclaredConfigMap
where
    K: Into<String>,
    V: Into<DeclaredValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl From<&RemoteConfigMap> for DeclaredConfigMap {
    fn from(value: &RemoteConfigMap) -> Self {
        value
            .iter()
            .map(|(key, text)| (key.clone(), DeclaredValue::Value(text.clone())))
            .collect()
    }
}
