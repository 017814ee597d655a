//! Classification of configuration keys into platform-owned and manageable.
//!
//! Every resource kind carries a fixed list of rules naming keys the server
//! computes for itself. Storage volumes add a second, live source: defaults
//! declared on the parent pool under `volume.` are inherited by each volume.
//! An inherited key is written when the volume declares it, but an
//! undeclared one is never claimed or reflected as drift. The two sources
//! stay separate and are composed per reconciliation pass.

use thiserror::Error;

use crate::config_map::RemoteConfigMap;

/// Prefix under which storage pools declare defaults inherited by volumes.
pub const POOL_VOLUME_PREFIX: &str = "volume.";

/// Outcome of classifying a single key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    /// The server owns the key; declarations never write or reflect it.
    Platform,
    /// The key may be owned by a declaration.
    Manageable,
}

/// A single classification rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyRule {
    /// Matches every key starting with the prefix.
    Prefix(String),
    /// Matches one key exactly.
    Exact(String),
}

impl KeyRule {
    /// Parses a rule from its textual form. Strings ending with `.` are
    /// prefixes; anything else names an exact key.
    ///
    /// # Errors
    ///
    /// Returns [`ClassificationError::EmptyRule`] for blank input.
    pub fn parse(rule: &str) -> Result<Self, ClassificationError> {
        let trimmed = rule.trim();
        if trimmed.is_empty() {
            return Err(ClassificationError::EmptyRule);
        }
        if trimmed.ends_with('.') {
            Ok(Self::Prefix(trimmed.to_owned()))
        } else {
            Ok(Self::Exact(trimmed.to_owned()))
        }
    }

    /// Returns true when `key` is covered by this rule.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Exact(exact) => key == exact,
        }
    }

    fn validate(&self) -> Result<(), ClassificationError> {
        let text = match self {
            Self::Prefix(text) | Self::Exact(text) => text,
        };
        if text.trim().is_empty() {
            return Err(ClassificationError::EmptyRule);
        }
        if text.trim() != text {
            return Err(ClassificationError::Whitespace {
                rule: text.clone(),
            });
        }
        Ok(())
    }
}

/// Errors raised when classification rules are malformed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClassificationError {
    /// Raised when a rule has no text.
    #[error("classification rule must not be empty")]
    EmptyRule,
    /// Raised when a rule carries surrounding whitespace.
    #[error("classification rule {rule:?} has surrounding whitespace")]
    Whitespace {
        /// Offending rule text.
        rule: String,
    },
}

/// Kinds of remote resource with built-in platform key rules.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Compute instance (container or virtual machine).
    Instance,
    /// Custom storage volume.
    StorageVolume,
    /// Server-wide settings document.
    Server,
    /// Instance profile.
    Profile,
    /// Managed network.
    Network,
    /// Project.
    Project,
}

impl ResourceKind {
    /// Built-in rules for keys the server computes on this kind of resource.
    #[must_use]
    pub fn platform_rules(self) -> Vec<KeyRule> {
        let prefixes: &[&str] = match self {
            Self::Instance => &["environment.", "image.", "volatile."],
            Self::StorageVolume => &["block.filesystem", "block.mount_options", "volatile."],
            Self::Server => &[],
            Self::Profile | Self::Network | Self::Project => &["volatile."],
        };
        prefixes
            .iter()
            .filter_map(|rule| KeyRule::parse(rule).ok())
            .collect()
    }
}

/// Ordered rule list; the first matching rule wins.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyClassifier {
    rules: Vec<KeyRule>,
    inherited: Vec<KeyRule>,
}

impl KeyClassifier {
    /// Builds a classifier from explicit rules.
    ///
    /// # Errors
    ///
    /// Returns [`ClassificationError`] when any rule is malformed.
    pub fn new(rules: Vec<KeyRule>) -> Result<Self, ClassificationError> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self {
            rules,
            inherited: Vec::new(),
        })
    }

    /// Builds a classifier from textual rules such as `"volatile."`.
    ///
    /// # Errors
    ///
    /// Returns [`ClassificationError`] when any rule is malformed.
    pub fn from_strs<'a>(
        rules: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ClassificationError> {
        let parsed = rules
            .into_iter()
            .map(KeyRule::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    /// Classifier carrying the built-in rules for `kind`.
    #[must_use]
    pub fn for_kind(kind: ResourceKind) -> Self {
        Self {
            rules: kind.platform_rules(),
            inherited: Vec::new(),
        }
    }

    /// Classifier that treats every key as manageable.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Returns a copy composed with per-pass supplemental rules. Static rules
    /// are consulted first.
    ///
    /// # Errors
    ///
    /// Returns [`ClassificationError`] when a supplemental rule is malformed.
    pub fn with_inherited(&self, inherited: Vec<KeyRule>) -> Result<Self, ClassificationError> {
        for rule in &inherited {
            rule.validate()?;
        }
        Ok(Self {
            rules: self.rules.clone(),
            inherited,
        })
    }

    /// Classifies `key` against the static rules, then the supplemental ones.
    #[must_use]
    pub fn classify(&self, key: &str) -> Classification {
        classify(key, self.rules.iter().chain(self.inherited.iter()))
    }

    /// Shorthand for `classify(key) == Classification::Platform`.
    #[must_use]
    pub fn is_platform(&self, key: &str) -> bool {
        self.classify(key) == Classification::Platform
    }

    /// Returns true when a static rule covers `key`. Such keys are computed
    /// by the server and never written, even when declared; keys matched
    /// only by a supplemental rule stay writable.
    #[must_use]
    pub fn is_computed(&self, key: &str) -> bool {
        classify(key, &self.rules) == Classification::Platform
    }

    /// Static rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[KeyRule] {
        &self.rules
    }

    /// Supplemental rules in evaluation order.
    #[must_use]
    pub fn inherited(&self) -> &[KeyRule] {
        &self.inherited
    }
}

/// Classifies `key` against an ordered rule sequence.
#[must_use]
pub fn classify<'a>(key: &str, rules: impl IntoIterator<Item = &'a KeyRule>) -> Classification {
    if rules.into_iter().any(|rule| rule.matches(key)) {
        Classification::Platform
    } else {
        Classification::Manageable
    }
}

/// Derives the exact-key rules a volume inherits from its pool: every pool
/// key `volume.<name>` yields a rule for `<name>`.
#[must_use]
pub fn inherited_volume_rules(pool_config: &RemoteConfigMap) -> Vec<KeyRule> {
    pool_config
        .keys()
        .filter_map(|key| key.strip_prefix(POOL_VOLUME_PREFIX))
        .filter(|name| !name.is_empty())
        .map(|name| KeyRule::Exact(name.to_owned()))
        .collect()
}
