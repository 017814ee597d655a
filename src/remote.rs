//! Collaborator interfaces for the remote server.
//!
//! Transport, authentication and response decoding live behind these
//! traits. Calls are awaited one at a time; the crate never retries a write.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::alias::ImageAlias;
use crate::config_map::RemoteConfigMap;
use crate::lifecycle::InstanceState;

/// Future returned by collaborator calls.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Opaque optimistic-concurrency marker returned by reads and required by the
/// matching write.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wraps a raw token value, typically an `ETag`.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque handle for an asynchronous server-side operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationHandle(String);

impl OperationHandle {
    /// Wraps an operation identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw operation identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Errors reported by collaborators, classified so callers can react.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// The addressed resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Resource that could not be found.
        resource: String,
    },
    /// The version token was stale; somebody else changed the document.
    #[error("{resource} was modified concurrently")]
    Conflict {
        /// Resource whose version no longer matched.
        resource: String,
    },
    /// Any other failure reported by the server or the transport.
    #[error("{message}")]
    Request {
        /// Message returned by the collaborator.
        message: String,
    },
}

impl RemoteError {
    /// Returns true for [`RemoteError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`RemoteError::Conflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Read and whole-document write of a resource configuration.
pub trait ConfigRemote {
    /// Reads the current configuration and its version token.
    fn get_config<'a>(
        &'a self,
        resource: &'a str,
    ) -> RemoteFuture<'a, (RemoteConfigMap, VersionToken)>;

    /// Replaces the configuration. A stale `token` yields
    /// [`RemoteError::Conflict`].
    fn put_config<'a>(
        &'a self,
        resource: &'a str,
        config: &'a RemoteConfigMap,
        token: &'a VersionToken,
    ) -> RemoteFuture<'a, ()>;
}

/// Read access to storage pool configuration.
pub trait PoolRemote {
    /// Reads the configuration of the named pool.
    fn get_pool_config<'a>(&'a self, pool: &'a str) -> RemoteFuture<'a, RemoteConfigMap>;
}

/// Requested instance state transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateAction {
    /// Boot the instance.
    Start,
    /// Shut the instance down.
    Stop,
}

impl StateAction {
    /// Action name as understood by the server.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// State change request sent to the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StateChange {
    /// Transition to perform.
    pub action: StateAction,
    /// Whether the server may kill the instance instead of shutting it down.
    pub force: bool,
    /// Seconds the server may spend before giving up.
    pub timeout_secs: u64,
}

/// Instance state queries and transitions.
pub trait InstanceRemote {
    /// Reads the live state of an instance.
    fn get_state<'a>(&'a self, instance: &'a str)
    -> RemoteFuture<'a, (InstanceState, VersionToken)>;

    /// Requests a state change and returns the operation to await.
    fn request_state<'a>(
        &'a self,
        instance: &'a str,
        change: StateChange,
        token: &'a VersionToken,
    ) -> RemoteFuture<'a, OperationHandle>;
}

/// Completion of asynchronous server operations.
pub trait OperationRemote {
    /// Blocks until the operation finishes, surfacing its failure if any.
    fn wait_operation<'a>(&'a self, operation: &'a OperationHandle) -> RemoteFuture<'a, ()>;
}

/// Image alias management.
pub trait AliasRemote {
    /// Returns true when an alias with this name exists.
    fn alias_exists<'a>(&'a self, name: &'a str) -> RemoteFuture<'a, bool>;

    /// Creates `alias` pointing at the image `target`.
    fn create_alias<'a>(&'a self, target: &'a str, alias: &'a ImageAlias) -> RemoteFuture<'a, ()>;

    /// Deletes the named alias.
    fn delete_alias<'a>(&'a self, name: &'a str) -> RemoteFuture<'a, ()>;
}
