//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedRemote`] is an in-memory server implementing every collaborator
//! trait. Configuration writes honour version tokens, instance states are
//! replayed from a script, and every call is recorded for assertions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::alias::ImageAlias;
use crate::config_map::RemoteConfigMap;
use crate::lifecycle::{AddressFamily, InstanceState, InstanceStatus, NetworkAddress};
use crate::remote::{
    AliasRemote, ConfigRemote, InstanceRemote, OperationHandle, OperationRemote, PoolRemote,
    RemoteError, RemoteFuture, StateChange, VersionToken,
};

/// A call observed by [`ScriptedRemote`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteCall {
    /// `get_config` on a resource.
    GetConfig(String),
    /// `put_config` on a resource with the document written.
    PutConfig(String, RemoteConfigMap),
    /// `get_pool_config` on a pool.
    GetPool(String),
    /// `get_state` on an instance.
    GetState(String),
    /// `request_state` on an instance.
    RequestState(String, StateChange),
    /// `wait_operation` on a handle.
    WaitOperation(String),
    /// `alias_exists` for a name.
    AliasExists(String),
    /// `create_alias` of a name for a target image.
    CreateAlias(String, String),
    /// `delete_alias` for a name.
    DeleteAlias(String),
}

#[derive(Debug, Default)]
struct State {
    configs: BTreeMap<String, (RemoteConfigMap, u64)>,
    pools: BTreeMap<String, RemoteConfigMap>,
    instances: BTreeMap<String, VecDeque<Result<InstanceState, RemoteError>>>,
    aliases: BTreeMap<String, String>,
    put_failure: Option<RemoteError>,
    request_failure: Option<RemoteError>,
    operation_failure: Option<RemoteError>,
    alias_create_failure: Option<(String, RemoteError)>,
    calls: Vec<RemoteCall>,
}

/// Scripted in-memory server.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRemote {
    state: Arc<Mutex<State>>,
}

impl ScriptedRemote {
    /// Creates an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds the configuration of a resource.
    #[must_use]
    pub fn with_config<K, V>(
        self,
        resource: &str,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let config = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.lock().configs.insert(resource.to_owned(), (config, 1));
        self
    }

    /// Seeds the configuration of a storage pool.
    #[must_use]
    pub fn with_pool<K, V>(self, pool: &str, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let config = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.lock().pools.insert(pool.to_owned(), config);
        self
    }

    /// Seeds an existing image alias pointing at `target`.
    #[must_use]
    pub fn with_alias(self, name: &str, target: &str) -> Self {
        self.lock()
            .aliases
            .insert(name.to_owned(), target.to_owned());
        self
    }

    /// Queues instance state responses. Each read consumes one entry; the
    /// last entry repeats forever.
    pub fn script_states<I>(&self, instance: &str, states: I)
    where
        I: IntoIterator<Item = Result<InstanceState, RemoteError>>,
    {
        self.lock()
            .instances
            .insert(instance.to_owned(), states.into_iter().collect());
    }

    /// Changes a key and bumps the version, as another writer would.
    pub fn concurrent_edit(&self, resource: &str, key: &str, value: &str) {
        let mut state = self.lock();
        let entry = state.configs.entry(resource.to_owned()).or_default();
        entry.0.insert(key.to_owned(), value.to_owned());
        entry.1 += 1;
    }

    /// Makes the next configuration write fail with `error`.
    pub fn fail_next_put(&self, error: RemoteError) {
        self.lock().put_failure = Some(error);
    }

    /// Makes every state change request fail with `error`.
    pub fn fail_requests(&self, error: RemoteError) {
        self.lock().request_failure = Some(error);
    }

    /// Makes every awaited operation fail with `error`.
    pub fn fail_operations(&self, error: RemoteError) {
        self.lock().operation_failure = Some(error);
    }

    /// Makes creation of the alias `name` fail with `error`.
    pub fn fail_alias_create(&self, name: &str, error: RemoteError) {
        self.lock().alias_create_failure = Some((name.to_owned(), error));
    }

    /// Current configuration of a resource.
    #[must_use]
    pub fn config(&self, resource: &str) -> RemoteConfigMap {
        self.lock()
            .configs
            .get(resource)
            .map(|(config, _)| config.clone())
            .unwrap_or_default()
    }

    /// Alias names currently present.
    #[must_use]
    pub fn aliases(&self) -> BTreeSet<String> {
        self.lock().aliases.keys().cloned().collect()
    }

    /// Snapshot of every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Number of configuration writes made so far.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RemoteCall::PutConfig(..)))
            .count()
    }

    /// Number of state reads made for `instance`.
    #[must_use]
    pub fn state_reads(&self, instance: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RemoteCall::GetState(name) if name == instance))
            .count()
    }

    /// State change requests made so far.
    #[must_use]
    pub fn state_requests(&self) -> Vec<StateChange> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::RequestState(_, change) => Some(change),
                _ => None,
            })
            .collect()
    }
}

fn not_found(resource: &str) -> RemoteError {
    RemoteError::NotFound {
        resource: resource.to_owned(),
    }
}

impl ConfigRemote for ScriptedRemote {
    fn get_config<'a>(
        &'a self,
        resource: &'a str,
    ) -> RemoteFuture<'a, (RemoteConfigMap, VersionToken)> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(RemoteCall::GetConfig(resource.to_owned()));
            let (config, version) = state
                .configs
                .get(resource)
                .ok_or_else(|| not_found(resource))?;
            Ok((config.clone(), VersionToken::new(format!("v{version}"))))
        })
    }

    fn put_config<'a>(
        &'a self,
        resource: &'a str,
        config: &'a RemoteConfigMap,
        token: &'a VersionToken,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .calls
                .push(RemoteCall::PutConfig(resource.to_owned(), config.clone()));
            if let Some(error) = state.put_failure.take() {
                return Err(error);
            }
            let entry = state
                .configs
                .get_mut(resource)
                .ok_or_else(|| not_found(resource))?;
            if token.as_str() != format!("v{}", entry.1) {
                return Err(RemoteError::Conflict {
                    resource: resource.to_owned(),
                });
            }
            entry.0.clone_from(config);
            entry.1 += 1;
            Ok(())
        })
    }
}

impl PoolRemote for ScriptedRemote {
    fn get_pool_config<'a>(&'a self, pool: &'a str) -> RemoteFuture<'a, RemoteConfigMap> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(RemoteCall::GetPool(pool.to_owned()));
            state.pools.get(pool).cloned().ok_or_else(|| not_found(pool))
        })
    }
}

impl InstanceRemote for ScriptedRemote {
    fn get_state<'a>(
        &'a self,
        instance: &'a str,
    ) -> RemoteFuture<'a, (InstanceState, VersionToken)> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(RemoteCall::GetState(instance.to_owned()));
            let script = state
                .instances
                .get_mut(instance)
                .ok_or_else(|| not_found(instance))?;
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            let observed = next.ok_or_else(|| not_found(instance))??;
            Ok((observed, VersionToken::new("state")))
        })
    }

    fn request_state<'a>(
        &'a self,
        instance: &'a str,
        change: StateChange,
        _token: &'a VersionToken,
    ) -> RemoteFuture<'a, OperationHandle> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .calls
                .push(RemoteCall::RequestState(instance.to_owned(), change));
            if let Some(error) = state.request_failure.clone() {
                return Err(error);
            }
            Ok(OperationHandle::new(format!("{}-{instance}", change.action.as_str())))
        })
    }
}

impl OperationRemote for ScriptedRemote {
    fn wait_operation<'a>(&'a self, operation: &'a OperationHandle) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .calls
                .push(RemoteCall::WaitOperation(operation.as_str().to_owned()));
            state.operation_failure.clone().map_or(Ok(()), Err)
        })
    }
}

impl AliasRemote for ScriptedRemote {
    fn alias_exists<'a>(&'a self, name: &'a str) -> RemoteFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(RemoteCall::AliasExists(name.to_owned()));
            Ok(state.aliases.contains_key(name))
        })
    }

    fn create_alias<'a>(&'a self, target: &'a str, alias: &'a ImageAlias) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .calls
                .push(RemoteCall::CreateAlias(alias.name.clone(), target.to_owned()));
            if let Some((_, error)) = state
                .alias_create_failure
                .as_ref()
                .filter(|(name, _)| *name == alias.name)
            {
                return Err(error.clone());
            }
            if state.aliases.contains_key(&alias.name) {
                return Err(RemoteError::Conflict {
                    resource: alias.name.clone(),
                });
            }
            state.aliases.insert(alias.name.clone(), target.to_owned());
            Ok(())
        })
    }

    fn delete_alias<'a>(&'a self, name: &'a str) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(RemoteCall::DeleteAlias(name.to_owned()));
            state
                .aliases
                .remove(name)
                .map(drop)
                .ok_or_else(|| not_found(name))
        })
    }
}

/// Builder for instance state fixtures.
#[derive(Clone, Debug)]
pub struct StateFixture {
    state: InstanceState,
}

impl StateFixture {
    /// Starts from an instance with `status` and no processes or interfaces.
    #[must_use]
    pub fn new(status: InstanceStatus) -> Self {
        Self {
            state: InstanceState {
                status: status.as_str().to_owned(),
                status_code: status.code(),
                ..InstanceState::default()
            },
        }
    }

    /// Sets the process count.
    #[must_use]
    pub const fn processes(mut self, count: i64) -> Self {
        self.state.processes = count;
        self
    }

    /// Adds an address with `scope` to `interface`.
    #[must_use]
    pub fn scoped_address(
        mut self,
        interface: &str,
        family: AddressFamily,
        address: &str,
        scope: &str,
    ) -> Self {
        self.state
            .network
            .entry(interface.to_owned())
            .or_default()
            .addresses
            .push(NetworkAddress {
                family: family.as_str().to_owned(),
                address: address.to_owned(),
                scope: scope.to_owned(),
            });
        self
    }

    /// Adds a global address to `interface`.
    #[must_use]
    pub fn address(self, interface: &str, family: AddressFamily, address: &str) -> Self {
        self.scoped_address(interface, family, address, "global")
    }

    /// Sets the MAC address of `interface`.
    #[must_use]
    pub fn hwaddr(mut self, interface: &str, mac: &str) -> Self {
        self.state
            .network
            .entry(interface.to_owned())
            .or_default()
            .hwaddr = mac.to_owned();
        self
    }

    /// Finishes the fixture.
    #[must_use]
    pub fn build(self) -> InstanceState {
        self.state
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes variables while holding the global mutex.
    pub async fn clear_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
