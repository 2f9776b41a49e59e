//! Registry of joined users
//!
//! Names are unique and restricted to `[-_a-zA-Z0-9]+`. The table sits behind
//! a reader/writer lock: lookups and snapshots share it, `add` and `remove`
//! take it exclusively.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::transport::{Endpoint, TcpEndpoint, UdpEndpoint};

/// Check a name against `[-_a-zA-Z0-9]+`
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ChatError::invalid_name(format!("'{}'", name)))
    }
}

/// A joined user and its transport bindings
#[derive(Debug)]
pub struct User {
    name: String,
    tcp: Option<Arc<TcpEndpoint>>,
    udp: StdRwLock<Option<Arc<UdpEndpoint>>>,
}

impl User {
    pub fn new(name: impl Into<String>, tcp: Option<Arc<TcpEndpoint>>) -> Self {
        Self {
            name: name.into(),
            tcp,
            udp: StdRwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The TCP endpoint, if present and live
    pub fn tcp(&self) -> Option<Arc<TcpEndpoint>> {
        self.tcp.as_ref().filter(|ep| ep.is_up()).cloned()
    }

    /// The UDP endpoint, if present and live
    pub fn udp(&self) -> Option<Arc<UdpEndpoint>> {
        let udp = self.udp.read().unwrap_or_else(PoisonError::into_inner);
        udp.as_ref().filter(|ep| ep.is_up()).cloned()
    }

    /// Whether `endpoint` is this user's TCP binding
    pub fn owns_tcp(&self, endpoint: &Arc<TcpEndpoint>) -> bool {
        self.tcp.as_ref().is_some_and(|ep| Arc::ptr_eq(ep, endpoint))
    }

    /// Whether `endpoint` is this user's UDP binding
    pub fn owns_udp(&self, endpoint: &Arc<UdpEndpoint>) -> bool {
        let udp = self.udp.read().unwrap_or_else(PoisonError::into_inner);
        udp.as_ref().is_some_and(|ep| Arc::ptr_eq(ep, endpoint))
    }

    /// Bind a UDP channel. Refused while a live binding exists; a dead one is replaced.
    pub fn bind_udp(&self, endpoint: Arc<UdpEndpoint>) -> Result<()> {
        let mut udp = self.udp.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = udp.as_ref().filter(|ep| ep.is_up()) {
            return Err(ChatError::already_bound(format!(
                "{} at {}",
                self.name,
                current.remote_address()
            )));
        }
        *udp = Some(endpoint);
        Ok(())
    }
}

/// Shared name -> user table
#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, Arc<User>>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user under its name
    pub async fn add(&self, user: User) -> Result<Arc<User>> {
        validate_name(user.name())?;

        let mut users = self.users.write().await;
        if users.contains_key(user.name()) {
            return Err(ChatError::name_taken(user.name()));
        }

        let user = Arc::new(user);
        users.insert(user.name().to_string(), Arc::clone(&user));
        debug!(name = %user.name(), total = users.len(), "user added");
        Ok(user)
    }

    /// Remove a user by name
    pub async fn remove(&self, name: &str) -> Result<Arc<User>> {
        let mut users = self.users.write().await;
        let user = users
            .remove(name)
            .ok_or_else(|| ChatError::user_not_found(name))?;
        debug!(name = %name, total = users.len(), "user removed");
        Ok(user)
    }

    /// Remove a user only if `predicate` holds for the registered entry
    pub async fn remove_if<F>(&self, name: &str, predicate: F) -> Option<Arc<User>>
    where
        F: FnOnce(&User) -> bool,
    {
        let mut users = self.users.write().await;
        if !users.get(name).is_some_and(|user| predicate(user)) {
            return None;
        }
        users.remove(name)
    }

    /// Remove and return every user
    pub async fn drain(&self) -> Vec<Arc<User>> {
        let mut users = self.users.write().await;
        users.drain().map(|(_, user)| user).collect()
    }

    /// Look up a user by name
    pub async fn find(&self, name: &str) -> Result<Arc<User>> {
        let users = self.users.read().await;
        users
            .get(name)
            .cloned()
            .ok_or_else(|| ChatError::user_not_found(name))
    }

    /// Snapshot of every registered user
    pub async fn find_all(&self) -> Vec<Arc<User>> {
        let users = self.users.read().await;
        users.values().cloned().collect()
    }

    /// Snapshot of the users matching `predicate`
    pub async fn filter<F>(&self, predicate: F) -> Vec<Arc<User>>
    where
        F: Fn(&User) -> bool,
    {
        let users = self.users.read().await;
        users
            .values()
            .filter(|user| predicate(user))
            .cloned()
            .collect()
    }

    /// Every user other than `name`, which must itself be registered
    pub async fn broadcast(&self, name: &str) -> Result<Vec<Arc<User>>> {
        let users = self.users.read().await;
        if !users.contains_key(name) {
            return Err(ChatError::user_not_found(name));
        }
        Ok(users
            .iter()
            .filter(|(other, _)| other.as_str() != name)
            .map(|(_, user)| Arc::clone(user))
            .collect())
    }

    /// Snapshot of registered names
    pub async fn names(&self) -> Vec<String> {
        let users = self.users.read().await;
        users.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}
