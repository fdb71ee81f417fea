use crate::config::ProxyEntry;
use crate::FetchError;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Username/password pair for an authenticated proxy
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ProxyCredentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// An outbound proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyEndpoint {
    /// Proxy URL, e.g. `http://10.0.0.1:8080` or `socks5://10.0.0.2:1080`
    pub address: String,

    /// Optional basic-auth credentials
    pub credentials: Option<ProxyCredentials>,

    /// Inactive endpoints are never handed out
    pub active: bool,
}

impl ProxyEndpoint {
    /// Creates an active endpoint without credentials
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: None,
            active: true,
        }
    }

    /// Attaches basic-auth credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Builds the `reqwest` proxy for this endpoint, routing all schemes
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, FetchError> {
        let proxy = reqwest::Proxy::all(&self.address).map_err(|source| FetchError::Proxy {
            address: self.address.clone(),
            source,
        })?;

        Ok(match &self.credentials {
            Some(creds) => proxy.basic_auth(&creds.username, &creds.password),
            None => proxy,
        })
    }
}

impl From<&ProxyEntry> for ProxyEndpoint {
    fn from(entry: &ProxyEntry) -> Self {
        let endpoint = ProxyEndpoint::new(entry.address.clone());
        match (&entry.username, &entry.password) {
            (Some(username), Some(password)) => endpoint.with_credentials(username, password),
            _ => endpoint,
        }
    }
}

/// Consecutive transport failures after which an endpoint leaves rotation
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Default)]
struct PoolState {
    endpoints: Vec<ProxyEndpoint>,
    cursor: usize,

    /// Consecutive failures per address since the last success
    failures: HashMap<String, u32>,
}

impl PoolState {
    fn active(&self) -> Vec<&ProxyEndpoint> {
        self.endpoints.iter().filter(|e| e.active).collect()
    }
}

/// Pool of outbound proxies
///
/// Endpoints marked failed stay in the pool but are excluded from selection
/// for the rest of the process lifetime. An endpoint is marked failed either
/// directly through [`ProxyPool::mark_failed`] or after
/// `failure_threshold` consecutive [`ProxyPool::record_failure`] calls.
#[derive(Debug)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
    failure_threshold: u32,
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl ProxyPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many consecutive failures take an endpoint out of rotation
    /// (at least 1)
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Creates a pool from configured proxy entries
    pub fn from_entries(entries: &[ProxyEntry]) -> Self {
        let pool = Self::new();
        for entry in entries {
            pool.add_endpoint(ProxyEndpoint::from(entry));
        }
        pool
    }

    /// Adds an endpoint to the pool
    ///
    /// Inactive endpoints and addresses already in the pool are ignored.
    pub fn add_endpoint(&self, endpoint: ProxyEndpoint) {
        if !endpoint.active {
            tracing::debug!("Ignoring inactive proxy {}", endpoint.address);
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.endpoints.iter().any(|e| e.address == endpoint.address) {
            tracing::debug!("Proxy {} already in pool", endpoint.address);
            return;
        }

        tracing::debug!("Added proxy {}", endpoint.address);
        state.endpoints.push(endpoint);
    }

    /// Returns the next active endpoint in round-robin order
    pub fn next_endpoint(&self) -> Option<ProxyEndpoint> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let picked = {
            let active = state.active();
            if active.is_empty() {
                return None;
            }
            let index = state.cursor % active.len();
            (index, active[index].clone())
        };

        let (index, endpoint) = picked;
        state.cursor = index + 1;
        Some(endpoint)
    }

    /// Returns a uniformly random active endpoint
    pub fn random_endpoint(&self) -> Option<ProxyEndpoint> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let active = state.active();
        if active.is_empty() {
            return None;
        }

        let index = rand::thread_rng().gen_range(0..active.len());
        Some(active[index].clone())
    }

    /// Takes the endpoint with the same address out of rotation
    pub fn mark_failed(&self, endpoint: &ProxyEndpoint) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(found) = state
            .endpoints
            .iter_mut()
            .find(|e| e.address == endpoint.address)
        {
            if found.active {
                found.active = false;
                tracing::warn!("Proxy {} marked as failed", found.address);
            }
        }
    }

    /// Counts a failure through an endpoint
    ///
    /// Returns true if this failure took the endpoint out of rotation.
    pub fn record_failure(&self, endpoint: &ProxyEndpoint) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let count = state
            .failures
            .entry(endpoint.address.clone())
            .or_insert(0);
        *count += 1;
        let count = *count;

        if count < self.failure_threshold {
            tracing::debug!(
                "Proxy {} failed ({}/{})",
                endpoint.address,
                count,
                self.failure_threshold
            );
            return false;
        }

        match state
            .endpoints
            .iter_mut()
            .find(|e| e.address == endpoint.address && e.active)
        {
            Some(found) => {
                found.active = false;
                tracing::warn!(
                    "Proxy {} marked as failed after {} consecutive failures",
                    found.address,
                    count
                );
                true
            }
            None => false,
        }
    }

    /// Clears the failure count of an endpoint after a successful request
    pub fn record_success(&self, endpoint: &ProxyEndpoint) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failures.remove(&endpoint.address);
    }

    /// Number of endpoints still in rotation
    pub fn active_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.endpoints.iter().filter(|e| e.active).count()
    }

    /// Whether any endpoint is still in rotation
    pub fn has_any(&self) -> bool {
        self.active_count() > 0
    }

    /// Snapshot of every endpoint, including failed ones
    pub fn endpoints(&self) -> Vec<ProxyEndpoint> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.endpoints.clone()
    }
}
