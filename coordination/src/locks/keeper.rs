//! `LockKeeper` — background keep-alive renewer for long-running agents.
//!
//! Per the Design Notes, this breaks the cyclic orchestrator/keeper/
//! detector reference: `LockKeeper` is handed a narrow callback interface
//! (it calls `renew`, nothing else) rather than a handle to the full
//! `LockManager`/`Orchestrator`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::manager::LockManager;

/// Default renewal cadence (`LOCK_RENEWAL_INTERVAL_SECONDS`).
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(300);

/// After this many consecutive renewal failures for a lock, stop
/// renewing it and notify the orchestrator that the lock is assumed lost.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Narrow interface handed to `LockKeeper` — renew only.
#[async_trait::async_trait]
pub trait Renewer: Send + Sync {
    async fn renew(&self, agent_id: &str, path: &str) -> Result<(), String>;
}

#[async_trait::async_trait]
impl Renewer for LockManager {
    async fn renew(&self, agent_id: &str, path: &str) -> Result<(), String> {
        self.renew(agent_id, path)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Signal raised when a held lock is assumed lost (renewal exhausted).
#[derive(Debug, Clone)]
pub struct LockLost {
    pub agent_id: String,
    pub file_path: String,
}

pub struct LockKeeper {
    renewer: Arc<dyn Renewer>,
    /// (agent_id, path) -> consecutive failure count.
    held: Mutex<HashMap<(String, String), u32>>,
    renewal_interval: Duration,
    max_consecutive_failures: u32,
}

impl LockKeeper {
    pub fn new(renewer: Arc<dyn Renewer>) -> Self {
        Self {
            renewer,
            held: Mutex::new(HashMap::new()),
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    /// Register a (agent, path) pair to be kept alive.
    pub async fn track(&self, agent_id: &str, path: &str) {
        let mut held = self.held.lock().await;
        held.insert((agent_id.to_string(), path.to_string()), 0);
    }

    /// Stop tracking a (agent, path) pair, e.g. after an explicit release.
    pub async fn untrack(&self, agent_id: &str, path: &str) {
        let mut held = self.held.lock().await;
        held.remove(&(agent_id.to_string(), path.to_string()));
    }

    /// Run one renewal pass over every tracked lock. Renewals for
    /// distinct paths proceed independently, but this method itself is
    /// not re-entrant: scheduling is cooperative (single renewal loop
    /// per orchestrator), so concurrent renewals never overlap for the
    /// same path.
    pub async fn renew_all(&self) -> Vec<LockLost> {
        let mut lost = Vec::new();
        let keys: Vec<(String, String)> = {
            let held = self.held.lock().await;
            held.keys().cloned().collect()
        };

        for (agent_id, path) in keys {
            match self.renewer.renew(&agent_id, &path).await {
                Ok(()) => {
                    let mut held = self.held.lock().await;
                    held.insert((agent_id.clone(), path.clone()), 0);
                }
                Err(e) => {
                    let failures = {
                        let mut held = self.held.lock().await;
                        let count = held
                            .entry((agent_id.clone(), path.clone()))
                            .or_insert(0);
                        *count += 1;
                        *count
                    };
                    warn!(agent_id, path, failures, error = %e, "lock renewal failed");

                    if failures >= self.max_consecutive_failures {
                        warn!(agent_id, path, "lock assumed lost, stopping renewal");
                        let mut held = self.held.lock().await;
                        held.remove(&(agent_id.clone(), path.clone()));
                        lost.push(LockLost {
                            agent_id,
                            file_path: path,
                        });
                    }
                }
            }
        }

        lost
    }

    /// Spawn the cooperative renewal loop. Returns a `JoinHandle` the
    /// caller can abort on shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.renewal_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let lost = self.renew_all().await;
                for l in lost {
                    info!(agent_id = %l.agent_id, path = %l.file_path, "notifying orchestrator of lost lock");
                }
            }
        })
    }
}
