//! Multi-tenant registry mapping external client identities to per-tenant
//! [`Manager`]s, with time-based idle reaping.
//!
//! Three disjoint modes, selected once at startup: a single shared Manager
//! (global), a sticky-routing header keyed registry, or an MCP session-id
//! keyed registry. Only the header-keyed mode runs a reaper — session-id
//! lifetime is already bounded by the transport connection, and global mode
//! has exactly one tenant for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::keystore::KeyStore;
use crate::manager::Manager;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct SessionEntry {
    manager: Arc<Manager>,
    // A separate, fine-grained lock so the read-lock-hit hot path in
    // `get_header_keyed` can refresh this without escalating to the map's
    // write lock.
    last_accessed: Mutex<Instant>,
}

enum Registry {
    Global(Arc<Manager>),
    HeaderKeyed(RwLock<HashMap<String, SessionEntry>>),
    SessionIdKeyed(RwLock<HashMap<String, Arc<Manager>>>),
}

/// The tenant registry. One `Pool` per process.
pub struct Pool {
    keystore: Arc<KeyStore>,
    registry: Registry,
    idle_timeout: Duration,
    reaper: RwLock<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Global mode: a single shared Manager, reaper disabled.
    pub fn global(keystore: Arc<KeyStore>) -> Arc<Self> {
        let manager = Arc::new(Manager::new(keystore.clone()));
        Arc::new(Self {
            keystore,
            registry: Registry::Global(manager),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reaper: RwLock::new(None),
        })
    }

    /// Header-keyed mode, with a background reaper closing entries idle
    /// longer than `idle_timeout`.
    pub fn header_keyed(keystore: Arc<KeyStore>, idle_timeout: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            keystore,
            registry: Registry::HeaderKeyed(RwLock::new(HashMap::new())),
            idle_timeout,
            reaper: RwLock::new(None),
        });
        pool.clone().spawn_reaper();
        pool
    }

    /// Session-id-keyed mode: entries live and die with the MCP transport
    /// connection, so no idle reaping is needed.
    pub fn session_id_keyed(keystore: Arc<KeyStore>) -> Arc<Self> {
        Arc::new(Self {
            keystore,
            registry: Registry::SessionIdKeyed(RwLock::new(HashMap::new())),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reaper: RwLock::new(None),
        })
    }

    fn spawn_reaper(self: Arc<Self>) {
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(DEFAULT_REAP_INTERVAL);
            loop {
                tick.tick().await;
                self.reap_once().await;
            }
        });
        // Only one caller ever spawns the reaper (inside `header_keyed`, before
        // the Arc is handed out), so a blocking write here never contends.
        if let Ok(mut guard) = self.reaper.try_write() {
            *guard = Some(handle);
        }
    }

    async fn reap_once(&self) {
        let Registry::HeaderKeyed(map) = &self.registry else {
            return;
        };

        let mut expired = Vec::new();
        {
            let guard = map.read().await;
            for (key, entry) in guard.iter() {
                if entry.last_accessed.lock().await.elapsed() > self.idle_timeout {
                    expired.push(key.clone());
                }
            }
        }
        if expired.is_empty() {
            return;
        }

        let mut to_close = Vec::new();
        {
            let mut guard = map.write().await;
            for key in expired {
                // Re-check under the write lock: another request may have
                // touched this entry between the scan and now.
                let still_stale = match guard.get(&key) {
                    Some(entry) => entry.last_accessed.lock().await.elapsed() > self.idle_timeout,
                    None => false,
                };
                if still_stale {
                    if let Some(entry) = guard.remove(&key) {
                        to_close.push((key, entry.manager));
                    }
                }
            }
        }
        // Manager::close tears down SSH transports; never do that under the
        // map's write lock.
        for (key, manager) in to_close {
            debug!("reaping idle tenant '{key}'");
            manager.close().await;
        }
    }

    /// Fetch or create the Manager for `tenant_key`. In global mode,
    /// `tenant_key` is ignored.
    pub async fn get(&self, tenant_key: &str) -> Arc<Manager> {
        match &self.registry {
            Registry::Global(manager) => manager.clone(),
            Registry::HeaderKeyed(map) => self.get_header_keyed(map, tenant_key).await,
            Registry::SessionIdKeyed(map) => self.get_session_id_keyed(map, tenant_key).await,
        }
    }

    async fn get_header_keyed(&self, map: &RwLock<HashMap<String, SessionEntry>>, key: &str) -> Arc<Manager> {
        {
            let guard = map.read().await;
            if let Some(entry) = guard.get(key) {
                *entry.last_accessed.lock().await = Instant::now();
                return entry.manager.clone();
            }
        }
        let mut guard = map.write().await;
        if let Some(entry) = guard.get_mut(key) {
            *entry.last_accessed.lock().await = Instant::now();
            return entry.manager.clone();
        }
        let manager = Arc::new(Manager::new(self.keystore.clone()));
        guard.insert(
            key.to_string(),
            SessionEntry {
                manager: manager.clone(),
                last_accessed: Mutex::new(Instant::now()),
            },
        );
        manager
    }

    async fn get_session_id_keyed(&self, map: &RwLock<HashMap<String, Arc<Manager>>>, key: &str) -> Arc<Manager> {
        {
            let guard = map.read().await;
            if let Some(manager) = guard.get(key) {
                return manager.clone();
            }
        }
        let mut guard = map.write().await;
        if let Some(manager) = guard.get(key) {
            return manager.clone();
        }
        let manager = Arc::new(Manager::new(self.keystore.clone()));
        guard.insert(key.to_string(), manager.clone());
        manager
    }

    /// Remove and close a session-id-keyed entry when its MCP transport
    /// session closes. A no-op in the other two modes.
    pub async fn close_session(&self, session_id: &str) {
        if let Registry::SessionIdKeyed(map) = &self.registry {
            if let Some(manager) = map.write().await.remove(session_id) {
                manager.close().await;
            }
        }
    }

    /// Idempotent shutdown: stop the reaper, then drain and close every
    /// Manager in every registry.
    pub async fn close(&self) {
        if let Some(handle) = self.reaper.write().await.take() {
            handle.abort();
        }

        match &self.registry {
            Registry::Global(manager) => manager.close().await,
            Registry::HeaderKeyed(map) => {
                for (_, entry) in map.write().await.drain() {
                    entry.manager.close().await;
                }
            }
            Registry::SessionIdKeyed(map) => {
                for (_, manager) in map.write().await.drain() {
                    manager.close().await;
                }
            }
        }
        info!("pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_keystore() -> Arc<KeyStore> {
        let dir = PathBuf::from(std::env::temp_dir())
            .join(format!("ssh-mcp-gateway-pool-test-{}-{}", std::process::id(), rand_suffix()));
        std::fs::create_dir_all(&dir).unwrap();
        Arc::new(KeyStore::ensure(Some(dir)).expect("keystore"))
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[tokio::test]
    async fn header_keyed_returns_same_manager_for_same_key() {
        let pool = Pool::header_keyed(test_keystore(), Duration::from_secs(300));
        let a = pool.get("tenant-a").await;
        let b = pool.get("tenant-a").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn header_keyed_separates_distinct_keys() {
        let pool = Pool::header_keyed(test_keystore(), Duration::from_secs(300));
        let a = pool.get("tenant-a").await;
        let b = pool.get("tenant-b").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    // The ≥50-concurrent-task shared-key race audit lives in
    // `tests/pool_concurrency.rs` as an integration test: `Pool` and
    // `KeyStore` are both public API, so it runs the same way a real
    // caller would drive the pool, from outside the crate.

    #[tokio::test]
    async fn reap_closes_only_entries_past_idle_timeout() {
        let pool = Pool::header_keyed(test_keystore(), Duration::from_millis(50));
        let manager = pool.get("stale").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.reap_once().await;

        if let Registry::HeaderKeyed(map) = &pool.registry {
            assert!(!map.read().await.contains_key("stale"));
        }
        drop(manager);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let pool = Pool::header_keyed(test_keystore(), Duration::from_secs(300));
        let _ = pool.get("tenant").await;
        pool.close().await;
        pool.close().await;
    }
}
