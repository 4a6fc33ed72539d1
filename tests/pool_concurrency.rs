//! Pool concurrency race audit, driven against a cheap local `KeyStore` so
//! it needs no live SSH, no network dependency. Mirrors spec.md §8's
//! double-checked-lookup and reaper invariants from outside the crate,
//! using only public API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ssh_mcp_gateway::keystore::KeyStore;
use ssh_mcp_gateway::pool::Pool;

fn test_keystore(label: &str) -> Arc<KeyStore> {
    let dir = std::env::temp_dir().join(format!(
        "ssh-mcp-gateway-pool-it-{label}-{}-{}",
        std::process::id(),
        rand_suffix()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(KeyStore::ensure(Some(dir)).expect("keystore"))
}

fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
}

#[tokio::test]
async fn concurrent_get_on_shared_key_returns_one_manager() {
    let pool = Pool::header_keyed(test_keystore("shared"), Duration::from_secs(300));
    let mut handles = Vec::with_capacity(50);
    for _ in 0..50 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.get("shared").await }));
    }

    let mut managers = Vec::with_capacity(50);
    for handle in handles {
        managers.push(handle.await.unwrap());
    }

    let first = &managers[0];
    assert!(managers.iter().all(|m| Arc::ptr_eq(m, first)));
}

#[tokio::test]
async fn concurrent_get_on_distinct_keys_never_collide() {
    let pool = Pool::header_keyed(test_keystore("distinct"), Duration::from_secs(300));
    let mut handles = Vec::with_capacity(50);
    for i in 0..50 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { (i, pool.get(&format!("tenant-{i}")).await) }));
    }

    let mut managers: Vec<_> = Vec::with_capacity(50);
    for handle in handles {
        managers.push(handle.await.unwrap());
    }

    for i in 0..managers.len() {
        for j in (i + 1)..managers.len() {
            assert!(
                !Arc::ptr_eq(&managers[i].1, &managers[j].1),
                "tenant-{} and tenant-{} shared a Manager",
                managers[i].0,
                managers[j].0
            );
        }
    }
}

#[tokio::test]
async fn closed_pool_stays_closed_under_repeated_close() {
    let pool = Pool::header_keyed(test_keystore("close"), Duration::from_secs(300));
    let _ = pool.get("tenant").await;
    pool.close().await;
    pool.close().await;
}
