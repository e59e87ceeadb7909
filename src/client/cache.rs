//! Response cache: an in-memory layer backed by an on-disk append directory, keyed by
//! `hash(url)` (§2 "caches responses on disk keyed by URL + TTL").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::symbol::fnv1a;

#[derive(Debug, Clone)]
struct Entry {
    body: String,
    fetched_at: u64,
    ttl: Duration,
}

impl Entry {
    fn is_fresh(&self, now: u64) -> bool {
        now.saturating_sub(self.fetched_at) < self.ttl.as_secs()
    }
}

/// A two-level cache: a `HashMap` in memory, optionally backed by a directory on disk so
/// that it survives process restarts. Lookups check memory first, then disk (promoting a
/// disk hit back into memory), mirroring `eod_fetch`'s `invalid_cache_query_after_seconds`
/// semantics from the original.
#[derive(Debug)]
pub struct ResponseCache {
    map: RwLock<HashMap<String, Entry>>,
    disk_dir: Option<PathBuf>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(disk_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = &disk_dir {
            let _ = std::fs::create_dir_all(dir);
        }
        Self {
            map: RwLock::new(HashMap::new()),
            disk_dir,
        }
    }

    #[must_use]
    pub fn in_memory_only() -> Self {
        Self::new(None)
    }

    fn disk_path(&self, url: &str) -> Option<PathBuf> {
        let dir = self.disk_dir.as_ref()?;
        Some(dir.join(format!("{:016x}.json", fnv1a(url.as_bytes()))))
    }

    pub async fn get(&self, url: &str, ttl: Duration) -> Option<String> {
        let now = now_secs();
        {
            let guard = self.map.read().await;
            if let Some(entry) = guard.get(url)
                && entry.is_fresh(now)
            {
                return Some(entry.body.clone());
            }
        }
        let path = self.disk_path(url)?;
        let (fetched_at, body) = read_disk_entry(&path)?;
        if now.saturating_sub(fetched_at) >= ttl.as_secs() {
            return None;
        }
        let mut guard = self.map.write().await;
        guard.insert(
            url.to_string(),
            Entry {
                body: body.clone(),
                fetched_at,
                ttl,
            },
        );
        Some(body)
    }

    pub async fn put(&self, url: &str, body: &str, ttl: Duration) {
        let fetched_at = now_secs();
        {
            let mut guard = self.map.write().await;
            guard.insert(
                url.to_string(),
                Entry {
                    body: body.to_string(),
                    fetched_at,
                    ttl,
                },
            );
        }
        if let Some(path) = self.disk_path(url) {
            write_disk_entry(&path, fetched_at, body);
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn read_disk_entry(path: &Path) -> Option<(u64, String)> {
    let raw = std::fs::read_to_string(path).ok()?;
    let (header, body) = raw.split_once('\n')?;
    let fetched_at: u64 = header.trim().parse().ok()?;
    Some((fetched_at, body.to_string()))
}

fn write_disk_entry(path: &Path, fetched_at: u64, body: &str) {
    let contents = format!("{fetched_at}\n{body}");
    if let Err(e) = std::fs::write(path, contents) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write disk cache entry");
    }
}
