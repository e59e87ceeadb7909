//! Real-time monitor (§4.3): a globally sorted table of tracked symbols, a background
//! polling task, and the on-disk stream module. Grounded in `realtime_register_new_stock`,
//! `realtime_stock_add_record` and `realtime_fetch_query_data` in
//! `original_source/sources/realtime.cpp`.

pub mod stream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::client::{CacheMode, HttpClient};
use crate::error::CoreError;
use crate::symbol::{Symbol, fnv1a};
use stream::{RealtimeStream, StreamRecord};

const STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const BATCH_SIZE: usize = 32;
const BATCH_SLEEP: Duration = Duration::from_secs(60);
const REQUEST_SLEEP: Duration = Duration::from_secs(2);

/// A single tracked symbol's latest value plus its ordered record history (§3
/// `RealtimeStock`).
#[derive(Debug, Clone)]
pub struct RealtimeStock {
    pub key: u64,
    pub code: String,
    pub timestamp: i64,
    pub price: f64,
    pub volume: f64,
    pub refresh: bool,
    /// Sorted strictly increasing by timestamp.
    pub records: Vec<(i64, f64, f64)>,
}

impl RealtimeStock {
    fn new(code: &str) -> Self {
        Self {
            key: fnv1a(code.as_bytes()),
            code: code.to_string(),
            timestamp: 0,
            price: f64::NAN,
            volume: f64::NAN,
            refresh: true,
            records: Vec::new(),
        }
    }

    /// Inserts a record in sorted position unless its timestamp already exists (§4.3
    /// "binary search over the per-stock record vector"). Returns whether it was inserted.
    fn add_record(&mut self, timestamp: i64, price: f64, volume: f64) -> bool {
        match self.records.binary_search_by_key(&timestamp, |r| r.0) {
            Ok(_) => false,
            Err(pos) => {
                if self.timestamp < timestamp {
                    self.price = price;
                    self.volume = volume;
                    self.timestamp = timestamp;
                }
                self.records.insert(pos, (timestamp, price, volume));
                true
            }
        }
    }

    fn is_stale(&self, now: i64) -> bool {
        now.saturating_sub(self.timestamp) >= STALE_AFTER.as_secs() as i64
    }
}

struct Table {
    /// Sorted strictly increasing by `key`, mirroring `_realtime_module->stocks`.
    stocks: Vec<RealtimeStock>,
}

impl Table {
    fn find(&self, key: u64) -> Option<usize> {
        self.stocks.binary_search_by_key(&key, |s| s.key).ok()
    }
}

/// Owns the in-memory real-time table plus the on-disk stream, and drives the background
/// polling task (§4.3 Scheduling model).
pub struct RealtimeMonitor {
    table: RwLock<Table>,
    stream: tokio::sync::Mutex<RealtimeStream>,
    http: Arc<HttpClient>,
    stop: std::sync::atomic::AtomicBool,
}

impl RealtimeMonitor {
    pub fn open(path: PathBuf, http: Arc<HttpClient>) -> Result<Arc<Self>, CoreError> {
        let stream = RealtimeStream::open(&path)?;
        Ok(Arc::new(Self {
            table: RwLock::new(Table { stocks: Vec::new() }),
            stream: tokio::sync::Mutex::new(stream),
            http,
            stop: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    /// Registers a newly-tracked symbol, or marks an already-tracked one for refresh (§4.3
    /// "On 'new stock registered' event").
    pub async fn register(&self, symbol: &Symbol, initial: Option<(i64, f64, f64)>) {
        let key = symbol.hash64();
        let mut guard = self.table.write().await;
        match guard.find(key) {
            Some(idx) => {
                guard.stocks[idx].refresh = true;
                if let Some((ts, price, vol)) = initial {
                    guard.stocks[idx].add_record(ts, price, vol);
                }
            }
            None => {
                let mut stock = RealtimeStock::new(symbol.as_str());
                if let Some((ts, price, vol)) = initial {
                    stock.add_record(ts, price, vol);
                }
                let pos = guard
                    .stocks
                    .binary_search_by_key(&key, |s| s.key)
                    .unwrap_or_else(|e| e);
                guard.stocks.insert(pos, stock);
            }
        }
    }

    #[must_use]
    pub async fn snapshot(&self, symbol: &Symbol) -> Option<RealtimeStock> {
        let guard = self.table.read().await;
        guard.find(symbol.hash64()).map(|idx| guard.stocks[idx].clone())
    }

    pub fn stop(&self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// The background polling loop (§4.3 Scheduling model: 60s between batches, 2s between
    /// individual batch requests). Intended to be spawned once via `tokio::spawn` and run
    /// for the lifetime of the process; exits when [`RealtimeMonitor::stop`] is called.
    pub async fn run(self: Arc<Self>) {
        while !self.should_stop() {
            let due = self.due_symbols().await;
            for batch in due.chunks(BATCH_SIZE) {
                if self.should_stop() {
                    break;
                }
                if let Err(e) = self.poll_batch(batch).await {
                    tracing::warn!(error = %e, "real-time batch poll failed");
                }
                tokio::time::sleep(REQUEST_SLEEP).await;
            }
            tokio::time::sleep(BATCH_SLEEP).await;
        }
    }

    async fn due_symbols(&self) -> Vec<String> {
        let now = now_secs();
        let guard = self.table.read().await;
        guard
            .stocks
            .iter()
            .filter(|s| s.refresh || s.is_stale(now))
            .map(|s| s.code.clone())
            .collect()
    }

    async fn poll_batch(&self, codes: &[String]) -> Result<(), CoreError> {
        if codes.is_empty() {
            return Ok(());
        }
        let (first, rest) = codes.split_first().expect("non-empty batch");
        let joined = rest.iter().fold(first.clone(), |mut acc, c| {
            acc.push(',');
            acc.push_str(c);
            acc
        });
        let path = format!("real-time/{first}");
        let body: OneOrMany<crate::wire::RealTimeResponse> = self
            .http
            .get_json(&path, &[("s", &joined)], CacheMode::Bypass, Duration::from_secs(0))
            .await?;
        let rows = body.into_vec();

        // The provider doesn't echo the ticker on every row in all cases; this crate
        // conservatively zips rows to the requested order, matching single-symbol payload
        // shape (`rows.len() == 1`) and falling back to code-by-position for batches.
        for (idx, row) in rows.iter().enumerate() {
            let Some(code) = codes.get(idx) else { continue };
            if row.close.is_nan() || row.timestamp == 0.0 {
                continue;
            }
            self.ingest_record(code, row.timestamp as i64, row.close, row.volume)
                .await;
        }
        Ok(())
    }

    async fn ingest_record(&self, code: &str, timestamp: i64, price: f64, volume: f64) {
        let key = fnv1a(code.as_bytes());
        let inserted = {
            let mut guard = self.table.write().await;
            let Some(idx) = guard.find(key) else { return };
            guard.stocks[idx].refresh = false;
            guard.stocks[idx].add_record(timestamp, price, volume)
        };
        if inserted {
            let record = StreamRecord::new(timestamp, code, price, volume);
            let mut stream = self.stream.lock().await;
            if let Err(e) = stream.append(&record) {
                tracing::warn!(%code, error = %e, "failed to append real-time record to stream");
            }
        }
    }
}

/// The `real-time/{ticker}` endpoint returns a single JSON object when polling one symbol
/// (the `s=` query param names only the path ticker itself) and a JSON array once `s=` names
/// more than one — both shapes are real responses from the same endpoint, not a malformed
/// one, so both must deserialize.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(v) => v,
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_snapshot_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(HttpClient::builder().disable_disk_cache().build().unwrap());
        let monitor = RealtimeMonitor::open(dir.path().join("rt.bin"), http).unwrap();

        let symbol = Symbol::new("AAPL.US");
        monitor.register(&symbol, Some((1_700_000_000, 150.0, 1000.0))).await;

        let snap = monitor.snapshot(&symbol).await.unwrap();
        assert_eq!(snap.records.len(), 1);
        assert!((snap.price - 150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn duplicate_timestamp_is_not_reinserted() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(HttpClient::builder().disable_disk_cache().build().unwrap());
        let monitor = RealtimeMonitor::open(dir.path().join("rt.bin"), http).unwrap();
        let symbol = Symbol::new("AAPL.US");

        monitor.register(&symbol, Some((1_700_000_000, 150.0, 1000.0))).await;
        monitor.ingest_record("AAPL.US", 1_700_000_000, 151.0, 2000.0).await;

        let snap = monitor.snapshot(&symbol).await.unwrap();
        assert_eq!(snap.records.len(), 1);
    }

    #[test]
    fn add_record_keeps_records_sorted() {
        let mut s = RealtimeStock::new("X.US");
        assert!(s.add_record(200, 1.0, 1.0));
        assert!(s.add_record(100, 2.0, 2.0));
        assert!(s.add_record(300, 3.0, 3.0));
        let timestamps: Vec<i64> = s.records.iter().map(|r| r.0).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
        assert_eq!(s.timestamp, 300);
    }
}
