//! The `Core` context (design note §9 "Global module state"): ties together the stock
//! database, the real-time monitor, the alerts engine and the HTTP fetcher behind one
//! explicitly-constructed handle, replacing the original's per-module process-wide globals
//! (`_alerts_module`, `_realtime_module`, ...).

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::alerts::AlertsEngine;
use crate::client::HttpClient;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::intern::StringTable;
use crate::realtime::RealtimeMonitor;
use crate::stockdb::StockDb;

/// Owns every long-lived component and is constructed once per process (or per test), then
/// passed explicitly to whichever layer needs it — never reached through global statics.
pub struct Core {
    pub stocks: Arc<StockDb>,
    pub strings: Arc<StringTable>,
    pub http: Arc<HttpClient>,
    pub realtime: Option<Arc<RealtimeMonitor>>,
    pub alerts: Mutex<AlertsEngine>,
}

impl Core {
    /// Builds a `Core` from `config`, wiring the HTTP client, string table, stock database
    /// and (unless `--disable-realtime`) the real-time monitor together. Alerts are loaded
    /// from `state_dir/alerts.json` if present (§3 Lifecycles).
    pub fn new(config: &CoreConfig, state_dir: PathBuf) -> Result<Self, CoreError> {
        let http = Arc::new(
            HttpClient::builder()
                .backend(config.backend_url())
                .api_token(config.api_token.clone())
                .build()?,
        );
        let strings = Arc::new(StringTable::new());
        let stocks = Arc::new(StockDb::new(Arc::clone(&strings), Arc::clone(&http)));

        std::fs::create_dir_all(&state_dir).map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;

        let realtime = if config.disable_realtime {
            None
        } else {
            Some(RealtimeMonitor::open(state_dir.join("realtime.stream"), Arc::clone(&http))?)
        };

        let alerts = AlertsEngine::load(&state_dir.join("alerts.json"))?;

        Ok(Self {
            stocks,
            strings,
            http,
            realtime,
            alerts: Mutex::new(alerts),
        })
    }

    /// Spawns the real-time monitor's background polling task, if enabled (§4.3, §5 "one
    /// dedicated background thread for the real-time monitor" — modeled as a `tokio::spawn`
    /// task per the ambient-stack notes in `SPEC_FULL.md` §5).
    pub fn spawn_realtime_task(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.realtime.clone().map(|monitor| tokio::spawn(monitor.run()))
    }

    /// Persists the alerts list (§3 Lifecycles "flushed on shutdown"). Call during an
    /// orderly shutdown sequence.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        if let Some(realtime) = &self.realtime {
            realtime.stop();
        }
        self.alerts.lock().await.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_core_with_realtime_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::default();
        let core = Core::new(&config, dir.path().to_path_buf()).unwrap();
        assert!(core.realtime.is_some());
        core.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn disable_realtime_flag_skips_monitor_construction() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            disable_realtime: true,
            ..CoreConfig::default()
        };
        let core = Core::new(&config, dir.path().to_path_buf()).unwrap();
        assert!(core.realtime.is_none());
    }
}
