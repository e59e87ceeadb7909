//! Core configuration (§6 "Environment / CLI flags consumed by the core"), parsed via
//! `clap::Parser` per the ambient-stack note in `SPEC_FULL.md` §6.

use clap::Parser;
use url::Url;

use crate::client::constants::DEFAULT_BACKEND;

/// Command-line configuration for the core (§6): `--backend`, `--disable-realtime`,
/// `--google-apis-key`, plus a stub test-mode flag carried for compatibility with the
/// original's "standard test flags" (no behavior is specified for it beyond the flag
/// itself).
#[derive(Debug, Clone, Parser)]
#[command(name = "stockdb", about = "Stock resolution engine core configuration")]
pub struct CoreConfig {
    /// Market-data provider base URL.
    #[arg(long, default_value = DEFAULT_BACKEND)]
    pub backend: String,

    /// Disables the real-time monitor's background polling task.
    #[arg(long)]
    pub disable_realtime: bool,

    /// API key forwarded to Google-backed collaborators (news summarization, geocoding).
    /// Unused by the core itself.
    #[arg(long)]
    pub google_apis_key: Option<String>,

    /// Accepted for compatibility with external test harnesses; has no defined behavior.
    #[arg(long)]
    pub test_mode: bool,

    /// Provider API token, appended as `api_token=` on every request (§6).
    #[arg(long, default_value = "demo")]
    pub api_token: String,
}

impl CoreConfig {
    /// Parses `backend` into a [`Url`], falling back to the default backend on a malformed
    /// value rather than failing CLI parsing outright.
    #[must_use]
    pub fn backend_url(&self) -> Url {
        Url::parse(&self.backend).unwrap_or_else(|_| Url::parse(DEFAULT_BACKEND).expect("default backend is valid"))
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            disable_realtime: false,
            google_apis_key: None,
            test_mode: false,
            api_token: "demo".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_minimal_args() {
        let cfg = CoreConfig::parse_from(["stockdb"]);
        assert_eq!(cfg.backend, DEFAULT_BACKEND);
        assert!(!cfg.disable_realtime);
    }

    #[test]
    fn parses_backend_and_flags() {
        let cfg = CoreConfig::parse_from([
            "stockdb",
            "--backend",
            "https://example.test/api/",
            "--disable-realtime",
            "--google-apis-key",
            "KEY",
        ]);
        assert_eq!(cfg.backend, "https://example.test/api/");
        assert!(cfg.disable_realtime);
        assert_eq!(cfg.google_apis_key.as_deref(), Some("KEY"));
    }

    #[test]
    fn round_trip_config_produces_identical_representation() {
        let cfg = CoreConfig::default();
        let url = cfg.backend_url();
        assert_eq!(url.as_str(), DEFAULT_BACKEND);
    }
}
