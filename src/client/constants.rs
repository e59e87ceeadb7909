//! Centralized constants for default endpoints and UA, adapted from the teacher's
//! `core::client::constants` to the `api_token`-based provider described in §6.

pub(crate) const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Default market-data provider base URL. Overridable via `--backend` (§6).
pub(crate) const DEFAULT_BACKEND: &str = "https://eodhistoricaldata.com/api/";

/// Default in-memory/disk cache TTL applied when a call site doesn't override it.
pub(crate) const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;

/// Cache TTL for `fundamentals/{ticker}` responses (§4.1 "FUNDAMENTALS ... cache 3 days").
pub(crate) const FUNDAMENTALS_CACHE_TTL_SECS: u64 = 3 * 24 * 60 * 60;
