//! # stockdb
//!
//! A stock resolution engine: a handle-based, lazily-resolved stock database backed by a
//! market-data HTTP provider, a real-time price monitor with an on-disk append log, an
//! expression language for deriving values from resolved stocks and reports, and an alerts
//! engine built on top of that expression language.
//!
//! ## Overview
//!
//! Callers never hold a stock by pointer or index. They ask [`stockdb::StockDb`] for a
//! [`stockdb::Handle`] (stable across the database's internal growth), then call
//! [`stockdb::StockDb::resolve`] to ask for specific [`fetchlevel::FetchLevel`] bits. Each
//! level is fetched independently and asynchronously; data for a level already resolved is
//! never re-fetched, and at most one fetch is ever in flight per (stock, level) pair.
//!
//! [`expr`] implements the small expression language used by alerts and reports to query
//! resolved stock fields (`S(...)`, `F(...)`), report data (`R(...)`), and tabular layouts
//! (`TABLE(...)`). [`alerts`] builds a round-robin alert evaluator on top of it.
//!
//! [`context::Core`] is the single entry point gluing every long-lived component together;
//! construct one per process and pass it explicitly to whichever layer needs it.
//!
//! ```no_run
//! use stockdb::config::CoreConfig;
//! use stockdb::context::Core;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::default();
//!     let core = Core::new(&config, std::path::PathBuf::from("./state"))?;
//!     core.spawn_realtime_task();
//!
//!     let symbol = stockdb::symbol::Symbol::new("AAPL.US");
//!     let (handle, _status) = core
//!         .stocks
//!         .request(&symbol, stockdb::fetchlevel::FetchLevel::FUNDAMENTALS)
//!         .await?;
//!     let stock = core.stocks.get(handle).await;
//!     println!("pe = {}", stock.pe);
//!
//!     core.shutdown().await?;
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

/// Deterministic hashing and the canonical `CODE.EXCHANGE` symbol type.
pub mod symbol;

/// The core error taxonomy (§7).
pub mod error;

/// Per-level fetch bitflags and the set of individually-addressable fetch atoms.
pub mod fetchlevel;

/// String interning and single-shot lazy scalar memoization.
pub mod intern;

/// The per-day OHLCV + derived technicals value type.
pub mod model;

/// Wire-format structs for the provider's JSON responses.
pub mod wire;

/// The HTTP/JSON fetch layer: client, response cache, and retry policy.
pub mod client;

/// The stock database: handle allocation, growth, and per-level ingestion.
pub mod stockdb;

/// The real-time monitor and its on-disk append-only stream.
pub mod realtime;

/// The expression language used by alerts, reports, and ad hoc queries.
pub mod expr;

/// The alerts engine built on top of the expression language.
pub mod alerts;

/// The persisted reports data model.
pub mod reports;

/// The persisted chart-pattern annotations data model.
pub mod patterns;

/// The news-feed fetch wrapper.
pub mod news;

/// Command-line / process configuration.
pub mod config;

/// The `Core` context tying every long-lived component together.
pub mod context;

pub use context::Core;
pub use error::CoreError;
pub use fetchlevel::FetchLevel;
pub use stockdb::{Handle, Status, Stock, StockDb};
pub use symbol::Symbol;
