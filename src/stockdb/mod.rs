//! Stock database and handle allocation (§4.1 "Stock Database & Handle Allocation").
//!
//! A single growable slot arena plus a hash index (`id -> slot index`), both protected by
//! one reader-writer lock (§3 Invariants, §5). Slot index `0` is reserved as a sentinel, so
//! that a default-initialized `Handle` never aliases a real slot.

pub mod ingest;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::client::{CacheMode, HttpClient, default_ttl, fundamentals_ttl};
use crate::error::CoreError;
use crate::fetchlevel::FetchLevel;
use crate::intern::{Lazy, StringTable, StringTableSymbol};
use crate::model::DayResult;
use crate::symbol::Symbol;
use crate::wire::{EodDay, FundamentalsResponse, RealTimeResponse, TechnicalDay};

const INITIAL_CAPACITY: usize = 16;
const MAX_FETCH_ERRORS: u32 = 20;

/// Outcome of a call to [`StockDb::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Every requested level was already resolved.
    Ok,
    /// At least one fetch was scheduled; levels are not yet all resolved.
    Resolving,
    /// The stock has accumulated too many fetch errors (§3 Invariants: `fetch_errors >= 20`).
    InvalidRequest,
}

/// A reference to a stock slot. Never stores a pointer (design note §9) — only the stable
/// `id`, re-resolved against the hash index on every access so that slot storage can move
/// during growth without invalidating outstanding handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub id: u64,
    pub code_symbol: StringTableSymbol,
}

impl Handle {
    /// The null handle, matching a lookup miss or an empty symbol.
    pub const NULL: Handle = Handle {
        id: 0,
        code_symbol: StringTableSymbol::NULL,
    };

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

/// One entry in the slot arena. Descriptor strings are interned (§9 `string_table_symbol_t`);
/// lazily-computed scalars use [`Lazy`] (§9 `double_option_t`/`string_option_t`).
#[derive(Debug, Clone)]
pub struct Stock {
    pub id: u64,
    pub code_symbol: StringTableSymbol,

    pub fetch_level: FetchLevel,
    pub resolved_level: FetchLevel,
    pub fetch_errors: u32,
    pub last_update_time: Instant,

    pub name: StringTableSymbol,
    pub country: StringTableSymbol,
    pub currency: StringTableSymbol,
    pub r#type: StringTableSymbol,
    pub exchange: StringTableSymbol,
    pub url: StringTableSymbol,
    pub logo: StringTableSymbol,
    pub updated_at: StringTableSymbol,
    pub description: Lazy<Arc<str>>,

    pub shares_count: f64,
    pub pe: f64,
    pub peg: f64,
    pub beta: f64,
    pub low_52: f64,
    pub high_52: f64,
    pub dma_50: f64,
    pub dma_200: f64,
    pub dividends_yield: f64,
    pub profit_margin: f64,
    pub short_ratio: f64,
    pub short_percent: f64,
    pub trailing_pe: f64,
    pub forward_pe: f64,
    pub revenue_per_share_ttm: f64,
    pub diluted_eps_ttm: f64,
    pub ws_target: f64,

    pub current: DayResult,
    pub previous: Vec<DayResult>,
    /// Newest-first (§3 Invariants: "sorted strictly decreasing by date").
    pub history: Vec<DayResult>,
}

impl Stock {
    fn new(id: u64, code_symbol: StringTableSymbol) -> Self {
        Self {
            id,
            code_symbol,
            fetch_level: FetchLevel::empty(),
            resolved_level: FetchLevel::empty(),
            fetch_errors: 0,
            last_update_time: Instant::now(),
            name: StringTableSymbol::NULL,
            country: StringTableSymbol::NULL,
            currency: StringTableSymbol::NULL,
            r#type: StringTableSymbol::NULL,
            exchange: StringTableSymbol::NULL,
            url: StringTableSymbol::NULL,
            logo: StringTableSymbol::NULL,
            updated_at: StringTableSymbol::NULL,
            description: Lazy::Pending,
            shares_count: f64::NAN,
            pe: f64::NAN,
            peg: f64::NAN,
            beta: f64::NAN,
            low_52: f64::NAN,
            high_52: f64::NAN,
            dma_50: f64::NAN,
            dma_200: f64::NAN,
            dividends_yield: f64::NAN,
            profit_margin: f64::NAN,
            short_ratio: f64::NAN,
            short_percent: f64::NAN,
            trailing_pe: f64::NAN,
            forward_pe: f64::NAN,
            revenue_per_share_ttm: f64::NAN,
            diluted_eps_ttm: f64::NAN,
            ws_target: f64::NAN,
            current: DayResult::default(),
            previous: Vec::new(),
            history: Vec::new(),
        }
    }

    /// A bit is either in flight or resolved, never both (§3 Invariants).
    fn mark_fetched(&mut self, level: FetchLevel) {
        self.fetch_level |= level;
    }

    fn mark_resolved(&mut self, level: FetchLevel) {
        self.resolved_level |= level;
        self.fetch_level &= !level;
        self.last_update_time = Instant::now();
    }

    fn mark_failed(&mut self, level: FetchLevel) {
        self.fetch_level &= !level;
        self.fetch_errors += 1;
    }

    #[must_use]
    pub fn has_resolved(&self, level: FetchLevel) -> bool {
        self.resolved_level.contains(level)
    }
}

struct Inner {
    slots: Vec<Stock>,
    index: HashMap<u64, u32>,
}

impl Inner {
    fn with_capacity(cap: usize) -> Self {
        // Slot 0 is the reserved sentinel (§4.1 "Slot index 0 is reserved").
        let mut slots = Vec::with_capacity(cap);
        slots.push(Stock::new(0, StringTableSymbol::NULL));
        Self {
            slots,
            index: HashMap::with_capacity(cap),
        }
    }
}

/// Slot arena + hash index behind a single reader-writer lock (§4.1 Concurrency),
/// reachable by every dispatcher task via `Arc<StockDb>`.
pub struct StockDb {
    inner: RwLock<Inner>,
    strings: Arc<StringTable>,
    http: Arc<HttpClient>,
}

impl StockDb {
    #[must_use]
    pub fn new(strings: Arc<StringTable>, http: Arc<HttpClient>) -> Self {
        Self {
            inner: RwLock::new(Inner::with_capacity(INITIAL_CAPACITY)),
            strings,
            http,
        }
    }

    /// Pure, no I/O: interns the symbol and computes its stable id (§4.1).
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidHandle`] for an empty symbol.
    pub fn initialize_handle(&self, symbol: &Symbol) -> Result<Handle, CoreError> {
        if symbol.as_str().is_empty() {
            return Err(CoreError::InvalidHandle);
        }
        let code_symbol = self.strings.intern(symbol.as_str());
        Ok(Handle {
            id: symbol.hash64(),
            code_symbol,
        })
    }

    /// Initializes a handle then immediately issues `resolve(handle, levels)` (§4.1).
    pub async fn request(
        self: &Arc<Self>,
        symbol: &Symbol,
        levels: FetchLevel,
    ) -> Result<(Handle, Status), CoreError> {
        let handle = self.initialize_handle(symbol)?;
        let status = self.resolve(handle, symbol, levels).await?;
        Ok((handle, status))
    }

    /// Ensures the requested level bits transition toward `resolved_level` (§4.1).
    /// Idempotent: already-resolved bits are left untouched; in-flight bits are not
    /// re-scheduled (§4.1 "at-most-one-in-flight fetch per (stock, level) pair").
    pub async fn resolve(
        self: &Arc<Self>,
        handle: Handle,
        symbol: &Symbol,
        levels: FetchLevel,
    ) -> Result<Status, CoreError> {
        if handle.is_null() {
            return Err(CoreError::InvalidHandle);
        }

        let missing = {
            let mut guard = self.inner.write().await;
            let slot_idx = Self::ensure_slot(&mut guard, handle);
            let slot = &mut guard.slots[slot_idx as usize];

            if slot.fetch_errors >= MAX_FETCH_ERRORS {
                return Ok(Status::InvalidRequest);
            }

            let already = slot.fetch_level | slot.resolved_level;
            if already.contains(levels) {
                return Ok(Status::Ok);
            }

            let missing = levels & !already;
            for level in FetchLevel::atoms() {
                if missing.contains(*level) {
                    slot.mark_fetched(*level);
                }
            }
            missing
        };

        for level in FetchLevel::atoms() {
            if missing.contains(*level) {
                self.schedule_fetch(handle, symbol.clone(), *level);
            }
        }

        Ok(Status::Resolving)
    }

    /// Inserts a slot for `handle.id` if one doesn't already exist, growing the arena (and
    /// rebuilding the hash index) if the arena is full (§4.1 "Growth policy").
    fn ensure_slot(inner: &mut Inner, handle: Handle) -> u32 {
        if let Some(&idx) = inner.index.get(&handle.id) {
            return idx;
        }
        if inner.slots.len() >= inner.slots.capacity() {
            Self::grow(inner);
        }
        let idx = u32::try_from(inner.slots.len()).expect("stock db slot overflow");
        inner.slots.push(Stock::new(handle.id, handle.code_symbol));
        inner.index.insert(handle.id, idx);
        idx
    }

    /// Doubles arena capacity and rebuilds the hash index (§4.1). Previously-issued handles
    /// stay valid: they carry only `id`, never a slot pointer (design note §9); old history
    /// vectors for slots that move are *not* dropped here — `Vec<Stock>`'s own growth already
    /// relocates slots in place without deallocating the `Stock::history` buffers inside them.
    fn grow(inner: &mut Inner) {
        let new_cap = (inner.slots.capacity() * 2).max(INITIAL_CAPACITY);
        inner.slots.reserve(new_cap - inner.slots.len());
        inner.index = inner
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id, u32::try_from(i).expect("slot index overflow")))
            .collect();
    }

    fn schedule_fetch(self: &Arc<Self>, handle: Handle, symbol: Symbol, level: FetchLevel) {
        let db = Arc::clone(self);
        tokio::spawn(async move {
            let result = db.fetch_level(&symbol, level).await;
            let mut guard = db.inner.write().await;
            let Some(&idx) = guard.index.get(&handle.id) else {
                return;
            };
            let to_refetch = match result {
                Ok(()) => {
                    let slot = &mut guard.slots[idx as usize];
                    slot.mark_resolved(level);
                    if level == FetchLevel::EOD {
                        slot.mark_resolved(FetchLevel::TECHNICAL_INDEXED_PRICE);
                    }
                    // §4.1: resolving TECHNICAL_EOD re-fetches EOD and TECHNICAL_INDEXED_PRICE
                    // if they were already resolved, since TECHNICAL_EOD overwrites the same
                    // `DayResult::close` field those levels depend on.
                    let mut to_refetch = FetchLevel::empty();
                    if level == FetchLevel::TECHNICAL_EOD {
                        for dep in [FetchLevel::EOD, FetchLevel::TECHNICAL_INDEXED_PRICE] {
                            if slot.has_resolved(dep) {
                                slot.resolved_level &= !dep;
                                to_refetch |= dep;
                            }
                        }
                    }
                    to_refetch
                }
                Err(e) => {
                    let slot = &mut guard.slots[idx as usize];
                    slot.mark_failed(level);
                    tracing::warn!(
                        symbol = %symbol,
                        ?level,
                        fetch_errors = slot.fetch_errors,
                        error = %e,
                        "fetch failed for level"
                    );
                    FetchLevel::empty()
                }
            };
            drop(guard);

            if !to_refetch.is_empty()
                && let Err(e) = db.resolve(handle, &symbol, to_refetch).await
            {
                tracing::warn!(
                    symbol = %symbol,
                    ?to_refetch,
                    error = %e,
                    "failed to re-trigger dependent fetch after TECHNICAL_EOD resolved"
                );
            }
        });
    }

    async fn fetch_level(self: &Arc<Self>, symbol: &Symbol, level: FetchLevel) -> Result<(), CoreError> {
        match level {
            FetchLevel::REALTIME => self.fetch_realtime(symbol).await,
            FetchLevel::FUNDAMENTALS => self.fetch_fundamentals(symbol).await,
            FetchLevel::EOD => self.fetch_eod(symbol, FetchLevel::EOD).await,
            FetchLevel::TECHNICAL_EOD => self.fetch_eod(symbol, FetchLevel::TECHNICAL_EOD).await,
            FetchLevel::TECHNICAL_INDEXED_PRICE => self.fetch_indexed_price(symbol).await,
            FetchLevel::TECHNICAL_BBANDS => self.fetch_technical_bbands(symbol).await,
            _ => self.fetch_technical_single(symbol, level).await,
        }
    }

    async fn fetch_realtime(self: &Arc<Self>, symbol: &Symbol) -> Result<(), CoreError> {
        let path = format!("real-time/{}", symbol.as_str());
        let resp: RealTimeResponse = self
            .http
            .get_json(&path, &[], CacheMode::Use, default_ttl())
            .await?;

        let mut guard = self.inner.write().await;
        let Some(&idx) = guard.index.get(&symbol.hash64()) else {
            return Ok(());
        };
        let slot = &mut guard.slots[idx as usize];
        ingest::apply_realtime(slot, &resp);
        Ok(())
    }

    async fn fetch_fundamentals(self: &Arc<Self>, symbol: &Symbol) -> Result<(), CoreError> {
        let path = format!("fundamentals/{}", symbol.as_str());
        let resp: FundamentalsResponse = self
            .http
            .get_json(&path, &[], CacheMode::Use, fundamentals_ttl())
            .await?;

        let mut guard = self.inner.write().await;
        let Some(&idx) = guard.index.get(&symbol.hash64()) else {
            return Ok(());
        };
        let slot = &mut guard.slots[idx as usize];
        ingest::apply_fundamentals(slot, &resp, &self.strings);
        Ok(())
    }

    async fn fetch_eod(self: &Arc<Self>, symbol: &Symbol, level: FetchLevel) -> Result<(), CoreError> {
        let path = format!("eod/{}", symbol.as_str());
        let params: &[(&str, &str)] = if level == FetchLevel::TECHNICAL_EOD {
            &[("order", "d"), ("function", "splitadjusted")]
        } else {
            &[("order", "d")]
        };
        let days: Vec<EodDay> = self
            .http
            .get_json(&path, params, CacheMode::Use, default_ttl())
            .await?;

        let mut guard = self.inner.write().await;
        let Some(&idx) = guard.index.get(&symbol.hash64()) else {
            return Ok(());
        };
        let slot = &mut guard.slots[idx as usize];
        ingest::apply_eod(slot, &days, level);
        Ok(())
    }

    async fn fetch_indexed_price(self: &Arc<Self>, symbol: &Symbol) -> Result<(), CoreError> {
        let deadline = Instant::now() + std::time::Duration::from_secs(60);
        loop {
            let guard = self.inner.read().await;
            if let Some(&idx) = guard.index.get(&symbol.hash64()) {
                let slot = &guard.slots[idx as usize];
                if slot.has_resolved(FetchLevel::EOD) || slot.has_resolved(FetchLevel::TECHNICAL_EOD) {
                    break;
                }
            }
            drop(guard);
            if Instant::now() >= deadline {
                tracing::warn!(symbol = %symbol, "timed out waiting for EOD before indexing prices");
                return Err(CoreError::EvaluationTimeout(std::time::Duration::from_secs(60)));
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }

        let path = format!("eod/{}", symbol.as_str());
        let days: Vec<EodDay> = self
            .http
            .get_json(&path, &[("order", "d")], CacheMode::Use, default_ttl())
            .await?;

        let mut guard = self.inner.write().await;
        let Some(&idx) = guard.index.get(&symbol.hash64()) else {
            return Ok(());
        };
        let slot = &mut guard.slots[idx as usize];
        ingest::apply_indexed_price(slot, &days);
        Ok(())
    }

    async fn fetch_technical_single(self: &Arc<Self>, symbol: &Symbol, level: FetchLevel) -> Result<(), CoreError> {
        let Some(function) = level.technical_function_name() else {
            return Err(CoreError::InvalidArgument(format!(
                "{level:?} is not a technical endpoint level"
            )));
        };
        let path = format!("technical/{}", symbol.as_str());
        let days: Vec<TechnicalDay> = self
            .http
            .get_json(
                &path,
                &[("order", "d"), ("function", function)],
                CacheMode::Use,
                std::time::Duration::from_secs(12 * 3600),
            )
            .await?;

        let mut guard = self.inner.write().await;
        let Some(&idx) = guard.index.get(&symbol.hash64()) else {
            return Ok(());
        };
        let slot = &mut guard.slots[idx as usize];
        ingest::apply_technical_single(slot, &days, level);
        Ok(())
    }

    async fn fetch_technical_bbands(self: &Arc<Self>, symbol: &Symbol) -> Result<(), CoreError> {
        let path = format!("technical/{}", symbol.as_str());
        let days: Vec<TechnicalDay> = self
            .http
            .get_json(
                &path,
                &[("order", "d"), ("function", "bbands")],
                CacheMode::Use,
                std::time::Duration::from_secs(12 * 3600),
            )
            .await?;

        let mut guard = self.inner.write().await;
        let Some(&idx) = guard.index.get(&symbol.hash64()) else {
            return Ok(());
        };
        let slot = &mut guard.slots[idx as usize];
        ingest::apply_technical_bbands(slot, &days);
        Ok(())
    }

    /// Exposes the underlying HTTP client for call sites that need to issue ad hoc requests
    /// outside the standard per-level ingestion path (e.g. the expression evaluator's `F()`).
    #[must_use]
    pub fn http_client(&self) -> &HttpClient {
        &self.http
    }

    /// Looks up a stock by handle, cloning its current state. Missing → a sentinel all-NaN
    /// stock (§3 "missing -> returns a sentinel all-NaN stock"), never an error.
    pub async fn get(&self, handle: Handle) -> Stock {
        let guard = self.inner.read().await;
        if let Some(&idx) = guard.index.get(&handle.id) {
            return guard.slots[idx as usize].clone();
        }
        Stock::new(0, StringTableSymbol::NULL)
    }
}
