//! Alerts engine (§4.5), grounded in `original_source/sources/alerts.cpp`
//! (`expr_evaluator_t`, `alerts_run_evaluators`, `alerts_add_price_change`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::expr::{self, ExprContext, ExprValue};
use crate::stockdb::StockDb;
use crate::symbol::Symbol;

/// Minimum spacing between successive alert evaluation ticks (§4.5 "Skip evaluation if last
/// evaluation occurred less than 5 seconds ago").
const MIN_TICK_SPACING_SECS: u64 = 5;
/// Default per-alert re-evaluation frequency for newly created price alerts (§4.1 comment
/// `frequency{60*5}`).
const DEFAULT_FREQUENCY_SECS: f64 = 60.0 * 5.0;

/// State per alert (§4.5, §6 "Alerts persisted file").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvaluator {
    pub title: String,
    pub description: String,
    pub expression: String,
    pub frequency: f64,
    pub creation_date: i64,
    pub last_run_time: i64,
    pub triggered_time: i64,
    pub discarded: bool,
}

impl AlertEvaluator {
    fn due(&self, now: i64) -> bool {
        if self.triggered_time != 0 || self.discarded {
            return false;
        }
        (now - self.last_run_time) as f64 >= self.frequency
    }
}

/// Which direction a price-change alert watches (§4.5 `add_price_increase`/
/// `add_price_decrease`, generalized as `add_price_change(symbol, price, op)` per
/// `spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceChangeOp {
    GreaterOrEqual,
    LessOrEqual,
}

impl PriceChangeOp {
    fn token(self) -> &'static str {
        match self {
            PriceChangeOp::GreaterOrEqual => ">=",
            PriceChangeOp::LessOrEqual => "<=",
        }
    }
}

/// Round-robin evaluator over a growable list of [`AlertEvaluator`]s (§4.5).
pub struct AlertsEngine {
    evaluators: Vec<AlertEvaluator>,
    cursor: usize,
    last_evaluation: Option<std::time::Instant>,
    path: Option<PathBuf>,
}

impl AlertsEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            evaluators: Vec::new(),
            cursor: 0,
            last_evaluation: None,
            path: None,
        }
    }

    /// Loads alerts from a persisted JSON file at startup (§3 Lifecycles).
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let evaluators = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| CoreError::InvalidArgument(e.to_string()))?;
            serde_json::from_str(&text)?
        } else {
            Vec::new()
        };
        Ok(Self {
            evaluators,
            cursor: 0,
            last_evaluation: None,
            path: Some(path.to_path_buf()),
        })
    }

    /// Flushes the current alert list to its persisted file (§3 Lifecycles "flushed on
    /// shutdown").
    pub fn save(&self) -> Result<(), CoreError> {
        let Some(path) = &self.path else { return Ok(()) };
        let text = serde_json::to_string_pretty(&self.evaluators)?;
        std::fs::write(path, text).map_err(|e| CoreError::InvalidArgument(e.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    #[must_use]
    pub fn evaluators(&self) -> &[AlertEvaluator] {
        &self.evaluators
    }

    /// Appends (title, description, price) watcher for `symbol`, removing any existing alert
    /// whose expression starts with the same `S("symbol", price)OP` prefix (§4.5
    /// `alerts_add_price_change`'s "delete current expression if found").
    pub async fn add_price_change(
        &mut self,
        stocks: &Arc<StockDb>,
        symbol: &Symbol,
        price: f64,
        op: PriceChangeOp,
    ) -> Result<(), CoreError> {
        let _handle = stocks.initialize_handle(symbol)?;
        stocks
            .request(symbol, crate::fetchlevel::FetchLevel::FUNDAMENTALS)
            .await?;
        let title_name = symbol.as_str().to_string();

        let prefix = format!("S(\"{}\", price){}", symbol.as_str(), op.token());
        self.evaluators.retain(|e| !e.expression.starts_with(&prefix));

        let expression = format!("{prefix}{price}");
        let description = format!("{} price reached {:.2} $", title_name, price);

        self.evaluators.insert(
            0,
            AlertEvaluator {
                title: symbol.as_str().to_string(),
                description,
                expression,
                frequency: DEFAULT_FREQUENCY_SECS,
                creation_date: now_secs(),
                last_run_time: 0,
                triggered_time: 0,
                discarded: false,
            },
        );
        Ok(())
    }

    /// Runs at most one due alert per call (§4.5 "Alert evaluation is strictly sequential
    /// (one per tick)"), throttled to at most once per 5 seconds (§4.5).
    pub async fn tick(&mut self, stocks: &Arc<StockDb>) -> Result<Option<usize>, CoreError> {
        if let Some(last) = self.last_evaluation
            && last.elapsed().as_secs() < MIN_TICK_SPACING_SECS
        {
            return Ok(None);
        }
        if self.evaluators.is_empty() {
            return Ok(None);
        }

        let now = now_secs();
        let n = self.evaluators.len();
        for _ in 0..n {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % n;

            if !self.evaluators[idx].due(now) {
                continue;
            }
            self.evaluators[idx].last_run_time = now;

            if self.evaluators[idx].expression.is_empty() {
                continue;
            }

            let mut ctx = ExprContext::new(Arc::clone(stocks));
            ctx.set_global("$TITLE", ExprValue::Text(Arc::from(self.evaluators[idx].title.as_str())));
            ctx.set_global(
                "$DESCRIPTION",
                ExprValue::Text(Arc::from(self.evaluators[idx].description.as_str())),
            );

            let expression = self.evaluators[idx].expression.clone();
            match expr::eval(&expression, &ctx).await {
                Ok(result) if result.is_truthy() => {
                    self.evaluators[idx].discarded = false;
                    self.evaluators[idx].triggered_time = now;
                    tracing::info!(
                        title = %self.evaluators[idx].title,
                        description = %self.evaluators[idx].description,
                        "alert triggered"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    // §7 Propagation policy: "catch; leave triggered_time == 0" so the alert
                    // retries after `frequency_secs`.
                    tracing::warn!(title = %self.evaluators[idx].title, error = %e, "alert expression failed");
                }
            }

            self.last_evaluation = Some(std::time::Instant::now());
            return Ok(Some(idx));
        }
        Ok(None)
    }
}

impl Default for AlertsEngine {
    fn default() -> Self {
        Self::new()
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
    use crate::client::HttpClient;
    use crate::intern::StringTable;

    fn test_db() -> Arc<StockDb> {
        let http = Arc::new(HttpClient::builder().disable_disk_cache().build().unwrap());
        Arc::new(StockDb::new(Arc::new(StringTable::new()), http))
    }

    #[test]
    fn save_and_load_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");

        let mut engine = AlertsEngine::load(&path).unwrap();
        engine.evaluators.push(AlertEvaluator {
            title: "U.US".to_string(),
            description: "desc".to_string(),
            expression: "S(\"U.US\", price)>=45".to_string(),
            frequency: 300.0,
            creation_date: 1,
            last_run_time: 0,
            triggered_time: 0,
            discarded: false,
        });
        engine.save().unwrap();

        let reloaded = AlertsEngine::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.evaluators()[0].expression, "S(\"U.US\", price)>=45");
    }

    #[tokio::test]
    async fn repeated_price_change_replaces_earlier_alert_for_same_symbol() {
        let db = test_db();
        let mut engine = AlertsEngine::new();
        let symbol = Symbol::new("BB.TO");

        engine
            .add_price_change(&db, &symbol, 5.0, PriceChangeOp::LessOrEqual)
            .await
            .unwrap();
        engine
            .add_price_change(&db, &symbol, 4.5, PriceChangeOp::LessOrEqual)
            .await
            .unwrap();

        assert_eq!(engine.len(), 1);
        assert!(engine.evaluators()[0].expression.starts_with("S(\"BB.TO\", price)<="));
        assert!(engine.evaluators()[0].expression.ends_with("4.5"));
    }

    #[tokio::test]
    async fn tick_evaluates_truthy_expression_and_sets_triggered_time() {
        let db = test_db();
        let mut engine = AlertsEngine::new();
        engine.evaluators.push(AlertEvaluator {
            title: "X".to_string(),
            description: "d".to_string(),
            expression: "1 >= 0".to_string(),
            frequency: 0.0,
            creation_date: 0,
            last_run_time: 0,
            triggered_time: 0,
            discarded: false,
        });

        let evaluated = engine.tick(&db).await.unwrap();
        assert_eq!(evaluated, Some(0));
        assert_ne!(engine.evaluators()[0].triggered_time, 0);
    }
}
