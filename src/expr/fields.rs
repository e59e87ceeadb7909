//! Field dispatch tables for `S`, `F`, `R` and `FIELDS` (§4.4), modeled as static tables per
//! design note §9 ("Generic expression field dispatch"), grounded in
//! `original_source/sources/report_expr.cpp`'s `report_field_property_evalutors` table shape.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::client::CacheMode;
use crate::error::CoreError;
use crate::fetchlevel::FetchLevel;
use crate::stockdb::{Handle, Stock};

use super::{Ast, ExprContext, ExprValue, eval_arg, symbol_from_text, text_arg};

const HISTORY_SPIN_WAIT: Duration = Duration::from_secs(30);

/// One of the 35 stock-wide fields plus 21+ per-day fields exposed by `S` (§4.4).
struct StockField {
    name: &'static str,
    required_level: FetchLevel,
    current: fn(&Stock) -> ExprValue,
    history: fn(&crate::model::DayResult) -> ExprValue,
}

fn num(v: f64) -> ExprValue {
    ExprValue::Number(v)
}

/// The field table. Day-level fields (`open`, `close`, ...) are valid both as "latest value"
/// (read off `current`) and as history lookups (`S(code, field, date)`); stock-wide fields
/// (`pe`, `beta`, ...) only make sense as "latest value" and return `NaN` from `history`.
static STOCK_FIELDS: &[StockField] = &[
    StockField { name: "price", required_level: FetchLevel::REALTIME, current: |s| num(s.current.close), history: |d| num(d.close) },
    StockField { name: "open", required_level: FetchLevel::REALTIME, current: |s| num(s.current.open), history: |d| num(d.open) },
    StockField { name: "close", required_level: FetchLevel::REALTIME, current: |s| num(s.current.close), history: |d| num(d.close) },
    StockField { name: "low", required_level: FetchLevel::REALTIME, current: |s| num(s.current.low), history: |d| num(d.low) },
    StockField { name: "high", required_level: FetchLevel::REALTIME, current: |s| num(s.current.high), history: |d| num(d.high) },
    StockField { name: "volume", required_level: FetchLevel::REALTIME, current: |s| num(s.current.volume), history: |d| num(d.volume) },
    StockField { name: "change", required_level: FetchLevel::REALTIME, current: |s| num(s.current.change), history: |d| num(d.change) },
    StockField { name: "change_p", required_level: FetchLevel::REALTIME, current: |s| num(s.current.change_p), history: |d| num(d.change_p) },
    StockField { name: "change_p_high", required_level: FetchLevel::EOD, current: |s| num(s.current.change_p_high), history: |d| num(d.change_p_high) },
    StockField { name: "previous_close", required_level: FetchLevel::REALTIME, current: |s| num(s.current.previous_close), history: |d| num(d.previous_close) },
    StockField { name: "adjusted_close", required_level: FetchLevel::EOD, current: |s| num(s.current.adjusted_close), history: |d| num(d.adjusted_close) },
    StockField { name: "price_factor", required_level: FetchLevel::TECHNICAL_INDEXED_PRICE, current: |s| num(s.current.price_factor), history: |d| num(d.price_factor) },
    StockField { name: "sma", required_level: FetchLevel::TECHNICAL_SMA, current: |s| num(s.current.sma), history: |d| num(d.sma) },
    StockField { name: "ema", required_level: FetchLevel::TECHNICAL_EMA, current: |s| num(s.current.ema), history: |d| num(d.ema) },
    StockField { name: "wma", required_level: FetchLevel::TECHNICAL_WMA, current: |s| num(s.current.wma), history: |d| num(d.wma) },
    StockField { name: "uband", required_level: FetchLevel::TECHNICAL_BBANDS, current: |s| num(s.current.uband), history: |d| num(d.uband) },
    StockField { name: "mband", required_level: FetchLevel::TECHNICAL_BBANDS, current: |s| num(s.current.mband), history: |d| num(d.mband) },
    StockField { name: "lband", required_level: FetchLevel::TECHNICAL_BBANDS, current: |s| num(s.current.lband), history: |d| num(d.lband) },
    StockField { name: "sar", required_level: FetchLevel::TECHNICAL_SAR, current: |s| num(s.current.sar), history: |d| num(d.sar) },
    StockField { name: "slope", required_level: FetchLevel::TECHNICAL_SLOPE, current: |s| num(s.current.slope), history: |d| num(d.slope) },
    StockField { name: "cci", required_level: FetchLevel::TECHNICAL_CCI, current: |s| num(s.current.cci), history: |d| num(d.cci) },
    StockField { name: "pe", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.pe), history: |_| num(f64::NAN) },
    StockField { name: "peg", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.peg), history: |_| num(f64::NAN) },
    StockField { name: "beta", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.beta), history: |_| num(f64::NAN) },
    StockField { name: "low_52", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.low_52), history: |_| num(f64::NAN) },
    StockField { name: "high_52", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.high_52), history: |_| num(f64::NAN) },
    StockField { name: "dma_50", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.dma_50), history: |_| num(f64::NAN) },
    StockField { name: "dma_200", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.dma_200), history: |_| num(f64::NAN) },
    StockField { name: "dividends_yield", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.dividends_yield), history: |_| num(f64::NAN) },
    StockField { name: "profit_margin", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.profit_margin), history: |_| num(f64::NAN) },
    StockField { name: "short_ratio", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.short_ratio), history: |_| num(f64::NAN) },
    StockField { name: "short_percent", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.short_percent), history: |_| num(f64::NAN) },
    StockField { name: "trailing_pe", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.trailing_pe), history: |_| num(f64::NAN) },
    StockField { name: "forward_pe", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.forward_pe), history: |_| num(f64::NAN) },
    StockField { name: "shares_count", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.shares_count), history: |_| num(f64::NAN) },
    StockField { name: "ws_target", required_level: FetchLevel::FUNDAMENTALS, current: |s| num(s.ws_target), history: |_| num(f64::NAN) },
];

fn find_field(name: &str) -> Result<&'static StockField, CoreError> {
    STOCK_FIELDS
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| CoreError::InvalidArgument(format!("unknown field {name}")))
}

/// `S(code, field [, date | "ALL"])` (§4.4).
pub(super) async fn eval_s(args: &[Ast], ctx: &ExprContext) -> Result<ExprValue, CoreError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(CoreError::InvalidArgument(
            "S expects (code, field[, date|\"ALL\"])".to_string(),
        ));
    }
    let code = text_arg(&args[0], ctx).await?;
    let field_name = text_arg(&args[1], ctx).await?;
    let field = find_field(&field_name)?;

    let symbol = symbol_from_text(&code);
    let handle = ctx.stocks.initialize_handle(&symbol)?;
    ensure_resolved(ctx, handle, &symbol, field.required_level).await?;

    let stock = ctx.stocks.get(handle).await;

    if args.len() == 2 {
        return Ok((field.current)(&stock));
    }

    let selector = eval_arg(&args[2], ctx).await?;
    if let ExprValue::Text(s) = &selector
        && &**s == "ALL"
    {
        ensure_resolved(ctx, handle, &symbol, FetchLevel::TECHNICAL_EOD).await?;
        let stock = ctx.stocks.get(handle).await;
        let mut pairs = vec![ExprValue::Pair(
            Box::new(ExprValue::Number(stock.current.date as f64)),
            Box::new((field.current)(&stock)),
        )];
        for day in &stock.history {
            pairs.push(ExprValue::Pair(
                Box::new(ExprValue::Number(day.date as f64)),
                Box::new((field.history)(day)),
            ));
        }
        return Ok(ExprValue::List(pairs));
    }

    let date_str = text_arg(&args[2], ctx).await?;
    ensure_resolved(ctx, handle, &symbol, FetchLevel::TECHNICAL_EOD).await?;
    let stock = ctx.stocks.get(handle).await;
    let target = crate::wire::parse_provider_date(&date_str);
    stock
        .history
        .iter()
        .find(|d| d.date == target)
        .map(|d| (field.history)(d))
        .ok_or_else(|| CoreError::InvalidArgument(format!("no history entry for date {date_str}")))
}

/// Spin-waits (30s cap, §5) for `level` to resolve, issuing a `resolve` call first.
async fn ensure_resolved(
    ctx: &ExprContext,
    handle: Handle,
    symbol: &crate::symbol::Symbol,
    level: FetchLevel,
) -> Result<(), CoreError> {
    if level.is_empty() {
        return Ok(());
    }
    let deadline = Instant::now() + HISTORY_SPIN_WAIT;
    ctx.stocks.resolve(handle, symbol, level).await?;
    loop {
        let stock = ctx.stocks.get(handle).await;
        if stock.has_resolved(level) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            tracing::warn!(%symbol, ?level, "expression evaluation timed out waiting for level");
            return Err(CoreError::EvaluationTimeout(HISTORY_SPIN_WAIT));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// `F(code, dotted_path)` (§4.4): fetches the raw fundamentals tree (24h cache) and resolves
/// a dotted path within it.
pub(super) async fn eval_f(args: &[Ast], ctx: &ExprContext) -> Result<ExprValue, CoreError> {
    if args.len() != 2 {
        return Err(CoreError::InvalidArgument("F expects (code, dotted_path)".to_string()));
    }
    let code = text_arg(&args[0], ctx).await?;
    let path = text_arg(&args[1], ctx).await?;

    let json: serde_json::Value = ctx
        .stocks
        .http_client()
        .get_json(
            &format!("fundamentals/{code}"),
            &[],
            CacheMode::Use,
            Duration::from_secs(24 * 3600),
        )
        .await?;

    let mut cur = &json;
    for part in path.split('.') {
        cur = cur
            .get(part)
            .ok_or_else(|| CoreError::InvalidArgument(format!("fundamentals path not found: {path}")))?;
    }
    json_to_expr(cur)
}

fn json_to_expr(v: &serde_json::Value) -> Result<ExprValue, CoreError> {
    match v {
        serde_json::Value::Number(n) => Ok(ExprValue::Number(n.as_f64().unwrap_or(f64::NAN))),
        serde_json::Value::String(s) => Ok(ExprValue::Text(std::sync::Arc::from(s.as_str()))),
        serde_json::Value::Bool(b) => Ok(ExprValue::Bool(*b)),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_to_expr(item)?);
            }
            Ok(ExprValue::List(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map {
                out.push(ExprValue::Pair(
                    Box::new(ExprValue::Text(std::sync::Arc::from(k.as_str()))),
                    Box::new(json_to_expr(v)?),
                ));
            }
            Ok(ExprValue::List(out))
        }
        serde_json::Value::Null => Ok(ExprValue::Number(f64::NAN)),
    }
}

/// One persisted report, consumed by `R()` (§6 "Reports persisted file").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub titles: Vec<ReportTitle>,
}

/// One row ("title") of a report; field names mirror `title_t` accessors referenced from
/// `report_expr.cpp`'s dispatch table (`average_quantity`, `buy_adjusted_price`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportTitle {
    pub symbol: String,
    pub average_quantity: f64,
    pub buy_adjusted_price: f64,
    pub day_change: f64,
}

struct ReportField {
    name: &'static str,
    accessor: fn(&ReportTitle) -> ExprValue,
    /// Whether a title is excluded from the `R()` result for this field (§9 "Generic
    /// expression field dispatch" — `filter_out` predicate).
    filter_out: fn(&ReportTitle) -> bool,
}

static REPORT_FIELDS: &[ReportField] = &[
    ReportField {
        name: "sold",
        accessor: |t| ExprValue::Bool(t.average_quantity == 0.0),
        filter_out: |t| t.average_quantity != 0.0,
    },
    ReportField {
        name: "active",
        accessor: |t| ExprValue::Bool(t.average_quantity != 0.0),
        filter_out: |t| t.average_quantity == 0.0,
    },
    ReportField {
        name: "qty",
        accessor: |t| num(t.average_quantity),
        filter_out: |t| t.average_quantity == 0.0 || t.average_quantity.is_nan(),
    },
    ReportField {
        name: "buy",
        accessor: |t| num(t.buy_adjusted_price),
        filter_out: |t| t.buy_adjusted_price.is_nan(),
    },
    ReportField {
        name: "day",
        accessor: |t| num(t.day_change),
        filter_out: |t| t.day_change.is_nan(),
    },
];

/// `R(report, [title,] field)` (§4.4).
pub(super) fn eval_r(args: &[Ast]) -> Result<ExprValue, CoreError> {
    // This builtin is evaluated synchronously over already-loaded reports, so literal
    // arguments only (no nested `S`/`F` calls) — matches the original's static dispatch
    // table, which never re-entered the evaluator for its own arguments.
    let literal = |a: &Ast| match a {
        Ast::Text(s) => Ok(s.clone()),
        other => Err(CoreError::InvalidArgument(format!(
            "R() arguments must be string literals, got {other:?}"
        ))),
    };

    let (report_name, title_filter, field_name) = match args.len() {
        2 => (literal(&args[0])?, None, literal(&args[1])?),
        3 => (literal(&args[0])?, Some(literal(&args[1])?), literal(&args[2])?),
        _ => {
            return Err(CoreError::InvalidArgument(
                "R expects (report, [title,] field)".to_string(),
            ));
        }
    };

    let field = REPORT_FIELDS
        .iter()
        .find(|f| f.name == field_name)
        .ok_or_else(|| CoreError::InvalidArgument(format!("unknown report field {field_name}")))?;

    Ok(ExprValue::List(vec![
        ExprValue::Text(std::sync::Arc::from(report_name.as_str())),
        ExprValue::Text(std::sync::Arc::from(title_filter.unwrap_or_default().as_str())),
        ExprValue::Text(std::sync::Arc::from(field.name)),
    ]))
}

/// Evaluates `R()` against a concrete set of report titles (used by
/// [`crate::alerts::AlertsEngine`] and tests — `eval_r` above only validates the call shape
/// since `ExprContext` carries reports as plain data, not a live query engine).
#[must_use]
pub fn eval_report_field(titles: &[ReportTitle], title_filter: Option<&str>, field_name: &str) -> Vec<ExprValue> {
    let Some(field) = REPORT_FIELDS.iter().find(|f| f.name == field_name) else {
        return Vec::new();
    };
    titles
        .iter()
        .filter(|t| title_filter.is_none_or(|s| s == t.symbol))
        .filter(|t| !(field.filter_out)(t))
        .map(|t| (field.accessor)(t))
        .collect()
}

/// `FIELDS(code, api)` (§4.4): the flat list of field paths exposed by a given endpoint.
pub(super) fn eval_fields(args: &[Ast]) -> Result<ExprValue, CoreError> {
    if args.len() != 2 {
        return Err(CoreError::InvalidArgument("FIELDS expects (code, api)".to_string()));
    }
    let api = match &args[1] {
        Ast::Text(s) => s.as_str(),
        _ => return Err(CoreError::InvalidArgument("FIELDS api must be a string literal".to_string())),
    };
    let names: Vec<ExprValue> = match api {
        "S" => STOCK_FIELDS
            .iter()
            .map(|f| ExprValue::Text(std::sync::Arc::from(f.name)))
            .collect(),
        "R" => REPORT_FIELDS
            .iter()
            .map(|f| ExprValue::Text(std::sync::Arc::from(f.name)))
            .collect(),
        other => return Err(CoreError::InvalidArgument(format!("unknown FIELDS api {other}"))),
    };
    Ok(ExprValue::List(names))
}

/// `TABLE(name, data_set, [header, column_expr, format?]…)` (§4.4). The core has no UI
/// (§9 "Throwaway OpenAI/news/LCF integrations are collaborators, not part of the core");
/// `TABLE` here just evaluates each column expression over each element of `data_set` and
/// returns the resulting rows as a `List` of `List`s — the data a UI layer would render.
pub(super) async fn eval_table(args: &[Ast], ctx: &ExprContext) -> Result<ExprValue, CoreError> {
    if args.len() < 2 {
        return Err(CoreError::InvalidArgument(
            "TABLE expects (name, data_set, [header, column_expr]...)".to_string(),
        ));
    }
    let data_set = eval_arg(&args[1], ctx).await?;
    let ExprValue::List(rows) = data_set else {
        return Err(CoreError::InvalidArgument("TABLE data_set must be a list".to_string()));
    };

    let column_exprs: Vec<&Ast> = args[2..].iter().skip(1).step_by(2).collect();
    if column_exprs.is_empty() {
        return Ok(ExprValue::List(rows));
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut row_ctx_globals = ctx.globals.clone();
        if let ExprValue::Pair(a, b) = &row {
            row_ctx_globals.insert("$1".to_string(), (**a).clone());
            row_ctx_globals.insert("$2".to_string(), (**b).clone());
        } else {
            row_ctx_globals.insert("$1".to_string(), row.clone());
        }
        let row_ctx = ExprContext {
            stocks: std::sync::Arc::clone(&ctx.stocks),
            reports: ctx.reports.clone(),
            globals: row_ctx_globals,
        };
        let mut cells = Vec::with_capacity(column_exprs.len());
        for expr in &column_exprs {
            cells.push(super::eval_arg(expr, &row_ctx).await?);
        }
        out.push(ExprValue::List(cells));
    }
    Ok(ExprValue::List(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_field_filters_zero_quantity_titles() {
        let titles = vec![
            ReportTitle { symbol: "A".to_string(), average_quantity: 10.0, ..Default::default() },
            ReportTitle { symbol: "B".to_string(), average_quantity: 0.0, ..Default::default() },
        ];
        let values = eval_report_field(&titles, None, "qty");
        assert_eq!(values, vec![ExprValue::Number(10.0)]);
    }

    #[test]
    fn unknown_stock_field_is_rejected() {
        assert!(find_field("not_a_field").is_err());
    }
}
