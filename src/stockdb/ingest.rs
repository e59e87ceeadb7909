//! Per-level ingestion rules (§4.1 "Ingestion rules by level"), grounded in
//! `stock_read_real_time_results`, `stock_read_fundamentals_results`,
//! `stock_read_eod_results`, `stock_read_eod_indexed_prices` and `stock_read_technical_results`
//! in `original_source/sources/stock.cpp`.

use crate::fetchlevel::FetchLevel;
use crate::intern::StringTable;
use crate::model::DayResult;
use crate::wire::{self, EodDay, FundamentalsResponse, RealTimeResponse, TechnicalDay};

use super::Stock;

/// REALTIME ingestion: replace `current`, pushing the prior value onto `previous` if the
/// trading day changed (§4.1 "if stock's `current.date` changes, push previous `current`").
pub(super) fn apply_realtime(slot: &mut Stock, resp: &RealTimeResponse) {
    let date = resp.timestamp as i64;
    let day = DayResult {
        date,
        gmtoffset: resp.gmtoffset as u8,
        open: resp.open,
        close: resp.close,
        previous_close: resp.previous_close,
        low: resp.low,
        high: resp.high,
        change: resp.change,
        change_p: resp.change_p,
        volume: resp.volume,
        ..DayResult::default()
    };

    if slot.current.date != 0 && slot.current.date != date {
        slot.previous.push(slot.current);
    }
    slot.current = day;
}

/// FUNDAMENTALS ingestion: populate descriptor and scalar fields (§4.1).
pub(super) fn apply_fundamentals(slot: &mut Stock, resp: &FundamentalsResponse, strings: &StringTable) {
    let g = &resp.general;
    slot.name = strings.intern(&g.name);
    slot.country = strings.intern(&g.country_name);
    slot.r#type = strings.intern(&g.r#type);
    slot.currency = strings.intern(&g.currency_code);
    slot.url = strings.intern(&g.web_url);
    slot.logo = strings.intern(&g.logo_url);
    slot.updated_at = strings.intern(&g.updated_at);
    slot.exchange = strings.intern(&g.exchange);
    if !g.description.is_empty() {
        slot.description.set(std::sync::Arc::from(g.description.as_str()));
    }

    let h = &resp.highlights;
    slot.dividends_yield = h.dividend_yield.unwrap_or(0.0);
    slot.pe = h.pe_ratio.unwrap_or(f64::NAN);
    slot.peg = h.peg_ratio.unwrap_or(f64::NAN);
    slot.ws_target = h.wall_street_target_price.unwrap_or(f64::NAN);
    slot.revenue_per_share_ttm = h.revenue_per_share_ttm.unwrap_or(f64::NAN);
    slot.profit_margin = h.profit_margin.unwrap_or(f64::NAN);
    slot.diluted_eps_ttm = h.diluted_eps_ttm.unwrap_or(f64::NAN);

    let v = &resp.valuation;
    slot.trailing_pe = v.trailing_pe.unwrap_or(f64::NAN);
    slot.forward_pe = v.forward_pe.unwrap_or(f64::NAN);

    if slot.pe.is_nan() {
        slot.pe = slot.peg;
    }

    slot.shares_count = resp.shares_stats.shares_float.unwrap_or(f64::NAN);

    let t = &resp.technicals;
    slot.low_52 = t.week_low_52.unwrap_or(f64::NAN);
    slot.high_52 = t.week_high_52.unwrap_or(f64::NAN);
    slot.beta = t.beta.unwrap_or(f64::NAN);
    slot.dma_50 = t.day_ma_50.unwrap_or(f64::NAN);
    slot.dma_200 = t.day_ma_200.unwrap_or(f64::NAN);
    slot.short_ratio = t.short_ratio.unwrap_or(f64::NAN);
    slot.short_percent = t.short_percent.unwrap_or(f64::NAN);
}

/// EOD / TECHNICAL_EOD ingestion: replace `history`, computing `change`, `change_p`,
/// `change_p_high` and (for plain `EOD`) `price_factor`, dropping zero-volume tail entries
/// at index >= 7 (§3 Invariants, §4.1).
pub(super) fn apply_eod(slot: &mut Stock, days: &[EodDay], level: FetchLevel) {
    let mut history: Vec<DayResult> = Vec::with_capacity(days.len());
    let mut first_change_p_high = f64::NAN;
    let mut first_price_factor = f64::NAN;

    for (i, day) in days.iter().enumerate() {
        if day.volume < 1.0 && i >= 7 {
            continue;
        }

        let mut d = DayResult {
            date: wire::parse_provider_date(&day.date),
            gmtoffset: 0,
            open: day.open,
            low: day.low,
            high: day.high,
            volume: day.volume,
            ..DayResult::default()
        };

        if level == FetchLevel::EOD {
            d.adjusted_close = day.adjusted_close;
            d.close = day.adjusted_close;
            d.price_factor = day.adjusted_close / day.close;
            if !d.price_factor.is_nan() {
                first_price_factor = d.price_factor;
            }
        } else {
            d.close = day.close;
        }

        d.previous_close = days
            .get(i + 1)
            .map_or(f64::NAN, |prev| prev.close);

        d.change = d.close - d.open;
        d.change_p = d.change * 100.0 / d.open;
        let denom = if d.previous_close.is_nan() { d.close } else { d.previous_close };
        d.change_p_high = (d.close.max(d.high) - d.open.min(d.low)) * 100.0 / denom;

        if !d.change_p_high.is_nan() {
            first_change_p_high = d.change_p_high;
        }

        history.push(d);
    }

    slot.history = history;

    if slot.current.change_p_high.is_nan() && !first_change_p_high.is_nan() {
        slot.current.change_p_high = first_change_p_high;
    }
    if slot.current.price_factor.is_nan() && !first_price_factor.is_nan() {
        slot.current.price_factor = first_price_factor;
    }
}

/// TECHNICAL_INDEXED_PRICE ingestion: computes `price_factor` for each historical day from a
/// fresh `eod` fetch (§4.1).
pub(super) fn apply_indexed_price(slot: &mut Stock, days: &[EodDay]) {
    let mut first_price_factor = f64::NAN;

    for day in days {
        let date = wire::parse_provider_date(&day.date);
        let factor = day.adjusted_close / day.close;
        if let Some(entry) = slot.history.iter_mut().find(|e| e.date == date) {
            entry.price_factor = factor;
            if !factor.is_nan() {
                first_price_factor = factor;
            }
        }
    }

    if slot.current.price_factor.is_nan() && !first_price_factor.is_nan() {
        slot.current.price_factor = first_price_factor;
    }
}

/// TECHNICAL_{SMA,EMA,WMA,SAR,SLOPE,CCI} ingestion: locate the matching history entry by
/// date and write one field; mirror the first value into `current` too (§4.1).
pub(super) fn apply_technical_single(slot: &mut Stock, days: &[TechnicalDay], level: FetchLevel) {
    let field_name = match level {
        FetchLevel::TECHNICAL_SMA => "sma",
        FetchLevel::TECHNICAL_EMA => "ema",
        FetchLevel::TECHNICAL_WMA => "wma",
        FetchLevel::TECHNICAL_SAR => "sar",
        FetchLevel::TECHNICAL_SLOPE => "slope",
        FetchLevel::TECHNICAL_CCI => "cci",
        _ => return,
    };

    let mut applied_to_current = false;
    for day in days {
        let date = wire::parse_provider_date(&day.date);
        let value = day.field(field_name);
        if let Some(entry) = slot.history.iter_mut().find(|e| e.date == date) {
            set_named_field(entry, field_name, value);
            if !applied_to_current {
                set_named_field(&mut slot.current, field_name, value);
                applied_to_current = true;
            }
        }
    }
}

/// TECHNICAL_BBANDS ingestion: same pattern as [`apply_technical_single`] but writes three
/// named fields at once (§4.1).
pub(super) fn apply_technical_bbands(slot: &mut Stock, days: &[TechnicalDay]) {
    let mut applied_to_current = false;
    for day in days {
        let date = wire::parse_provider_date(&day.date);
        let uband = day.field("uband");
        let mband = day.field("mband");
        let lband = day.field("lband");
        if let Some(entry) = slot.history.iter_mut().find(|e| e.date == date) {
            entry.uband = uband;
            entry.mband = mband;
            entry.lband = lband;
            if !applied_to_current {
                slot.current.uband = uband;
                slot.current.mband = mband;
                slot.current.lband = lband;
                applied_to_current = true;
            }
        }
    }
}

fn set_named_field(d: &mut DayResult, name: &str, value: f64) {
    match name {
        "sma" => d.sma = value,
        "ema" => d.ema = value,
        "wma" => d.wma = value,
        "sar" => d.sar = value,
        "slope" => d.slope = value,
        "cci" => d.cci = value,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stockdb::Stock;

    fn fresh_slot() -> Stock {
        let mut slot = Stock::new(1, crate::intern::StringTableSymbol::NULL);
        slot.current = DayResult::default();
        slot
    }

    #[test]
    fn realtime_pushes_previous_day_on_date_change() {
        let mut slot = fresh_slot();
        slot.current.date = 100;
        slot.current.close = 10.0;

        apply_realtime(
            &mut slot,
            &RealTimeResponse {
                timestamp: 200.0,
                gmtoffset: 0.0,
                open: 11.0,
                close: 12.0,
                previous_close: 10.0,
                low: 10.5,
                high: 12.5,
                change: 2.0,
                change_p: 20.0,
                volume: 500.0,
            },
        );

        assert_eq!(slot.previous.len(), 1);
        assert_eq!(slot.previous[0].date, 100);
        assert_eq!(slot.current.date, 200);
    }

    #[test]
    fn eod_drops_zero_volume_tail_entries() {
        let mut slot = fresh_slot();
        let mut days: Vec<EodDay> = (0..10)
            .map(|i| EodDay {
                date: format!("2024-01-{:02}", i + 1),
                open: 10.0,
                close: 11.0,
                adjusted_close: 11.0,
                low: 9.0,
                high: 12.0,
                volume: 1000.0,
            })
            .collect();
        days[8].volume = 0.0;
        days[2].volume = 0.0;

        apply_eod(&mut slot, &days, FetchLevel::EOD);

        // index 2 (< 7) is kept despite zero volume; index 8 (>= 7) is dropped.
        assert_eq!(slot.history.len(), 9);
    }

    #[test]
    fn eod_computes_price_factor_for_plain_eod_level() {
        let mut slot = fresh_slot();
        let days = vec![EodDay {
            date: "2024-01-02".to_string(),
            open: 10.0,
            close: 12.0,
            adjusted_close: 11.4,
            low: 9.5,
            high: 12.5,
            volume: 1000.0,
        }];
        apply_eod(&mut slot, &days, FetchLevel::EOD);
        assert!((slot.history[0].price_factor - 11.4 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn technical_eod_does_not_compute_price_factor() {
        let mut slot = fresh_slot();
        let days = vec![EodDay {
            date: "2024-01-02".to_string(),
            open: 10.0,
            close: 12.0,
            adjusted_close: 11.4,
            low: 9.5,
            high: 12.5,
            volume: 1000.0,
        }];
        apply_eod(&mut slot, &days, FetchLevel::TECHNICAL_EOD);
        assert!(slot.history[0].price_factor.is_nan());
    }

    #[test]
    fn technical_single_writes_named_field_and_mirrors_current() {
        let mut slot = fresh_slot();
        slot.history = vec![DayResult {
            date: 1704153600,
            ..DayResult::default()
        }];
        let mut fields = std::collections::HashMap::new();
        fields.insert("sma".to_string(), serde_json::json!(123.45));
        let days = vec![TechnicalDay {
            date: "2024-01-02".to_string(),
            fields,
        }];
        apply_technical_single(&mut slot, &days, FetchLevel::TECHNICAL_SMA);
        assert!((slot.history[0].sma - 123.45).abs() < 1e-9);
        assert!((slot.current.sma - 123.45).abs() < 1e-9);
    }
}
