//! Shared value types that don't belong to any single component: a day's OHLCV bar plus its
//! derived technical fields (§3 `DayResult`).

use serde::{Deserialize, Serialize};

/// One bar/day of a stock's history, or the current (in-progress) day.
///
/// All numeric fields default to `NaN` when unresolved, per §3. `history` on
/// [`crate::stockdb::Stock`] is an ordered, newest-first sequence of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayResult {
    /// Unix timestamp (UTC midnight of the trading day), or `0` when absent.
    pub date: i64,
    /// Exchange UTC offset in hours, as a small non-negative magnitude index (0-23 stored,
    /// sign tracked separately by the exchange metadata; matches the C original's
    /// unsigned `gmtoffset` field).
    pub gmtoffset: u8,

    pub open: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub previous_close: f64,
    pub price_factor: f64,

    pub low: f64,
    pub high: f64,

    pub change: f64,
    pub change_p: f64,
    pub change_p_high: f64,

    pub volume: f64,

    pub wma: f64,
    pub ema: f64,
    pub sma: f64,

    pub uband: f64,
    pub mband: f64,
    pub lband: f64,

    pub sar: f64,
    pub slope: f64,
    pub cci: f64,
}

impl Default for DayResult {
    fn default() -> Self {
        Self {
            date: 0,
            gmtoffset: 0,
            open: f64::NAN,
            close: f64::NAN,
            adjusted_close: f64::NAN,
            previous_close: f64::NAN,
            price_factor: f64::NAN,
            low: f64::NAN,
            high: f64::NAN,
            change: f64::NAN,
            change_p: f64::NAN,
            change_p_high: f64::NAN,
            volume: f64::NAN,
            wma: f64::NAN,
            ema: f64::NAN,
            sma: f64::NAN,
            uband: f64::NAN,
            mband: f64::NAN,
            lband: f64::NAN,
            sar: f64::NAN,
            slope: f64::NAN,
            cci: f64::NAN,
        }
    }
}

impl DayResult {
    /// Computes `change_p_high = (max(close,high) - min(open,low)) / previous_close * 100`
    /// (§4.1 EOD ingestion rule), writing the result into `self.change_p_high`.
    pub fn compute_change_p_high(&mut self) {
        let hi = self.close.max(self.high);
        let lo = self.open.min(self.low);
        self.change_p_high = (hi - lo) / self.previous_close * 100.0;
    }

    /// Computes `price_factor = adjusted_close / close` (§4.1 EOD ingestion rule).
    pub fn compute_price_factor(&mut self) {
        self.price_factor = self.adjusted_close / self.close;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fields_are_nan_except_date_and_offset() {
        let d = DayResult::default();
        assert_eq!(d.date, 0);
        assert_eq!(d.gmtoffset, 0);
        assert!(d.close.is_nan());
        assert!(d.sma.is_nan());
    }

    #[test]
    fn change_p_high_matches_formula() {
        let mut d = DayResult {
            open: 10.0,
            close: 12.0,
            high: 13.0,
            low: 9.0,
            previous_close: 10.0,
            ..Default::default()
        };
        d.compute_change_p_high();
        assert!((d.change_p_high - 40.0).abs() < 1e-9);
    }

    #[test]
    fn price_factor_matches_formula() {
        let mut d = DayResult {
            adjusted_close: 37.1,
            close: 38.0,
            ..Default::default()
        };
        d.compute_price_factor();
        assert!((d.price_factor - 37.1 / 38.0).abs() < 1e-12);
    }
}
