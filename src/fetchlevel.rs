//! Fetch-level bitset (§3 `FetchLevel bitset`).
//!
//! A plain bitset with named constants, per design note §9: "do not model as inheritance
//! hierarchy". `TECHNICAL_CHARTS` is the union of the trailing technical indicators.

use bitflags::bitflags;

bitflags! {
    /// Disjoint tags for the classes of data a [`crate::stockdb::Stock`] can have in flight
    /// or resolved. A bit is either "in flight" (`fetch_level`) or "resolved"
    /// (`resolved_level`), never both, for a given stock (§3 Invariants).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FetchLevel: u32 {
        /// Latest trade price / quote.
        const REALTIME = 1 << 0;
        /// Static descriptors and scalar fundamentals.
        const FUNDAMENTALS = 1 << 1;
        /// End-of-day OHLCV history.
        const EOD = 1 << 2;
        /// Split-adjusted end-of-day history.
        const TECHNICAL_EOD = 1 << 3;
        /// Per-day `price_factor` derived from EOD/`TECHNICAL_EOD`.
        const TECHNICAL_INDEXED_PRICE = 1 << 4;
        /// Simple moving average.
        const TECHNICAL_SMA = 1 << 5;
        /// Exponential moving average.
        const TECHNICAL_EMA = 1 << 6;
        /// Weighted moving average.
        const TECHNICAL_WMA = 1 << 7;
        /// Bollinger bands (`uband`, `mband`, `lband`).
        const TECHNICAL_BBANDS = 1 << 8;
        /// Parabolic SAR.
        const TECHNICAL_SAR = 1 << 9;
        /// Linear regression slope.
        const TECHNICAL_SLOPE = 1 << 10;
        /// Commodity channel index.
        const TECHNICAL_CCI = 1 << 11;

        /// Union of every trailing technical indicator level.
        const TECHNICAL_CHARTS = Self::TECHNICAL_SMA.bits()
            | Self::TECHNICAL_EMA.bits()
            | Self::TECHNICAL_WMA.bits()
            | Self::TECHNICAL_BBANDS.bits()
            | Self::TECHNICAL_SAR.bits()
            | Self::TECHNICAL_SLOPE.bits()
            | Self::TECHNICAL_CCI.bits();
    }
}

impl FetchLevel {
    /// The EODHistoricalData-style `function=` query parameter for a single technical level,
    /// or `None` for levels that are not backed by the `technical/{ticker}` endpoint.
    #[must_use]
    pub fn technical_function_name(self) -> Option<&'static str> {
        match self {
            FetchLevel::TECHNICAL_SMA => Some("sma"),
            FetchLevel::TECHNICAL_EMA => Some("ema"),
            FetchLevel::TECHNICAL_WMA => Some("wma"),
            FetchLevel::TECHNICAL_BBANDS => Some("bbands"),
            FetchLevel::TECHNICAL_SAR => Some("sar"),
            FetchLevel::TECHNICAL_SLOPE => Some("slope"),
            FetchLevel::TECHNICAL_CCI => Some("cci"),
            FetchLevel::TECHNICAL_EOD => Some("splitadjusted"),
            _ => None,
        }
    }

    /// Every individually-addressable bit, in a stable iteration order. Used by the
    /// dispatcher to split a composite mask into one fetch per bit.
    #[must_use]
    pub fn atoms() -> &'static [FetchLevel] {
        &[
            FetchLevel::REALTIME,
            FetchLevel::FUNDAMENTALS,
            FetchLevel::EOD,
            FetchLevel::TECHNICAL_EOD,
            FetchLevel::TECHNICAL_INDEXED_PRICE,
            FetchLevel::TECHNICAL_SMA,
            FetchLevel::TECHNICAL_EMA,
            FetchLevel::TECHNICAL_WMA,
            FetchLevel::TECHNICAL_BBANDS,
            FetchLevel::TECHNICAL_SAR,
            FetchLevel::TECHNICAL_SLOPE,
            FetchLevel::TECHNICAL_CCI,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technical_charts_is_union_of_trailing_indicators() {
        let expected = FetchLevel::TECHNICAL_SMA
            | FetchLevel::TECHNICAL_EMA
            | FetchLevel::TECHNICAL_WMA
            | FetchLevel::TECHNICAL_BBANDS
            | FetchLevel::TECHNICAL_SAR
            | FetchLevel::TECHNICAL_SLOPE
            | FetchLevel::TECHNICAL_CCI;
        assert_eq!(FetchLevel::TECHNICAL_CHARTS, expected);
        assert!(!FetchLevel::TECHNICAL_CHARTS.contains(FetchLevel::EOD));
    }

    #[test]
    fn atoms_cover_every_named_bit() {
        let union = FetchLevel::atoms()
            .iter()
            .copied()
            .fold(FetchLevel::empty(), |a, b| a | b);
        assert_eq!(union, FetchLevel::all());
    }
}
