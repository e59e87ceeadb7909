//! JSON response shapes for the market-data provider's endpoints (§6 "HTTP endpoints
//! consumed"). Field names and nesting mirror the provider's actual payloads exactly, as
//! read by the original ingestion code (`stock_read_*_results` in the system this crate's
//! design is grounded on) — these are wire DTOs, not domain types; [`crate::stockdb::ingest`]
//! turns them into [`crate::model::DayResult`] and [`crate::stockdb::Stock`] fields.

use serde::Deserialize;

/// `real-time/{ticker}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RealTimeResponse {
    pub timestamp: f64,
    #[serde(default)]
    pub gmtoffset: f64,
    pub open: f64,
    pub close: f64,
    #[serde(rename = "previousClose")]
    pub previous_close: f64,
    pub low: f64,
    pub high: f64,
    pub change: f64,
    pub change_p: f64,
    pub volume: f64,
}

/// One element of the `eod/{ticker}` array response.
#[derive(Debug, Clone, Deserialize)]
pub struct EodDay {
    pub date: String,
    pub open: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub low: f64,
    pub high: f64,
    pub volume: f64,
}

/// One element of the `technical/{ticker}` array response. The indicator-specific numeric
/// fields (`sma`, `ema`, `wma`, `uband`/`mband`/`lband`, `sar`, `slope`, `cci`) vary by
/// `function=` query parameter, so they're captured generically and picked out by name
/// (§4.1 "single named field" vs "three named fields" ingestion rules).
#[derive(Debug, Clone, Deserialize)]
pub struct TechnicalDay {
    pub date: String,
    #[serde(flatten)]
    pub fields: std::collections::HashMap<String, serde_json::Value>,
}

impl TechnicalDay {
    #[must_use]
    pub fn field(&self, name: &str) -> f64 {
        self.fields
            .get(name)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(f64::NAN)
    }
}

/// `fundamentals/{ticker}` response, `General` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FundamentalsGeneral {
    #[serde(default)]
    pub code: String,
    #[serde(default, rename = "Name")]
    pub name: String,
    #[serde(default, rename = "Type")]
    pub r#type: String,
    #[serde(default, rename = "CountryName")]
    pub country_name: String,
    #[serde(default, rename = "CurrencyCode")]
    pub currency_code: String,
    #[serde(default, rename = "WebURL")]
    pub web_url: String,
    #[serde(default, rename = "LogoURL")]
    pub logo_url: String,
    #[serde(default, rename = "UpdatedAt")]
    pub updated_at: String,
    #[serde(default, rename = "Exchange")]
    pub exchange: String,
    #[serde(default, rename = "Description")]
    pub description: String,
}

/// `fundamentals/{ticker}` response, `Highlights` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FundamentalsHighlights {
    #[serde(default, rename = "DividendYield")]
    pub dividend_yield: Option<f64>,
    #[serde(default, rename = "PERatio")]
    pub pe_ratio: Option<f64>,
    #[serde(default, rename = "PEGRatio")]
    pub peg_ratio: Option<f64>,
    #[serde(default, rename = "WallStreetTargetPrice")]
    pub wall_street_target_price: Option<f64>,
    #[serde(default, rename = "RevenuePerShareTTM")]
    pub revenue_per_share_ttm: Option<f64>,
    #[serde(default, rename = "ProfitMargin")]
    pub profit_margin: Option<f64>,
    #[serde(default, rename = "DilutedEpsTTM")]
    pub diluted_eps_ttm: Option<f64>,
}

/// `fundamentals/{ticker}` response, `Valuation` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FundamentalsValuation {
    #[serde(default, rename = "TrailingPE")]
    pub trailing_pe: Option<f64>,
    #[serde(default, rename = "ForwardPE")]
    pub forward_pe: Option<f64>,
}

/// `fundamentals/{ticker}` response, `SharesStats` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FundamentalsSharesStats {
    #[serde(default, rename = "SharesFloat")]
    pub shares_float: Option<f64>,
}

/// `fundamentals/{ticker}` response, `Technicals` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FundamentalsTechnicals {
    #[serde(default, rename = "52WeekLow")]
    pub week_low_52: Option<f64>,
    #[serde(default, rename = "52WeekHigh")]
    pub week_high_52: Option<f64>,
    #[serde(default, rename = "Beta")]
    pub beta: Option<f64>,
    #[serde(default, rename = "50DayMA")]
    pub day_ma_50: Option<f64>,
    #[serde(default, rename = "200DayMA")]
    pub day_ma_200: Option<f64>,
    #[serde(default, rename = "ShortRatio")]
    pub short_ratio: Option<f64>,
    #[serde(default, rename = "ShortPercent")]
    pub short_percent: Option<f64>,
}

/// Full `fundamentals/{ticker}` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FundamentalsResponse {
    #[serde(default, rename = "General")]
    pub general: FundamentalsGeneral,
    #[serde(default, rename = "Highlights")]
    pub highlights: FundamentalsHighlights,
    #[serde(default, rename = "Valuation")]
    pub valuation: FundamentalsValuation,
    #[serde(default, rename = "SharesStats")]
    pub shares_stats: FundamentalsSharesStats,
    #[serde(default, rename = "Technicals")]
    pub technicals: FundamentalsTechnicals,
}

/// One element of the `exchange-symbol-list/{exchange}` response, used by symbol search
/// and validation (§9 glossary "exchange symbol list").
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSymbol {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default, rename = "Currency")]
    pub currency: String,
    #[serde(default, rename = "Type")]
    pub r#type: String,
}

/// Parses a provider date string (`YYYY-MM-DD`, as emitted by both `eod` and `technical`
/// endpoints) into a Unix timestamp at UTC midnight. Malformed dates resolve to `0`,
/// matching the original's tolerant `string_to_date` behaviour rather than failing the
/// whole response.
#[must_use]
pub fn parse_provider_date(s: &str) -> i64 {
    use chrono::NaiveDate;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_date() {
        assert_eq!(parse_provider_date("2024-01-02"), 1704153600);
    }

    #[test]
    fn malformed_date_is_zero() {
        assert_eq!(parse_provider_date("not-a-date"), 0);
    }

    #[test]
    fn technical_day_field_missing_is_nan() {
        let d = TechnicalDay {
            date: "2024-01-02".to_string(),
            fields: std::collections::HashMap::new(),
        };
        assert!(d.field("sma").is_nan());
    }

    #[test]
    fn real_time_response_deserializes() {
        let json = r#"{
            "timestamp": 1700000000,
            "gmtoffset": 0,
            "open": 10.0,
            "close": 11.0,
            "previousClose": 9.5,
            "low": 9.0,
            "high": 12.0,
            "change": 1.0,
            "change_p": 10.5,
            "volume": 1000
        }"#;
        let r: RealTimeResponse = serde_json::from_str(json).unwrap();
        assert!((r.previous_close - 9.5).abs() < 1e-9);
    }
}
