//! Patterns persisted file (§6 "Patterns persisted file"). Pure data: a chart-annotation
//! record persisted and loaded by a UI layer that is outside this crate's scope (§9
//! "Throwaway ... integrations are collaborators, not part of the core").

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A rectangular price/x-axis bound (§6 `price_limits{xmin,xmax,ymin,ymax}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceLimits {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

/// One saved chart-pattern annotation (§6 "per pattern").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub symbol: String,
    pub opened: bool,
    pub extra_charts: bool,
    pub show_limits: bool,
    pub x_axis_inverted: bool,
    pub range_acc: f64,
    pub graph_type: u32,
    pub notes: String,
    pub price_limits: PriceLimits,
    pub checks: [bool; 8],
}

impl Default for Pattern {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            opened: false,
            extra_charts: false,
            show_limits: false,
            x_axis_inverted: false,
            range_acc: 0.0,
            graph_type: 0,
            notes: String::new(),
            price_limits: PriceLimits::default(),
            checks: [false; 8],
        }
    }
}

/// Loads every persisted pattern from `path` (one JSON array of [`Pattern`]), or an empty
/// vector if absent.
pub fn load(path: &Path) -> Result<Vec<Pattern>, CoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::InvalidArgument(e.to_string()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Persists `patterns` to `path`.
pub fn save(path: &Path, patterns: &[Pattern]) -> Result<(), CoreError> {
    let text = serde_json::to_string_pretty(patterns)?;
    std::fs::write(path, text).map_err(|e| CoreError::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");

        let patterns = vec![Pattern {
            symbol: "U.US".to_string(),
            checks: [true, false, true, false, false, false, false, false],
            ..Default::default()
        }];
        save(&path, &patterns).unwrap();

        let reloaded = load(&path).unwrap();
        assert_eq!(reloaded, patterns);
    }
}
