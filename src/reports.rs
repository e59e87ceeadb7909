//! Reports persisted file (§6 "Reports persisted file"): a map of report name → report
//! object, consumed by expression `R()` (§4.4).

use std::collections::HashMap;
use std::path::Path;

use crate::error::CoreError;
use crate::expr::fields::Report;

/// Loads the reports file (a name → [`Report`] map) from disk, or an empty map if absent.
pub fn load(path: &Path) -> Result<HashMap<String, Report>, CoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::InvalidArgument(e.to_string()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Persists the reports map to disk.
pub fn save(path: &Path, reports: &HashMap<String, Report>) -> Result<(), CoreError> {
    let text = serde_json::to_string_pretty(reports)?;
    std::fs::write(path, text).map_err(|e| CoreError::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::fields::ReportTitle;

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");

        let mut reports = HashMap::new();
        reports.insert(
            "watchlist".to_string(),
            Report {
                name: "watchlist".to_string(),
                titles: vec![ReportTitle {
                    symbol: "U.US".to_string(),
                    average_quantity: 10.0,
                    ..Default::default()
                }],
            },
        );
        save(&path, &reports).unwrap();

        let reloaded = load(&path).unwrap();
        assert_eq!(reloaded["watchlist"].titles[0].symbol, "U.US");
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reports = load(&dir.path().join("missing.json")).unwrap();
        assert!(reports.is_empty());
    }
}
