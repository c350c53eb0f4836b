use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Horizons (in trading periods) evaluated when none are configured.
pub const CANONICAL_HORIZONS: [u32; 9] = [1, 2, 3, 4, 5, 10, 15, 22, 30];

/// Notional stake used for the growth-of-capital columns.
pub const NOTIONAL_STAKE: f64 = 10_000.0;

/// Realized outcome of a screened row after `horizon` periods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonOutcome {
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub growth: Option<f64>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// One verdict row produced by a scan, with its realized forward outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedRow {
    pub stock: String,
    pub date: NaiveDate,
    pub ltp: f64,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub cci: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub trend: Option<String>,
    #[serde(default)]
    pub ma_signal: Option<String>,
    #[serde(default)]
    pub consolidation: Option<f64>,
    #[serde(default)]
    pub breakout: Option<f64>,
    #[serde(default)]
    pub resistance: Option<f64>,
    #[serde(default)]
    pub high_52wk: Option<f64>,
    #[serde(default)]
    pub low_52wk: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub outcomes: BTreeMap<u32, HorizonOutcome>,
}

impl ScreenedRow {
    pub fn new<S: Into<String>>(stock: S, date: NaiveDate, ltp: f64) -> Self {
        Self {
            stock: stock.into(),
            date,
            ltp,
            rsi: None,
            cci: None,
            volume: None,
            trend: None,
            ma_signal: None,
            consolidation: None,
            breakout: None,
            resistance: None,
            high_52wk: None,
            low_52wk: None,
            pattern: None,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn with_outcome(mut self, horizon: u32, price: f64, growth: f64) -> Self {
        self.outcomes.insert(
            horizon,
            HorizonOutcome {
                price: Some(price),
                growth: Some(growth),
                date: None,
            },
        );
        self
    }

    pub fn outcome(&self, horizon: u32) -> Option<&HorizonOutcome> {
        self.outcomes.get(&horizon)
    }

    /// Forward price at `horizon`, with missing or non-finite values read as zero.
    pub fn forward_price(&self, horizon: u32) -> f64 {
        self.outcome(horizon)
            .and_then(|outcome| outcome.price)
            .filter(|value| value.is_finite())
            .unwrap_or(0.0)
    }

    /// Realized growth at `horizon`, with missing or non-finite values read as zero.
    pub fn growth(&self, horizon: u32) -> f64 {
        self.outcome(horizon)
            .and_then(|outcome| outcome.growth)
            .filter(|value| value.is_finite())
            .unwrap_or(0.0)
    }

    pub fn entry_price(&self) -> f64 {
        if self.ltp.is_finite() {
            self.ltp
        } else {
            0.0
        }
    }
}

/// Capital-weighted statistics of one category at one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonStat {
    pub percent: f64,
    pub notional_10k: f64,
    /// Sum of the forward prices of every member row.
    pub projected_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub label: String,
    pub rows: usize,
    /// `None` marks a horizon without evaluable rows.
    pub per_horizon: BTreeMap<u32, Option<HorizonStat>>,
}

impl CategoryResult {
    pub fn empty<S: Into<String>>(label: S, horizons: &[u32]) -> Self {
        Self {
            label: label.into(),
            rows: 0,
            per_horizon: horizons.iter().map(|h| (*h, None)).collect(),
        }
    }

    pub fn stat(&self, horizon: u32) -> Option<&HorizonStat> {
        self.per_horizon.get(&horizon).and_then(|stat| stat.as_ref())
    }

    pub fn has_data(&self) -> bool {
        self.per_horizon.values().any(|stat| stat.is_some())
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Renders an optional statistic the way report tables show it.
pub fn format_cell(value: Option<f64>, suffix: &str) -> String {
    match value {
        Some(value) => format!("{:.2}{}", value, suffix),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_deserialize_with_horizon_keys() {
        let raw = r#"{
            "stock": "ABC",
            "date": "2024-01-02",
            "ltp": 100.0,
            "rsi": 55.5,
            "outcomes": {"1": {"price": 110.0, "growth": 10.0}, "5": {"price": 95.0}}
        }"#;
        let row: ScreenedRow = serde_json::from_str(raw).unwrap();
        assert_eq!(row.stock, "ABC");
        assert_eq!(row.rsi, Some(55.5));
        assert!((row.forward_price(1) - 110.0).abs() < 1e-9);
        assert!((row.growth(5)).abs() < 1e-9);
        assert!((row.forward_price(22)).abs() < 1e-9);
    }

    #[test]
    fn missing_stat_renders_as_dash() {
        assert_eq!(format_cell(None, " %"), "-");
        assert_eq!(format_cell(Some(5.0), " %"), "5.00 %");
        assert!((round2(10_499.999) - 10_500.0).abs() < 1e-9);
    }
}
