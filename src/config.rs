use crate::aggregator::{AggregatorOptions, DEFAULT_AGGREGATION_TIMEOUT};
use crate::models::CANONICAL_HORIZONS;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Run settings for an x-ray aggregation, read from a flat settings map.
#[derive(Debug, Clone, PartialEq)]
pub struct XRaySettings {
    pub horizons: Vec<u32>,
    pub timeout_secs: f64,
    pub min_completion_percent: f64,
    pub simulate_portfolio: bool,
    pub max_workers: Option<usize>,
    pub sell_signal: bool,
    pub max_backtest_period: Option<u32>,
    pub show_progress: bool,
}

impl Default for XRaySettings {
    fn default() -> Self {
        Self {
            horizons: CANONICAL_HORIZONS.to_vec(),
            timeout_secs: DEFAULT_AGGREGATION_TIMEOUT.as_secs_f64(),
            min_completion_percent: 100.0,
            simulate_portfolio: false,
            max_workers: None,
            sell_signal: false,
            max_backtest_period: None,
            show_progress: true,
        }
    }
}

impl XRaySettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let horizons = if has_setting(settings, "XRAY_HORIZONS") {
            require_setting_u32_list(settings, "XRAY_HORIZONS")?
        } else {
            defaults.horizons
        };
        let timeout_secs = if has_setting(settings, "XRAY_TIMEOUT_SECS") {
            require_setting_f64(settings, "XRAY_TIMEOUT_SECS", Some(0.001), None)?
        } else {
            defaults.timeout_secs
        };
        let min_completion_percent = if has_setting(settings, "XRAY_MIN_COMPLETION_PERCENT") {
            require_setting_f64(settings, "XRAY_MIN_COMPLETION_PERCENT", Some(0.0), Some(100.0))?
        } else {
            defaults.min_completion_percent
        };
        let simulate_portfolio = optional_setting_bool(
            settings,
            "XRAY_SIMULATE_PORTFOLIO",
            defaults.simulate_portfolio,
        )?;
        let max_workers = if has_setting(settings, "XRAY_MAX_WORKERS") {
            Some(require_setting_usize(settings, "XRAY_MAX_WORKERS", 1)?)
        } else {
            None
        };
        let sell_signal = optional_setting_bool(settings, "XRAY_SELL_SIGNAL", defaults.sell_signal)?;
        let max_backtest_period = if has_setting(settings, "XRAY_MAX_BACKTEST_PERIOD") {
            let value = require_setting_usize(settings, "XRAY_MAX_BACKTEST_PERIOD", 1)?;
            Some(u32::try_from(value).map_err(|_| {
                anyhow!(
                    "Setting XRAY_MAX_BACKTEST_PERIOD must be <= {} (value: {})",
                    u32::MAX,
                    value
                )
            })?)
        } else {
            None
        };
        let show_progress =
            optional_setting_bool(settings, "XRAY_SHOW_PROGRESS", defaults.show_progress)?;

        if let (Some(max), Some(min)) = (max_backtest_period, horizons.iter().min()) {
            if *min > max {
                return Err(anyhow!(
                    "XRAY_MAX_BACKTEST_PERIOD ({}) excludes every horizon in XRAY_HORIZONS ({:?})",
                    max,
                    horizons
                ));
            }
        }

        Ok(Self {
            horizons,
            timeout_secs,
            min_completion_percent,
            simulate_portfolio,
            max_workers,
            sell_signal,
            max_backtest_period,
            show_progress,
        })
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            horizons: self.horizons.clone(),
            simulate_portfolio: self.simulate_portfolio,
            timeout: Duration::from_secs_f64(self.timeout_secs),
            min_acceptable_completion_percentage: self.min_completion_percent,
            max_workers: self.max_workers,
            show_progress: self.show_progress,
            sell_signal: self.sell_signal,
            max_backtest_period: self.max_backtest_period,
        }
    }
}

fn has_setting(settings: &HashMap<String, String>, key: &str) -> bool {
    settings
        .get(key)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn optional_setting_bool(
    settings: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    if !has_setting(settings, key) {
        return Ok(default);
    }
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be a boolean (value: {})",
            key,
            raw
        )),
    }
}

fn require_setting_u32_list(settings: &HashMap<String, String>, key: &str) -> Result<Vec<u32>> {
    let raw = require_setting(settings, key)?;
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = entry.parse::<u32>().map_err(|_| {
            anyhow!(
                "Setting {} must be a list of whole periods (value: {})",
                key,
                raw
            )
        })?;
        if value == 0 {
            return Err(anyhow!(
                "Setting {} must contain only positive periods (value: {})",
                key,
                raw
            ));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(anyhow!(
            "Setting {} must contain at least one period (value: {})",
            key,
            raw
        ));
    }

    values.sort_unstable();
    values.dedup();
    Ok(values)
}
