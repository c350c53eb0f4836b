use crate::models::{round2, CategoryResult, HorizonStat, ScreenedRow, NOTIONAL_STAKE};
use rayon::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const SUMMARY_LABEL: &str = "SUMMARY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeMarker {
    Positive,
    Negative,
}

/// A screened row reduced to one positive/negative marker per horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkedRow {
    pub key: String,
    pub stock: String,
    pub markers: BTreeMap<u32, Option<OutcomeMarker>>,
}

/// Marks each horizon of `row` by the sign of its realized move.
///
/// With `sell_signal` a falling price counts as a win.
pub fn mark_row(key: &str, row: &ScreenedRow, horizons: &[u32], sell_signal: bool) -> MarkedRow {
    let markers = horizons
        .iter()
        .map(|&horizon| {
            let forward_price = row.forward_price(horizon);
            let change = if forward_price > 0.0 && row.entry_price() > 0.0 {
                Some(forward_price - row.entry_price())
            } else {
                row.outcome(horizon)
                    .and_then(|outcome| outcome.growth)
                    .filter(|growth| growth.is_finite())
            };
            let marker = change.map(|change| match (change >= 0.0, sell_signal) {
                (true, false) | (false, true) => OutcomeMarker::Positive,
                _ => OutcomeMarker::Negative,
            });
            (horizon, marker)
        })
        .collect();
    MarkedRow {
        key: key.to_string(),
        stock: row.stock.clone(),
        markers,
    }
}

pub fn mark_outcomes(
    groups: &[(String, Vec<ScreenedRow>)],
    horizons: &[u32],
    sell_signal: bool,
) -> Vec<MarkedRow> {
    groups
        .par_iter()
        .flat_map_iter(|(key, rows)| {
            rows.iter()
                .map(move |row| mark_row(key, row, horizons, sell_signal))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WinRate {
    pub positives: usize,
    pub negatives: usize,
}

impl WinRate {
    pub fn evaluated(&self) -> usize {
        self.positives + self.negatives
    }

    pub fn percentage(&self) -> Option<f64> {
        let evaluated = self.evaluated();
        if evaluated == 0 {
            return None;
        }
        Some(self.positives as f64 * 100.0 / evaluated as f64)
    }

    fn record(&mut self, marker: OutcomeMarker) {
        match marker {
            OutcomeMarker::Positive => self.positives += 1,
            OutcomeMarker::Negative => self.negatives += 1,
        }
    }

    fn merge(&mut self, other: WinRate) {
        self.positives += other.positives;
        self.negatives += other.negatives;
    }
}

impl fmt::Display for WinRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percentage() {
            Some(percentage) => write!(f, "{:.2}% of ({})", percentage, self.evaluated()),
            None => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub key: String,
    pub per_horizon: BTreeMap<u32, WinRate>,
    pub overall: WinRate,
}

impl SummaryRow {
    fn new(key: &str, horizons: &[u32]) -> Self {
        Self {
            key: key.to_string(),
            per_horizon: horizons.iter().map(|h| (*h, WinRate::default())).collect(),
            overall: WinRate::default(),
        }
    }

    fn record(&mut self, horizon: u32, marker: OutcomeMarker) {
        self.per_horizon.entry(horizon).or_default().record(marker);
        self.overall.record(marker);
    }

    pub fn cell(&self, horizon: u32) -> String {
        self.per_horizon
            .get(&horizon)
            .copied()
            .unwrap_or_default()
            .to_string()
    }
}

/// Win rates per key and horizon, followed by a `SUMMARY` row across all keys.
///
/// Rows come out in `keys` order, one per key even when no marked row carries
/// it. Keys found only in `rows` follow in first-seen order.
pub fn summarize(keys: &[String], rows: &[MarkedRow], horizons: &[u32]) -> Vec<SummaryRow> {
    let mut summaries: Vec<SummaryRow> = Vec::with_capacity(keys.len() + 1);
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(keys.len());
    for key in keys {
        if !positions.contains_key(key) {
            positions.insert(key.clone(), summaries.len());
            summaries.push(SummaryRow::new(key, horizons));
        }
    }

    for row in rows {
        let index = match positions.get(&row.key) {
            Some(index) => *index,
            None => {
                positions.insert(row.key.clone(), summaries.len());
                summaries.push(SummaryRow::new(&row.key, horizons));
                summaries.len() - 1
            }
        };
        for (&horizon, marker) in &row.markers {
            if let Some(marker) = marker {
                summaries[index].record(horizon, *marker);
            }
        }
    }

    let mut total = SummaryRow::new(SUMMARY_LABEL, horizons);
    for summary in &summaries {
        for (horizon, rate) in &summary.per_horizon {
            total.per_horizon.entry(*horizon).or_default().merge(*rate);
        }
        total.overall.merge(summary.overall);
    }

    summaries.push(total);
    summaries
}

/// Averages the notional outcome of every category that has data.
pub fn rollup_category(results: &[CategoryResult], horizons: &[u32]) -> CategoryResult {
    let per_horizon = horizons
        .iter()
        .map(|&horizon| {
            let stats: Vec<&HorizonStat> = results.iter().filter_map(|r| r.stat(horizon)).collect();
            if stats.is_empty() {
                return (horizon, None);
            }
            let count = stats.len() as f64;
            let notionals: Vec<f64> = stats.iter().map(|s| s.notional_10k).collect();
            let total: f64 = notionals.iter().sum();
            let percent = round2((total - NOTIONAL_STAKE * count) * 100.0 / (NOTIONAL_STAKE * count));
            let stat = HorizonStat {
                percent,
                notional_10k: round2(notionals.mean()),
                projected_value: round2(stats.iter().map(|s| s.projected_value).sum()),
            };
            (horizon, Some(stat))
        })
        .collect();
    CategoryResult {
        label: SUMMARY_LABEL.to_string(),
        rows: results.iter().filter(|r| r.has_data()).count(),
        per_horizon,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestStrategy {
    pub label: String,
    pub percent: f64,
}

/// Highest percent growth per horizon; ties keep the first category in table order.
pub fn best_per_horizon(results: &[CategoryResult], horizons: &[u32]) -> BTreeMap<u32, BestStrategy> {
    let mut best = BTreeMap::new();
    for &horizon in horizons {
        let mut current: Option<BestStrategy> = None;
        for result in results {
            let Some(stat) = result.stat(horizon) else {
                continue;
            };
            let improves = current
                .as_ref()
                .map(|best| stat.percent > best.percent)
                .unwrap_or(true);
            if improves {
                current = Some(BestStrategy {
                    label: result.label.clone(),
                    percent: stat.percent,
                });
            }
        }
        if let Some(found) = current {
            best.insert(horizon, found);
        }
    }
    best
}
