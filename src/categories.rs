use crate::error::DataError;
use crate::models::ScreenedRow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub const NO_FILTER_LABEL: &str = "NoFilter";
const NO_PATTERN_LABEL: &str = "No Pattern";

type RowPredicate = dyn Fn(&ScreenedRow) -> Option<bool> + Send + Sync;

/// A named partition of screened rows.
///
/// The predicate answers `None` when the row lacks the column it inspects.
#[derive(Clone)]
pub struct CategoryFilter {
    label: String,
    column: &'static str,
    predicate: Arc<RowPredicate>,
}

impl CategoryFilter {
    pub fn new<S, F>(label: S, column: &'static str, predicate: F) -> Self
    where
        S: Into<String>,
        F: Fn(&ScreenedRow) -> Option<bool> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            column,
            predicate: Arc::new(predicate),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn matches(&self, row: &ScreenedRow) -> Option<bool> {
        (self.predicate)(row)
    }

    /// Rows belonging to this category.
    ///
    /// Fails when no row carries the inspected column; rows missing it
    /// individually are simply left out.
    pub fn apply(&self, rows: &[ScreenedRow]) -> Result<Vec<ScreenedRow>, DataError> {
        let mut evaluated = rows.is_empty();
        let mut selected = Vec::new();
        for row in rows {
            match self.matches(row) {
                Some(true) => {
                    evaluated = true;
                    selected.push(row.clone());
                }
                Some(false) => evaluated = true,
                None => {}
            }
        }
        if !evaluated {
            return Err(DataError::MissingColumn {
                category: self.label.clone(),
                column: self.column.to_string(),
            });
        }
        Ok(selected)
    }
}

impl fmt::Debug for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CategoryFilter")
            .field("label", &self.label)
            .field("column", &self.column)
            .finish()
    }
}

fn numeric<F: Fn(f64) -> bool>(value: Option<f64>, check: F) -> Option<bool> {
    value.filter(|v| v.is_finite()).map(check)
}

fn text<F: Fn(&str) -> bool>(value: &Option<String>, check: F) -> Option<bool> {
    value.as_deref().map(|v| check(v.trim()))
}

pub fn rsi_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[RSI]>=50", "rsi", |row| numeric(row.rsi, |v| v > 50.0)),
        CategoryFilter::new("[RSI]<=67", "rsi", |row| {
            numeric(row.rsi, |v| (50.0..=67.0).contains(&v))
        }),
        CategoryFilter::new("[RSI]>=68", "rsi", |row| numeric(row.rsi, |v| v >= 68.0)),
    ]
}

pub fn trend_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[T]StrongUp", "trend", |row| text(&row.trend, |t| t == "Strong Up")),
        CategoryFilter::new("[T]WeakUp", "trend", |row| text(&row.trend, |t| t == "Weak Up")),
        CategoryFilter::new("[T]TrendUp", "trend", |row| text(&row.trend, |t| t.ends_with("Up"))),
        CategoryFilter::new("[T]StrongDown", "trend", |row| {
            text(&row.trend, |t| t == "Strong Down")
        }),
        CategoryFilter::new("[T]WeakDown", "trend", |row| text(&row.trend, |t| t == "Weak Down")),
        CategoryFilter::new("[T]Sideways", "trend", |row| text(&row.trend, |t| t == "Sideways")),
        CategoryFilter::new("[T]TrendDown", "trend", |row| {
            text(&row.trend, |t| t.ends_with("Down"))
        }),
    ]
}

pub fn ma_signal_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[MA]Bull", "ma_signal", |row| text(&row.ma_signal, |s| s == "Bullish")),
        CategoryFilter::new("[MA]Bear", "ma_signal", |row| text(&row.ma_signal, |s| s == "Bearish")),
        CategoryFilter::new("[MA]Neutral", "ma_signal", |row| {
            text(&row.ma_signal, |s| s == "Neutral")
        }),
        CategoryFilter::new("[MA]BullCross", "ma_signal", |row| {
            text(&row.ma_signal, |s| s.starts_with("BullCross"))
        }),
        CategoryFilter::new("[MA]BearCross", "ma_signal", |row| {
            text(&row.ma_signal, |s| s.starts_with("BearCross"))
        }),
        CategoryFilter::new("[MA]Support", "ma_signal", |row| {
            text(&row.ma_signal, |s| s.ends_with("Support"))
        }),
        CategoryFilter::new("[MA]Resist", "ma_signal", |row| {
            text(&row.ma_signal, |s| s.ends_with("Resist"))
        }),
    ]
}

pub fn volume_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[Vol]<2.5", "volume", |row| numeric(row.volume, |v| v < 2.5)),
        CategoryFilter::new("[Vol]>=2.5", "volume", |row| numeric(row.volume, |v| v >= 2.5)),
    ]
}

pub fn consolidation_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[Cons]<=10", "consolidation", |row| {
            numeric(row.consolidation, |v| v <= 10.0)
        }),
        CategoryFilter::new("[Cons]>10", "consolidation", |row| {
            numeric(row.consolidation, |v| v > 10.0)
        }),
    ]
}

pub fn breakout_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[BO]LTP<BO", "breakout", |row| {
            numeric(row.breakout, |bo| row.ltp < bo)
        }),
        CategoryFilter::new("[BO]LTP>=BO", "breakout", |row| {
            numeric(row.breakout, |bo| bo > 0.0 && row.ltp >= bo)
        }),
        CategoryFilter::new("[BO]LTP<R", "resistance", |row| {
            numeric(row.resistance, |r| row.ltp < r)
        }),
        CategoryFilter::new("[BO]LTP>=R", "resistance", |row| {
            numeric(row.resistance, |r| r > 0.0 && row.ltp >= r)
        }),
    ]
}

pub fn week52_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[52Wk]LTP>=H", "high_52wk", |row| {
            numeric(row.high_52wk, |h| row.ltp >= h)
        }),
        CategoryFilter::new("[52Wk]LTP>=.9*H", "high_52wk", |row| {
            numeric(row.high_52wk, |h| row.ltp >= 0.9 * h && row.ltp < h)
        }),
        CategoryFilter::new("[52Wk]LTP<.9*H", "high_52wk", |row| {
            numeric(row.high_52wk, |h| row.ltp < 0.9 * h)
        }),
        CategoryFilter::new("[52Wk]LTP>L", "low_52wk", |row| {
            numeric(row.low_52wk, |l| row.ltp > l && row.ltp < 1.1 * l)
        }),
        CategoryFilter::new("[52Wk]LTP>=1.1*L", "low_52wk", |row| {
            numeric(row.low_52wk, |l| row.ltp >= 1.1 * l && row.ltp > l)
        }),
        CategoryFilter::new("[52Wk]LTP<=L", "low_52wk", |row| {
            numeric(row.low_52wk, |l| row.ltp <= l)
        }),
    ]
}

pub fn cci_categories() -> Vec<CategoryFilter> {
    vec![
        CategoryFilter::new("[CCI]<=-100", "cci", |row| numeric(row.cci, |c| c <= -100.0)),
        CategoryFilter::new("[CCI]-100<C<0", "cci", |row| {
            numeric(row.cci, |c| c > -100.0 && c < 0.0)
        }),
        CategoryFilter::new("[CCI]0<=C<=100", "cci", |row| {
            numeric(row.cci, |c| (0.0..=100.0).contains(&c))
        }),
        CategoryFilter::new("[CCI]100<C<=200", "cci", |row| {
            numeric(row.cci, |c| c > 100.0 && c <= 200.0)
        }),
        CategoryFilter::new("[CCI]>200", "cci", |row| numeric(row.cci, |c| c > 200.0)),
    ]
}

fn pattern_name(row: &ScreenedRow) -> String {
    row.pattern
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(NO_PATTERN_LABEL)
        .to_string()
}

/// One `[P]` category per distinct candle pattern present in `rows`.
pub fn pattern_categories(rows: &[ScreenedRow]) -> Vec<CategoryFilter> {
    let patterns: BTreeSet<String> = rows.iter().map(pattern_name).collect();
    patterns
        .into_iter()
        .map(|pattern| {
            let label = format!("[P]{}", pattern);
            CategoryFilter::new(label, "pattern", move |row| Some(pattern_name(row) == pattern))
        })
        .collect()
}

pub fn no_filter() -> CategoryFilter {
    CategoryFilter::new(NO_FILTER_LABEL, "stock", |_| Some(true))
}

/// Indicator-band categories, independent of the data.
pub fn indicator_categories() -> Vec<CategoryFilter> {
    let mut categories = rsi_categories();
    categories.extend(trend_categories());
    categories.extend(ma_signal_categories());
    categories.extend(volume_categories());
    categories.extend(consolidation_categories());
    categories.extend(breakout_categories());
    categories.extend(week52_categories());
    categories.extend(cci_categories());
    categories
}

/// Full catalogue for `rows`: indicator bands, patterns, then `NoFilter`.
pub fn default_categories(rows: &[ScreenedRow]) -> Vec<CategoryFilter> {
    let mut categories = indicator_categories();
    categories.extend(pattern_categories(rows));
    categories.push(no_filter());
    categories
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(ltp: f64) -> ScreenedRow {
        ScreenedRow::new("T", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), ltp)
    }

    fn labels_matching(categories: &[CategoryFilter], row: &ScreenedRow) -> Vec<String> {
        categories
            .iter()
            .filter(|c| c.matches(row) == Some(true))
            .map(|c| c.label().to_string())
            .collect()
    }

    #[test]
    fn cci_bands_are_exclusive() {
        let categories = cci_categories();
        for (cci, expected) in [
            (-150.0, "[CCI]<=-100"),
            (-100.0, "[CCI]<=-100"),
            (-50.0, "[CCI]-100<C<0"),
            (0.0, "[CCI]0<=C<=100"),
            (150.0, "[CCI]100<C<=200"),
            (250.0, "[CCI]>200"),
        ] {
            let mut r = row(10.0);
            r.cci = Some(cci);
            assert_eq!(labels_matching(&categories, &r), vec![expected.to_string()]);
        }
    }

    #[test]
    fn rsi_bands_follow_their_bounds() {
        let categories = rsi_categories();
        let mut r = row(10.0);
        r.rsi = Some(50.0);
        assert_eq!(labels_matching(&categories, &r), vec!["[RSI]<=67".to_string()]);
        r.rsi = Some(70.0);
        assert_eq!(
            labels_matching(&categories, &r),
            vec!["[RSI]>=50".to_string(), "[RSI]>=68".to_string()]
        );
    }

    #[test]
    fn breakout_requires_positive_level() {
        let categories = breakout_categories();
        let mut r = row(10.0);
        r.breakout = Some(0.0);
        r.resistance = Some(12.0);
        assert_eq!(labels_matching(&categories, &r), vec!["[BO]LTP<R".to_string()]);
    }

    #[test]
    fn trend_and_ma_text_matching() {
        let mut r = row(10.0);
        r.trend = Some("Weak Up".to_string());
        r.ma_signal = Some("BullCross-50".to_string());
        assert_eq!(
            labels_matching(&trend_categories(), &r),
            vec!["[T]WeakUp".to_string(), "[T]TrendUp".to_string()]
        );
        assert_eq!(
            labels_matching(&ma_signal_categories(), &r),
            vec!["[MA]BullCross".to_string()]
        );
    }

    #[test]
    fn missing_column_everywhere_is_a_data_error() {
        let rows = vec![row(10.0), row(20.0)];
        let outcome = rsi_categories()[0].apply(&rows);
        assert!(matches!(outcome, Err(DataError::MissingColumn { .. })));

        let mut partial = rows.clone();
        partial[0].rsi = Some(60.0);
        let selected = rsi_categories()[0].apply(&partial).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn patterns_become_categories() {
        let mut a = row(1.0);
        a.pattern = Some("Doji".to_string());
        let b = row(2.0);
        let mut c = row(3.0);
        c.pattern = Some(" ".to_string());
        let rows = vec![a, b, c];
        let categories = pattern_categories(&rows);
        let labels: Vec<_> = categories.iter().map(|c| c.label().to_string()).collect();
        assert_eq!(labels, vec!["[P]Doji".to_string(), "[P]No Pattern".to_string()]);
        assert_eq!(categories[1].apply(&rows).unwrap().len(), 2);

        let all = default_categories(&rows);
        assert_eq!(all.last().map(|c| c.label()), Some(NO_FILTER_LABEL));
    }
}
