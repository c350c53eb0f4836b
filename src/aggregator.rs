use crate::categories::CategoryFilter;
use crate::error::SchedulerError;
use crate::models::{round2, CategoryResult, HorizonStat, ScreenedRow, CANONICAL_HORIZONS, NOTIONAL_STAKE};
use crate::portfolio::{Portfolio, PortfolioCollection, PortfolioSummary};
use crate::scheduler::{schedule_tasks, ScheduleOptions, ScheduleReport};
use crate::scheduler_status::SchedulerStatus;
use crate::summary::{best_per_horizon, mark_outcomes, rollup_category, summarize, BestStrategy, SummaryRow};
use crate::task::{Task, WorkUnit};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_AGGREGATION_TIMEOUT: Duration = Duration::from_secs(300);

/// State owned by one aggregation run.
#[derive(Clone)]
pub struct AggregationContext {
    run_id: Uuid,
    portfolios: Arc<PortfolioCollection>,
    status: SchedulerStatus,
}

impl Default for AggregationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            portfolios: Arc::new(PortfolioCollection::new()),
            status: SchedulerStatus::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn portfolios(&self) -> Arc<PortfolioCollection> {
        Arc::clone(&self.portfolios)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.clone()
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub horizons: Vec<u32>,
    pub simulate_portfolio: bool,
    pub timeout: Duration,
    pub min_acceptable_completion_percentage: f64,
    pub max_workers: Option<usize>,
    pub show_progress: bool,
    pub sell_signal: bool,
    /// Horizons beyond this many periods are not evaluated.
    pub max_backtest_period: Option<u32>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            horizons: CANONICAL_HORIZONS.to_vec(),
            simulate_portfolio: false,
            timeout: DEFAULT_AGGREGATION_TIMEOUT,
            min_acceptable_completion_percentage: 100.0,
            max_workers: None,
            show_progress: false,
            sell_signal: false,
            max_backtest_period: None,
        }
    }
}

impl AggregatorOptions {
    /// Sorted, deduplicated horizons within the backtest period.
    pub fn effective_horizons(&self) -> Vec<u32> {
        let mut horizons: Vec<u32> = self
            .horizons
            .iter()
            .copied()
            .filter(|h| *h > 0)
            .filter(|h| self.max_backtest_period.map_or(true, |max| *h <= max))
            .collect();
        horizons.sort_unstable();
        horizons.dedup();
        horizons
    }
}

/// Output of one category task.
#[derive(Debug)]
pub struct CategoryOutcome {
    pub result: CategoryResult,
    pub members: Vec<ScreenedRow>,
    /// Simulated ledger, registered only once the coordinator accepts the outcome.
    pub portfolio: Option<Portfolio>,
}

/// Capital-weighted growth of `rows` at every horizon.
///
/// Sums are taken over all member rows with missing forward values read as
/// zero. A horizon whose forward prices sum to zero has no evaluable rows.
pub fn calculate_category(label: &str, rows: &[ScreenedRow], horizons: &[u32]) -> CategoryResult {
    let ltp_sum = round2(rows.iter().map(ScreenedRow::entry_price).sum());
    let per_horizon = horizons
        .iter()
        .map(|&horizon| {
            let forward_sum = round2(rows.iter().map(|row| row.forward_price(horizon)).sum());
            let growth_sum = round2(rows.iter().map(|row| row.growth(horizon)).sum());
            if forward_sum == 0.0 || ltp_sum == 0.0 {
                return (horizon, None);
            }
            let percent = round2(100.0 * growth_sum / ltp_sum);
            let stat = HorizonStat {
                percent,
                notional_10k: round2(NOTIONAL_STAKE * (1.0 + 0.01 * percent)),
                projected_value: forward_sum,
            };
            (horizon, Some(stat))
        })
        .collect();
    CategoryResult {
        label: label.to_string(),
        rows: rows.len(),
        per_horizon,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct XRayReport {
    pub run_id: Uuid,
    pub horizons: Vec<u32>,
    /// One entry per category in catalogue order, followed by the `SUMMARY` roll-up.
    pub categories: Vec<CategoryResult>,
    pub win_rates: Vec<SummaryRow>,
    pub best_per_horizon: BTreeMap<u32, BestStrategy>,
    pub incomplete_categories: Vec<String>,
    pub skipped_categories: Vec<String>,
    pub portfolios: Vec<PortfolioSummary>,
}

impl XRayReport {
    pub fn category(&self, label: &str) -> Option<&CategoryResult> {
        self.categories.iter().find(|result| result.label == label)
    }
}

pub struct BacktestAggregator<'a> {
    context: &'a AggregationContext,
    options: AggregatorOptions,
}

impl<'a> BacktestAggregator<'a> {
    pub fn new(context: &'a AggregationContext, options: AggregatorOptions) -> Self {
        Self { context, options }
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    /// Runs one task per category and reduces the outcomes into a report.
    pub fn aggregate(
        &self,
        rows: &[ScreenedRow],
        categories: &[CategoryFilter],
    ) -> Result<XRayReport, SchedulerError> {
        let horizons = self.options.effective_horizons();
        if horizons.is_empty() {
            return Err(SchedulerError::configuration(
                "no horizons left to evaluate within the backtest period",
            ));
        }

        let mut tasks = Vec::with_capacity(categories.len());
        let mut skipped = Vec::new();
        for category in categories {
            let members = match category.apply(rows) {
                Ok(members) => members,
                Err(err) => {
                    warn!("{}", err);
                    skipped.push(category.label().to_string());
                    Vec::new()
                }
            };
            tasks.push(self.category_task(category.label(), members, &horizons)?);
        }

        info!(
            "Run {}: evaluating {} categories over {} rows and horizons {:?}",
            self.context.run_id(),
            tasks.len(),
            rows.len(),
            horizons
        );
        let report = self.schedule(&mut tasks)?;
        if report.timed_out {
            warn!(
                "Run {}: {} of {} categories did not finish in {:.1}s",
                self.context.run_id(),
                report.pending,
                report.total,
                self.options.timeout.as_secs_f64()
            );
        }

        let portfolios = self.context.portfolios();
        let mut results = Vec::with_capacity(tasks.len());
        let mut groups = Vec::with_capacity(tasks.len());
        let mut incomplete = Vec::new();
        for task in tasks.iter_mut() {
            match task.take_result() {
                Some(outcome) => {
                    if let Some(portfolio) = outcome.portfolio {
                        portfolios.add_portfolio(portfolio);
                    }
                    groups.push((outcome.result.label.clone(), outcome.members));
                    results.push(outcome.result);
                }
                None => {
                    incomplete.push(task.name().to_string());
                    results.push(CategoryResult::empty(task.name(), &horizons));
                }
            }
        }

        let labels: Vec<String> = results.iter().map(|result| result.label.clone()).collect();
        let best = best_per_horizon(&results, &horizons);
        let rollup = rollup_category(&results, &horizons);
        results.push(rollup);

        let marked = mark_outcomes(&groups, &horizons, self.options.sell_signal);
        let win_rates = summarize(&labels, &marked, &horizons);

        Ok(XRayReport {
            run_id: self.context.run_id(),
            horizons,
            categories: results,
            win_rates,
            best_per_horizon: best,
            incomplete_categories: incomplete,
            skipped_categories: skipped,
            portfolios: portfolios.summaries(),
        })
    }

    fn category_task(
        &self,
        label: &str,
        members: Vec<ScreenedRow>,
        horizons: &[u32],
    ) -> Result<Task<CategoryOutcome>, SchedulerError> {
        let label_owned = label.to_string();
        let horizons = horizons.to_vec();
        let simulate = self.options.simulate_portfolio;
        let work = WorkUnit::with_task(move |handle| {
            let result = calculate_category(&label_owned, &members, &horizons);
            let portfolio = (simulate && !members.is_empty()).then(|| {
                let mut portfolio = Portfolio::new(label_owned.as_str());
                portfolio.update_from_time_series(&members, &horizons, Some(handle));
                portfolio
            });
            Ok(CategoryOutcome {
                result,
                members,
                portfolio,
            })
        });
        Task::new(label, work)
    }

    fn schedule(&self, tasks: &mut [Task<CategoryOutcome>]) -> Result<ScheduleReport, SchedulerError> {
        let options = ScheduleOptions::new("Backtesting categories")
            .with_timeout(self.options.timeout)
            .with_min_completion(self.options.min_acceptable_completion_percentage)
            .with_progress(self.options.show_progress)
            .with_max_workers(self.options.max_workers)
            .with_status(self.context.status());
        schedule_tasks(tasks, &options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::{cci_categories, default_categories, no_filter, rsi_categories};
    use chrono::NaiveDate;
    use std::thread;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn rsi_row(stock: &str, rsi: f64, ltp: f64, price: f64) -> ScreenedRow {
        let mut row = ScreenedRow::new(stock, day(), ltp).with_outcome(1, price, price - ltp);
        row.rsi = Some(rsi);
        row
    }

    #[test]
    fn five_percent_growth_on_ten_thousand() {
        let rows = vec![
            rsi_row("AAA", 55.0, 4_000.0, 4_300.0),
            rsi_row("BBB", 60.0, 6_000.0, 6_200.0),
        ];
        let result = calculate_category("[RSI]>=50", &rows, &[1, 2]);
        let stat = result.stat(1).unwrap();
        assert!((stat.percent - 5.0).abs() < 1e-9);
        assert!((stat.notional_10k - 10_500.0).abs() < 1e-9);
        assert!((stat.projected_value - 10_500.0).abs() < 1e-9);
        assert!(result.stat(2).is_none());
    }

    #[test]
    fn empty_category_has_no_data() {
        let result = calculate_category("[CCI]>200", &[], &[1]);
        assert!(!result.has_data());
    }

    #[test]
    fn horizons_limited_by_backtest_period() {
        let options = AggregatorOptions {
            horizons: vec![30, 5, 1, 5, 10],
            max_backtest_period: Some(10),
            ..Default::default()
        };
        assert_eq!(options.effective_horizons(), vec![1, 5, 10]);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let rows = vec![
            rsi_row("AAA", 55.0, 100.0, 104.0),
            rsi_row("BBB", 40.0, 50.0, 49.0),
            rsi_row("CCC", 70.0, 80.0, 88.0),
        ];
        let categories = default_categories(&rows);
        let options = AggregatorOptions {
            horizons: vec![1],
            max_workers: Some(2),
            ..Default::default()
        };
        let first = BacktestAggregator::new(&AggregationContext::new(), options.clone())
            .aggregate(&rows, &categories)
            .unwrap();
        let second = BacktestAggregator::new(&AggregationContext::new(), options)
            .aggregate(&rows, &categories)
            .unwrap();
        assert_eq!(first.categories, second.categories);
        assert_eq!(first.win_rates, second.win_rates);
        assert!(first.incomplete_categories.is_empty());
        assert_eq!(first.categories.last().unwrap().label, "SUMMARY");
        assert_eq!(first.categories.len(), categories.len() + 1);
    }

    #[test]
    fn simulation_registers_portfolios_for_populated_categories() {
        let rows = vec![rsi_row("AAA", 55.0, 100.0, 110.0)];
        let context = AggregationContext::new();
        let options = AggregatorOptions {
            horizons: vec![1],
            simulate_portfolio: true,
            ..Default::default()
        };
        let report = BacktestAggregator::new(&context, options)
            .aggregate(&rows, &rsi_categories())
            .unwrap();
        let portfolios = context.portfolios();
        assert!(portfolios.contains("[RSI]>=50"));
        assert!(!portfolios.contains("[RSI]>=68"));
        assert_eq!(report.portfolios.len(), portfolios.len());
        assert_eq!(portfolios.all_ledger_rows().len(), portfolios.len());
    }

    #[test]
    fn unfinished_categories_never_register_portfolios() {
        let rows: Vec<ScreenedRow> = (0..20_000)
            .map(|i| rsi_row(&format!("S{i:05}"), 55.0, 100.0, 101.0 + (i % 7) as f64))
            .collect();
        let categories: Vec<CategoryFilter> = (0..8)
            .map(|i| CategoryFilter::new(format!("All-{i}"), "ltp", |_| Some(true)))
            .collect();
        let context = AggregationContext::new();
        let options = AggregatorOptions {
            horizons: vec![1],
            simulate_portfolio: true,
            timeout: Duration::from_millis(5),
            max_workers: Some(1),
            show_progress: false,
            ..Default::default()
        };
        let report = BacktestAggregator::new(&context, options)
            .aggregate(&rows, &categories)
            .unwrap();
        assert!(!report.incomplete_categories.is_empty());

        // let any job still running on the worker finish
        thread::sleep(Duration::from_secs(3));

        let portfolios = context.portfolios();
        for category in &categories {
            let label = category.label();
            let incomplete = report.incomplete_categories.iter().any(|l| l == label);
            assert_ne!(incomplete, portfolios.contains(label), "{label}");
            if incomplete {
                assert!(!report.category(label).unwrap().has_data());
            }
        }
    }

    #[test]
    fn missing_column_skips_category_but_keeps_its_row() {
        let rows = vec![
            rsi_row("AAA", 55.0, 100.0, 104.0),
            rsi_row("BBB", 45.0, 50.0, 49.0),
        ];
        let mut categories = cci_categories();
        categories.push(no_filter());
        let options = AggregatorOptions {
            horizons: vec![1],
            show_progress: false,
            ..Default::default()
        };
        let report = BacktestAggregator::new(&AggregationContext::new(), options)
            .aggregate(&rows, &categories)
            .unwrap();
        assert_eq!(report.skipped_categories.len(), cci_categories().len());
        assert!(report.skipped_categories.iter().any(|l| l == "[CCI]>200"));
        assert!(!report.category("[CCI]>200").unwrap().has_data());
        assert!(report.category("NoFilter").unwrap().has_data());
        assert!(report.incomplete_categories.is_empty());
        let cci_rate = report.win_rates.iter().find(|row| row.key == "[CCI]>200").unwrap();
        assert_eq!(cci_rate.cell(1), "-");
    }
}
