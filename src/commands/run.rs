use crate::aggregator::BacktestAggregator;
use crate::categories::default_categories;
use crate::config::XRaySettings;
use crate::context::AppContext;
use crate::report::{print_report, report_name, JsonReportSink, ReportSink};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Command-line values that take precedence over `XRAY_*` settings.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub horizons: Vec<u32>,
    pub timeout_secs: Option<f64>,
    pub min_completion_percent: Option<f64>,
    pub simulate_portfolio: bool,
    pub max_workers: Option<usize>,
    pub sell_signal: bool,
    pub max_backtest_period: Option<u32>,
    pub no_progress: bool,
}

impl RunOverrides {
    pub fn apply(&self, mut settings: XRaySettings) -> Result<XRaySettings> {
        if !self.horizons.is_empty() {
            if self.horizons.contains(&0) {
                return Err(anyhow!("--horizons must contain only positive periods"));
            }
            settings.horizons = self.horizons.clone();
        }
        if let Some(timeout) = self.timeout_secs {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(anyhow!("--timeout-secs must be positive (value: {})", timeout));
            }
            settings.timeout_secs = timeout;
        }
        if let Some(percent) = self.min_completion_percent {
            settings.min_completion_percent = percent;
        }
        if self.simulate_portfolio {
            settings.simulate_portfolio = true;
        }
        if self.max_workers.is_some() {
            settings.max_workers = self.max_workers;
        }
        if self.sell_signal {
            settings.sell_signal = true;
        }
        if self.max_backtest_period.is_some() {
            settings.max_backtest_period = self.max_backtest_period;
        }
        if self.no_progress {
            settings.show_progress = false;
        }
        Ok(settings)
    }
}

pub fn run(
    app: &AppContext,
    input: &Path,
    output_dir: Option<PathBuf>,
    overrides: &RunOverrides,
) -> Result<()> {
    let settings = overrides.apply(app.xray_settings()?)?;
    info!(
        "Received run command for {} (horizons {:?}, portfolio simulation {})",
        input.display(),
        settings.horizons,
        if settings.simulate_portfolio { "on" } else { "off" }
    );

    let context = app.aggregation_context();
    let rows = app.load_rows(input, &context.status())?;
    let categories = default_categories(&rows);
    let aggregator = BacktestAggregator::new(&context, settings.aggregator_options());
    let report = aggregator.aggregate(&rows, &categories)?;
    if !report.skipped_categories.is_empty() {
        warn!(
            "{} categories had no data for their column: {}",
            report.skipped_categories.len(),
            report.skipped_categories.join(", ")
        );
    }

    print_report(&report);

    if let Some(directory) = output_dir {
        JsonReportSink::new(directory).publish(&report_name(input), &report)?;
    }
    info!("Completed x-ray run {}", report.run_id);
    Ok(())
}
