use crate::aggregator::AggregatorOptions;
use crate::categories::default_categories;
use crate::context::AppContext;
use crate::models::ScreenedRow;
use crate::report::print_win_rates;
use crate::summary::{mark_outcomes, summarize, SummaryRow};
use anyhow::Result;
use log::{info, warn};
use std::path::Path;

/// Win rates per category without scheduling the growth computation.
pub fn win_rates(rows: &[ScreenedRow], options: &AggregatorOptions) -> Vec<SummaryRow> {
    let horizons = options.effective_horizons();
    let categories = default_categories(rows);
    let labels: Vec<String> = categories
        .iter()
        .map(|category| category.label().to_string())
        .collect();
    let groups: Vec<(String, Vec<ScreenedRow>)> = categories
        .iter()
        .filter_map(|category| match category.apply(rows) {
            Ok(members) => Some((category.label().to_string(), members)),
            Err(err) => {
                warn!("{}", err);
                None
            }
        })
        .collect();
    let marked = mark_outcomes(&groups, &horizons, options.sell_signal);
    summarize(&labels, &marked, &horizons)
}

pub fn run(app: &AppContext, input: &Path, sell_signal: bool) -> Result<()> {
    let mut options = app.xray_settings()?.aggregator_options();
    options.sell_signal |= sell_signal;
    info!(
        "Summarizing win rates for {} ({} signal)",
        input.display(),
        if options.sell_signal { "sell" } else { "buy" }
    );
    let context = app.aggregation_context();
    let rows = app.load_rows(input, &context.status())?;
    let summaries = win_rates(&rows, &options);
    print_win_rates(&summaries, &options.effective_horizons());
    Ok(())
}
