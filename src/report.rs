use crate::aggregator::XRayReport;
use crate::models::format_cell;
use crate::summary::SummaryRow;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Destination for finished x-ray reports.
pub trait ReportSink {
    fn publish(&self, name: &str, report: &XRayReport) -> Result<()>;
}

/// Writes each report as pretty JSON into a directory.
pub struct JsonReportSink {
    directory: PathBuf,
}

impl JsonReportSink {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        let file_name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.json", file_name))
    }
}

impl ReportSink for JsonReportSink {
    fn publish(&self, name: &str, report: &XRayReport) -> Result<()> {
        fs::create_dir_all(&self.directory).with_context(|| {
            format!("Failed to create report directory {}", self.directory.display())
        })?;
        let path = self.path_for(name);
        let payload = serde_json::to_string_pretty(report).context("Report encode failed")?;
        fs::write(&path, payload)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Saved x-ray report to {}", path.display());
        Ok(())
    }
}

pub fn print_report(report: &XRayReport) {
    println!("\n=== Growth of 10k (run {}) ===", report.run_id);
    print!("{:<20}", "Category");
    for horizon in &report.horizons {
        print!(" {:>10} {:>10}", format!("{}Pd-%", horizon), format!("{}Pd-10k", horizon));
    }
    println!();
    for result in &report.categories {
        print!("{:<20}", result.label);
        for horizon in &report.horizons {
            let stat = result.stat(*horizon);
            print!(
                " {:>10} {:>10}",
                format_cell(stat.map(|s| s.percent), ""),
                format_cell(stat.map(|s| s.notional_10k), "")
            );
        }
        println!();
    }

    if !report.best_per_horizon.is_empty() {
        println!("\nBest strategy per period:");
        for (horizon, best) in &report.best_per_horizon {
            println!("  {:>3}Pd: {} ({:.2}%)", horizon, best.label, best.percent);
        }
    }

    print_win_rates(&report.win_rates, &report.horizons);

    if !report.portfolios.is_empty() {
        println!("\nSimulated portfolios:");
        for portfolio in &report.portfolios {
            println!(
                "  {:<20} entries={} open={} initial={:.2} current={:.2} profit={:.2}",
                portfolio.name,
                portfolio.ledger_entries,
                portfolio.open_positions,
                portfolio.initial_value,
                portfolio.current_value,
                portfolio.profit
            );
        }
    }

    if !report.incomplete_categories.is_empty() {
        println!(
            "\nIncomplete categories: {}",
            report.incomplete_categories.join(", ")
        );
    }
}

pub fn print_win_rates(rows: &[SummaryRow], horizons: &[u32]) {
    println!("\n=== Win rates ===");
    print!("{:<20}", "Category");
    for horizon in horizons {
        print!(" {:>18}", format!("{}-Pd", horizon));
    }
    println!(" {:>18}", "Overall");
    for row in rows {
        print!("{:<20}", row.key);
        for horizon in horizons {
            print!(" {:>18}", row.cell(*horizon));
        }
        println!(" {:>18}", row.overall.to_string());
    }
}

pub fn report_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("xray");
    format!("{}-xray", stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_paths_are_sanitized() {
        let sink = JsonReportSink::new("/tmp/reports");
        assert_eq!(
            sink.path_for("scan [RSI]>=50"),
            PathBuf::from("/tmp/reports/scan__RSI___50.json")
        );
        assert_eq!(report_name(Path::new("/data/rows.json")), "rows-xray");
    }
}
