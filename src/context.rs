use crate::aggregator::AggregationContext;
use crate::config::XRaySettings;
use crate::models::ScreenedRow;
use crate::scheduler_status::SchedulerStatus;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const SETTINGS_PREFIX: &str = "XRAY_";

#[derive(Clone)]
pub struct AppContext {
    settings: HashMap<String, String>,
}

impl AppContext {
    pub fn from_env() -> Self {
        let settings = std::env::vars()
            .filter(|(key, _)| key.starts_with(SETTINGS_PREFIX))
            .collect();
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: HashMap<String, String>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn xray_settings(&self) -> Result<XRaySettings> {
        XRaySettings::from_settings_map(&self.settings)
    }

    /// Fresh state for one aggregation run.
    pub fn aggregation_context(&self) -> AggregationContext {
        let context = AggregationContext::new();
        context.status().set_phase("Idle");
        context
    }

    pub fn load_rows<P: AsRef<Path>>(&self, path: P, status: &SchedulerStatus) -> Result<Vec<ScreenedRow>> {
        load_screened_rows(path, status)
    }
}

/// Reads a JSON array of screened rows, dropping rows without a security name.
pub fn load_screened_rows<P: AsRef<Path>>(path: P, status: &SchedulerStatus) -> Result<Vec<ScreenedRow>> {
    let path = path.as_ref();
    status.set_phase(format!("Loading screened rows from {}", path.display()));
    let file = File::open(path)
        .with_context(|| format!("Failed to open screened rows at {}", path.display()))?;
    let reader = BufReader::new(file);
    let rows: Vec<ScreenedRow> = serde_json::from_reader(reader)
        .with_context(|| format!("Screened rows decode failed for {}", path.display()))?;

    let total = rows.len();
    let rows: Vec<ScreenedRow> = rows
        .into_iter()
        .filter(|row| !row.stock.trim().is_empty())
        .collect();
    if rows.len() < total {
        warn!(
            "Dropped {} screened row(s) without a security name",
            total - rows.len()
        );
    }
    if rows.is_empty() {
        return Err(anyhow!("No screened rows found in {}", path.display()));
    }
    info!("Loaded {} screened rows from {}", rows.len(), path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_rows_and_drops_unnamed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            r#"[{{"stock":"ABC","date":"2024-01-02","ltp":10.0}},{{"stock":" ","date":"2024-01-02","ltp":5.0}}]"#
        )
        .unwrap();
        let rows = load_screened_rows(&path, &SchedulerStatus::new()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn settings_come_from_the_map() {
        let context = AppContext::from_settings(HashMap::from([(
            "XRAY_HORIZONS".to_string(),
            "1,2".to_string(),
        )]));
        assert_eq!(context.xray_settings().unwrap().horizons, vec![1, 2]);
    }
}
