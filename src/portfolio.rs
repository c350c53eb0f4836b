use crate::models::ScreenedRow;
use crate::row_utils::{group_rows_by_security, horizon_date};
use crate::task::TaskHandle;
use chrono::NaiveDate;
use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityAction {
    Buy,
    Sell,
    Hold,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityAction::Buy => "buy",
            SecurityAction::Sell => "sell",
            SecurityAction::Hold => "hold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub name: String,
    pub ltp: f64,
    /// +1 buy, -1 sell, 0 hold.
    pub quantity: i64,
    pub date: NaiveDate,
    pub growth: f64,
}

impl Security {
    pub fn new<S: Into<String>>(
        name: S,
        ltp: f64,
        quantity: i64,
        date: NaiveDate,
        growth: f64,
    ) -> Self {
        Self {
            name: name.into(),
            ltp,
            quantity,
            date,
            growth,
        }
    }

    pub fn action(&self) -> SecurityAction {
        match self.quantity.signum() {
            1 => SecurityAction::Buy,
            -1 => SecurityAction::Sell,
            _ => SecurityAction::Hold,
        }
    }

    pub fn investment(&self) -> f64 {
        self.ltp * self.quantity as f64
    }
}

/// One flattened ledger entry with running totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub portfolio: String,
    pub date: NaiveDate,
    pub name: String,
    pub ltp: f64,
    pub quantity: i64,
    pub action: SecurityAction,
    pub investment: f64,
    pub growth: f64,
    pub cumulative_investment: f64,
    pub cumulative_growth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub name: String,
    pub ledger_entries: usize,
    pub open_positions: usize,
    pub initial_value: f64,
    pub current_value: f64,
    pub profit: f64,
}

/// Append-only, date-keyed ledger of simulated one-unit positions.
#[derive(Debug, Default)]
pub struct Portfolio {
    name: String,
    ledger: BTreeMap<NaiveDate, Vec<Security>>,
    holdings: HashMap<String, Security>,
    ledger_len: usize,
    running_value: f64,
    initial_value: OnceLock<f64>,
    current_value: OnceLock<f64>,
}

impl Portfolio {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ledger(&self) -> &BTreeMap<NaiveDate, Vec<Security>> {
        &self.ledger
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger_len
    }

    pub fn holdings(&self) -> &HashMap<String, Security> {
        &self.holdings
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.holdings.contains_key(name)
    }

    /// Net capital committed across every ledger entry.
    pub fn running_value(&self) -> f64 {
        self.running_value
    }

    pub fn add_security(&mut self, security: Security) {
        self.holdings
            .insert(security.name.clone(), security.clone());
        self.append(security);
    }

    pub fn remove_security(&mut self, security: Security) {
        self.holdings.remove(&security.name);
        self.append(security);
    }

    /// Records growth on a held position without a capital event.
    pub fn record_hold(&mut self, mut security: Security) {
        security.quantity = 0;
        self.append(security);
    }

    fn append(&mut self, security: Security) {
        self.running_value += security.investment();
        self.ledger.entry(security.date).or_default().push(security);
        self.ledger_len += 1;
        self.initial_value = OnceLock::new();
        self.current_value = OnceLock::new();
    }

    /// Replays forward outcomes of `rows` over `horizons`, one unit per security.
    ///
    /// A security not yet held is bought at the start of the move; a falling
    /// move sells it at the horizon price, a non-falling move on a held
    /// security appends a zero-quantity hold entry.
    pub fn update_from_time_series(
        &mut self,
        rows: &[ScreenedRow],
        horizons: &[u32],
        handle: Option<&TaskHandle>,
    ) {
        let mut horizons = horizons.to_vec();
        horizons.sort_unstable();
        horizons.dedup();

        let grouped = group_rows_by_security(rows);
        let total = (grouped.values().map(Vec::len).sum::<usize>() * horizons.len()) as u64;
        let mut done = 0u64;

        for (name, security_rows) in &grouped {
            for row in security_rows {
                let mut previous_price = row.entry_price();
                let mut previous_date = row.date;
                for &horizon in &horizons {
                    done += 1;
                    let forward_price = row.forward_price(horizon);
                    if previous_price > 0.0 && forward_price > 0.0 {
                        let date = horizon_date(row, horizon);
                        let price_rise = forward_price - previous_price;
                        if !self.is_held(name) {
                            self.add_security(Security::new(
                                name.as_str(),
                                previous_price,
                                1,
                                previous_date,
                                0.0,
                            ));
                            if price_rise < 0.0 {
                                self.remove_security(Security::new(
                                    name.as_str(),
                                    forward_price,
                                    -1,
                                    date,
                                    price_rise,
                                ));
                            }
                        } else if price_rise < 0.0 {
                            self.remove_security(Security::new(
                                name.as_str(),
                                forward_price,
                                -1,
                                date,
                                price_rise,
                            ));
                        } else {
                            self.record_hold(Security::new(
                                name.as_str(),
                                forward_price,
                                0,
                                date,
                                price_rise,
                            ));
                        }
                        previous_price = forward_price;
                        previous_date = date;
                    }
                    if let Some(handle) = handle {
                        handle.update_progress(done, total);
                    }
                }
            }
        }
        debug!(
            "Portfolio {} now has {} ledger entries and {} open position(s)",
            self.name,
            self.ledger_len,
            self.holdings.len()
        );
    }

    fn entries(&self) -> impl Iterator<Item = &Security> {
        self.ledger.values().flat_map(|entries| entries.iter())
    }

    /// Sell proceeds minus buy cost; zero until both sides have entries.
    pub fn profit(&self) -> f64 {
        let mut proceeds = 0.0;
        let mut cost = 0.0;
        let mut has_sells = false;
        let mut has_buys = false;
        for security in self.entries() {
            match security.action() {
                SecurityAction::Buy => {
                    has_buys = true;
                    cost += security.investment();
                }
                SecurityAction::Sell => {
                    has_sells = true;
                    proceeds += security.investment().abs();
                }
                SecurityAction::Hold => {}
            }
        }
        if has_buys && has_sells {
            proceeds - cost
        } else {
            0.0
        }
    }

    pub fn initial_value(&self) -> f64 {
        *self.initial_value.get_or_init(|| {
            self.entries()
                .filter(|security| security.action() == SecurityAction::Buy)
                .map(Security::investment)
                .sum()
        })
    }

    /// Value of open positions at their ledger prices.
    pub fn current_value(&self) -> f64 {
        *self
            .current_value
            .get_or_init(|| self.holdings.values().map(Security::investment).sum())
    }

    pub fn description_rows(&self) -> Vec<LedgerRow> {
        let mut cumulative_investment = 0.0;
        let mut cumulative_growth = 0.0;
        self.entries()
            .map(|security| {
                cumulative_investment += security.investment();
                cumulative_growth += security.growth;
                LedgerRow {
                    portfolio: self.name.clone(),
                    date: security.date,
                    name: security.name.clone(),
                    ltp: security.ltp,
                    quantity: security.quantity,
                    action: security.action(),
                    investment: security.investment(),
                    growth: security.growth,
                    cumulative_investment,
                    cumulative_growth,
                }
            })
            .collect()
    }

    pub fn summary(&self) -> PortfolioSummary {
        PortfolioSummary {
            name: self.name.clone(),
            ledger_entries: self.ledger_len,
            open_positions: self.holdings.len(),
            initial_value: self.initial_value(),
            current_value: self.current_value(),
            profit: self.profit(),
        }
    }
}

/// Named portfolios produced by one aggregation run.
#[derive(Default)]
pub struct PortfolioCollection {
    portfolios: DashMap<String, Portfolio>,
    ledger_cache: Mutex<Option<Arc<Vec<LedgerRow>>>>,
}

impl PortfolioCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `portfolio` under its name, returning any portfolio it replaced.
    pub fn add_portfolio(&self, portfolio: Portfolio) -> Option<Portfolio> {
        let name = portfolio.name().to_string();
        let replaced = self.portfolios.insert(name, portfolio);
        *self.lock_cache() = None;
        replaced
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<Arc<Vec<LedgerRow>>>> {
        self.ledger_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.portfolios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.portfolios.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .portfolios
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn with_portfolio<R, F>(&self, name: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Portfolio) -> R,
    {
        self.portfolios.get(name).map(|entry| f(entry.value()))
    }

    pub fn ledger_rows(&self, name: &str) -> Option<Vec<LedgerRow>> {
        self.with_portfolio(name, Portfolio::description_rows)
    }

    pub fn summaries(&self) -> Vec<PortfolioSummary> {
        self.names()
            .iter()
            .filter_map(|name| self.with_portfolio(name, Portfolio::summary))
            .collect()
    }

    /// Union of every portfolio's ledger, ordered by portfolio name.
    ///
    /// The cache stays locked while the union is rebuilt, so an insert that
    /// lands mid-rebuild clears the result once the rebuild is stored.
    pub fn all_ledger_rows(&self) -> Arc<Vec<LedgerRow>> {
        let mut cache = self.lock_cache();
        if let Some(rows) = cache.as_ref() {
            return Arc::clone(rows);
        }
        let rows: Vec<LedgerRow> = self
            .names()
            .iter()
            .filter_map(|name| self.ledger_rows(name))
            .flatten()
            .collect();
        let rows = Arc::new(rows);
        *cache = Some(Arc::clone(&rows));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn abc_row(prices: &[(u32, f64)]) -> ScreenedRow {
        let mut row = ScreenedRow::new("ABC", day(2), 100.0);
        let mut previous = 100.0;
        for (horizon, price) in prices {
            row = row.with_outcome(*horizon, *price, price - previous);
            previous = *price;
        }
        row
    }

    #[test]
    fn rising_first_horizon_buys_and_holds() {
        let mut portfolio = Portfolio::new("[RSI]>=50");
        portfolio.update_from_time_series(&[abc_row(&[(1, 110.0)])], &[1], None);

        assert_eq!(portfolio.ledger_len(), 1);
        let entry = &portfolio.ledger()[&day(2)][0];
        assert_eq!(entry.quantity, 1);
        assert!((entry.ltp - 100.0).abs() < 1e-9);
        assert_eq!(entry.action(), SecurityAction::Buy);
        assert!(portfolio.is_held("ABC"));
    }

    #[test]
    fn falling_move_on_held_security_sells() {
        let mut portfolio = Portfolio::new("p");
        portfolio.update_from_time_series(&[abc_row(&[(1, 110.0), (2, 90.0)])], &[1, 2], None);

        assert_eq!(portfolio.ledger_len(), 2);
        let rows = portfolio.description_rows();
        let sell = rows.last().unwrap();
        assert_eq!(sell.quantity, -1);
        assert!((sell.ltp - 90.0).abs() < 1e-9);
        assert!((sell.growth + 20.0).abs() < 1e-9);
        assert!(!portfolio.is_held("ABC"));
        assert!((portfolio.profit() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn falling_first_horizon_buys_and_sells_immediately() {
        let mut portfolio = Portfolio::new("p");
        portfolio.update_from_time_series(&[abc_row(&[(1, 95.0)])], &[1], None);
        let rows = portfolio.description_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, SecurityAction::Buy);
        assert_eq!(rows[1].action, SecurityAction::Sell);
        assert!(portfolio.holdings().is_empty());
    }

    #[test]
    fn hold_rows_are_inert_to_current_value() {
        let mut portfolio = Portfolio::new("p");
        portfolio.update_from_time_series(
            &[abc_row(&[(1, 110.0), (2, 120.0), (3, 125.0)])],
            &[1, 2, 3],
            None,
        );
        assert_eq!(portfolio.ledger_len(), 3);
        assert!((portfolio.current_value() - 100.0).abs() < 1e-9);
        assert!((portfolio.initial_value() - 100.0).abs() < 1e-9);
        assert!(portfolio.profit().abs() < 1e-9);

        let rows = portfolio.description_rows();
        assert!((rows[2].cumulative_growth - 15.0).abs() < 1e-9);
        assert!((rows[2].cumulative_investment - 100.0).abs() < 1e-9);
    }

    #[test]
    fn skips_pairs_with_missing_prices() {
        let mut row = abc_row(&[(1, 110.0)]);
        row.outcomes.insert(2, Default::default());
        let handle = TaskHandle::detached("skip");
        let mut portfolio = Portfolio::new("p");
        portfolio.update_from_time_series(&[row], &[1, 2], Some(&handle));
        assert_eq!(portfolio.ledger_len(), 1);
        let progress = handle.progress();
        assert_eq!((progress.current, progress.total), (2, 2));
    }

    #[test]
    fn holdings_track_most_recent_unmatched_add() {
        let mut portfolio = Portfolio::new("random");
        let names = ["AAA", "BBB", "CCC"];
        let mut last_action: HashMap<&str, SecurityAction> = HashMap::new();
        for step in 0..200 {
            let name = names[fastrand::usize(..names.len())];
            let before = portfolio.ledger_len();
            match fastrand::u8(..3) {
                0 => {
                    portfolio.add_security(Security::new(name, 10.0, 1, day(1 + step % 28), 0.0));
                    last_action.insert(name, SecurityAction::Buy);
                }
                1 => {
                    portfolio.remove_security(Security::new(name, 9.0, -1, day(1 + step % 28), -1.0));
                    last_action.insert(name, SecurityAction::Sell);
                }
                _ => portfolio.record_hold(Security::new(name, 11.0, 0, day(1 + step % 28), 1.0)),
            }
            assert_eq!(portfolio.ledger_len(), before + 1);
            for candidate in names {
                let expected = last_action.get(candidate) == Some(&SecurityAction::Buy);
                assert_eq!(portfolio.is_held(candidate), expected);
            }
        }
    }

    #[test]
    fn memoized_values_refresh_after_new_entries() {
        let mut portfolio = Portfolio::new("p");
        portfolio.add_security(Security::new("AAA", 50.0, 1, day(2), 0.0));
        assert!((portfolio.current_value() - 50.0).abs() < 1e-9);
        portfolio.add_security(Security::new("BBB", 25.0, 1, day(3), 0.0));
        assert!((portfolio.current_value() - 75.0).abs() < 1e-9);
        assert!((portfolio.initial_value() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn collection_accepts_concurrent_inserts() {
        let collection = Arc::new(PortfolioCollection::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let collection = Arc::clone(&collection);
                thread::spawn(move || {
                    let mut portfolio = Portfolio::new(format!("cat-{i}"));
                    portfolio.add_security(Security::new("AAA", 10.0, 1, day(2), 0.0));
                    collection.add_portfolio(portfolio);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(collection.len(), 8);
        let rows = collection.all_ledger_rows();
        assert_eq!(rows.len(), 8);
        assert!(Arc::ptr_eq(&rows, &collection.all_ledger_rows()));

        collection.add_portfolio(Portfolio::new("late"));
        assert!(!Arc::ptr_eq(&rows, &collection.all_ledger_rows()));
        assert_eq!(collection.summaries().len(), 9);
    }

    #[test]
    fn insert_during_rebuild_is_never_lost() {
        let mut large = Portfolio::new("a-large");
        for i in 0..5_000 {
            large.record_hold(Security::new(format!("S{i}"), 10.0, 0, day(2), 0.1));
        }
        let collection = Arc::new(PortfolioCollection::new());
        collection.add_portfolio(large);

        for round in 0..50 {
            let reader = {
                let collection = Arc::clone(&collection);
                thread::spawn(move || collection.all_ledger_rows().len())
            };
            let writer = {
                let collection = Arc::clone(&collection);
                thread::spawn(move || {
                    let mut late = Portfolio::new("z-late");
                    late.add_security(Security::new("LATE", 5.0, 1, day(3), 0.0));
                    collection.add_portfolio(late);
                })
            };
            reader.join().unwrap();
            writer.join().unwrap();
            assert_eq!(collection.all_ledger_rows().len(), 5_001, "round {round}");

            // Reset so the next round races a fresh rebuild.
            collection.portfolios.remove("z-late");
            *collection.lock_cache() = None;
        }
    }
}
