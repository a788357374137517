//! CSV price feed: one `<SYMBOL>.csv` file per asset with `timestamp,price` rows.

use crate::domain::error::StocksimError;
use chrono::{DateTime, NaiveDate, Utc};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct CsvPrice {
    pub recorded_at: DateTime<Utc>,
    pub price: f64,
}

pub struct CsvPriceAdapter {
    base_path: PathBuf,
}

fn parse_error(path: &Path, line: usize, reason: impl std::fmt::Display) -> StocksimError {
    StocksimError::validation(format!("{}:{}: {}", path.display(), line, reason))
}

/// RFC 3339, or a bare date taken as midnight UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl CsvPriceAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    /// Symbols with a price file in the directory, sorted.
    pub fn list_symbols(&self) -> Result<Vec<String>, StocksimError> {
        let mut symbols = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                symbols.push(stem.to_string());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    /// Samples for one symbol, oldest first.
    pub fn read_prices(&self, symbol: &str) -> Result<Vec<CsvPrice>, StocksimError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path)?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut prices = Vec::new();

        for (idx, result) in rdr.records().enumerate() {
            let line = idx + 2;
            let record = result.map_err(|e| parse_error(&path, line, e))?;

            let ts = record
                .get(0)
                .ok_or_else(|| parse_error(&path, line, "missing timestamp column"))?;
            let recorded_at = parse_timestamp(ts)
                .ok_or_else(|| parse_error(&path, line, format!("invalid timestamp '{ts}'")))?;

            let price: f64 = record
                .get(1)
                .ok_or_else(|| parse_error(&path, line, "missing price column"))?
                .parse()
                .map_err(|e| parse_error(&path, line, format!("invalid price: {e}")))?;
            if !price.is_finite() || price <= 0.0 {
                return Err(parse_error(&path, line, "price must be positive"));
            }

            prices.push(CsvPrice { recorded_at, price });
        }

        prices.sort_by_key(|p| p.recorded_at);
        Ok(prices)
    }
}
