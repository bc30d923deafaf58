//! Append-only trade audit log
//!
//! Every fill is appended to a flat CSV file with columns
//! `timestamp,symbol,side,quantity,price,reason,order_id,status`. Records
//! are never mutated or deleted; queries filter by symbol and an inclusive
//! date range.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::types::{Symbol, TradeRecord};

pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        TradeLog {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, creating the file (with a header row) on first
    /// use.
    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let exists = self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trade log: {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer.serialize(record).context("Failed to write trade")?;
        writer.flush()?;

        info!(
            "trade logged: {} {} qty={} @ {:.4} [{}] {}",
            record.side, record.symbol, record.quantity, record.price, record.status, record.reason
        );
        Ok(())
    }

    /// Read back records, filtered by exact symbol (None = all) and an
    /// inclusive `[start, end]` date range.
    pub fn query(
        &self,
        symbol: Option<&Symbol>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<TradeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open trade log: {}", self.path.display()))?;

        let mut records = Vec::new();
        for result in reader.deserialize::<TradeRecord>() {
            let record = result.context("Failed to parse trade record")?;

            if let Some(wanted) = symbol {
                if record.symbol != *wanted {
                    continue;
                }
            }
            let date = record.timestamp.date_naive();
            if let Some(start) = start {
                if date < start {
                    continue;
                }
            }
            if let Some(end) = end {
                if date > end {
                    continue;
                }
            }
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, OrderStatus};
    use chrono::{TimeZone, Utc};

    fn record(symbol: &str, day: u32) -> TradeRecord {
        TradeRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            symbol: Symbol::new(symbol),
            side: OrderSide::Buy,
            quantity: 1.5,
            price: 100.0,
            reason: "crossover entry".to_string(),
            order_id: "paper-1".to_string(),
            status: OrderStatus::Filled,
        }
    }

    #[test]
    fn test_append_and_query_all() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trades.csv"));

        log.append(&record("BTCUSDT", 1)).unwrap();
        log.append(&record("ETHUSDT", 2)).unwrap();

        let all = log.query(None, None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].symbol, Symbol::new("BTCUSDT"));
    }

    #[test]
    fn test_query_symbol_filter() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trades.csv"));

        log.append(&record("BTCUSDT", 1)).unwrap();
        log.append(&record("ETHUSDT", 2)).unwrap();

        let btc = Symbol::new("BTCUSDT");
        let only_btc = log.query(Some(&btc), None, None).unwrap();
        assert_eq!(only_btc.len(), 1);
        assert_eq!(only_btc[0].symbol, btc);
    }

    #[test]
    fn test_query_date_range_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trades.csv"));

        for day in 1..=5 {
            log.append(&record("BTCUSDT", day)).unwrap();
        }

        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        let ranged = log.query(None, Some(start), Some(end)).unwrap();
        assert_eq!(ranged.len(), 3);
        assert_eq!(ranged[0].timestamp.date_naive(), start);
        assert_eq!(ranged[2].timestamp.date_naive(), end);
    }

    #[test]
    fn test_query_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("never-written.csv"));
        assert!(log.query(None, None, None).unwrap().is_empty());
    }
}
