//! Data loading and series assembly
//!
//! Loads OHLCV data from CSV files and shapes it into the price series the
//! signal and volatility engines consume.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::{Candle, Symbol};

/// A price series with optional OHLC detail.
///
/// Closes are always present; highs/lows are carried when the source had
/// them, letting the ATR engine use the classical True Range and fall back
/// to the close-difference approximation otherwise.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub closes: Vec<f64>,
    pub highs: Option<Vec<f64>>,
    pub lows: Option<Vec<f64>>,
}

impl PriceSeries {
    /// Build a close-only series with synthetic evenly-spaced timestamps.
    pub fn from_closes(closes: &[f64]) -> Self {
        let start = Utc::now();
        let timestamps = (0..closes.len())
            .map(|i| start + chrono::Duration::seconds(i as i64))
            .collect();
        PriceSeries {
            timestamps,
            closes: closes.to_vec(),
            highs: None,
            lows: None,
        }
    }

    /// Build a full OHLC-backed series from candles.
    pub fn from_candles(candles: &[Candle]) -> Self {
        PriceSeries {
            timestamps: candles.iter().map(|c| c.datetime).collect(),
            closes: candles.iter().map(|c| c.close).collect(),
            highs: Some(candles.iter().map(|c| c.high).collect()),
            lows: Some(candles.iter().map(|c| c.low).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.closes.last().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    /// True when the series carries usable high/low columns.
    pub fn has_ohlc(&self) -> bool {
        matches!((&self.highs, &self.lows), (Some(h), Some(l))
            if h.len() == self.closes.len() && l.len() == self.closes.len())
    }
}

/// Load OHLCV data from a CSV file with columns
/// `datetime,open,high,low,close,volume`.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).context("Failed to open CSV file")?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = dt_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                // Try parsing without timezone and assume UTC
                chrono::NaiveDateTime::parse_from_str(dt_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .with_context(|| format!("Failed to parse datetime: {}", dt_str))?;

        let open: f64 = record
            .get(1)
            .context("Missing open column")?
            .parse()
            .context("Failed to parse open")?;
        let high: f64 = record
            .get(2)
            .context("Missing high column")?
            .parse()
            .context("Failed to parse high")?;
        let low: f64 = record
            .get(3)
            .context("Missing low column")?
            .parse()
            .context("Failed to parse low")?;
        let close: f64 = record
            .get(4)
            .context("Missing close column")?
            .parse()
            .context("Failed to parse close")?;
        let volume: f64 = record
            .get(5)
            .context("Missing volume column")?
            .parse()
            .context("Failed to parse volume")?;

        candles.push(Candle {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    Ok(candles)
}

/// Resolve the CSV path for a symbol under the data directory.
pub fn csv_path_for(data_dir: impl AsRef<Path>, symbol: &Symbol) -> std::path::PathBuf {
    data_dir.as_ref().join(format!("{}.csv", symbol))
}
