//! Data loading
//!
//! Loads OHLCV data from CSV files. Rows that fail validation or break
//! chronological order are skipped with a warning.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Candle, Symbol};

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Try parsing without timezone and assume UTC
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .or_else(|_| {
            // Epoch milliseconds
            raw.parse::<i64>()
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or(())
        })
        .map_err(|_| anyhow::anyhow!("Failed to parse datetime: {}", raw))
}

fn field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Load OHLCV data from CSV file
///
/// Expects `datetime,open,high,low,close,volume` with a header row.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles: Vec<Candle> = Vec::new();
    let mut skipped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let datetime = parse_datetime(record.get(0).context("Missing datetime column")?.trim())?;
        let candle = Candle::new(
            datetime,
            field(&record, 1, "open")?,
            field(&record, 2, "high")?,
            field(&record, 3, "low")?,
            field(&record, 4, "close")?,
            field(&record, 5, "volume")?,
        );

        match candle {
            Ok(candle) => {
                if let Some(prev) = candles.last() {
                    if candle.datetime <= prev.datetime {
                        warn!("Row {}: not chronological, skipped", row_idx + 1);
                        skipped += 1;
                        continue;
                    }
                }
                candles.push(candle);
            }
            Err(e) => {
                warn!("Row {}: {}, skipped", row_idx + 1, e);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, path.display());
    }

    Ok(candles)
}

/// File name for a pair/timeframe, e.g. `BTC_USDT_1h.csv` for `BTC/USDT`
pub fn data_file_name(pair: &Symbol, timeframe: &str) -> String {
    let sanitized: String = pair
        .as_str()
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect();
    format!("{}_{}.csv", sanitized, timeframe)
}

pub fn data_file_path(data_dir: impl AsRef<Path>, pair: &Symbol, timeframe: &str) -> PathBuf {
    data_dir.as_ref().join(data_file_name(pair, timeframe))
}

/// Load data for multiple symbols from CSV files
///
/// Missing files are skipped with a warning; it is an error when none load.
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframe: &str,
) -> Result<HashMap<Symbol, Vec<Candle>>> {
    let mut data = HashMap::new();

    for symbol in symbols {
        let path = data_file_path(&data_dir, symbol, timeframe);

        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            continue;
        }

        let candles =
            load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;

        info!("Loaded {} candles for {} {}", candles.len(), symbol, timeframe);
        data.insert(symbol.clone(), candles);
    }

    if data.is_empty() {
        anyhow::bail!("No data loaded for any symbol");
    }

    Ok(data)
}

/// Load whichever of `timeframes` exist for each symbol, keyed by (symbol, timeframe)
pub fn load_informative(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframes: &[&str],
) -> Result<HashMap<(Symbol, String), Vec<Candle>>> {
    let mut data = HashMap::new();

    for symbol in symbols {
        for timeframe in timeframes {
            let path = data_file_path(&data_dir, symbol, timeframe);
            if !path.exists() {
                continue;
            }
            let candles = load_csv(&path)
                .with_context(|| format!("Failed to load {} data for {}", timeframe, symbol))?;
            data.insert((symbol.clone(), timeframe.to_string()), candles);
        }
    }

    Ok(data)
}
