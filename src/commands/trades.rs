//! Trade log query command

use anyhow::{Context, Result};
use chrono::NaiveDate;
use itertools::Itertools;

use crossover_bot::trade_log::TradeLog;
use crossover_bot::types::OrderSide;
use crossover_bot::{Config, Symbol};

pub fn run(
    config_path: String,
    symbol: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path))?;

    let symbol = symbol.map(Symbol::new);
    let start = start.map(|s| parse_date(&s)).transpose()?;
    let end = end.map(|s| parse_date(&s)).transpose()?;

    let log = TradeLog::new(&config.state.trade_log);
    let records = log.query(symbol.as_ref(), start, end)?;

    if records.is_empty() {
        println!("no trades match");
        return Ok(());
    }

    for record in &records {
        println!(
            "{}  {:<10} {:<4} {:>12.6} @ {:>12.4}  {:<8} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.symbol,
            record.side,
            record.quantity,
            record.price,
            record.status,
            record.reason
        );
    }

    let buys = records
        .iter()
        .filter(|r| r.side == OrderSide::Buy)
        .count();
    let symbols = records.iter().map(|r| r.symbol.as_str()).unique().count();
    println!(
        "\n{} trades ({} buys, {} sells) across {} symbols",
        records.len(),
        buys,
        records.len() - buys,
        symbols
    );

    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Bad date '{}', expected YYYY-MM-DD", s))
}
