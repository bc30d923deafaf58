//! Backtest command
//!
//! Runs the crossover strategy over historical CSV data, fanning out across
//! symbols; each per-symbol scan stays sequential.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::info;

use crossover_bot::backtest::{Backtester, BacktestResult};
use crossover_bot::{data, Config, Symbol};

pub fn run(config_path: String, capital: Option<f64>, symbols: Option<String>) -> Result<()> {
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path))?;

    if let Some(capital) = capital {
        config.trading.initial_capital = capital;
    }
    if let Some(symbols) = symbols {
        config.trading.symbols = symbols.split(',').map(|s| s.trim().to_string()).collect();
    }

    let symbols = config.trading.symbols();
    info!(
        "backtesting {} symbols, capital {:.2}, windows {}/{}",
        symbols.len(),
        config.trading.initial_capital,
        config.trading.fast_window,
        config.trading.slow_window
    );

    let progress = ProgressBar::new(symbols.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}").expect("valid template"),
    );

    let results: Vec<(Symbol, BacktestResult)> = symbols
        .par_iter()
        .map(|symbol| {
            let path = data::csv_path_for(&config.backtest.data_dir, symbol);
            let candles =
                data::load_csv(&path).with_context(|| format!("No data for {}", symbol))?;

            let mut backtester = Backtester::new(config.clone())?;
            let result = backtester.run(symbol, &candles)?;

            progress.inc(1);
            Ok((symbol.clone(), result))
        })
        .collect::<Result<Vec<_>>>()?;
    progress.finish_and_clear();

    // Best risk-adjusted performers first
    for (_, result) in results
        .iter()
        .sorted_by_key(|(_, r)| std::cmp::Reverse(OrderedFloat(r.report.sharpe_ratio)))
    {
        println!("{}", result.report);
        println!();
    }

    let total_trades: usize = results.iter().map(|(_, r)| r.report.total_trades).sum();
    info!("backtest complete: {} trades across {} symbols", total_trades, results.len());

    Ok(())
}
