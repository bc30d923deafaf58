//! CLI subcommand drivers

pub mod backtest;
pub mod live;
pub mod trades;
