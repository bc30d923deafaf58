//! Stop-loss placement and trailing
//!
//! The initial stop is an ATR offset from entry. Once a position is on, the
//! stop walks through three phases driven by the R-multiple (unrealized
//! gain expressed in units of initial risk): hold the initial stop while
//! underwater, jump to breakeven once one risk unit is banked, then trail
//! price by an ATR (or half the initial risk) beyond the trail threshold.

use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Stop engine parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    /// ATR multiple for the initial stop distance
    #[serde(default = "default_stop_atr_multiple")]
    pub stop_atr_multiple: f64,
    /// R-multiple at which the stop moves to breakeven
    #[serde(default = "default_breakeven_r")]
    pub breakeven_r: f64,
    /// R-multiple beyond which the stop trails price
    #[serde(default = "default_trail_r")]
    pub trail_r: f64,
}

fn default_stop_atr_multiple() -> f64 {
    1.0
}

fn default_breakeven_r() -> f64 {
    1.0
}

fn default_trail_r() -> f64 {
    2.0
}

impl Default for StopConfig {
    fn default() -> Self {
        StopConfig {
            stop_atr_multiple: default_stop_atr_multiple(),
            breakeven_r: default_breakeven_r(),
            trail_r: default_trail_r(),
        }
    }
}

/// First stop for a long entry: `entry - multiplier * max(0, atr)`.
///
/// A non-positive (or non-finite) ATR contributes nothing, leaving the stop
/// at the entry price.
pub fn compute_stop_price(entry: f64, atr: f64, multiplier: f64) -> f64 {
    let atr = if atr.is_finite() { atr.max(0.0) } else { 0.0 };
    entry - multiplier * atr
}

/// Side-aware initial stop: subtracts the offset for longs, adds it for
/// shorts.
pub fn initial_stop_for(side: Side, entry: f64, atr: f64, multiplier: f64) -> f64 {
    match side {
        Side::Long => compute_stop_price(entry, atr, multiplier),
        Side::Short => {
            let atr = if atr.is_finite() { atr.max(0.0) } else { 0.0 };
            entry + multiplier * atr
        }
    }
}

/// Three-phase trailing stop for a long position.
///
/// `R = (current - entry) / (entry - initial_stop)`. Below `breakeven_r`
/// the initial stop holds; between the thresholds the stop is the entry
/// price; beyond `trail_r` it trails the current price by `atr` when one is
/// supplied and positive, or by half the initial risk otherwise. A
/// degenerate initial stop (zero or negative initial risk) always returns
/// the initial stop unchanged.
pub fn compute_trailing_stop(
    entry: f64,
    current: f64,
    initial_stop: f64,
    breakeven_r: f64,
    trail_r: f64,
    atr: Option<f64>,
) -> f64 {
    let initial_risk = entry - initial_stop;
    if initial_risk <= 0.0 {
        return initial_stop;
    }

    let r = (current - entry) / initial_risk;

    if r < breakeven_r {
        initial_stop
    } else if r <= trail_r {
        entry
    } else {
        match atr {
            Some(a) if a > 0.0 => current - a,
            _ => current - initial_risk * 0.5,
        }
    }
}

/// Side-aware trailing stop; mirrors the R ratio and offsets for shorts.
pub fn trailing_stop_for(
    side: Side,
    entry: f64,
    current: f64,
    initial_stop: f64,
    config: &StopConfig,
    atr: Option<f64>,
) -> f64 {
    match side {
        Side::Long => compute_trailing_stop(
            entry,
            current,
            initial_stop,
            config.breakeven_r,
            config.trail_r,
            atr,
        ),
        Side::Short => {
            let initial_risk = initial_stop - entry;
            if initial_risk <= 0.0 {
                return initial_stop;
            }

            let r = (entry - current) / initial_risk;

            if r < config.breakeven_r {
                initial_stop
            } else if r <= config.trail_r {
                entry
            } else {
                match atr {
                    Some(a) if a > 0.0 => current + a,
                    _ => current + initial_risk * 0.5,
                }
            }
        }
    }
}

/// Whether `candidate` improves on `current` for the given side. Stops only
/// ever tighten: up for longs, down for shorts.
pub fn is_more_favorable(side: Side, candidate: f64, current: f64) -> bool {
    match side {
        Side::Long => candidate > current,
        Side::Short => candidate < current,
    }
}
