//! Risk-based position sizing
//!
//! Converts account equity and a volatility estimate into a whole-unit
//! position size targeting a fixed fraction of equity at risk per trade.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::ParamError;

/// Default fraction of equity risked per trade
pub const DEFAULT_RISK_FRACTION: f64 = 0.02;

/// Size a position so that roughly `risk_fraction` of `equity` is lost if
/// price moves one ATR against it.
///
/// The share count is truncated, never rounded up: realized risk stays at
/// or below the configured fraction, under-risking by at most one unit of
/// sizing granularity. The count is clamped to a minimum of 1, and a
/// non-positive or non-finite ATR sizes to 1 as well: volatility cannot be
/// priced, so exposure defaults to minimal rather than zero.
pub fn compute_position_size(
    equity: f64,
    atr: f64,
    risk_fraction: f64,
) -> Result<u64, ParamError> {
    if !(0.0..=1.0).contains(&risk_fraction) || risk_fraction == 0.0 {
        return Err(ParamError::RiskFractionOutOfRange(risk_fraction));
    }

    if atr <= 0.0 || !atr.is_finite() {
        debug!("unpriceable volatility (atr={}), sizing to minimum", atr);
        return Ok(1);
    }

    let shares = (equity * risk_fraction / atr).floor() as u64;
    Ok(shares.max(1))
}

/// Position sizer carrying a configured default risk fraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizer {
    pub risk_fraction: f64,
}

impl PositionSizer {
    pub fn new(risk_fraction: f64) -> Result<Self, ParamError> {
        if !(0.0..=1.0).contains(&risk_fraction) || risk_fraction == 0.0 {
            return Err(ParamError::RiskFractionOutOfRange(risk_fraction));
        }
        Ok(PositionSizer { risk_fraction })
    }

    pub fn size(&self, equity: f64, atr: f64) -> u64 {
        // risk_fraction was validated at construction
        compute_position_size(equity, atr, self.risk_fraction)
            .expect("validated risk fraction")
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        PositionSizer {
            risk_fraction: DEFAULT_RISK_FRACTION,
        }
    }
}
