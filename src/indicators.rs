//! Volatility and moving-average primitives
//!
//! Vector-form helpers plus the ATR engine used for stop placement and
//! position sizing.

use itertools::izip;

use crate::data::PriceSeries;
use crate::types::ParamError;

/// Default ATR lookback
pub const DEFAULT_ATR_WINDOW: usize = 14;

/// Exponentially-weighted moving average with `alpha = 2 / (window + 1)`,
/// seeded from the first sample. Defined for every index.
pub fn ewma(values: &[f64], window: usize) -> Vec<f64> {
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());

    let mut current: Option<f64> = None;
    for &value in values {
        let next = match current {
            None => value,
            Some(prev) => alpha * value + (1.0 - alpha) * prev,
        };
        current = Some(next);
        result.push(next);
    }

    result
}

/// Classical True Range series. The first element has no previous close and
/// degrades to `high - low`.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for (i, (&h, &l, _)) in izip!(high, low, close).enumerate() {
        let value = if i == 0 {
            h - l
        } else {
            let hl = h - l;
            let hc = (h - close[i - 1]).abs();
            let lc = (l - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(value);
    }

    tr
}

/// Mean of the trailing `window` values, using however many are available
/// when fewer than `window` exist.
fn trailing_mean(values: &[f64], window: usize) -> f64 {
    let start = values.len().saturating_sub(window);
    let tail = &values[start..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Volatility estimate from the close-difference approximation: the rolling
/// mean of absolute first differences, evaluated at the last observation.
///
/// Returns `0.0` for an empty series and NaN for a single observation,
/// where no finite difference exists. Never negative otherwise.
pub fn compute_atr(closes: &[f64], window: usize) -> Result<f64, ParamError> {
    if window == 0 {
        return Err(ParamError::ZeroWindow { name: "atr" });
    }
    if closes.is_empty() {
        return Ok(0.0);
    }
    if closes.len() < 2 {
        return Ok(f64::NAN);
    }

    let diffs: Vec<f64> = closes.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    Ok(trailing_mean(&diffs, window))
}

/// Volatility estimate over a full series: classical True Range when the
/// series carries highs/lows, the close-difference approximation otherwise.
pub fn compute_atr_series(series: &PriceSeries, window: usize) -> Result<f64, ParamError> {
    if window == 0 {
        return Err(ParamError::ZeroWindow { name: "atr" });
    }
    if series.is_empty() {
        return Ok(0.0);
    }

    if series.has_ohlc() {
        let high = series.highs.as_ref().unwrap();
        let low = series.lows.as_ref().unwrap();
        let tr = true_range(high, low, &series.closes);
        Ok(trailing_mean(&tr, window))
    } else {
        compute_atr(&series.closes, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ewma_seeds_from_first_sample() {
        let values = vec![10.0, 10.0, 10.0];
        let result = ewma(&values, 3);
        assert_eq!(result, vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_ewma_recursion() {
        // alpha = 2/(2+1) = 2/3
        let values = vec![3.0, 6.0];
        let result = ewma(&values, 2);
        assert_relative_eq!(result[1], 2.0 / 3.0 * 6.0 + 1.0 / 3.0 * 3.0);
    }

    #[test]
    fn test_atr_empty_and_single() {
        assert_eq!(compute_atr(&[], 14).unwrap(), 0.0);
        assert!(compute_atr(&[100.0], 14).unwrap().is_nan());
    }

    #[test]
    fn test_atr_zero_window_rejected() {
        assert!(compute_atr(&[1.0, 2.0], 0).is_err());
    }

    #[test]
    fn test_atr_mean_of_abs_diffs() {
        // diffs: 2, 2, 4 -> window 3 mean = 8/3
        let closes = vec![100.0, 102.0, 100.0, 104.0];
        assert_relative_eq!(compute_atr(&closes, 3).unwrap(), 8.0 / 3.0);
        // window 2 uses only the last two diffs
        assert_relative_eq!(compute_atr(&closes, 2).unwrap(), 3.0);
    }

    #[test]
    fn test_atr_never_negative() {
        let closes = vec![100.0, 90.0, 80.0, 70.0];
        assert!(compute_atr(&closes, 14).unwrap() >= 0.0);
    }

    #[test]
    fn test_true_range_uses_gaps() {
        let high = vec![110.0, 120.0];
        let low = vec![100.0, 115.0];
        let close = vec![105.0, 118.0];
        let tr = true_range(&high, &low, &close);
        assert_eq!(tr[0], 10.0);
        // max(120-115, |120-105|, |115-105|) = 15
        assert_eq!(tr[1], 15.0);
    }

    #[test]
    fn test_atr_series_falls_back_without_ohlc() {
        let series = crate::data::PriceSeries::from_closes(&[100.0, 102.0, 104.0]);
        let close_only = compute_atr_series(&series, 14).unwrap();
        assert_relative_eq!(close_only, compute_atr(&series.closes, 14).unwrap());
    }
}
