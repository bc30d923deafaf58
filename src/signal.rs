//! Crossover signal generation
//!
//! Computes fast/slow exponentially-weighted moving averages over a price
//! series and fires buy/sell signals when they cross. Results are memoized
//! in a caller-owned bounded cache keyed by the raw input values and window
//! sizes, so repeated evaluation of an unchanged series is a lookup.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use tracing::{debug, trace};

use crate::data::PriceSeries;
use crate::indicators::ewma;
use crate::types::{ParamError, Signal};

/// Default number of cached evaluations
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Bounded LRU cache for signal evaluations.
///
/// Owned and injected by the caller rather than living in module state, so
/// tests can construct, inspect, and reset it.
#[derive(Debug)]
pub struct SignalCache {
    capacity: usize,
    map: HashMap<u64, Signal>,
    order: VecDeque<u64>,
}

impl SignalCache {
    pub fn with_capacity(capacity: usize) -> Self {
        SignalCache {
            capacity: capacity.max(1),
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|&k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }

    fn get(&mut self, key: u64) -> Option<Signal> {
        let hit = self.map.get(&key).cloned();
        if hit.is_some() {
            self.touch(key);
        }
        hit
    }

    fn insert(&mut self, key: u64, signal: Signal) {
        if self.map.contains_key(&key) {
            self.map.insert(key, signal);
            self.touch(key);
            return;
        }
        if self.map.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
                trace!("signal cache full, evicted oldest entry");
            }
        }
        self.map.insert(key, signal);
        self.order.push_back(key);
    }
}

impl Default for SignalCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

/// Deterministic key over the raw close bits and both window sizes.
fn cache_key(closes: &[f64], fast_window: usize, slow_window: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    for close in closes {
        close.to_bits().hash(&mut hasher);
    }
    fast_window.hash(&mut hasher);
    slow_window.hash(&mut hasher);
    hasher.finish()
}

/// Moving-average crossover signal generator.
pub struct SignalGenerator {
    cache: SignalCache,
}

impl SignalGenerator {
    pub fn new(cache: SignalCache) -> Self {
        SignalGenerator { cache }
    }

    pub fn cache(&self) -> &SignalCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SignalCache {
        &mut self.cache
    }

    /// Evaluate the crossover state of `series`.
    ///
    /// A buy fires when the fast average closes above the slow one having
    /// been at or below it on the previous sample; a sell fires on the
    /// mirrored condition. Fewer than two samples produce no signal, and an
    /// empty series produces an all-default `Signal` rather than an error.
    pub fn get_trading_signals(
        &mut self,
        series: &PriceSeries,
        fast_window: usize,
        slow_window: usize,
    ) -> Result<Signal, ParamError> {
        if fast_window == 0 {
            return Err(ParamError::ZeroWindow { name: "fast" });
        }
        if slow_window == 0 {
            return Err(ParamError::ZeroWindow { name: "slow" });
        }
        if fast_window >= slow_window {
            return Err(ParamError::FastNotBelowSlow {
                fast: fast_window,
                slow: slow_window,
            });
        }

        if series.is_empty() {
            return Ok(Signal::default());
        }

        let key = cache_key(&series.closes, fast_window, slow_window);
        if let Some(cached) = self.cache.get(key) {
            trace!("signal cache hit for {} samples", series.len());
            return Ok(cached);
        }

        let signal = evaluate(series, fast_window, slow_window);
        self.cache.insert(key, signal.clone());

        if signal.buy_signal || signal.sell_signal {
            debug!(
                "crossover: buy={} sell={} fast={:.4} slow={:.4} price={:.4}",
                signal.buy_signal,
                signal.sell_signal,
                signal.fast_ma,
                signal.slow_ma,
                signal.current_price
            );
        }

        Ok(signal)
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new(SignalCache::default())
    }
}

fn evaluate(series: &PriceSeries, fast_window: usize, slow_window: usize) -> Signal {
    let closes = &series.closes;
    let fast = ewma(closes, fast_window);
    let slow = ewma(closes, slow_window);

    let n = closes.len();
    let (buy_signal, sell_signal) = if n < 2 {
        (false, false)
    } else {
        let prev = fast[n - 2] - slow[n - 2];
        let curr = fast[n - 1] - slow[n - 1];
        (prev <= 0.0 && curr > 0.0, prev >= 0.0 && curr < 0.0)
    };

    Signal {
        buy_signal,
        sell_signal,
        current_price: closes[n - 1],
        fast_ma: fast[n - 1],
        slow_ma: slow[n - 1],
        last_timestamp: series.last_timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(closes: &[f64]) -> PriceSeries {
        PriceSeries::from_closes(closes)
    }

    fn generator() -> SignalGenerator {
        SignalGenerator::new(SignalCache::with_capacity(10))
    }

    #[test]
    fn test_buy_on_upward_cross() {
        // Downtrend long enough to pull the fast average below the slow one,
        // then a sharp reversal to force an upward cross on the last bar.
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        closes.push(140.0);
        let mut gen = generator();
        let signal = gen.get_trading_signals(&series(&closes), 3, 10).unwrap();
        assert!(signal.buy_signal);
        assert!(!signal.sell_signal);
    }

    #[test]
    fn test_sell_on_downward_cross() {
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        closes.push(60.0);
        let mut gen = generator();
        let signal = gen.get_trading_signals(&series(&closes), 3, 10).unwrap();
        assert!(signal.sell_signal);
        assert!(!signal.buy_signal);
    }

    #[test]
    fn test_no_signal_without_cross() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let mut gen = generator();
        let signal = gen.get_trading_signals(&series(&closes), 3, 10).unwrap();
        assert!(signal.is_flat());
        assert_eq!(signal.current_price, 119.0);
    }

    #[test]
    fn test_signals_are_mutually_exclusive() {
        // A flat series keeps both averages equal; neither strict
        // inequality can fire, and they can never fire together.
        let closes = vec![100.0; 10];
        let mut gen = generator();
        let signal = gen.get_trading_signals(&series(&closes), 2, 5).unwrap();
        assert!(!(signal.buy_signal && signal.sell_signal));
        assert!(signal.is_flat());
    }

    #[test]
    fn test_empty_series_yields_default_signal() {
        let mut gen = generator();
        let signal = gen.get_trading_signals(&series(&[]), 3, 10).unwrap();
        assert_eq!(signal, Signal::default());
    }

    #[test]
    fn test_single_sample_yields_no_signal() {
        let mut gen = generator();
        let signal = gen.get_trading_signals(&series(&[100.0]), 3, 10).unwrap();
        assert!(signal.is_flat());
        assert_eq!(signal.current_price, 100.0);
    }

    #[test]
    fn test_invalid_windows_fail_fast() {
        let mut gen = generator();
        assert!(gen.get_trading_signals(&series(&[1.0]), 0, 10).is_err());
        assert!(gen.get_trading_signals(&series(&[1.0]), 5, 0).is_err());
        assert!(gen.get_trading_signals(&series(&[1.0]), 10, 10).is_err());
    }

    #[test]
    fn test_cache_hit_on_repeated_call() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let s = series(&closes);
        let mut gen = generator();

        let first = gen.get_trading_signals(&s, 3, 10).unwrap();
        assert_eq!(gen.cache().len(), 1);
        let second = gen.get_trading_signals(&s, 3, 10).unwrap();
        assert_eq!(first, second);
        assert_eq!(gen.cache().len(), 1);
    }

    #[test]
    fn test_cache_key_depends_on_windows() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let s = series(&closes);
        let mut gen = generator();

        gen.get_trading_signals(&s, 3, 10).unwrap();
        gen.get_trading_signals(&s, 5, 10).unwrap();
        assert_eq!(gen.cache().len(), 2);
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let mut cache = SignalCache::with_capacity(2);
        cache.insert(1, Signal::default());
        cache.insert(2, Signal::default());
        // Touch 1 so 2 becomes the eviction candidate
        assert!(cache.get(1).is_some());
        cache.insert(3, Signal::default());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_cache_clear() {
        let closes: Vec<f64> = (0..5).map(|i| 100.0 + i as f64).collect();
        let mut gen = generator();
        gen.get_trading_signals(&series(&closes), 2, 4).unwrap();
        assert!(!gen.cache().is_empty());
        gen.cache_mut().clear();
        assert!(gen.cache().is_empty());
    }
}
