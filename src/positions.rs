//! Position lifecycle management and persistence
//!
//! The `PositionManager` is the sole owner of the symbol -> position map.
//! Every mutation is written through a `PositionStore` synchronously; a
//! failed write is logged and absorbed so the in-memory map stays
//! authoritative (and may diverge from disk until the next successful
//! save).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::stops::{is_more_favorable, trailing_stop_for, StopConfig};
use crate::types::{Position, Side, Symbol};

/// Persistence failures for the position map
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("position store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("position store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable storage for the full position map.
///
/// Result-returning so callers decide whether a failure is fatal; the
/// manager itself logs and continues.
pub trait PositionStore: Send + Sync {
    fn save(&self, positions: &HashMap<Symbol, Position>) -> Result<(), StoreError>;
    fn load(&self) -> Result<HashMap<Symbol, Position>, StoreError>;
}

/// JSON-file store: one object mapping symbol to position fields, rewritten
/// in full after every mutation.
pub struct JsonPositionStore {
    path: PathBuf,
}

impl JsonPositionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonPositionStore {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PositionStore for JsonPositionStore {
    fn save(&self, positions: &HashMap<Symbol, Position>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let by_name: HashMap<&str, &Position> = positions
            .iter()
            .map(|(symbol, pos)| (symbol.as_str(), pos))
            .collect();
        let json = serde_json::to_string_pretty(&by_name)?;
        std::fs::write(&self.path, json)?;
        debug!("persisted {} positions to {}", positions.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<HashMap<Symbol, Position>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let by_name: HashMap<String, Position> = serde_json::from_str(&contents)?;
        Ok(by_name
            .into_iter()
            .map(|(name, pos)| (Symbol::new(name), pos))
            .collect())
    }
}

/// In-memory store for backtests and tests: saves are dropped, loads are
/// empty.
#[derive(Debug, Default)]
pub struct MemoryStore;

impl PositionStore for MemoryStore {
    fn save(&self, _positions: &HashMap<Symbol, Position>) -> Result<(), StoreError> {
        Ok(())
    }

    fn load(&self) -> Result<HashMap<Symbol, Position>, StoreError> {
        Ok(HashMap::new())
    }
}

/// Owns open positions, answers stop/PnL queries, and delegates trailing
/// recomputation to the stop engine.
pub struct PositionManager {
    positions: HashMap<Symbol, Position>,
    store: Box<dyn PositionStore>,
    stop_config: StopConfig,
}

impl PositionManager {
    /// Create a manager, recovering any previously persisted positions.
    pub fn new(store: Box<dyn PositionStore>, stop_config: StopConfig) -> Self {
        let positions = match store.load() {
            Ok(positions) => {
                if !positions.is_empty() {
                    info!("recovered {} open positions", positions.len());
                }
                positions
            }
            Err(e) => {
                warn!("failed to load positions, starting empty: {}", e);
                HashMap::new()
            }
        };

        PositionManager {
            positions,
            store,
            stop_config,
        }
    }

    /// Open a new position. Replaces any stale entry under the same symbol.
    pub fn add(
        &mut self,
        symbol: Symbol,
        quantity: f64,
        entry_price: f64,
        stop_price: f64,
        side: Side,
    ) -> &Position {
        let now = Utc::now();
        let position = Position {
            symbol: symbol.clone(),
            side,
            quantity,
            entry_price,
            stop_price,
            initial_stop: stop_price,
            entry_time: now,
            last_update: now,
        };
        info!(
            "open {} {} qty={} entry={:.4} stop={:.4}",
            side, symbol, quantity, entry_price, stop_price
        );
        self.positions.insert(symbol.clone(), position);
        self.persist();
        &self.positions[&symbol]
    }

    /// Close out a position, returning it if one existed.
    pub fn remove(&mut self, symbol: &Symbol) -> Option<Position> {
        let removed = self.positions.remove(symbol);
        if let Some(ref pos) = removed {
            info!("close {} {} qty={}", pos.side, symbol, pos.quantity);
            self.persist();
        }
        removed
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has(&self, symbol: &Symbol) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn positions(&self) -> &HashMap<Symbol, Position> {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Directly move a stop. Applied only when more favorable than the
    /// current stop (stops only tighten); returns whether anything changed.
    pub fn update_stop(&mut self, symbol: &Symbol, new_stop: f64) -> bool {
        let Some(position) = self.positions.get_mut(symbol) else {
            return false;
        };
        if !is_more_favorable(position.side, new_stop, position.stop_price) {
            return false;
        }
        debug!(
            "stop {} {:.4} -> {:.4}",
            symbol, position.stop_price, new_stop
        );
        position.stop_price = new_stop;
        position.last_update = Utc::now();
        self.persist();
        true
    }

    /// True when the current price has breached the stop for the position's
    /// side; false for a symbol with no position.
    pub fn check_stop_loss(&self, symbol: &Symbol, current_price: f64) -> bool {
        self.positions
            .get(symbol)
            .map(|pos| pos.stop_breached(current_price))
            .unwrap_or(false)
    }

    /// Unrealized profit for the symbol at the given price; `0.0` with no
    /// position.
    pub fn unrealized_pnl(&self, symbol: &Symbol, current_price: f64) -> f64 {
        self.positions
            .get(symbol)
            .map(|pos| pos.unrealized_pnl(current_price))
            .unwrap_or(0.0)
    }

    /// Recompute the trailing stop through the stop engine and persist when
    /// it improves on the current stop. Returns whether the stop moved.
    pub fn update_trailing_stop(
        &mut self,
        symbol: &Symbol,
        current_price: f64,
        atr: Option<f64>,
    ) -> bool {
        let Some(position) = self.positions.get(symbol) else {
            return false;
        };

        let candidate = trailing_stop_for(
            position.side,
            position.entry_price,
            current_price,
            position.initial_stop,
            &self.stop_config,
            atr,
        );

        self.update_stop(symbol, candidate)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.positions) {
            warn!(
                "failed to persist positions ({}); in-memory state retained",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PositionManager {
        PositionManager::new(Box::new(MemoryStore), StopConfig::default())
    }

    #[test]
    fn test_add_get_remove() {
        let mut pm = manager();
        let btc = Symbol::new("BTCUSDT");

        pm.add(btc.clone(), 2.0, 100.0, 95.0, Side::Long);
        assert!(pm.has(&btc));
        assert_eq!(pm.get(&btc).unwrap().entry_price, 100.0);
        assert_eq!(pm.get(&btc).unwrap().initial_stop, 95.0);

        let removed = pm.remove(&btc).unwrap();
        assert_eq!(removed.quantity, 2.0);
        assert!(!pm.has(&btc));
        assert!(pm.remove(&btc).is_none());
    }

    #[test]
    fn test_update_stop_only_tightens() {
        let mut pm = manager();
        let btc = Symbol::new("BTCUSDT");
        pm.add(btc.clone(), 1.0, 100.0, 95.0, Side::Long);

        assert!(pm.update_stop(&btc, 97.0));
        assert!(!pm.update_stop(&btc, 96.0)); // loosening rejected
        assert_eq!(pm.get(&btc).unwrap().stop_price, 97.0);

        let eth = Symbol::new("ETHUSDT");
        pm.add(eth.clone(), 1.0, 100.0, 105.0, Side::Short);
        assert!(pm.update_stop(&eth, 103.0));
        assert!(!pm.update_stop(&eth, 104.0));
    }

    #[test]
    fn test_update_stop_missing_symbol() {
        let mut pm = manager();
        assert!(!pm.update_stop(&Symbol::new("NOPE"), 50.0));
    }

    #[test]
    fn test_check_stop_loss() {
        let mut pm = manager();
        let btc = Symbol::new("BTCUSDT");
        pm.add(btc.clone(), 1.0, 100.0, 95.0, Side::Long);

        assert!(pm.check_stop_loss(&btc, 95.0));
        assert!(pm.check_stop_loss(&btc, 90.0));
        assert!(!pm.check_stop_loss(&btc, 96.0));
        assert!(!pm.check_stop_loss(&Symbol::new("NOPE"), 1.0));
    }

    #[test]
    fn test_unrealized_pnl() {
        let mut pm = manager();
        let btc = Symbol::new("BTCUSDT");
        pm.add(btc.clone(), 3.0, 100.0, 95.0, Side::Long);

        assert_eq!(pm.unrealized_pnl(&btc, 110.0), 30.0);
        assert_eq!(pm.unrealized_pnl(&Symbol::new("NOPE"), 110.0), 0.0);
    }

    #[test]
    fn test_trailing_stop_moves_through_phases() {
        let mut pm = manager();
        let btc = Symbol::new("BTCUSDT");
        pm.add(btc.clone(), 1.0, 100.0, 95.0, Side::Long);

        // R = 0.8: no move
        assert!(!pm.update_trailing_stop(&btc, 104.0, None));
        assert_eq!(pm.get(&btc).unwrap().stop_price, 95.0);

        // R = 1.2: breakeven
        assert!(pm.update_trailing_stop(&btc, 106.0, None));
        assert_eq!(pm.get(&btc).unwrap().stop_price, 100.0);

        // R = 3 with ATR: trail to current - atr
        assert!(pm.update_trailing_stop(&btc, 115.0, Some(3.0)));
        assert_eq!(pm.get(&btc).unwrap().stop_price, 112.0);

        // Price retreat: candidate is lower, stop retained
        assert!(!pm.update_trailing_stop(&btc, 113.0, Some(3.0)));
        assert_eq!(pm.get(&btc).unwrap().stop_price, 112.0);
    }

    #[test]
    fn test_trailing_stop_monotone_under_rising_prices() {
        let mut pm = manager();
        let btc = Symbol::new("BTCUSDT");
        pm.add(btc.clone(), 1.0, 100.0, 95.0, Side::Long);

        let mut last = pm.get(&btc).unwrap().stop_price;
        for price in [101.0, 104.0, 106.0, 109.0, 112.0, 118.0, 125.0] {
            pm.update_trailing_stop(&btc, price, Some(2.0));
            let stop = pm.get(&btc).unwrap().stop_price;
            assert!(stop >= last, "stop regressed: {} < {}", stop, last);
            last = stop;
        }
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let mut pm = PositionManager::new(
            Box::new(JsonPositionStore::new(&path)),
            StopConfig::default(),
        );
        pm.add(Symbol::new("BTCUSDT"), 2.0, 100.0, 95.0, Side::Long);
        pm.add(Symbol::new("ETHUSDT"), 5.0, 50.0, 53.0, Side::Short);

        let reloaded = PositionManager::new(
            Box::new(JsonPositionStore::new(&path)),
            StopConfig::default(),
        );
        assert_eq!(reloaded.positions(), pm.positions());
    }

    #[test]
    fn test_store_failure_is_absorbed() {
        struct FailingStore;
        impl PositionStore for FailingStore {
            fn save(&self, _: &HashMap<Symbol, Position>) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk gone")))
            }
            fn load(&self) -> Result<HashMap<Symbol, Position>, StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk gone")))
            }
        }

        let mut pm = PositionManager::new(Box::new(FailingStore), StopConfig::default());
        let btc = Symbol::new("BTCUSDT");
        // Save fails underneath but the in-memory mutation succeeds
        pm.add(btc.clone(), 1.0, 100.0, 95.0, Side::Long);
        assert!(pm.has(&btc));
        assert!(pm.update_stop(&btc, 97.0));
    }
}
