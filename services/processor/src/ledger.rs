//! Per-item stock counters with atomic check-and-decrement.
//!
//! Each item lives in its own map entry. [`StockLedger::decrement`] holds that
//! entry's write lock across the check and the subtraction, so two orders for
//! the same item are serialized while orders for different items proceed in
//! parallel.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// Reasons a decrement is refused. The ledger is unchanged in both cases.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The item is not stocked at all.
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    /// The item is stocked but not in the requested amount.
    #[error("Insufficient stock for {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Item that was requested
        item_id: String,
        /// Units requested
        requested: u32,
        /// Units currently in stock
        available: u32,
    },
}

/// In-memory stock ledger.
///
/// Quantities are unsigned and only ever reduced by a checked subtraction, so a
/// quantity can never go negative. Cloning is cheap and clones share state.
///
/// # Example
///
/// ```
/// use order_processor::ledger::{LedgerError, StockLedger};
///
/// let ledger = StockLedger::with_stock([("item1", 10)]);
///
/// assert_eq!(ledger.decrement("item1", 4), Ok(6));
/// assert!(matches!(
///     ledger.decrement("item1", 7),
///     Err(LedgerError::InsufficientStock { available: 6, .. })
/// ));
/// assert_eq!(ledger.quantity("item1"), Some(6));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StockLedger {
    items: Arc<DashMap<String, u32>>,
}

impl StockLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger seeded with the given quantities.
    #[must_use]
    pub fn with_stock<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let ledger = Self::new();
        for (item_id, quantity) in items {
            ledger.set_stock(item_id, quantity);
        }
        ledger
    }

    /// Set the quantity of an item, adding it if absent.
    pub fn set_stock(&self, item_id: impl Into<String>, quantity: u32) {
        self.items.insert(item_id.into(), quantity);
    }

    /// Take `quantity` units of `item_id` out of stock.
    ///
    /// Returns the quantity left after the decrement.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownItem`] if the item is not in the ledger
    /// - [`LedgerError::InsufficientStock`] if fewer than `quantity` units are left
    pub fn decrement(&self, item_id: &str, quantity: u32) -> Result<u32, LedgerError> {
        let Some(mut stock) = self.items.get_mut(item_id) else {
            return Err(LedgerError::UnknownItem(item_id.to_string()));
        };

        let available = *stock;
        let remaining = available
            .checked_sub(quantity)
            .ok_or_else(|| LedgerError::InsufficientStock {
                item_id: item_id.to_string(),
                requested: quantity,
                available,
            })?;
        *stock = remaining;
        Ok(remaining)
    }

    /// Current quantity of an item, `None` if unknown.
    #[must_use]
    pub fn quantity(&self, item_id: &str) -> Option<u32> {
        self.items.get(item_id).map(|stock| *stock)
    }

    /// Whether any units of the item are left, `None` if unknown.
    #[must_use]
    pub fn is_available(&self, item_id: &str) -> Option<bool> {
        self.quantity(item_id).map(|quantity| quantity > 0)
    }

    /// Number of distinct items in the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the ledger holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn decrement_within_stock_returns_remaining() {
        let ledger = StockLedger::with_stock([("item1", 10)]);

        assert_eq!(ledger.decrement("item1", 5), Ok(5));
        assert_eq!(ledger.decrement("item1", 5), Ok(0));
        assert_eq!(ledger.is_available("item1"), Some(false));
    }

    #[test]
    fn insufficient_stock_leaves_ledger_unchanged() {
        let ledger = StockLedger::with_stock([("item1", 5)]);

        let result = ledger.decrement("item1", 20);

        assert_eq!(
            result,
            Err(LedgerError::InsufficientStock {
                item_id: "item1".to_string(),
                requested: 20,
                available: 5,
            })
        );
        assert_eq!(ledger.quantity("item1"), Some(5));
    }

    #[test]
    fn unknown_item_is_reported() {
        let ledger = StockLedger::new();

        assert_eq!(
            ledger.decrement("ghost", 1),
            Err(LedgerError::UnknownItem("ghost".to_string()))
        );
        assert_eq!(ledger.quantity("ghost"), None);
        assert_eq!(ledger.is_available("ghost"), None);
    }

    #[test]
    fn zero_stock_item_is_known_but_unavailable() {
        let ledger = StockLedger::with_stock([("item1", 10), ("item2", 0)]);

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.is_available("item2"), Some(false));
        assert!(matches!(
            ledger.decrement("item2", 1),
            Err(LedgerError::InsufficientStock { available: 0, .. })
        ));
    }

    #[test]
    fn clones_share_stock() {
        let ledger = StockLedger::with_stock([("item1", 3)]);
        let other = ledger.clone();

        other.decrement("item1", 2).unwrap();

        assert_eq!(ledger.quantity("item1"), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_decrements_never_oversell() {
        let ledger = StockLedger::with_stock([("item1", 10)]);
        let successes = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ledger = ledger.clone();
                let successes = Arc::clone(&successes);
                tokio::spawn(async move {
                    if ledger.decrement("item1", 3).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // 10 units allow exactly three orders of 3.
        assert_eq!(successes.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.quantity("item1"), Some(1));
    }

    proptest! {
        #[test]
        fn stock_never_goes_negative(
            initial in 0u32..100,
            requests in prop::collection::vec(0u32..40, 0..50),
        ) {
            let ledger = StockLedger::with_stock([("item", initial)]);
            let mut expected = initial;

            for requested in requests {
                match ledger.decrement("item", requested) {
                    Ok(remaining) => {
                        prop_assert!(requested <= expected);
                        expected -= requested;
                        prop_assert_eq!(remaining, expected);
                    }
                    Err(LedgerError::InsufficientStock { available, .. }) => {
                        prop_assert!(requested > expected);
                        prop_assert_eq!(available, expected);
                    }
                    Err(LedgerError::UnknownItem(_)) => prop_assert!(false, "item vanished"),
                }
                prop_assert_eq!(ledger.quantity("item"), Some(expected));
            }
        }
    }
}
