// =============================================================================
// PartitionManager — deterministic symbol ownership across workers
// =============================================================================
//
// Ownership is a pure function of (symbol, worker_index, total_workers):
// FNV-1a over the symbol's UTF-8 bytes, modulo the worker count. Every
// worker computes identical verdicts, so the fleet partitions the symbol
// universe without coordination.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::errors::{Result, ScannerError};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a-64 over the symbol's UTF-8 bytes. Stable and portable across
/// platforms and processes.
pub fn stable_hash(symbol: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in symbol.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug)]
pub struct PartitionManager {
    worker_index: usize,
    total_workers: usize,
    observed: RwLock<HashSet<String>>,
}

impl PartitionManager {
    pub fn new(worker_index: usize, total_workers: usize) -> Result<Self> {
        if total_workers == 0 {
            return Err(ScannerError::Fatal("total_workers must be >= 1".into()));
        }
        if worker_index >= total_workers {
            return Err(ScannerError::Fatal(format!(
                "worker_index {worker_index} out of range for {total_workers} workers"
            )));
        }
        Ok(Self {
            worker_index,
            total_workers,
            observed: RwLock::new(HashSet::new()),
        })
    }

    /// Whether this worker owns the symbol. Owned symbols are remembered for
    /// [`assigned_symbols`].
    pub fn is_owned(&self, symbol: &str) -> bool {
        let owned = stable_hash(symbol) % self.total_workers as u64 == self.worker_index as u64;
        if owned && !self.observed.read().contains(symbol) {
            self.observed.write().insert(symbol.to_string());
        }
        owned
    }

    /// Symbols this worker has observed and owned, sorted for stable output.
    pub fn assigned_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.observed.read().iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn total_workers(&self) -> usize {
        self.total_workers
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOLS: &[&str] = &[
        "AAPL", "GOOGL", "MSFT", "TSLA", "AMZN", "NVDA", "META", "NFLX",
    ];

    #[test]
    fn hash_is_stable() {
        // FNV-1a is fully determined by the input bytes; the same symbol
        // must hash identically in every process.
        assert_eq!(stable_hash("AAPL"), stable_hash("AAPL"));
        assert_ne!(stable_hash("AAPL"), stable_hash("AAPM"));
        // Known FNV-1a-64 value for the empty string is the offset basis.
        assert_eq!(stable_hash(""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn invalid_topology_is_fatal() {
        assert!(matches!(
            PartitionManager::new(0, 0).unwrap_err(),
            ScannerError::Fatal(_)
        ));
        assert!(matches!(
            PartitionManager::new(4, 4).unwrap_err(),
            ScannerError::Fatal(_)
        ));
    }

    #[test]
    fn single_worker_owns_everything() {
        let pm = PartitionManager::new(0, 1).unwrap();
        for symbol in SYMBOLS {
            assert!(pm.is_owned(symbol));
        }
        assert_eq!(pm.assigned_symbols().len(), SYMBOLS.len());
    }

    #[test]
    fn fleet_partitions_exactly() {
        // Each symbol is owned by exactly one of four workers, and every
        // instance of the same worker index agrees.
        let workers: Vec<PartitionManager> = (0..4)
            .map(|i| PartitionManager::new(i, 4).unwrap())
            .collect();

        let mut total_owned = 0;
        for symbol in SYMBOLS {
            let owners: Vec<usize> = workers
                .iter()
                .enumerate()
                .filter(|(_, w)| w.is_owned(symbol))
                .map(|(i, _)| i)
                .collect();
            assert_eq!(owners.len(), 1, "symbol {symbol} owned by {owners:?}");
            total_owned += 1;
        }
        assert_eq!(total_owned, SYMBOLS.len());

        let replica = PartitionManager::new(1, 4).unwrap();
        for symbol in SYMBOLS {
            assert_eq!(workers[1].is_owned(symbol), replica.is_owned(symbol));
        }
    }

    #[test]
    fn assigned_symbols_tracks_owned_only() {
        let pm = PartitionManager::new(1, 4).unwrap();
        let mut owned = Vec::new();
        for symbol in SYMBOLS {
            if pm.is_owned(symbol) {
                owned.push(symbol.to_string());
            }
        }
        owned.sort();
        assert_eq!(pm.assigned_symbols(), owned);
    }
}
