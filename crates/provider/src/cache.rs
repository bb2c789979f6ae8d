//! Fetched state shared between decodes, per block and account.

use alloy_primitives::{Address, Bytes, B256, U256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Account {
    storage: HashMap<U256, B256>,
    code: Option<Bytes>,
}

/// Thread-safe cache of storage words and code, keyed by `(block, address)`.
///
/// Share it behind an `Arc` between concurrent decodes and prefetches.
#[derive(Debug, Default)]
pub struct StateCache {
    accounts: RwLock<HashMap<(u64, Address), Account>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self, block: u64, address: Address, slot: U256) -> Option<B256> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts.get(&(block, address))?.storage.get(&slot).copied()
    }

    pub fn insert_storage(&self, block: u64, address: Address, slot: U256, word: B256) {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        accounts
            .entry((block, address))
            .or_default()
            .storage
            .insert(slot, word);
    }

    pub fn code(&self, block: u64, address: Address) -> Option<Bytes> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts.get(&(block, address))?.code.clone()
    }

    pub fn insert_code(&self, block: u64, address: Address, code: Bytes) {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        accounts.entry((block, address)).or_default().code = Some(code);
    }

    /// Slots of `address` at `block` that are not cached yet.
    pub fn missing(&self, block: u64, address: Address, slots: &[U256]) -> Vec<U256> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        let cached = accounts.get(&(block, address));
        slots
            .iter()
            .filter(|slot| !cached.is_some_and(|a| a.storage.contains_key(slot)))
            .copied()
            .collect()
    }

    /// Number of cached storage words across all accounts.
    pub fn storage_len(&self) -> usize {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts.values().map(|a| a.storage.len()).sum()
    }
}
