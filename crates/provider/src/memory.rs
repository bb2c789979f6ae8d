//! In-memory state, for tests and replaying recorded state.

use crate::StateProvider;
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_core::StrataResult;

/// Serves the same state at every block. Unset slots read as zero and
/// unknown accounts have empty code, as on chain.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    storage: HashMap<(Address, U256), B256>,
    code: HashMap<Address, Bytes>,
    requests: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(mut self, address: Address, slot: U256, word: B256) -> Self {
        self.storage.insert((address, slot), word);
        self
    }

    pub fn with_code(mut self, address: Address, code: impl Into<Bytes>) -> Self {
        self.code.insert(address, code.into());
        self
    }

    /// Requests served so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StateProvider for MemoryProvider {
    async fn storage_at(&self, address: Address, slot: U256, _block: u64) -> StrataResult<B256> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(&(address, slot)).copied().unwrap_or_default())
    }

    async fn code_at(&self, address: Address, _block: u64) -> StrataResult<Bytes> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }
}
