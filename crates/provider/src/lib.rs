//! State retrieval for Strata decodes.
//!
//! Decodes never fetch anything themselves. This crate answers their
//! storage and code requests from a [`StateProvider`], through a shared
//! per-block [`StateCache`], fetching concurrently where it can.

pub mod cache;
pub mod driver;
pub mod memory;
pub mod prefetcher;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use strata_core::StrataResult;

pub use cache::StateCache;
pub use driver::{decode_state, drive};
pub use memory::MemoryProvider;
pub use prefetcher::{PrefetchReport, Prefetcher};

/// Source of contract storage and code at a given block.
#[async_trait]
pub trait StateProvider: Send + Sync {
    async fn storage_at(&self, address: Address, slot: U256, block: u64) -> StrataResult<B256>;
    async fn code_at(&self, address: Address, block: u64) -> StrataResult<Bytes>;
}
