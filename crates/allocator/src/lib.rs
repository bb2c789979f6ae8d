//! Storage, ABI, calldata, event, and memory allocation for Solidity types.
//!
//! Allocations are pure functions of the [`Registry`]. Each kind is memoized
//! in a cache keyed by declaration id that callers thread through every
//! allocation call; [`Allocations`] bundles the caches a decoder needs.

pub mod abi;
pub mod calldata;
pub mod event;
pub mod memory;
pub mod size;
pub mod storage;

pub use abi::{AbiAllocation, AbiAllocations, AbiPointer};
pub use calldata::{CalldataAllocation, ContractCalldataAllocations, FunctionAllocation};
pub use event::{ContractEventAllocations, EventAllocation, EventPointer};
pub use memory::{MemoryAllocation, MemoryAllocations};
pub use size::{AbiSizeInfo, StorageLength};
pub use storage::{
    StateAllocation, StatePointer, StorageAllocation, StorageAllocations, StoragePosition,
    StorageRange,
};

use strata_core::{LayoutConfig, Registry};

/// Struct allocation caches for every data location.
#[derive(Debug, Clone, Default)]
pub struct Allocations {
    pub storage: StorageAllocations,
    pub abi: AbiAllocations,
    pub memory: MemoryAllocations,
}

impl Allocations {
    /// Allocates every struct in `registry` in every location.
    ///
    /// Structs that fail are logged and left out; the rest remain usable.
    pub fn for_registry(registry: &Registry, config: &LayoutConfig) -> Self {
        let mut allocations = Allocations::default();
        let storage = storage::allocate_all_structs(registry, &mut allocations.storage, config);
        let abi = abi::allocate_all_abi_structs(registry, &mut allocations.abi);
        memory::allocate_all_memory_structs(registry, &mut allocations.memory);

        tracing::info!(
            structs = registry.structs().count(),
            storage_ok = storage.values().filter(|r| r.is_ok()).count(),
            abi_encodable = abi.values().filter(|r| matches!(r, Ok(Some(_)))).count(),
            "allocated registry"
        );
        allocations
    }
}
