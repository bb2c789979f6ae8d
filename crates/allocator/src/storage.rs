//! Storage allocation: Solidity's slot packing for structs and contract state.
//!
//! Members are placed in declaration order, packed right-to-left inside a
//! 32-byte word. A member that does not fit in what remains of the current
//! word starts a fresh one, and whole-word members always do.

use crate::size::{storage_size, StorageLength};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use strata_core::{
    ContractDefinition, DeclarationId, LayoutConfig, Registry, StrataError, StrataResult,
    StructDefinition, TypeRef, VariableDeclaration, WORD_SIZE,
};

/// A byte position: word offset from the allocation base, byte index 0..=31
/// counted from the most significant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoragePosition {
    pub slot: u64,
    pub index: u8,
}

/// Inclusive byte range `from..=to`, relative to an allocation base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageRange {
    pub from: StoragePosition,
    pub to: StoragePosition,
}

impl StorageRange {
    /// Byte length when the range sits inside one word.
    pub fn packed_length(&self) -> Option<usize> {
        (self.from.slot == self.to.slot)
            .then(|| usize::from(self.to.index - self.from.index) + 1)
    }

    pub fn words(&self) -> u64 {
        self.to.slot - self.from.slot + 1
    }

    /// Whether the range covers whole words.
    pub fn is_word_aligned(&self) -> bool {
        self.from.index == 0 && self.to.index as usize == WORD_SIZE - 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMemberAllocation {
    pub name: String,
    pub definition_id: DeclarationId,
    pub type_ref: TypeRef,
    pub pointer: StorageRange,
}

/// Layout of one struct in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAllocation {
    pub definition_id: DeclarationId,
    pub size: StorageLength,
    pub members: Vec<StorageMemberAllocation>,
}

impl StorageAllocation {
    pub fn member(&self, name: &str) -> Option<&StorageMemberAllocation> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// Where a contract state variable's value lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "lowercase")]
pub enum StatePointer {
    Storage(StorageRange),
    /// Constants occupy no storage; their value is the declaration's literal.
    Constant { definition: DeclarationId },
    /// Immutables are embedded in deployed bytecode.
    Code { start: usize, length: usize },
    /// Immutable whose code offsets were not supplied.
    Nowhere,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVariableAllocation {
    pub name: String,
    pub definition_id: DeclarationId,
    /// Contract in the linearization that declares the variable.
    pub defining_contract: DeclarationId,
    pub type_ref: TypeRef,
    pub pointer: StatePointer,
}

/// Layout of one contract's state, most-base variables first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAllocation {
    pub contract_id: DeclarationId,
    pub contract_name: String,
    pub variables: Vec<StateVariableAllocation>,
}

impl StateAllocation {
    /// Looks up a variable by name, preferring the most-derived declaration.
    pub fn variable(&self, name: &str) -> Option<&StateVariableAllocation> {
        self.variables.iter().rev().find(|v| v.name == name)
    }
}

/// Byte ranges of immutable variables inside deployed bytecode, by variable id.
pub type ImmutableReferences = HashMap<DeclarationId, Vec<CodeRange>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: usize,
    pub length: usize,
}

/// Memoizing cache of storage allocations, keyed by declaration id.
#[derive(Debug, Clone, Default)]
pub struct StorageAllocations {
    structs: HashMap<DeclarationId, StorageAllocation>,
    states: HashMap<DeclarationId, StateAllocation>,
    in_progress: HashSet<DeclarationId>,
    computed: usize,
}

impl StorageAllocations {
    pub fn get(&self, id: DeclarationId) -> Option<&StorageAllocation> {
        self.structs.get(&id)
    }

    pub fn state(&self, contract: DeclarationId) -> Option<&StateAllocation> {
        self.states.get(&contract)
    }

    /// Number of allocations actually computed (cache hits excluded).
    pub fn computed_count(&self) -> usize {
        self.computed
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    pub fn structs(&self) -> impl Iterator<Item = &StorageAllocation> {
        self.structs.values()
    }
}

/// Packing cursor: current word and bytes still free in it.
struct Cursor {
    slot: u64,
    free: usize,
}

impl Cursor {
    fn new() -> Self {
        Self {
            slot: 0,
            free: WORD_SIZE,
        }
    }

    fn next_word(&mut self) {
        self.slot += 1;
        self.free = WORD_SIZE;
    }

    fn place(&mut self, length: StorageLength) -> StorageRange {
        match length {
            StorageLength::Words(words) => {
                if self.free != WORD_SIZE {
                    self.next_word();
                }
                let range = StorageRange {
                    from: StoragePosition {
                        slot: self.slot,
                        index: 0,
                    },
                    to: StoragePosition {
                        slot: self.slot + words.max(1) - 1,
                        index: (WORD_SIZE - 1) as u8,
                    },
                };
                self.slot += words.max(1);
                self.free = WORD_SIZE;
                range
            }
            StorageLength::Bytes(bytes) => {
                if bytes > self.free {
                    self.next_word();
                }
                let range = StorageRange {
                    from: StoragePosition {
                        slot: self.slot,
                        index: (self.free - bytes) as u8,
                    },
                    to: StoragePosition {
                        slot: self.slot,
                        index: (self.free - 1) as u8,
                    },
                };
                self.free -= bytes;
                if self.free == 0 {
                    self.next_word();
                }
                range
            }
        }
    }

    /// Total words consumed. An empty layout still takes one word.
    fn size(&self) -> StorageLength {
        if self.free == WORD_SIZE && self.slot != 0 {
            StorageLength::Words(self.slot)
        } else {
            StorageLength::Words(self.slot + 1)
        }
    }
}

fn pack_members<'a>(
    members: impl IntoIterator<Item = &'a VariableDeclaration>,
    registry: &Registry,
    allocations: &mut StorageAllocations,
    config: &LayoutConfig,
) -> StrataResult<(Vec<StorageRange>, Cursor)> {
    let mut cursor = Cursor::new();
    let mut ranges = Vec::new();
    for member in members {
        let length = storage_size(&member.type_ref, registry, allocations, config)?;
        ranges.push(cursor.place(length));
    }
    Ok((ranges, cursor))
}

/// Allocates `definition` in storage, or returns the memoized allocation.
pub fn allocate_struct(
    definition: &StructDefinition,
    registry: &Registry,
    allocations: &mut StorageAllocations,
    config: &LayoutConfig,
) -> StrataResult<StorageAllocation> {
    if let Some(existing) = allocations.structs.get(&definition.id) {
        return Ok(existing.clone());
    }
    if !allocations.in_progress.insert(definition.id) {
        return Err(StrataError::RecursiveType(definition.id));
    }

    let packed = pack_members(&definition.members, registry, allocations, config);
    allocations.in_progress.remove(&definition.id);
    let (ranges, cursor) = packed?;

    let allocation = StorageAllocation {
        definition_id: definition.id,
        size: cursor.size(),
        members: definition
            .members
            .iter()
            .zip(ranges)
            .map(|(member, pointer)| StorageMemberAllocation {
                name: member.name.clone(),
                definition_id: member.id,
                type_ref: member.type_ref.clone(),
                pointer,
            })
            .collect(),
    };

    tracing::trace!(id = %definition.id, name = %definition.name, size = ?allocation.size, "allocated struct");
    allocations.computed += 1;
    allocations
        .structs
        .insert(definition.id, allocation.clone());
    Ok(allocation)
}

/// Allocates a contract's state variables across its whole linearization.
///
/// Base contracts' variables come first. Constants are skipped by the
/// packer; immutables point into code when `immutables` locates them.
pub fn allocate_contract_state(
    contract: &ContractDefinition,
    registry: &Registry,
    allocations: &mut StorageAllocations,
    config: &LayoutConfig,
    immutables: Option<&ImmutableReferences>,
) -> StrataResult<StateAllocation> {
    if let Some(existing) = allocations.states.get(&contract.id) {
        return Ok(existing.clone());
    }

    let linearization = registry.linearization(contract)?;
    let declared: Vec<(DeclarationId, &VariableDeclaration)> = linearization
        .iter()
        .rev()
        .flat_map(|base| base.state_variables.iter().map(move |v| (base.id, v)))
        .collect();

    let stored = declared
        .iter()
        .filter(|(_, v)| !v.constant && !v.immutable)
        .map(|(_, v)| *v);
    let (ranges, _) = pack_members(stored, registry, allocations, config)?;
    let mut ranges = ranges.into_iter();

    let mut variables = Vec::with_capacity(declared.len());
    for (defining_contract, variable) in declared {
        let pointer = if variable.constant {
            StatePointer::Constant {
                definition: variable.id,
            }
        } else if variable.immutable {
            immutables
                .and_then(|refs| refs.get(&variable.id))
                .and_then(|ranges| ranges.first())
                .map_or(StatePointer::Nowhere, |r| StatePointer::Code {
                    start: r.start,
                    length: r.length,
                })
        } else {
            let range = ranges.next().ok_or_else(|| {
                StrataError::Internal(format!("no storage range for {}", variable.name))
            })?;
            StatePointer::Storage(range)
        };
        variables.push(StateVariableAllocation {
            name: variable.name.clone(),
            definition_id: variable.id,
            defining_contract,
            type_ref: variable.type_ref.clone(),
            pointer,
        });
    }

    let allocation = StateAllocation {
        contract_id: contract.id,
        contract_name: contract.name.clone(),
        variables,
    };
    tracing::debug!(id = %contract.id, name = %contract.name, variables = allocation.variables.len(), "allocated contract state");
    allocations.computed += 1;
    allocations
        .states
        .insert(contract.id, allocation.clone());
    Ok(allocation)
}

/// Allocates every struct in the registry, recording each outcome.
///
/// A struct whose members reference unknown types fails alone; the others
/// are still allocated and cached.
pub fn allocate_all_structs(
    registry: &Registry,
    allocations: &mut StorageAllocations,
    config: &LayoutConfig,
) -> BTreeMap<DeclarationId, StrataResult<StorageAllocation>> {
    let mut results = BTreeMap::new();
    for definition in registry.structs() {
        let result = allocate_struct(definition, registry, allocations, config);
        if let Err(e) = &result {
            tracing::warn!(id = %definition.id, name = %definition.name, error = %e, "skipping struct storage allocation");
        }
        results.insert(definition.id, result);
    }
    results
}

/// Allocates the state of every contract in the registry.
pub fn allocate_all_contract_states(
    registry: &Registry,
    allocations: &mut StorageAllocations,
    config: &LayoutConfig,
    immutables: &HashMap<DeclarationId, ImmutableReferences>,
) -> BTreeMap<DeclarationId, StrataResult<StateAllocation>> {
    let mut results = BTreeMap::new();
    for contract in registry.contracts() {
        let result = allocate_contract_state(
            contract,
            registry,
            allocations,
            config,
            immutables.get(&contract.id),
        );
        if let Err(e) = &result {
            tracing::warn!(id = %contract.id, name = %contract.name, error = %e, "skipping contract state allocation");
        }
        results.insert(contract.id, result);
    }
    results
}

/// Drops failed entries from a driver's result map.
pub fn successes<T>(results: BTreeMap<DeclarationId, StrataResult<T>>) -> BTreeMap<DeclarationId, T> {
    results
        .into_iter()
        .filter_map(|(id, result)| result.ok().map(|value| (id, value)))
        .collect()
}
