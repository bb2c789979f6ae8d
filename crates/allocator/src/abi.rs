//! ABI allocation for structs: flat head layout, one head slot per member.

use crate::size::abi_size_info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use strata_core::{DeclarationId, Registry, StrataResult, StructDefinition, TypeRef, WORD_SIZE};

/// Byte range of a head slot, relative to the start of its enclosing tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbiPointer {
    pub start: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiMemberAllocation {
    pub name: String,
    pub type_ref: TypeRef,
    pub pointer: AbiPointer,
}

/// Layout of one struct as an ABI tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiAllocation {
    pub definition_id: DeclarationId,
    /// Head size: one word when dynamic, else the sum of member sizes.
    pub length: usize,
    pub dynamic: bool,
    pub members: Vec<AbiMemberAllocation>,
}

/// Memoizing cache of ABI allocations.
///
/// A cached `None` means the struct was examined and cannot be ABI-encoded,
/// as opposed to not having been looked at yet.
#[derive(Debug, Clone, Default)]
pub struct AbiAllocations {
    structs: HashMap<DeclarationId, Option<AbiAllocation>>,
    in_progress: HashSet<DeclarationId>,
    computed: usize,
}

impl AbiAllocations {
    /// `None`: not computed. `Some(None)`: not encodable.
    pub fn lookup(&self, id: DeclarationId) -> Option<Option<&AbiAllocation>> {
        self.structs.get(&id).map(Option::as_ref)
    }

    pub fn get(&self, id: DeclarationId) -> Option<&AbiAllocation> {
        self.structs.get(&id).and_then(Option::as_ref)
    }

    pub fn computed_count(&self) -> usize {
        self.computed
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }
}

/// Members placed by [`allocate_members`], with the tuple's head summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLayout {
    pub members: Vec<AbiMemberAllocation>,
    pub length: usize,
    pub dynamic: bool,
}

/// Lays `members` out consecutively starting at byte `start`.
///
/// Returns `Ok(None)` if any member has no ABI representation; the whole
/// tuple is then unencodable.
pub fn allocate_members<'a>(
    members: impl IntoIterator<Item = (&'a str, &'a TypeRef)>,
    start: usize,
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> StrataResult<Option<MemberLayout>> {
    let mut position = start;
    let mut dynamic = false;
    let mut placed = Vec::new();

    for (name, ty) in members {
        let Some(info) = abi_size_info(ty, registry, allocations)? else {
            return Ok(None);
        };
        placed.push(AbiMemberAllocation {
            name: name.to_string(),
            type_ref: ty.clone(),
            pointer: AbiPointer {
                start: position,
                length: info.size,
            },
        });
        position += info.size;
        dynamic |= info.dynamic;
    }

    let length = if dynamic { WORD_SIZE } else { position - start };
    Ok(Some(MemberLayout {
        members: placed,
        length,
        dynamic,
    }))
}

/// Allocates `definition` as an ABI tuple, or returns the memoized result.
///
/// A struct reached again while it is being allocated is recursive, which
/// the ABI cannot express, so it is reported as unencodable.
pub fn allocate_abi_struct(
    definition: &StructDefinition,
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> StrataResult<Option<AbiAllocation>> {
    if let Some(existing) = allocations.structs.get(&definition.id) {
        return Ok(existing.clone());
    }
    if !allocations.in_progress.insert(definition.id) {
        return Ok(None);
    }

    let members = definition
        .members
        .iter()
        .map(|m| (m.name.as_str(), &m.type_ref));
    let layout = allocate_members(members, 0, registry, allocations);
    allocations.in_progress.remove(&definition.id);

    let allocation = layout?.map(|layout| AbiAllocation {
        definition_id: definition.id,
        length: layout.length,
        dynamic: layout.dynamic,
        members: layout.members,
    });
    if allocation.is_none() {
        tracing::debug!(id = %definition.id, name = %definition.name, "struct cannot be ABI-encoded");
    }

    allocations.computed += 1;
    allocations
        .structs
        .insert(definition.id, allocation.clone());
    Ok(allocation)
}

/// Allocates every struct in the registry for ABI encoding.
pub fn allocate_all_abi_structs(
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> BTreeMap<DeclarationId, StrataResult<Option<AbiAllocation>>> {
    let mut results = BTreeMap::new();
    for definition in registry.structs() {
        let result = allocate_abi_struct(definition, registry, allocations);
        if let Err(e) = &result {
            tracing::warn!(id = %definition.id, name = %definition.name, error = %e, "skipping struct ABI allocation");
        }
        results.insert(definition.id, result);
    }
    results
}
