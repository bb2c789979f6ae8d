//! Memory allocation for structs.
//!
//! In memory every member takes a full word: value types in place,
//! reference types as a pointer to their own allocation. Mappings cannot
//! live in memory and are left out.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strata_core::{DeclarationId, Registry, StructDefinition, TypeRef, WORD_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPointer {
    pub start: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMemberAllocation {
    pub name: String,
    pub type_ref: TypeRef,
    pub pointer: MemoryPointer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAllocation {
    pub definition_id: DeclarationId,
    pub members: Vec<MemoryMemberAllocation>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAllocations {
    structs: HashMap<DeclarationId, MemoryAllocation>,
}

impl MemoryAllocations {
    pub fn get(&self, id: DeclarationId) -> Option<&MemoryAllocation> {
        self.structs.get(&id)
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }
}

pub fn allocate_memory_struct(
    definition: &StructDefinition,
    allocations: &mut MemoryAllocations,
) -> MemoryAllocation {
    if let Some(existing) = allocations.structs.get(&definition.id) {
        return existing.clone();
    }
    let members = definition
        .members
        .iter()
        .filter(|m| !matches!(m.type_ref, TypeRef::Mapping { .. }))
        .enumerate()
        .map(|(i, m)| MemoryMemberAllocation {
            name: m.name.clone(),
            type_ref: m.type_ref.clone(),
            pointer: MemoryPointer {
                start: i * WORD_SIZE,
                length: WORD_SIZE,
            },
        })
        .collect();
    let allocation = MemoryAllocation {
        definition_id: definition.id,
        members,
    };
    allocations
        .structs
        .insert(definition.id, allocation.clone());
    allocation
}

pub fn allocate_all_memory_structs(registry: &Registry, allocations: &mut MemoryAllocations) {
    for definition in registry.structs() {
        allocate_memory_struct(definition, allocations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::VariableDeclaration;

    #[test]
    fn one_word_per_member_without_mappings() {
        let definition = StructDefinition {
            id: 1.into(),
            name: "S".into(),
            members: vec![
                VariableDeclaration::new(2, "flag", TypeRef::Bool),
                VariableDeclaration::new(3, "m", TypeRef::mapping(TypeRef::Bool, TypeRef::Bool)),
                VariableDeclaration::new(4, "name", TypeRef::String),
            ],
        };
        let allocation = allocate_memory_struct(&definition, &mut MemoryAllocations::default());
        assert_eq!(allocation.members.len(), 2);
        assert_eq!(allocation.members[1].name, "name");
        assert_eq!(allocation.members[1].pointer, MemoryPointer { start: 32, length: 32 });
    }
}
