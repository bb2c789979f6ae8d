//! Event allocation: indexed parameters go to log topics, the rest to log data.

use crate::abi::{allocate_members, AbiAllocations, AbiPointer};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use strata_core::{
    AbiEntry, AbiEvent, ContractDefinition, DeclarationId, EventDefinition, Registry, StrataError,
    StrataResult, TypeRef,
};

/// EVM logs carry at most four topics.
pub const MAX_TOPICS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "lowercase")]
pub enum EventPointer {
    /// Byte range inside the log data.
    Data(AbiPointer),
    Topic { topic: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArgumentAllocation {
    pub name: String,
    pub type_ref: TypeRef,
    pub indexed: bool,
    pub pointer: EventPointer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAllocation {
    pub name: String,
    pub contract_id: DeclarationId,
    pub definition_id: DeclarationId,
    pub anonymous: bool,
    /// Topic 0 for non-anonymous events.
    pub selector: Option<B256>,
    /// Arguments in declaration order.
    pub arguments: Vec<EventArgumentAllocation>,
}

impl EventAllocation {
    pub fn topic_count(&self) -> usize {
        let indexed = self.arguments.iter().filter(|a| a.indexed).count();
        indexed + usize::from(!self.anonymous)
    }
}

/// Event layouts of one contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEventAllocations {
    pub by_selector: HashMap<B256, EventAllocation>,
    pub anonymous: Vec<EventAllocation>,
}

fn matches_entry(
    definition: &EventDefinition,
    entry: &AbiEvent,
    registry: &Registry,
) -> StrataResult<bool> {
    if definition.name != entry.name
        || definition.anonymous != entry.anonymous
        || definition.parameters.len() != entry.inputs.len()
    {
        return Ok(false);
    }
    for (param, expected) in definition.parameters.iter().zip(&entry.inputs) {
        if param.indexed != expected.is_indexed()
            || registry.abi_type_string(&param.type_ref)?.as_deref()
                != Some(expected.canonical_type().as_str())
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Finds the event declaration for an ABI entry, most-derived first.
pub fn resolve_event<'r>(
    entry: &AbiEvent,
    contract: &ContractDefinition,
    registry: &'r Registry,
) -> StrataResult<&'r EventDefinition> {
    for base in registry.linearization(contract)? {
        for definition in &base.events {
            if matches_entry(definition, entry, registry)? {
                return Ok(definition);
            }
        }
    }
    Err(StrataError::NoMatchingDeclaration(entry.signature()))
}

/// Allocates an event's arguments.
///
/// Non-indexed arguments are laid out as an ABI tuple in the log data.
/// Indexed ones take consecutive topics, starting after the selector topic
/// unless the event is anonymous. The result lists arguments in source order.
pub fn allocate_event(
    entry: &AbiEvent,
    contract: &ContractDefinition,
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> StrataResult<EventAllocation> {
    let definition = resolve_event(entry, contract, registry)?;

    let (indexed, data): (Vec<_>, Vec<_>) = definition.parameters.iter().partition(|p| p.indexed);

    let first_topic = usize::from(!definition.anonymous);
    if first_topic + indexed.len() > MAX_TOPICS {
        return Err(StrataError::InvalidInput(format!(
            "{} has too many indexed parameters",
            entry.signature()
        )));
    }

    let layout = allocate_members(
        data.iter().map(|p| (p.name.as_str(), &p.type_ref)),
        0,
        registry,
        allocations,
    )?
    .ok_or_else(|| {
        StrataError::InvalidInput(format!("{} cannot be ABI-encoded", entry.signature()))
    })?;

    let mut data_pointers: VecDeque<AbiPointer> =
        layout.members.iter().map(|m| m.pointer).collect();
    let mut topics: SmallVec<[usize; MAX_TOPICS]> =
        (first_topic..first_topic + indexed.len()).collect();
    topics.reverse();

    let mut arguments = Vec::with_capacity(definition.parameters.len());
    for param in &definition.parameters {
        let pointer = if param.indexed {
            topics.pop().map(|topic| EventPointer::Topic { topic })
        } else {
            data_pointers.pop_front().map(EventPointer::Data)
        }
        .ok_or_else(|| StrataError::Internal(format!("lost argument {}", param.name)))?;
        arguments.push(EventArgumentAllocation {
            name: param.name.clone(),
            type_ref: param.type_ref.clone(),
            indexed: param.indexed,
            pointer,
        });
    }

    Ok(EventAllocation {
        name: definition.name.clone(),
        contract_id: contract.id,
        definition_id: definition.id,
        anonymous: definition.anonymous,
        selector: (!definition.anonymous).then(|| entry.topic()),
        arguments,
    })
}

/// Allocates every event in a contract's ABI, skipping unresolvable ones.
pub fn allocate_contract_events(
    contract: &ContractDefinition,
    abi: &[AbiEntry],
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> ContractEventAllocations {
    let mut result = ContractEventAllocations::default();
    for entry in abi {
        let AbiEntry::Event(event) = entry else {
            continue;
        };
        match allocate_event(event, contract, registry, allocations) {
            Ok(allocation) => match allocation.selector {
                Some(selector) => {
                    result.by_selector.insert(selector, allocation);
                }
                None => result.anonymous.push(allocation),
            },
            Err(e) => {
                tracing::warn!(contract = %contract.name, event = %event.signature(), error = %e, "skipping event allocation")
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::abi::AbiParameter;
    use strata_core::{ContractKind, VariableDeclaration};

    fn registry_with_event(event: EventDefinition) -> Registry {
        let mut registry = Registry::new();
        registry.insert(ContractDefinition {
            id: 1.into(),
            name: "Token".into(),
            contract_kind: ContractKind::Contract,
            linearized_base_contracts: vec![1.into()],
            state_variables: vec![],
            functions: vec![],
            events: vec![event],
        });
        registry
    }

    fn transfer(anonymous: bool) -> (EventDefinition, AbiEvent) {
        let definition = EventDefinition {
            id: 2.into(),
            name: "Transfer".into(),
            anonymous,
            parameters: vec![
                VariableDeclaration::new(3, "from", TypeRef::address()).indexed(),
                VariableDeclaration::new(4, "value", TypeRef::uint(256)),
                VariableDeclaration::new(5, "to", TypeRef::address()).indexed(),
                VariableDeclaration::new(6, "memo", TypeRef::String),
            ],
        };
        let entry = AbiEvent {
            name: "Transfer".into(),
            inputs: vec![
                AbiParameter::new("from", "address").indexed(),
                AbiParameter::new("value", "uint256"),
                AbiParameter::new("to", "address").indexed(),
                AbiParameter::new("memo", "string"),
            ],
            anonymous,
        };
        (definition, entry)
    }

    #[test]
    fn mixed_arguments_keep_source_order() {
        let (definition, entry) = transfer(false);
        let registry = registry_with_event(definition);
        let contract = registry.contract_definition(1.into()).unwrap();
        let allocation =
            allocate_event(&entry, contract, &registry, &mut AbiAllocations::default()).unwrap();

        let pointers: Vec<_> = allocation.arguments.iter().map(|a| a.pointer).collect();
        assert_eq!(
            pointers,
            vec![
                EventPointer::Topic { topic: 1 },
                EventPointer::Data(AbiPointer { start: 0, length: 32 }),
                EventPointer::Topic { topic: 2 },
                EventPointer::Data(AbiPointer { start: 32, length: 32 }),
            ]
        );
        assert_eq!(allocation.selector, Some(entry.topic()));
        assert_eq!(allocation.topic_count(), 3);
    }

    #[test]
    fn anonymous_event_starts_at_topic_zero() {
        let (definition, entry) = transfer(true);
        let registry = registry_with_event(definition);
        let contract = registry.contract_definition(1.into()).unwrap();
        let allocation =
            allocate_event(&entry, contract, &registry, &mut AbiAllocations::default()).unwrap();
        assert_eq!(allocation.arguments[0].pointer, EventPointer::Topic { topic: 0 });
        assert_eq!(allocation.arguments[2].pointer, EventPointer::Topic { topic: 1 });
        assert!(allocation.selector.is_none());

        let events = allocate_contract_events(
            contract,
            &[AbiEntry::Event(entry)],
            &registry,
            &mut AbiAllocations::default(),
        );
        assert_eq!(events.anonymous.len(), 1);
        assert!(events.by_selector.is_empty());
    }

    #[test]
    fn too_many_indexed_parameters() {
        let parameters: Vec<_> = (0..4)
            .map(|i| VariableDeclaration::new(10 + i, format!("p{i}"), TypeRef::Bool).indexed())
            .collect();
        let definition = EventDefinition {
            id: 2.into(),
            name: "Wide".into(),
            anonymous: false,
            parameters,
        };
        let entry = AbiEvent {
            name: "Wide".into(),
            inputs: (0..4)
                .map(|i| AbiParameter::new(format!("p{i}"), "bool").indexed())
                .collect(),
            anonymous: false,
        };
        let registry = registry_with_event(definition);
        let contract = registry.contract_definition(1.into()).unwrap();
        assert!(matches!(
            allocate_event(&entry, contract, &registry, &mut AbiAllocations::default()),
            Err(StrataError::InvalidInput(_))
        ));
    }
}
