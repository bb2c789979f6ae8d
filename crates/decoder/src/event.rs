//! Event log decoding.
//!
//! Indexed arguments are read from topics, the rest from the log data as
//! one ABI tuple. Indexed reference types only leave their hash behind.

use crate::abi::decode_abi;
use crate::basic::decode_word;
use crate::calldata::Argument;
use crate::info::DecoderInfo;
use crate::value::{Data, DecodingError, Value};
use alloy_primitives::B256;
use serde::Serialize;
use strata_allocator::{ContractEventAllocations, EventAllocation, EventPointer};
use strata_core::{DeclarationId, StrataError, StrataResult, TypeRef, WORD_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedEvent {
    pub name: String,
    pub contract_id: DeclarationId,
    pub definition_id: DeclarationId,
    pub anonymous: bool,
    pub arguments: Vec<Argument>,
}

impl DecodedEvent {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    fn has_errors(&self) -> bool {
        self.arguments.iter().any(|a| a.value.has_errors())
    }
}

pub(crate) fn decode_topic(
    info: &DecoderInfo<'_>,
    ty: &TypeRef,
    topic: Option<&B256>,
    index: usize,
) -> Value {
    let Some(topic) = topic else {
        return Value::error(
            ty.clone(),
            DecodingError::ReadOutOfBounds {
                start: index * WORD_SIZE,
                length: WORD_SIZE,
            },
        );
    };
    if ty.is_reference() {
        return Value::new(ty.clone(), Data::IndexedHash(*topic));
    }
    decode_word(ty, &topic.0, info, info.config.strict_abi)
}

/// Decodes a log against one event layout.
pub fn decode_event_with(
    info: &DecoderInfo<'_>,
    allocation: &EventAllocation,
    topics: &[B256],
    data: &[u8],
) -> DecodedEvent {
    let arguments = allocation
        .arguments
        .iter()
        .map(|a| {
            let value = match a.pointer {
                EventPointer::Topic { topic } => decode_topic(info, &a.type_ref, topics.get(topic), topic),
                EventPointer::Data(pointer) => decode_abi(info, data, &a.type_ref, pointer.start, 0, 0),
            };
            Argument {
                name: a.name.clone(),
                value,
            }
        })
        .collect();
    DecodedEvent {
        name: allocation.name.clone(),
        contract_id: allocation.contract_id,
        definition_id: allocation.definition_id,
        anonymous: allocation.anonymous,
        arguments,
    }
}

/// Decodes a log emitted by a contract with the given event layouts.
///
/// Topic 0 selects a non-anonymous event. Failing that, the first anonymous
/// event with the right number of topics that decodes cleanly is used.
pub fn decode_event(
    info: &DecoderInfo<'_>,
    allocations: &ContractEventAllocations,
    topics: &[B256],
    data: &[u8],
) -> StrataResult<DecodedEvent> {
    if let Some(allocation) = topics.first().and_then(|t| allocations.by_selector.get(t)) {
        tracing::debug!(event = %allocation.name, "decoding event by selector");
        return Ok(decode_event_with(info, allocation, topics, data));
    }

    allocations
        .anonymous
        .iter()
        .filter(|a| a.topic_count() == topics.len())
        .map(|a| decode_event_with(info, a, topics, data))
        .find(|event| !event.has_errors())
        .ok_or_else(|| {
            StrataError::NoMatchingDeclaration(format!(
                "log with {} topics and {} data bytes",
                topics.len(),
                data.len()
            ))
        })
}
