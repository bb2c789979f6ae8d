//! The resumable decode driver.
//!
//! A [`Decoding`] never performs I/O. Each [`Decoding::step`] replays the
//! decode from the top against everything fetched so far. A pass that lacks
//! storage ends with every slot it found missing; missing contract code ends
//! it at once. Fetched data stays in the decoding's [`EvmState`], so no datum
//! is requested twice, and an array of uncached words costs one extra pass
//! rather than one per element.

use crate::abi::decode_abi;
use crate::basic::decode_word;
use crate::constant::decode_constant;
use crate::event::decode_topic;
use crate::info::DecoderInfo;
use crate::memory::decode_memory;
use crate::pointer::{DataPointer, SlotRange};
use crate::state::{EvmState, Fetch, Request};
use crate::storage::decode_storage;
use crate::value::{DecodingError, Value};
use alloy_primitives::{Address, Bytes, B256, U256};
use strata_allocator::storage::StateVariableAllocation;
use strata_allocator::{StateAllocation, StatePointer};
use strata_core::{StrataError, StrataResult, TypeRef, WORD_SIZE};

/// Outcome of one decode pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    NeedsStorage(Vec<U256>),
    NeedsCode(Address),
    Done(Value),
}

impl From<Request> for Progress {
    fn from(request: Request) -> Self {
        match request {
            Request::Storage { slots } => Progress::NeedsStorage(slots),
            Request::Code { address } => Progress::NeedsCode(address),
        }
    }
}

/// Decodes the value at `pointer` if `state` already holds everything it
/// needs, or names what is missing.
pub fn decode_value(
    info: &DecoderInfo<'_>,
    state: &EvmState,
    ty: &TypeRef,
    pointer: &DataPointer,
) -> Result<Value, Request> {
    decode(info, state, ty, pointer)
}

pub(crate) fn decode(
    info: &DecoderInfo<'_>,
    state: &EvmState,
    ty: &TypeRef,
    pointer: &DataPointer,
) -> Fetch<Value> {
    let value = match *pointer {
        DataPointer::Storage(range) => return decode_storage(info, state, ty, range, 0),
        DataPointer::Code { start, length } => return decode_code(info, state, ty, start, length),
        DataPointer::Memory { start } => decode_memory(info, &state.memory, ty, start, 0),
        DataPointer::Calldata { start, base } => decode_abi(info, &state.calldata, ty, start, base, 0),
        DataPointer::Returndata { start, base } => {
            decode_abi(info, &state.returndata, ty, start, base, 0)
        }
        DataPointer::EventData { start, base } => {
            decode_abi(info, &state.event_data, ty, start, base, 0)
        }
        DataPointer::EventTopic { topic } => decode_topic(info, ty, state.topics.get(topic), topic),
        DataPointer::Constant { definition } => decode_constant(info, ty, definition),
        DataPointer::Nowhere => Value::error(ty.clone(), DecodingError::NoLocation),
    };
    Ok(value)
}

/// Immutables: a word embedded in the deployed code of `state.address`.
fn decode_code(
    info: &DecoderInfo<'_>,
    state: &EvmState,
    ty: &TypeRef,
    start: usize,
    length: usize,
) -> Fetch<Value> {
    let code = state.contract_code(state.address)?;
    let raw = start
        .checked_add(length)
        .filter(|_| length <= WORD_SIZE)
        .and_then(|end| code.get(start..end));
    let Some(raw) = raw else {
        return Ok(Value::error(
            ty.clone(),
            DecodingError::ReadOutOfBounds { start, length },
        ));
    };
    let mut word = [0u8; WORD_SIZE];
    word[WORD_SIZE - raw.len()..].copy_from_slice(raw);
    Ok(decode_word(ty, &word, info, false))
}

/// A decode in progress.
#[derive(Debug, Clone)]
pub struct Decoding<'a> {
    info: DecoderInfo<'a>,
    state: EvmState,
    ty: TypeRef,
    pointer: DataPointer,
    passes: usize,
}

impl<'a> Decoding<'a> {
    pub fn new(info: DecoderInfo<'a>, state: EvmState, ty: TypeRef, pointer: DataPointer) -> Self {
        Self {
            info,
            state,
            ty,
            pointer,
            passes: 0,
        }
    }

    /// Decoding of one contract state variable.
    pub fn variable(info: DecoderInfo<'a>, state: EvmState, variable: &StateVariableAllocation) -> Self {
        let pointer = match variable.pointer {
            StatePointer::Storage(range) => DataPointer::Storage(SlotRange::offset(U256::ZERO, &range)),
            StatePointer::Constant { definition } => DataPointer::Constant { definition },
            StatePointer::Code { start, length } => DataPointer::Code { start, length },
            StatePointer::Nowhere => DataPointer::Nowhere,
        };
        Self::new(info, state, variable.type_ref.clone(), pointer)
    }

    /// Runs one pass.
    pub fn step(&mut self) -> Progress {
        self.passes += 1;
        match decode(&self.info, &self.state, &self.ty, &self.pointer) {
            Ok(value) => {
                tracing::trace!(ty = %self.ty, passes = self.passes, "decode finished");
                Progress::Done(value)
            }
            Err(request) => {
                tracing::trace!(?request, pass = self.passes, "decode suspended");
                request.into()
            }
        }
    }

    pub fn provide_storage(&mut self, slot: U256, word: B256) {
        self.state.insert_storage(slot, word);
    }

    pub fn provide_code(&mut self, address: Address, code: Bytes) {
        self.state.insert_code(address, code);
    }

    /// Drives the decoding to completion with synchronous fetchers.
    pub fn run(
        mut self,
        mut storage: impl FnMut(U256) -> B256,
        mut code: impl FnMut(Address) -> Bytes,
    ) -> (Value, EvmState) {
        loop {
            match self.step() {
                Progress::Done(value) => return (value, self.state),
                Progress::NeedsStorage(slots) => {
                    for slot in slots {
                        let word = storage(slot);
                        self.provide_storage(slot, word);
                    }
                }
                Progress::NeedsCode(address) => {
                    let bytes = code(address);
                    self.provide_code(address, bytes);
                }
            }
        }
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn address(&self) -> Address {
        self.state.address
    }

    pub fn state(&self) -> &EvmState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EvmState {
        &mut self.state
    }

    pub fn into_state(self) -> EvmState {
        self.state
    }

    /// Passes run so far, including the one that finished.
    pub fn passes(&self) -> usize {
        self.passes
    }
}

/// Starts decoding the state variable `name`, preferring the most-derived
/// declaration when the name is shadowed.
pub fn decode_variable<'a>(
    info: DecoderInfo<'a>,
    state: EvmState,
    allocation: &StateAllocation,
    name: &str,
) -> StrataResult<Decoding<'a>> {
    let variable = allocation.variable(name).ok_or_else(|| {
        StrataError::InvalidInput(format!(
            "{} has no state variable {name}",
            allocation.contract_name
        ))
    })?;
    Ok(Decoding::variable(info, state, variable))
}
