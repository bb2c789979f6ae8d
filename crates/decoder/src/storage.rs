//! Decoding from contract storage.
//!
//! A pass keeps going past missing words so that one request names every
//! slot it can already tell is needed. Values that depend on a missing word
//! come back as `None` until the next pass.

use crate::basic::{decode_basic, dynamic_bytes_value};
use crate::encode::key_preimage;
use crate::info::{DecoderInfo, MAX_DEPTH, MAX_ELEMENTS};
use crate::pointer::SlotRange;
use crate::state::{EvmState, Fetch, StorageReader};
use crate::value::{Data, DecodingError, MappingEntry, Member, Value};
use alloy_primitives::{keccak256, U256};
use strata_core::{DeclarationId, TypeRef, WORD_SIZE};

/// Slot where the data of a dynamic array or long byte string at `slot` begins.
pub fn data_slot(slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0)
}

/// Slot of the entry under `key` in the mapping at `slot`.
///
/// Value-type keys are hashed as one padded word, `string` and `bytes`
/// keys as their raw bytes. `None` if the key cannot be hashed.
pub fn mapping_slot(key: &Value, slot: U256) -> Option<U256> {
    let mut preimage = key_preimage(key)?;
    preimage.extend_from_slice(&slot.to_be_bytes::<32>());
    Some(U256::from_be_bytes(keccak256(&preimage).0))
}

pub(crate) fn decode_storage(
    info: &DecoderInfo<'_>,
    state: &EvmState,
    ty: &TypeRef,
    range: SlotRange,
    depth: usize,
) -> Fetch<Value> {
    let mut reader = StorageReader::new(state);
    let value = read_value(info, &mut reader, ty, range, depth);
    match (value, reader.into_request()) {
        (Some(value), None) => Ok(value),
        (_, Some(request)) => Err(request),
        // A value only goes missing along with a word.
        (None, None) => Ok(Value::error(ty.clone(), DecodingError::NoLocation)),
    }
}

fn read_value(
    info: &DecoderInfo<'_>,
    reader: &mut StorageReader<'_>,
    ty: &TypeRef,
    range: SlotRange,
    depth: usize,
) -> Option<Value> {
    if depth > MAX_DEPTH {
        return Some(Value::error(ty.clone(), DecodingError::NestingTooDeep));
    }
    let slot = range.from.slot;
    match ty {
        TypeRef::String | TypeRef::Bytes { length: None } => read_bytes(reader, ty, slot),
        TypeRef::Array { base, length: None } => {
            let length = U256::from_be_bytes(reader.word(slot)?.0);
            match element_count(length) {
                Some(count) => read_elements(info, reader, ty, base, data_slot(slot), count, depth),
                None => Some(Value::error(ty.clone(), DecodingError::OverlongArray { length })),
            }
        }
        TypeRef::Array {
            base,
            length: Some(n),
        } => match element_count(U256::from(*n)) {
            Some(count) => read_elements(info, reader, ty, base, slot, count, depth),
            None => Some(Value::error(
                ty.clone(),
                DecodingError::OverlongArray {
                    length: U256::from(*n),
                },
            )),
        },
        TypeRef::Struct { id, .. } => read_struct(info, reader, ty, *id, slot, depth),
        TypeRef::Mapping { value, .. } => read_mapping(info, reader, ty, value, slot, depth),
        _ => {
            let word = reader.word(slot)?;
            let from = usize::from(range.from.index).min(WORD_SIZE - 1);
            let to = usize::from(range.to.index).clamp(from, WORD_SIZE - 1);
            Some(decode_basic(ty, &word[from..=to], info, false))
        }
    }
}

fn element_count(length: U256) -> Option<u64> {
    u64::try_from(length).ok().filter(|&n| n <= MAX_ELEMENTS)
}

/// Reads every value before giving up, so all their missing words are noted.
fn read_all<I>(values: I) -> Option<Vec<Value>>
where
    I: IntoIterator<Item = Option<Value>>,
{
    let mut out = Vec::new();
    let mut complete = true;
    for value in values {
        match value {
            Some(value) if complete => out.push(value),
            Some(_) => {}
            None => complete = false,
        }
    }
    complete.then_some(out)
}

/// `string`/`bytes`: short values live inline with `2 * length` in the low
/// byte; long ones store `2 * length + 1` and their data at [`data_slot`].
fn read_bytes(reader: &mut StorageReader<'_>, ty: &TypeRef, slot: U256) -> Option<Value> {
    let word = reader.word(slot)?;
    let marker = word[WORD_SIZE - 1];
    if marker & 1 == 0 {
        let length = usize::from(marker / 2);
        if length >= WORD_SIZE {
            return Some(Value::error(
                ty.clone(),
                DecodingError::OverlongArray {
                    length: U256::from(length),
                },
            ));
        }
        return Some(dynamic_bytes_value(ty, word[..length].to_vec()));
    }

    let length = (U256::from_be_bytes(word.0) - U256::from(1)) >> 1;
    let Some(length) = element_count(length) else {
        return Some(Value::error(ty.clone(), DecodingError::OverlongArray { length }));
    };
    let start = data_slot(slot);
    let chunks: Vec<_> = (0..length.div_ceil(WORD_SIZE as u64))
        .map(|i| reader.word(start.wrapping_add(U256::from(i))))
        .collect();
    let mut bytes = Vec::with_capacity(length as usize);
    for chunk in chunks {
        bytes.extend_from_slice(chunk?.as_slice());
    }
    bytes.truncate(length as usize);
    Some(dynamic_bytes_value(ty, bytes))
}

fn read_elements(
    info: &DecoderInfo<'_>,
    reader: &mut StorageReader<'_>,
    ty: &TypeRef,
    base: &TypeRef,
    start: U256,
    count: u64,
    depth: usize,
) -> Option<Value> {
    let element = match info.storage_size(base) {
        Ok(size) => size,
        Err(e) => return Some(Value::error(ty.clone(), e)),
    };
    let elements = read_all((0..count).map(|i| {
        let range = SlotRange::element(start, i, element);
        read_value(info, reader, base, range, depth + 1)
    }))?;
    Some(Value::new(ty.clone(), Data::Array(elements)))
}

fn read_struct(
    info: &DecoderInfo<'_>,
    reader: &mut StorageReader<'_>,
    ty: &TypeRef,
    id: DeclarationId,
    slot: U256,
    depth: usize,
) -> Option<Value> {
    let Some(allocation) = info.allocations.storage.get(id) else {
        return Some(Value::error(
            ty.clone(),
            DecodingError::UserDefinedTypeNotFound { id },
        ));
    };
    let values = read_all(allocation.members.iter().map(|member| {
        let range = SlotRange::offset(slot, &member.pointer);
        read_value(info, reader, &member.type_ref, range, depth + 1)
    }))?;
    let members = allocation
        .members
        .iter()
        .zip(values)
        .map(|(member, value)| Member {
            name: member.name.clone(),
            value,
        })
        .collect();
    Some(Value::new(ty.clone(), Data::Struct(members)))
}

fn read_mapping(
    info: &DecoderInfo<'_>,
    reader: &mut StorageReader<'_>,
    ty: &TypeRef,
    value_type: &TypeRef,
    slot: U256,
    depth: usize,
) -> Option<Value> {
    let size = match info.storage_size(value_type) {
        Ok(size) => size,
        Err(e) => return Some(Value::error(ty.clone(), e)),
    };
    let state = reader.state;
    let keys = state.mapping_keys(slot);
    let values = read_all(keys.iter().map(|key| match mapping_slot(key, slot) {
        Some(entry_slot) => {
            let range = SlotRange::starting_at(entry_slot, size);
            read_value(info, reader, value_type, range, depth + 1)
        }
        None => Some(Value::error(value_type.clone(), DecodingError::IllegalType)),
    }))?;
    let entries = keys
        .iter()
        .zip(values)
        .map(|(key, value)| MappingEntry {
            key: key.clone(),
            value,
        })
        .collect();
    Some(Value::new(ty.clone(), Data::Mapping(entries)))
}
