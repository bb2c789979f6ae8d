//! Decoding from EVM memory.
//!
//! Every value occupies one word. Reference-type words hold an absolute
//! pointer to the object; reads past the end of memory see zeros.

use crate::basic::{decode_word, dynamic_bytes_value};
use crate::info::{DecoderInfo, MAX_DEPTH, MAX_ELEMENTS};
use crate::value::{Data, DecodingError, Member, Value};
use alloy_primitives::U256;
use strata_core::{DeclarationId, TypeRef, WORD_SIZE};

pub(crate) fn decode_memory(
    info: &DecoderInfo<'_>,
    memory: &[u8],
    ty: &TypeRef,
    start: usize,
    depth: usize,
) -> Value {
    if depth > MAX_DEPTH {
        return Value::error(ty.clone(), DecodingError::NestingTooDeep);
    }
    match ty {
        TypeRef::Mapping { .. } => Value::error(ty.clone(), DecodingError::IllegalType),
        TypeRef::String | TypeRef::Bytes { length: None } | TypeRef::Array { .. } | TypeRef::Struct { .. } => {
            match pointer(memory, start) {
                Ok(object) => decode_object(info, memory, ty, object, depth),
                Err(e) => Value::error(ty.clone(), e),
            }
        }
        _ => decode_word(ty, &word_at(memory, start), info, false),
    }
}

fn decode_object(
    info: &DecoderInfo<'_>,
    memory: &[u8],
    ty: &TypeRef,
    object: usize,
    depth: usize,
) -> Value {
    match ty {
        TypeRef::String | TypeRef::Bytes { length: None } => match length(memory, object) {
            Ok(n) => dynamic_bytes_value(ty, read_padded(memory, object.saturating_add(WORD_SIZE), n)),
            Err(e) => Value::error(ty.clone(), e),
        },
        TypeRef::Array { base, length: None } => {
            let start = object.saturating_add(WORD_SIZE);
            match length(memory, object) {
                // Each element is one word, so the data must fit in what is left of memory.
                Ok(n) if n > memory.len().saturating_sub(start) / WORD_SIZE => Value::error(
                    ty.clone(),
                    DecodingError::OverlongArray { length: U256::from(n) },
                ),
                Ok(n) => elements(info, memory, ty, base, start, n, depth),
                Err(e) => Value::error(ty.clone(), e),
            }
        }
        TypeRef::Array {
            base,
            length: Some(n),
        } => {
            if *n > MAX_ELEMENTS {
                return Value::error(
                    ty.clone(),
                    DecodingError::OverlongArray {
                        length: U256::from(*n),
                    },
                );
            }
            elements(info, memory, ty, base, object, *n as usize, depth)
        }
        TypeRef::Struct { id, .. } => members(info, memory, ty, *id, object, depth),
        _ => Value::error(ty.clone(), DecodingError::IllegalType),
    }
}

fn elements(
    info: &DecoderInfo<'_>,
    memory: &[u8],
    ty: &TypeRef,
    base: &TypeRef,
    start: usize,
    count: usize,
    depth: usize,
) -> Value {
    let elements = (0..count)
        .map(|i| {
            let position = start.saturating_add(i * WORD_SIZE);
            decode_memory(info, memory, base, position, depth + 1)
        })
        .collect();
    Value::new(ty.clone(), Data::Array(elements))
}

fn members(
    info: &DecoderInfo<'_>,
    memory: &[u8],
    ty: &TypeRef,
    id: DeclarationId,
    start: usize,
    depth: usize,
) -> Value {
    let Some(allocation) = info.allocations.memory.get(id) else {
        return Value::error(ty.clone(), DecodingError::UserDefinedTypeNotFound { id });
    };
    let members = allocation
        .members
        .iter()
        .map(|m| Member {
            name: m.name.clone(),
            value: decode_memory(
                info,
                memory,
                &m.type_ref,
                start.saturating_add(m.pointer.start),
                depth + 1,
            ),
        })
        .collect();
    Value::new(ty.clone(), Data::Struct(members))
}

fn word_at(memory: &[u8], start: usize) -> [u8; WORD_SIZE] {
    let mut word = [0u8; WORD_SIZE];
    if let Some(available) = memory.get(start..) {
        let n = available.len().min(WORD_SIZE);
        word[..n].copy_from_slice(&available[..n]);
    }
    word
}

fn read_padded(memory: &[u8], start: usize, length: usize) -> Vec<u8> {
    let mut out = vec![0u8; length];
    if let Some(available) = memory.get(start..) {
        let n = available.len().min(length);
        out[..n].copy_from_slice(&available[..n]);
    }
    out
}

fn pointer(memory: &[u8], start: usize) -> Result<usize, DecodingError> {
    let raw = U256::from_be_bytes(word_at(memory, start));
    u32::try_from(raw)
        .map(|p| p as usize)
        .map_err(|_| DecodingError::PointerTooLarge { raw })
}

fn length(memory: &[u8], start: usize) -> Result<usize, DecodingError> {
    let raw = U256::from_be_bytes(word_at(memory, start));
    u64::try_from(raw)
        .ok()
        .filter(|&n| n <= MAX_ELEMENTS)
        .map(|n| n as usize)
        .ok_or(DecodingError::OverlongArray { length: raw })
}
