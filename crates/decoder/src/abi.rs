//! Head/tail ABI decoding over calldata, return data and log data.
//!
//! A value's head sits at a known position. Static values are inline there;
//! dynamic ones store an offset, relative to the start of the enclosing
//! tuple, to a tail holding their contents.

use crate::basic::{decode_word, dynamic_bytes_value};
use crate::info::{DecoderInfo, MAX_DEPTH, MAX_ELEMENTS};
use crate::value::{Data, DecodingError, Member, Value};
use alloy_primitives::U256;
use strata_core::{DeclarationId, TypeRef, WORD_SIZE};

/// Decodes the value whose head is at `head` inside a tuple starting at `base`.
pub(crate) fn decode_abi(
    info: &DecoderInfo<'_>,
    bytes: &[u8],
    ty: &TypeRef,
    head: usize,
    base: usize,
    depth: usize,
) -> Value {
    settle(ty, try_decode_abi(info, bytes, ty, head, base, depth))
}

fn settle(ty: &TypeRef, result: Result<Value, DecodingError>) -> Value {
    result.unwrap_or_else(|e| Value::error(ty.clone(), e))
}

fn try_decode_abi(
    info: &DecoderInfo<'_>,
    bytes: &[u8],
    ty: &TypeRef,
    head: usize,
    base: usize,
    depth: usize,
) -> Result<Value, DecodingError> {
    if depth > MAX_DEPTH {
        return Err(DecodingError::NestingTooDeep);
    }
    if info.abi_size(ty)?.dynamic {
        let offset = read_offset(bytes, head)?;
        let tail = base
            .checked_add(offset)
            .filter(|&tail| tail <= bytes.len())
            .ok_or(DecodingError::PointerTooLarge {
                raw: U256::from(offset),
            })?;
        decode_tail(info, bytes, ty, tail, depth)
    } else {
        decode_inline(info, bytes, ty, head, depth)
    }
}

fn decode_tail(
    info: &DecoderInfo<'_>,
    bytes: &[u8],
    ty: &TypeRef,
    tail: usize,
    depth: usize,
) -> Result<Value, DecodingError> {
    match ty {
        TypeRef::String | TypeRef::Bytes { length: None } => {
            let length = read_length(bytes, tail)?;
            let data = slice(bytes, tail + WORD_SIZE, length)?;
            Ok(dynamic_bytes_value(ty, data.to_vec()))
        }
        TypeRef::Array { base, length: None } => {
            let count = read_length(bytes, tail)?;
            decode_elements(info, bytes, ty, base, count as u64, tail + WORD_SIZE, depth)
        }
        TypeRef::Array {
            base,
            length: Some(n),
        } => decode_elements(info, bytes, ty, base, *n, tail, depth),
        TypeRef::Struct { id, .. } => decode_members(info, bytes, ty, *id, tail, depth),
        _ => decode_inline(info, bytes, ty, tail, depth),
    }
}

fn decode_inline(
    info: &DecoderInfo<'_>,
    bytes: &[u8],
    ty: &TypeRef,
    position: usize,
    depth: usize,
) -> Result<Value, DecodingError> {
    match ty {
        TypeRef::Array {
            base,
            length: Some(n),
        } => decode_elements(info, bytes, ty, base, *n, position, depth),
        TypeRef::Struct { id, .. } => decode_members(info, bytes, ty, *id, position, depth),
        _ => {
            let word = read_word(bytes, position)?;
            Ok(decode_word(ty, word, info, info.config.strict_abi))
        }
    }
}

fn decode_elements(
    info: &DecoderInfo<'_>,
    bytes: &[u8],
    ty: &TypeRef,
    base: &TypeRef,
    count: u64,
    start: usize,
    depth: usize,
) -> Result<Value, DecodingError> {
    if count > MAX_ELEMENTS {
        return Err(DecodingError::OverlongArray {
            length: U256::from(count),
        });
    }
    let element = info.abi_size(base)?;
    let count = count as usize;
    let span = element.size.saturating_mul(count);
    if start.saturating_add(span) > bytes.len() {
        return Err(DecodingError::ReadOutOfBounds {
            start,
            length: span,
        });
    }
    let elements = (0..count)
        .map(|i| decode_abi(info, bytes, base, start + i * element.size, start, depth + 1))
        .collect();
    Ok(Value::new(ty.clone(), Data::Array(elements)))
}

fn decode_members(
    info: &DecoderInfo<'_>,
    bytes: &[u8],
    ty: &TypeRef,
    id: DeclarationId,
    start: usize,
    depth: usize,
) -> Result<Value, DecodingError> {
    let allocation = match info.allocations.abi.lookup(id) {
        None => return Err(DecodingError::UserDefinedTypeNotFound { id }),
        Some(None) => return Err(DecodingError::IllegalType),
        Some(Some(allocation)) => allocation,
    };
    let members = allocation
        .members
        .iter()
        .map(|m| Member {
            name: m.name.clone(),
            value: decode_abi(
                info,
                bytes,
                &m.type_ref,
                start.saturating_add(m.pointer.start),
                start,
                depth + 1,
            ),
        })
        .collect();
    Ok(Value::new(ty.clone(), Data::Struct(members)))
}

pub(crate) fn read_word(bytes: &[u8], start: usize) -> Result<&[u8; WORD_SIZE], DecodingError> {
    slice(bytes, start, WORD_SIZE)?
        .try_into()
        .map_err(|_| DecodingError::ReadOutOfBounds {
            start,
            length: WORD_SIZE,
        })
}

fn slice(bytes: &[u8], start: usize, length: usize) -> Result<&[u8], DecodingError> {
    start
        .checked_add(length)
        .and_then(|end| bytes.get(start..end))
        .ok_or(DecodingError::ReadOutOfBounds { start, length })
}

fn read_offset(bytes: &[u8], start: usize) -> Result<usize, DecodingError> {
    let raw = U256::from_be_bytes(*read_word(bytes, start)?);
    usize::try_from(raw)
        .ok()
        .filter(|&offset| offset <= bytes.len())
        .ok_or(DecodingError::PointerTooLarge { raw })
}

fn read_length(bytes: &[u8], start: usize) -> Result<usize, DecodingError> {
    let raw = U256::from_be_bytes(*read_word(bytes, start)?);
    u64::try_from(raw)
        .ok()
        .filter(|&n| n <= MAX_ELEMENTS)
        .map(|n| n as usize)
        .ok_or(DecodingError::OverlongArray { length: raw })
}
