//! ABI encoding of decoded value trees.

use crate::value::{Data, StringValue, Value, ValueKind};
use alloy_primitives::U256;
use strata_core::{Selector, StrataError, StrataResult, TypeRef, WORD_SIZE};

/// Encodes `values` as one ABI tuple.
pub fn encode_values(values: &[Value]) -> StrataResult<Vec<u8>> {
    encode_tuple(values.iter())
}

/// `selector ++ encode_values(arguments)`.
pub fn encode_call(selector: Selector, arguments: &[Value]) -> StrataResult<Vec<u8>> {
    let mut out = selector.to_vec();
    out.extend(encode_values(arguments)?);
    Ok(out)
}

/// Bytes hashed with a mapping slot to locate the entry under `key`.
pub(crate) fn key_preimage(key: &Value) -> Option<Vec<u8>> {
    match (&key.ty, key.data()?) {
        (_, Data::String(StringValue::Valid(s))) => Some(s.as_bytes().to_vec()),
        (_, Data::String(StringValue::Malformed(b))) => Some(b.to_vec()),
        (TypeRef::Bytes { length: None }, Data::Bytes(b)) => Some(b.to_vec()),
        _ => encode_word(key).map(|w| w.to_vec()),
    }
}

fn unencodable(value: &Value) -> StrataError {
    match &value.kind {
        ValueKind::Error(e) => StrataError::InvalidInput(format!("cannot encode {}: {e}", value.ty)),
        ValueKind::Value(_) => StrataError::InvalidInput(format!("{} has no ABI encoding", value.ty)),
    }
}

fn is_dynamic(value: &Value) -> bool {
    match (&value.ty, value.data()) {
        (TypeRef::String | TypeRef::Bytes { length: None }, _) => true,
        (TypeRef::Array { length: None, .. }, _) => true,
        (TypeRef::Array { length: Some(0), .. }, _) => false,
        (_, Some(Data::Array(elements))) => elements.iter().any(is_dynamic),
        (_, Some(Data::Struct(members))) => members.iter().any(|m| is_dynamic(&m.value)),
        _ => false,
    }
}

fn encode_tuple<'v>(values: impl Iterator<Item = &'v Value>) -> StrataResult<Vec<u8>> {
    let parts = values
        .map(|v| Ok((is_dynamic(v), encode(v)?)))
        .collect::<StrataResult<Vec<_>>>()?;

    let head_length: usize = parts
        .iter()
        .map(|(dynamic, bytes)| if *dynamic { WORD_SIZE } else { bytes.len() })
        .sum();
    let mut head = Vec::with_capacity(head_length);
    let mut tail = Vec::new();
    for (dynamic, bytes) in parts {
        if dynamic {
            head.extend_from_slice(&U256::from(head_length + tail.len()).to_be_bytes::<32>());
            tail.extend(bytes);
        } else {
            head.extend(bytes);
        }
    }
    head.extend(tail);
    Ok(head)
}

/// Full encoding of one value: inline bytes for static values, tail
/// contents for dynamic ones.
fn encode(value: &Value) -> StrataResult<Vec<u8>> {
    let data = value.data().ok_or_else(|| unencodable(value))?;
    match (&value.ty, data) {
        (TypeRef::Bytes { length: None }, Data::Bytes(bytes)) => Ok(length_prefixed(bytes)),
        (_, Data::String(StringValue::Valid(s))) => Ok(length_prefixed(s.as_bytes())),
        (_, Data::String(StringValue::Malformed(bytes))) => Ok(length_prefixed(bytes)),
        (TypeRef::Array { length: None, .. }, Data::Array(elements)) => {
            let mut out = U256::from(elements.len()).to_be_bytes::<32>().to_vec();
            out.extend(encode_tuple(elements.iter())?);
            Ok(out)
        }
        (_, Data::Array(elements)) => encode_tuple(elements.iter()),
        (_, Data::Struct(members)) => encode_tuple(members.iter().map(|m| &m.value)),
        _ => encode_word(value)
            .map(|w| w.to_vec())
            .ok_or_else(|| unencodable(value)),
    }
}

fn length_prefixed(bytes: &[u8]) -> Vec<u8> {
    let padded = bytes.len().div_ceil(WORD_SIZE) * WORD_SIZE;
    let mut out = Vec::with_capacity(WORD_SIZE + padded);
    out.extend_from_slice(&U256::from(bytes.len()).to_be_bytes::<32>());
    out.extend_from_slice(bytes);
    out.resize(WORD_SIZE + padded, 0);
    out
}

fn encode_word(value: &Value) -> Option<[u8; WORD_SIZE]> {
    let word = match value.data()? {
        Data::Bool(b) => U256::from(u8::from(*b)).to_be_bytes::<32>(),
        Data::Uint(v) | Data::Ufixed { raw: v, .. } => v.to_be_bytes::<32>(),
        Data::Int(v) | Data::Fixed { raw: v, .. } => v.into_raw().to_be_bytes::<32>(),
        Data::Enum { index, .. } => U256::from(*index).to_be_bytes::<32>(),
        Data::Address(a) | Data::Contract(a) => {
            let mut w = [0u8; WORD_SIZE];
            w[WORD_SIZE - 20..].copy_from_slice(a.as_slice());
            w
        }
        Data::Bytes(bytes) if bytes.len() <= WORD_SIZE => {
            let mut w = [0u8; WORD_SIZE];
            w[..bytes.len()].copy_from_slice(bytes);
            w
        }
        Data::ExternalFunction { address, selector } => {
            let mut w = [0u8; WORD_SIZE];
            w[..20].copy_from_slice(address.as_slice());
            w[20..24].copy_from_slice(selector.as_slice());
            w
        }
        _ => return None,
    };
    Some(word)
}
