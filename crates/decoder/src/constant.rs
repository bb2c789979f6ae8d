//! Values of `constant` state variables, read from their source literal.

use crate::info::DecoderInfo;
use crate::value::{Data, DecodingError, StringValue, Value};
use alloy_primitives::{Address, Bytes, I256, U256};
use strata_core::{DeclarationId, TypeRef, WORD_SIZE};

pub(crate) fn decode_constant(info: &DecoderInfo<'_>, ty: &TypeRef, definition: DeclarationId) -> Value {
    let Some(variable) = info.registry.variable(definition) else {
        return Value::error(
            ty.clone(),
            DecodingError::UserDefinedTypeNotFound { id: definition },
        );
    };
    let literal = variable.value.as_deref().unwrap_or_default().trim();
    match parse_literal(ty, literal) {
        Some(data) => Value::new(ty.clone(), data),
        None => {
            tracing::debug!(id = %definition, %literal, "constant is not a plain literal");
            Value::error(
                ty.clone(),
                DecodingError::UnsupportedConstant {
                    literal: literal.to_string(),
                },
            )
        }
    }
}

/// Plain literals only; anything that needs evaluating yields `None`.
fn parse_literal(ty: &TypeRef, literal: &str) -> Option<Data> {
    match ty {
        TypeRef::Bool => match literal {
            "true" => Some(Data::Bool(true)),
            "false" => Some(Data::Bool(false)),
            _ => None,
        },
        TypeRef::Uint { bits } => {
            let value = parse_number(literal)?;
            fits_unsigned(value, *bits).then_some(Data::Uint(value))
        }
        TypeRef::Int { bits } => {
            let (negative, digits) = match literal.strip_prefix('-') {
                Some(rest) => (true, rest.trim_start()),
                None => (false, literal),
            };
            let magnitude = parse_number(digits)?;
            let limit = U256::from(1) << (usize::from(*bits).max(8) - 1);
            if negative {
                (magnitude <= limit).then(|| Data::Int(I256::from_raw(magnitude.wrapping_neg())))
            } else {
                (magnitude < limit).then(|| Data::Int(I256::from_raw(magnitude)))
            }
        }
        TypeRef::Address { .. } => literal.parse::<Address>().ok().map(Data::Address),
        TypeRef::Contract { .. } => literal.parse::<Address>().ok().map(Data::Contract),
        TypeRef::Bytes { length: Some(n) } => {
            let bytes = hex_literal(literal).or_else(|| string_literal(literal))?;
            let n = usize::from(*n);
            if bytes.len() > n {
                return None;
            }
            let mut padded = bytes;
            padded.resize(n, 0);
            Some(Data::Bytes(Bytes::from(padded)))
        }
        TypeRef::Bytes { length: None } => {
            let bytes = hex_literal(literal).or_else(|| string_literal(literal))?;
            Some(Data::Bytes(Bytes::from(bytes)))
        }
        TypeRef::String => {
            let bytes = string_literal(literal).or_else(|| hex_literal(literal))?;
            Some(Data::String(match String::from_utf8(bytes) {
                Ok(s) => StringValue::Valid(s),
                Err(e) => StringValue::Malformed(Bytes::from(e.into_bytes())),
            }))
        }
        _ => None,
    }
}

fn fits_unsigned(value: U256, bits: u16) -> bool {
    usize::from(bits) >= WORD_SIZE * 8 || value < (U256::from(1) << usize::from(bits))
}

/// Decimal, hex, or scientific (`5e18`) integer literal with `_` separators.
fn parse_number(literal: &str) -> Option<U256> {
    let cleaned: String = literal.chars().filter(|&c| c != '_').collect();
    if let Some(hex) = cleaned.strip_prefix("0x") {
        return U256::from_str_radix(hex, 16).ok();
    }
    match cleaned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => {
            let mantissa = U256::from_str_radix(mantissa, 10).ok()?;
            let exponent: usize = exponent.parse().ok()?;
            let scale = U256::from(10).checked_pow(U256::from(exponent))?;
            mantissa.checked_mul(scale)
        }
        None => U256::from_str_radix(&cleaned, 10).ok(),
    }
}

/// `hex"..."` or a bare `0x...` literal.
fn hex_literal(literal: &str) -> Option<Vec<u8>> {
    let digits = literal
        .strip_prefix("hex")
        .and_then(unquote)
        .or_else(|| literal.strip_prefix("0x"))?;
    hex::decode(digits.replace('_', "")).ok()
}

fn string_literal(literal: &str) -> Option<Vec<u8>> {
    let body = unquote(literal.strip_prefix("unicode").unwrap_or(literal))?;
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            '0' => out.push(0),
            'x' => {
                let pair: String = chars.by_ref().take(2).collect();
                out.push(u8::from_str_radix(&pair, 16).ok()?);
            }
            other => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    Some(out)
}

fn unquote(literal: &str) -> Option<&str> {
    ['"', '\''].iter().find_map(|&q| {
        literal
            .strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}
