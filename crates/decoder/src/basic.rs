//! Interpretation of value-type bytes, shared by every location.

use crate::info::DecoderInfo;
use crate::value::{Data, DecodingError, InternalFunction, StringValue, Value};
use alloy_primitives::{Address, Bytes, FixedBytes, B256, I256, U256};
use strata_core::{FunctionVisibility, LayoutConfig, TypeRef, WORD_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    /// Zeros on the left.
    Left,
    /// Sign extension on the left.
    Signed,
    /// Zeros on the right.
    Right,
}

fn abi_layout(ty: &TypeRef, config: &LayoutConfig) -> Option<(usize, Padding)> {
    let layout = match ty {
        TypeRef::Bool => (1, Padding::Left),
        TypeRef::Uint { bits } | TypeRef::Ufixed { bits, .. } => {
            (usize::from(*bits) / 8, Padding::Left)
        }
        TypeRef::Int { bits } | TypeRef::Fixed { bits, .. } => {
            (usize::from(*bits) / 8, Padding::Signed)
        }
        TypeRef::Address { .. } | TypeRef::Contract { .. } => (config.address_size, Padding::Left),
        // The whole word is read so that garbage shows up as out of range.
        TypeRef::Enum { .. } => (WORD_SIZE, Padding::Left),
        TypeRef::Bytes { length: Some(n) } => (usize::from(*n), Padding::Right),
        TypeRef::Function {
            visibility: FunctionVisibility::External,
        } => (config.external_function_size(), Padding::Right),
        _ => return None,
    };
    Some((layout.0.clamp(1, WORD_SIZE), layout.1))
}

/// The meaningful bytes of an ABI word, checking padding when `strict`.
pub(crate) fn unpad_word<'w>(
    ty: &TypeRef,
    word: &'w [u8; WORD_SIZE],
    config: &LayoutConfig,
    strict: bool,
) -> Result<&'w [u8], DecodingError> {
    let (width, padding) = abi_layout(ty, config).ok_or(DecodingError::IllegalType)?;
    let (pad, value) = match padding {
        Padding::Right => {
            let (value, pad) = word.split_at(width);
            (pad, value)
        }
        Padding::Left | Padding::Signed => word.split_at(WORD_SIZE - width),
    };
    if strict {
        let fill = match padding {
            Padding::Signed if value[0] & 0x80 != 0 => 0xff,
            _ => 0x00,
        };
        if pad.iter().any(|&b| b != fill) {
            return Err(DecodingError::Padding {
                raw: B256::from(*word),
            });
        }
    }
    Ok(value)
}

/// Decodes a whole ABI word holding a value type.
pub(crate) fn decode_word(
    ty: &TypeRef,
    word: &[u8; WORD_SIZE],
    info: &DecoderInfo<'_>,
    strict: bool,
) -> Value {
    match unpad_word(ty, word, info.config, strict) {
        Ok(raw) => decode_basic(ty, raw, info, strict),
        Err(e) => Value::error(ty.clone(), e),
    }
}

/// Decodes the exact big-endian bytes of a value type.
pub(crate) fn decode_basic(ty: &TypeRef, raw: &[u8], info: &DecoderInfo<'_>, strict: bool) -> Value {
    match basic_data(ty, raw, info, strict) {
        Ok(data) => Value::new(ty.clone(), data),
        Err(e) => Value::error(ty.clone(), e),
    }
}

fn basic_data(
    ty: &TypeRef,
    raw: &[u8],
    info: &DecoderInfo<'_>,
    strict: bool,
) -> Result<Data, DecodingError> {
    let data = match ty {
        TypeRef::Bool => {
            let value = unsigned(raw);
            if strict && value > U256::from(1) {
                return Err(DecodingError::BoolOutOfRange { raw: value });
            }
            Data::Bool(!value.is_zero())
        }
        TypeRef::Uint { .. } => Data::Uint(unsigned(raw)),
        TypeRef::Int { .. } => Data::Int(signed(raw)),
        TypeRef::Ufixed { places, .. } => Data::Ufixed {
            raw: unsigned(raw),
            places: *places,
        },
        TypeRef::Fixed { places, .. } => Data::Fixed {
            raw: signed(raw),
            places: *places,
        },
        TypeRef::Address { .. } => Data::Address(Address::from(right_aligned::<20>(raw))),
        TypeRef::Contract { .. } => Data::Contract(Address::from(right_aligned::<20>(raw))),
        TypeRef::Enum { id, .. } => {
            let definition = info
                .registry
                .enum_definition(*id)
                .ok_or(DecodingError::UserDefinedTypeNotFound { id: *id })?;
            let value = unsigned(raw);
            let index = usize::try_from(value)
                .ok()
                .filter(|&i| i < definition.options.len())
                .ok_or(DecodingError::EnumOutOfRange { id: *id, raw: value })?;
            Data::Enum {
                index,
                name: definition.options[index].clone(),
            }
        }
        TypeRef::Bytes { length: Some(n) } => {
            let n = usize::from(*n).min(raw.len());
            Data::Bytes(Bytes::copy_from_slice(&raw[..n]))
        }
        TypeRef::Function {
            visibility: FunctionVisibility::External,
        } => {
            let split = info.config.address_size.min(raw.len());
            let (address, selector) = raw.split_at(split);
            Data::ExternalFunction {
                address: Address::from(right_aligned::<20>(address)),
                selector: left_aligned::<4>(selector),
            }
        }
        TypeRef::Function {
            visibility: FunctionVisibility::Internal,
        } => {
            let split = info.config.pc_size.min(raw.len());
            let (constructor, deployed) = raw.split_at(split);
            let constructor_pc = pc(constructor);
            let deployed_pc = pc(deployed);
            let known = info
                .internal_functions
                .and_then(|table| table.get(&deployed_pc));
            Data::InternalFunction(match known {
                Some(entry) => InternalFunction::Known {
                    contract: entry.contract.clone(),
                    function: entry.function.clone(),
                    deployed_pc,
                    constructor_pc,
                },
                None => InternalFunction::Opaque {
                    deployed_pc,
                    constructor_pc,
                },
            })
        }
        _ => return Err(DecodingError::IllegalType),
    };
    Ok(data)
}

pub(crate) fn unsigned(raw: &[u8]) -> U256 {
    U256::from_be_slice(&raw[raw.len().saturating_sub(WORD_SIZE)..])
}

fn signed(raw: &[u8]) -> I256 {
    let raw = &raw[raw.len().saturating_sub(WORD_SIZE)..];
    let negative = raw.first().is_some_and(|b| b & 0x80 != 0);
    let mut word = if negative {
        [0xffu8; WORD_SIZE]
    } else {
        [0u8; WORD_SIZE]
    };
    word[WORD_SIZE - raw.len()..].copy_from_slice(raw);
    I256::from_raw(U256::from_be_bytes(word))
}

fn pc(raw: &[u8]) -> u64 {
    raw[raw.len().saturating_sub(8)..]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Last `N` bytes of `raw`, left-padded with zeros when shorter.
fn right_aligned<const N: usize>(raw: &[u8]) -> FixedBytes<N> {
    let mut out = [0u8; N];
    let take = raw.len().min(N);
    out[N - take..].copy_from_slice(&raw[raw.len() - take..]);
    FixedBytes(out)
}

/// First `N` bytes of `raw`, right-padded with zeros when shorter.
fn left_aligned<const N: usize>(raw: &[u8]) -> FixedBytes<N> {
    let mut out = [0u8; N];
    let take = raw.len().min(N);
    out[..take].copy_from_slice(&raw[..take]);
    FixedBytes(out)
}

/// `string` or `bytes` payload.
pub(crate) fn dynamic_bytes_value(ty: &TypeRef, bytes: Vec<u8>) -> Value {
    let data = match ty {
        TypeRef::String => Data::String(match String::from_utf8(bytes) {
            Ok(s) => StringValue::Valid(s),
            Err(e) => StringValue::Malformed(Bytes::from(e.into_bytes())),
        }),
        _ => Data::Bytes(Bytes::from(bytes)),
    };
    Value::new(ty.clone(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_allocator::Allocations;
    use strata_core::{EnumDefinition, Registry};

    fn word(tail: &[u8]) -> [u8; WORD_SIZE] {
        let mut w = [0u8; WORD_SIZE];
        w[WORD_SIZE - tail.len()..].copy_from_slice(tail);
        w
    }

    fn with_info<R>(f: impl FnOnce(&DecoderInfo<'_>) -> R) -> R {
        let mut registry = Registry::new();
        registry.insert(EnumDefinition {
            id: 1.into(),
            name: "Color".into(),
            options: vec!["Red".into(), "Green".into()],
        });
        let allocations = Allocations::default();
        let config = LayoutConfig::default();
        f(&DecoderInfo::new(&registry, &allocations, &config))
    }

    #[test]
    fn signed_values_sign_extend() {
        with_info(|info| {
            let v = decode_basic(&TypeRef::int(8), &[0xff], info, true);
            assert_eq!(v.as_int(), Some(I256::MINUS_ONE));
            let v = decode_basic(&TypeRef::int(16), &[0x01, 0x00], info, true);
            assert_eq!(v.as_int(), Some(I256::from_raw(U256::from(256))));
        });
    }

    #[test]
    fn enum_out_of_range_is_an_error_value() {
        with_info(|info| {
            let ty = TypeRef::enum_ref(1, "Color");
            let ok = decode_basic(&ty, &[1], info, true);
            assert_eq!(ok.to_string(), "Color.Green");
            let bad = decode_basic(&ty, &[2], info, true);
            assert_eq!(
                bad.decoding_error(),
                Some(&DecodingError::EnumOutOfRange {
                    id: 1.into(),
                    raw: U256::from(2)
                })
            );
        });
    }

    #[test]
    fn strict_padding_checks() {
        with_info(|info| {
            let mut dirty = word(&[0x01]);
            dirty[0] = 1;
            let v = decode_word(&TypeRef::uint(8), &dirty, info, true);
            assert!(matches!(v.decoding_error(), Some(DecodingError::Padding { .. })));
            let v = decode_word(&TypeRef::uint(8), &dirty, info, false);
            assert_eq!(v.as_uint(), Some(U256::from(1)));

            let negative = [0xffu8; WORD_SIZE];
            let v = decode_word(&TypeRef::int(64), &negative, info, true);
            assert_eq!(v.as_int(), Some(I256::MINUS_ONE));

            let mut short = [0u8; WORD_SIZE];
            short[0] = 0xab;
            let v = decode_word(&TypeRef::fixed_bytes(1), &short, info, true);
            assert_eq!(v.as_bytes().unwrap().as_ref(), &[0xab]);
            short[5] = 1;
            assert!(decode_word(&TypeRef::fixed_bytes(1), &short, info, true).is_error());
        });
    }

    #[test]
    fn bool_range() {
        with_info(|info| {
            assert_eq!(decode_basic(&TypeRef::Bool, &[7], info, false).as_bool(), Some(true));
            assert!(matches!(
                decode_basic(&TypeRef::Bool, &[7], info, true).decoding_error(),
                Some(DecodingError::BoolOutOfRange { .. })
            ));
        });
    }

    #[test]
    fn function_pointers() {
        with_info(|info| {
            let mut raw = vec![0x11u8; 20];
            raw.extend_from_slice(&[0xa9, 0x05, 0x9c, 0xbb]);
            let v = decode_basic(
                &TypeRef::Function {
                    visibility: FunctionVisibility::External,
                },
                &raw,
                info,
                true,
            );
            match v.data() {
                Some(Data::ExternalFunction { address, selector }) => {
                    assert_eq!(*address, Address::repeat_byte(0x11));
                    assert_eq!(selector.as_slice(), &[0xa9, 0x05, 0x9c, 0xbb]);
                }
                other => panic!("unexpected {other:?}"),
            }

            let v = decode_basic(
                &TypeRef::Function {
                    visibility: FunctionVisibility::Internal,
                },
                &[0, 0, 0, 5, 0, 0, 1, 0],
                info,
                false,
            );
            assert_eq!(
                v.data(),
                Some(&Data::InternalFunction(InternalFunction::Opaque {
                    deployed_pc: 256,
                    constructor_pc: 5
                }))
            );
        });
    }
}
