//! Concrete Solidity type references.

use crate::registry::DeclarationId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// EVM word size in bytes.
pub const WORD_SIZE: usize = 32;

/// Internal function pointers are jump destinations; external ones are
/// `address ++ selector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionVisibility {
    Internal,
    External,
}

/// A recursive description of a concrete Solidity type.
///
/// User-defined types (`struct`, `enum`, `contract`) carry the id of their
/// declaration in the [`Registry`](crate::Registry) and a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "typeClass", rename_all = "lowercase")]
pub enum TypeRef {
    Bool,
    Address {
        #[serde(default)]
        payable: bool,
    },
    Contract {
        id: DeclarationId,
        name: String,
        #[serde(default)]
        payable: bool,
    },
    Uint {
        bits: u16,
    },
    Int {
        bits: u16,
    },
    Fixed {
        bits: u16,
        places: u8,
    },
    Ufixed {
        bits: u16,
        places: u8,
    },
    Enum {
        id: DeclarationId,
        name: String,
    },
    /// `length: None` is dynamic `bytes`; `Some(n)` is `bytesN`.
    Bytes {
        #[serde(default)]
        length: Option<u8>,
    },
    String,
    Mapping {
        key: Box<TypeRef>,
        value: Box<TypeRef>,
    },
    Function {
        visibility: FunctionVisibility,
    },
    /// `length: None` is a dynamic array.
    Array {
        base: Box<TypeRef>,
        #[serde(default)]
        length: Option<u64>,
    },
    Struct {
        id: DeclarationId,
        name: String,
    },
}

impl TypeRef {
    pub fn uint(bits: u16) -> Self {
        TypeRef::Uint { bits }
    }

    pub fn int(bits: u16) -> Self {
        TypeRef::Int { bits }
    }

    pub fn address() -> Self {
        TypeRef::Address { payable: false }
    }

    pub fn fixed_bytes(length: u8) -> Self {
        TypeRef::Bytes {
            length: Some(length),
        }
    }

    pub fn dynamic_bytes() -> Self {
        TypeRef::Bytes { length: None }
    }

    pub fn dynamic_array(base: TypeRef) -> Self {
        TypeRef::Array {
            base: Box::new(base),
            length: None,
        }
    }

    pub fn static_array(base: TypeRef, length: u64) -> Self {
        TypeRef::Array {
            base: Box::new(base),
            length: Some(length),
        }
    }

    pub fn mapping(key: TypeRef, value: TypeRef) -> Self {
        TypeRef::Mapping {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn struct_ref(id: impl Into<DeclarationId>, name: impl Into<String>) -> Self {
        TypeRef::Struct {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn enum_ref(id: impl Into<DeclarationId>, name: impl Into<String>) -> Self {
        TypeRef::Enum {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Types whose values live behind a pointer outside of storage.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TypeRef::Bytes { length: None }
                | TypeRef::String
                | TypeRef::Array { .. }
                | TypeRef::Struct { .. }
                | TypeRef::Mapping { .. }
        )
    }

    /// Dynamic `bytes` and `string`, which share an encoding everywhere.
    pub fn is_dynamic_bytes_like(&self) -> bool {
        matches!(self, TypeRef::Bytes { length: None } | TypeRef::String)
    }

    /// Types ABI encoding can never represent.
    pub fn is_abi_illegal(&self) -> bool {
        matches!(
            self,
            TypeRef::Mapping { .. }
                | TypeRef::Function {
                    visibility: FunctionVisibility::Internal
                }
        )
    }

    /// Id of the declaration this type refers to, for user-defined types.
    pub fn declaration_id(&self) -> Option<DeclarationId> {
        match self {
            TypeRef::Struct { id, .. } | TypeRef::Enum { id, .. } | TypeRef::Contract { id, .. } => {
                Some(*id)
            }
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Bool => write!(f, "bool"),
            TypeRef::Address { payable: false } => write!(f, "address"),
            TypeRef::Address { payable: true } => write!(f, "address payable"),
            TypeRef::Contract { name, .. } => write!(f, "contract {name}"),
            TypeRef::Uint { bits } => write!(f, "uint{bits}"),
            TypeRef::Int { bits } => write!(f, "int{bits}"),
            TypeRef::Fixed { bits, places } => write!(f, "fixed{bits}x{places}"),
            TypeRef::Ufixed { bits, places } => write!(f, "ufixed{bits}x{places}"),
            TypeRef::Enum { name, .. } => write!(f, "enum {name}"),
            TypeRef::Bytes { length: Some(n) } => write!(f, "bytes{n}"),
            TypeRef::Bytes { length: None } => write!(f, "bytes"),
            TypeRef::String => write!(f, "string"),
            TypeRef::Mapping { key, value } => write!(f, "mapping({key} => {value})"),
            TypeRef::Function {
                visibility: FunctionVisibility::Internal,
            } => write!(f, "function internal"),
            TypeRef::Function {
                visibility: FunctionVisibility::External,
            } => write!(f, "function external"),
            TypeRef::Array { base, length: Some(n) } => write!(f, "{base}[{n}]"),
            TypeRef::Array { base, length: None } => write!(f, "{base}[]"),
            TypeRef::Struct { name, .. } => write!(f, "struct {name}"),
        }
    }
}
