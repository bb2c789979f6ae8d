//! Decoded value trees.
//!
//! Every node carries its type and either decoded data or the reason it
//! could not be decoded, so one malformed field never hides its siblings.

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use serde::Serialize;
use std::fmt;
use strata_core::{DeclarationId, Selector, TypeRef};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Value {
    #[serde(rename = "type")]
    pub ty: TypeRef,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ValueKind {
    Value(Data),
    Error(DecodingError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", content = "value", rename_all = "camelCase")]
pub enum Data {
    Bool(bool),
    Uint(U256),
    Int(I256),
    /// Raw scaled integer; the real value is `raw / 10^places`.
    Fixed { raw: I256, places: u8 },
    Ufixed { raw: U256, places: u8 },
    Address(Address),
    Contract(Address),
    Enum { index: usize, name: String },
    /// Static `bytesN` and dynamic `bytes`.
    Bytes(Bytes),
    String(StringValue),
    Array(Vec<Value>),
    Struct(Vec<Member>),
    /// Entries for the keys the caller asked about.
    Mapping(Vec<MappingEntry>),
    ExternalFunction { address: Address, selector: Selector },
    InternalFunction(InternalFunction),
    /// Indexed reference-type event argument: only its hash is logged.
    IndexedHash(B256),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StringValue {
    Valid(String),
    /// Bytes that are not UTF-8.
    Malformed(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InternalFunction {
    Known {
        contract: String,
        function: String,
        deployed_pc: u64,
        constructor_pc: u64,
    },
    /// No program-counter table was supplied, or the pc is not in it.
    Opaque { deployed_pc: u64, constructor_pc: u64 },
}

/// Why a value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "camelCase")]
pub enum DecodingError {
    UserDefinedTypeNotFound { id: DeclarationId },
    EnumOutOfRange { id: DeclarationId, raw: U256 },
    BoolOutOfRange { raw: U256 },
    /// ABI word whose unused bytes are not clean.
    Padding { raw: B256 },
    ReadOutOfBounds { start: usize, length: usize },
    PointerTooLarge { raw: U256 },
    OverlongArray { length: U256 },
    UnsupportedConstant { literal: String },
    /// Immutable whose location in code is unknown.
    NoLocation,
    /// The type has no representation in this location.
    IllegalType,
    NestingTooDeep,
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodingError::UserDefinedTypeNotFound { id } => write!(f, "unknown type #{id}"),
            DecodingError::EnumOutOfRange { id, raw } => {
                write!(f, "enum #{id} has no option {raw}")
            }
            DecodingError::BoolOutOfRange { raw } => write!(f, "bool out of range: {raw}"),
            DecodingError::Padding { raw } => write!(f, "dirty padding in {raw}"),
            DecodingError::ReadOutOfBounds { start, length } => {
                write!(f, "read of {length} bytes at {start} is out of bounds")
            }
            DecodingError::PointerTooLarge { raw } => write!(f, "pointer too large: {raw}"),
            DecodingError::OverlongArray { length } => write!(f, "array length {length} too large"),
            DecodingError::UnsupportedConstant { literal } => {
                write!(f, "cannot interpret constant {literal}")
            }
            DecodingError::NoLocation => write!(f, "value has no known location"),
            DecodingError::IllegalType => write!(f, "type cannot appear in this location"),
            DecodingError::NestingTooDeep => write!(f, "value nested too deeply"),
        }
    }
}

impl Value {
    pub fn new(ty: TypeRef, data: Data) -> Self {
        Self {
            ty,
            kind: ValueKind::Value(data),
        }
    }

    pub fn error(ty: TypeRef, error: DecodingError) -> Self {
        Self {
            ty,
            kind: ValueKind::Error(error),
        }
    }

    pub fn data(&self) -> Option<&Data> {
        match &self.kind {
            ValueKind::Value(data) => Some(data),
            ValueKind::Error(_) => None,
        }
    }

    pub fn decoding_error(&self) -> Option<&DecodingError> {
        match &self.kind {
            ValueKind::Error(e) => Some(e),
            ValueKind::Value(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ValueKind::Error(_))
    }

    /// Whether this node or any node below it failed to decode.
    pub fn has_errors(&self) -> bool {
        match &self.kind {
            ValueKind::Error(_) => true,
            ValueKind::Value(Data::Array(elements)) => elements.iter().any(Value::has_errors),
            ValueKind::Value(Data::Struct(members)) => members.iter().any(|m| m.value.has_errors()),
            ValueKind::Value(Data::Mapping(entries)) => {
                entries.iter().any(|e| e.key.has_errors() || e.value.has_errors())
            }
            ValueKind::Value(_) => false,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self.data()? {
            Data::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<I256> {
        match self.data()? {
            Data::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.data()? {
            Data::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self.data()? {
            Data::Address(a) | Data::Contract(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.data()? {
            Data::String(StringValue::Valid(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self.data()? {
            Data::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<&[Value]> {
        match self.data()? {
            Data::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        match self.data()? {
            Data::Struct(members) => members.iter().find(|m| m.name == name).map(|m| &m.value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match &self.kind {
            ValueKind::Error(e) => return write!(f, "<{e}>"),
            ValueKind::Value(data) => data,
        };
        match data {
            Data::Bool(b) => write!(f, "{b}"),
            Data::Uint(v) => write!(f, "{v}"),
            Data::Int(v) => write!(f, "{v}"),
            Data::Fixed { raw, places } => write!(f, "{raw}e-{places}"),
            Data::Ufixed { raw, places } => write!(f, "{raw}e-{places}"),
            Data::Address(a) | Data::Contract(a) => write!(f, "{a}"),
            Data::Enum { name, .. } => match &self.ty {
                TypeRef::Enum { name: enum_name, .. } => write!(f, "{enum_name}.{name}"),
                _ => write!(f, "{name}"),
            },
            Data::Bytes(b) => write!(f, "{b}"),
            Data::String(StringValue::Valid(s)) => write!(f, "{s:?}"),
            Data::String(StringValue::Malformed(b)) => write!(f, "<malformed {b}>"),
            Data::Array(elements) => {
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Data::Struct(members) => {
                write!(f, "{{")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", m.name, m.value)?;
                }
                write!(f, "}}")
            }
            Data::Mapping(entries) => {
                write!(f, "{{")?;
                for (i, e) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} => {}", e.key, e.value)?;
                }
                write!(f, "}}")
            }
            Data::ExternalFunction { address, selector } => write!(f, "{address}.{selector}"),
            Data::InternalFunction(InternalFunction::Known {
                contract, function, ..
            }) => write!(f, "{contract}.{function}"),
            Data::InternalFunction(InternalFunction::Opaque {
                deployed_pc,
                constructor_pc,
            }) => write!(f, "<function pc {deployed_pc}/{constructor_pc}>"),
            Data::IndexedHash(hash) => write!(f, "<hash {hash}>"),
        }
    }
}
