//! Solidity JSON ABI entries, as emitted by the compiler.

use alloy_primitives::{keccak256, FixedBytes, B256};
use serde::{Deserialize, Serialize};

/// 4-byte function selector.
pub type Selector = FixedBytes<4>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbiParameter {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<AbiParameter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_type: Option<String>,
}

impl AbiParameter {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            components: None,
            indexed: None,
            internal_type: None,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = Some(true);
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed.unwrap_or(false)
    }

    /// Canonical type with `tuple` expanded into its component list.
    pub fn canonical_type(&self) -> String {
        match (self.ty.strip_prefix("tuple"), &self.components) {
            (Some(suffix), Some(components)) => {
                format!("({}){suffix}", canonical_list(components))
            }
            _ => self.ty.clone(),
        }
    }
}

fn canonical_list(params: &[AbiParameter]) -> String {
    params
        .iter()
        .map(AbiParameter::canonical_type)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMutability {
    Pure,
    View,
    #[default]
    Nonpayable,
    Payable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbiFunction {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParameter>,
    #[serde(default)]
    pub outputs: Vec<AbiParameter>,
    #[serde(default)]
    pub state_mutability: StateMutability,
}

impl AbiFunction {
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, canonical_list(&self.inputs))
    }

    pub fn selector(&self) -> Selector {
        selector(&self.signature())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbiConstructor {
    #[serde(default)]
    pub inputs: Vec<AbiParameter>,
    #[serde(default)]
    pub state_mutability: StateMutability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEvent {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParameter>,
    #[serde(default)]
    pub anonymous: bool,
}

impl AbiEvent {
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, canonical_list(&self.inputs))
    }

    /// `keccak256(signature)`, which non-anonymous events emit as topic 0.
    pub fn topic(&self) -> B256 {
        keccak256(self.signature().as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiError {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParameter>,
}

/// One entry of a contract's JSON ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AbiEntry {
    Function(AbiFunction),
    Constructor(AbiConstructor),
    Event(AbiEvent),
    Error(AbiError),
    Fallback {
        #[serde(default, rename = "stateMutability")]
        state_mutability: StateMutability,
    },
    Receive {
        #[serde(default, rename = "stateMutability")]
        state_mutability: StateMutability,
    },
}

/// Parses a JSON ABI array.
pub fn parse_abi(json: &str) -> crate::StrataResult<Vec<AbiEntry>> {
    serde_json::from_str(json)
        .map_err(|e| crate::StrataError::InvalidInput(format!("Malformed ABI JSON: {e}")))
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> Selector {
    let hash = keccak256(signature.as_bytes());
    Selector::from_slice(&hash[..4])
}
