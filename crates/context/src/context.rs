//! Compiled contract contexts.

use crate::normalize::{clean, normalize, Normalization};
use alloy_primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};
use strata_allocator::storage::CodeRange;
use strata_core::{AbiEntry, ContractKind, DeclarationId};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Compiler {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Compiler {
    /// Vyper and its dialects append data after the runtime code.
    pub fn is_vyper_like(&self) -> bool {
        self.name.to_ascii_lowercase().contains("vyper")
    }
}

/// A compiled artifact as handed over by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInput {
    /// `0x`-prefixed hex, possibly with unlinked library placeholders.
    pub binary: String,
    #[serde(default)]
    pub is_constructor: bool,
    pub contract_name: String,
    #[serde(default)]
    pub contract_id: Option<DeclarationId>,
    #[serde(default)]
    pub contract_kind: Option<ContractKind>,
    #[serde(default)]
    pub abi: Vec<AbiEntry>,
    #[serde(default)]
    pub compiler: Option<Compiler>,
    /// Most-derived first, including the contract itself.
    #[serde(default)]
    pub linearized_base_contracts: Vec<DeclarationId>,
    #[serde(default)]
    pub immutable_references: Vec<CodeRange>,
    /// Libraries whose placeholders may appear in `binary`.
    #[serde(default)]
    pub link_libraries: Vec<String>,
}

/// A normalized artifact that deployed code can be matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Hash of the artifact's bytecode before normalization, so contracts
    /// that differ only in metadata stay distinct.
    pub context_hash: B256,
    /// Normalized bytecode; see [`crate::normalize`].
    pub pattern: String,
    pub is_constructor: bool,
    pub contract_name: String,
    pub contract_id: Option<DeclarationId>,
    pub contract_kind: Option<ContractKind>,
    pub abi: Vec<AbiEntry>,
    pub compiler: Option<Compiler>,
    pub linearized_base_contracts: Vec<DeclarationId>,
}

impl Context {
    pub fn new(input: ContextInput) -> Self {
        let pattern = normalize(
            &input.binary,
            &Normalization {
                libraries: &input.link_libraries,
                is_library: input.contract_kind == Some(ContractKind::Library),
                is_constructor: input.is_constructor,
                immutables: &input.immutable_references,
            },
        );
        let context_hash = keccak256(clean(&input.binary).as_bytes());
        tracing::trace!(contract = %input.contract_name, hash = %context_hash, "normalized context");
        Self {
            context_hash,
            pattern,
            is_constructor: input.is_constructor,
            contract_name: input.contract_name,
            contract_id: input.contract_id,
            contract_kind: input.contract_kind,
            abi: input.abi,
            compiler: input.compiler,
            linearized_base_contracts: input.linearized_base_contracts,
        }
    }

    /// Code may run past the pattern by whole words.
    pub fn allows_trailing_words(&self) -> bool {
        self.is_constructor || self.compiler.as_ref().is_some_and(Compiler::is_vyper_like)
    }

    /// Whether `self` is a proper base of `other`.
    pub fn is_ancestor_of(&self, other: &Context) -> bool {
        match (self.contract_id, other.contract_id) {
            (Some(id), Some(other_id)) if id != other_id => {
                other.linearized_base_contracts.contains(&id)
            }
            _ => false,
        }
    }
}

impl From<ContextInput> for Context {
    fn from(input: ContextInput) -> Self {
        Context::new(input)
    }
}
