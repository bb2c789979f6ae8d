//! Centralized error types for the Strata workspace.
//!
//! Only allocation, lookup and transport failures live here. Problems found
//! while decoding raw bytes are carried as data inside the decoded value tree
//! instead (see `strata_decoder::value::DecodingError`).

use crate::registry::{ContractKind, DeclarationId};
use thiserror::Error;

/// Top-level error enum. Variants map to subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StrataError {
    /// A struct or enum id referenced by a type is absent from the registry.
    #[error("Unknown user-defined type {type_string} (id {id})")]
    UnknownUserDefinedType {
        id: DeclarationId,
        type_string: String,
    },

    /// A contract's linearization lists a base id absent from the registry.
    #[error("Contract {derived_name} (id {derived_id}, {derived_kind}) lists unknown base contract id {missing_id}")]
    UnknownBaseContractId {
        derived_id: DeclarationId,
        derived_name: String,
        derived_kind: ContractKind,
        missing_id: DeclarationId,
    },

    /// An ABI entry has no structurally equal declaration in the linearization.
    #[error("No declaration matches ABI entry {0}")]
    NoMatchingDeclaration(String),

    /// A struct was reached again while its own size was being computed.
    #[error("Struct {0} contains itself without indirection")]
    RecursiveType(DeclarationId),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Whether retrying the operation that produced this error could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StrataError::Provider(_))
    }
}

pub type StrataResult<T> = Result<T, StrataError>;
