//! Type registry, ABI entries, layout configuration, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod abi;
pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use abi::{AbiConstructor, AbiEntry, AbiEvent, AbiFunction, AbiParameter, Selector};
pub use config::LayoutConfig;
pub use error::{StrataError, StrataResult};
pub use registry::{
    ContractDefinition, ContractKind, Declaration, DeclarationId, EnumDefinition,
    EventDefinition, FunctionDefinition, FunctionKind, Registry, StructDefinition,
    VariableDeclaration, Visibility,
};
pub use types::{FunctionVisibility, TypeRef, WORD_SIZE};
