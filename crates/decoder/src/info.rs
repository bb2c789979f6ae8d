//! Static context every decode reads: declarations, layouts, configuration.

use crate::value::DecodingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strata_allocator::size::{allocated_abi_size_info, allocated_storage_size};
use strata_allocator::{AbiSizeInfo, Allocations, StorageLength};
use strata_core::{LayoutConfig, Registry, StrataError, TypeRef};

/// Nested values deeper than this are reported instead of followed.
pub const MAX_DEPTH: usize = 64;

/// Longest array or byte string the decoder will materialize.
pub const MAX_ELEMENTS: u64 = 1 << 20;

/// Name of the internal function found at a program counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalFunctionEntry {
    pub contract: String,
    pub function: String,
}

/// Internal functions by deployed program counter.
pub type InternalFunctionTable = HashMap<u64, InternalFunctionEntry>;

#[derive(Debug, Clone, Copy)]
pub struct DecoderInfo<'a> {
    pub registry: &'a Registry,
    pub allocations: &'a Allocations,
    pub config: &'a LayoutConfig,
    pub internal_functions: Option<&'a InternalFunctionTable>,
}

impl<'a> DecoderInfo<'a> {
    pub fn new(registry: &'a Registry, allocations: &'a Allocations, config: &'a LayoutConfig) -> Self {
        Self {
            registry,
            allocations,
            config,
            internal_functions: None,
        }
    }

    pub fn with_internal_functions(mut self, table: &'a InternalFunctionTable) -> Self {
        self.internal_functions = Some(table);
        self
    }

    pub(crate) fn storage_size(&self, ty: &TypeRef) -> Result<StorageLength, DecodingError> {
        allocated_storage_size(ty, self.registry, &self.allocations.storage, self.config)
            .map_err(lookup_error)
    }

    /// ABI head info; types with no ABI encoding are [`DecodingError::IllegalType`].
    pub(crate) fn abi_size(&self, ty: &TypeRef) -> Result<AbiSizeInfo, DecodingError> {
        allocated_abi_size_info(ty, &self.allocations.abi)
            .map_err(lookup_error)?
            .ok_or(DecodingError::IllegalType)
    }
}

fn lookup_error(error: StrataError) -> DecodingError {
    match error {
        StrataError::UnknownUserDefinedType { id, .. } | StrataError::RecursiveType(id) => {
            DecodingError::UserDefinedTypeNotFound { id }
        }
        _ => DecodingError::IllegalType,
    }
}
