//! Storage and ABI sizes of Solidity types.
//!
//! Struct sizes depend on their member allocations, so both entry points
//! take the memoizing allocation cache and fill it on demand.

use crate::abi::{allocate_abi_struct, AbiAllocations};
use crate::storage::{allocate_struct, StorageAllocations};
use serde::{Deserialize, Serialize};
use strata_core::{
    DeclarationId, FunctionVisibility, LayoutConfig, Registry, StrataError, StrataResult, TypeRef,
    WORD_SIZE,
};

/// Storage footprint: a packed sub-word byte count or whole words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLength {
    Bytes(usize),
    Words(u64),
}

impl StorageLength {
    pub fn is_words(&self) -> bool {
        matches!(self, StorageLength::Words(_))
    }

    /// Words occupied when placed on its own, rounding packed sizes up.
    pub fn words(&self) -> u64 {
        match *self {
            StorageLength::Bytes(_) => 1,
            StorageLength::Words(w) => w,
        }
    }
}

/// Head size and dynamicity of a type in ABI encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiSizeInfo {
    pub size: usize,
    pub dynamic: bool,
}

impl AbiSizeInfo {
    const WORD: AbiSizeInfo = AbiSizeInfo {
        size: WORD_SIZE,
        dynamic: false,
    };
    const DYNAMIC: AbiSizeInfo = AbiSizeInfo {
        size: WORD_SIZE,
        dynamic: true,
    };
}

/// Smallest byte count that can represent every option of an enum.
///
/// A single-option enum still takes one byte, as solc lays it out.
pub fn enum_storage_bytes(options: usize) -> usize {
    if options <= 1 {
        return 1;
    }
    let bits = usize::BITS - (options - 1).leading_zeros();
    (bits as usize).div_ceil(8)
}

/// Storage size of `ty`, allocating any struct it depends on.
pub fn storage_size(
    ty: &TypeRef,
    registry: &Registry,
    allocations: &mut StorageAllocations,
    config: &LayoutConfig,
) -> StrataResult<StorageLength> {
    storage_size_with(ty, registry, config, &mut |id| match allocations.get(id) {
        Some(allocation) => Ok(allocation.size),
        None => {
            let definition = registry.require_struct(id)?;
            Ok(allocate_struct(definition, registry, allocations, config)?.size)
        }
    })
}

/// Storage size of `ty` using only structs already in `allocations`.
pub fn allocated_storage_size(
    ty: &TypeRef,
    registry: &Registry,
    allocations: &StorageAllocations,
    config: &LayoutConfig,
) -> StrataResult<StorageLength> {
    storage_size_with(ty, registry, config, &mut |id| {
        allocations
            .get(id)
            .map(|allocation| allocation.size)
            .ok_or_else(|| unallocated(id))
    })
}

fn unallocated(id: DeclarationId) -> StrataError {
    StrataError::UnknownUserDefinedType {
        id,
        type_string: format!("struct #{id}"),
    }
}

fn storage_size_with<F>(
    ty: &TypeRef,
    registry: &Registry,
    config: &LayoutConfig,
    struct_size: &mut F,
) -> StrataResult<StorageLength>
where
    F: FnMut(DeclarationId) -> StrataResult<StorageLength>,
{
    let length = match ty {
        TypeRef::Bool => StorageLength::Bytes(1),
        TypeRef::Address { .. } | TypeRef::Contract { .. } => {
            StorageLength::Bytes(config.address_size)
        }
        TypeRef::Uint { bits }
        | TypeRef::Int { bits }
        | TypeRef::Fixed { bits, .. }
        | TypeRef::Ufixed { bits, .. } => StorageLength::Bytes(usize::from(*bits) / 8),
        TypeRef::Enum { id, .. } => {
            let definition = registry.require_enum(*id)?;
            StorageLength::Bytes(enum_storage_bytes(definition.options.len()))
        }
        TypeRef::Bytes { length: Some(n) } => StorageLength::Bytes(usize::from(*n)),
        TypeRef::Bytes { length: None } | TypeRef::String | TypeRef::Mapping { .. } => {
            StorageLength::Words(1)
        }
        TypeRef::Function {
            visibility: FunctionVisibility::Internal,
        } => StorageLength::Bytes(config.internal_function_size()),
        TypeRef::Function {
            visibility: FunctionVisibility::External,
        } => StorageLength::Bytes(config.external_function_size()),
        TypeRef::Array { length: None, .. } | TypeRef::Array { length: Some(0), .. } => {
            StorageLength::Words(1)
        }
        TypeRef::Array {
            base,
            length: Some(n),
        } => match storage_size_with(base, registry, config, struct_size)? {
            StorageLength::Bytes(base_bytes) => {
                let per_word = (WORD_SIZE / base_bytes.max(1)) as u64;
                StorageLength::Words(n.div_ceil(per_word))
            }
            StorageLength::Words(base_words) => {
                StorageLength::Words(n.saturating_mul(base_words))
            }
        },
        TypeRef::Struct { id, .. } => struct_size(*id)?,
    };
    Ok(length)
}

/// ABI head size and dynamicity of `ty`.
///
/// Returns `Ok(None)` when the type cannot be ABI-encoded at all (mappings,
/// internal function pointers, and anything containing them).
pub fn abi_size_info(
    ty: &TypeRef,
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> StrataResult<Option<AbiSizeInfo>> {
    abi_size_info_with(ty, &mut |id| {
        let allocation = match allocations.lookup(id) {
            Some(cached) => cached.cloned(),
            None => {
                let definition = registry.require_struct(id)?;
                allocate_abi_struct(definition, registry, allocations)?
            }
        };
        Ok(allocation.map(|a| AbiSizeInfo {
            size: a.length,
            dynamic: a.dynamic,
        }))
    })
}

/// ABI size info of `ty` using only structs already in `allocations`.
pub fn allocated_abi_size_info(
    ty: &TypeRef,
    allocations: &AbiAllocations,
) -> StrataResult<Option<AbiSizeInfo>> {
    abi_size_info_with(ty, &mut |id| match allocations.lookup(id) {
        Some(allocation) => Ok(allocation.map(|a| AbiSizeInfo {
            size: a.length,
            dynamic: a.dynamic,
        })),
        None => Err(unallocated(id)),
    })
}

fn abi_size_info_with<F>(ty: &TypeRef, struct_info: &mut F) -> StrataResult<Option<AbiSizeInfo>>
where
    F: FnMut(DeclarationId) -> StrataResult<Option<AbiSizeInfo>>,
{
    let info = match ty {
        TypeRef::Mapping { .. }
        | TypeRef::Function {
            visibility: FunctionVisibility::Internal,
        } => return Ok(None),
        TypeRef::Bytes { length: None } | TypeRef::String => AbiSizeInfo::DYNAMIC,
        TypeRef::Array { base, length: None } => {
            if abi_size_info_with(base, struct_info)?.is_none() {
                return Ok(None);
            }
            AbiSizeInfo::DYNAMIC
        }
        TypeRef::Array {
            length: Some(0), ..
        } => AbiSizeInfo {
            size: 0,
            dynamic: false,
        },
        TypeRef::Array {
            base,
            length: Some(n),
        } => {
            let Some(base) = abi_size_info_with(base, struct_info)? else {
                return Ok(None);
            };
            if base.dynamic {
                AbiSizeInfo::DYNAMIC
            } else {
                AbiSizeInfo {
                    size: base.size.saturating_mul(*n as usize),
                    dynamic: false,
                }
            }
        }
        TypeRef::Struct { id, .. } => match struct_info(*id)? {
            Some(info) => info,
            None => return Ok(None),
        },
        _ => AbiSizeInfo::WORD,
    };
    Ok(Some(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{EnumDefinition, StructDefinition, VariableDeclaration};

    fn registry_with_enum(options: usize) -> Registry {
        let mut registry = Registry::new();
        registry.insert(EnumDefinition {
            id: 1.into(),
            name: "E".into(),
            options: (0..options).map(|i| format!("O{i}")).collect(),
        });
        registry
    }

    fn enum_size(options: usize) -> StorageLength {
        let registry = registry_with_enum(options);
        storage_size(
            &TypeRef::enum_ref(1, "E"),
            &registry,
            &mut StorageAllocations::default(),
            &LayoutConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn enum_sizes_by_option_count() {
        assert_eq!(enum_size(1), StorageLength::Bytes(1));
        assert_eq!(enum_size(2), StorageLength::Bytes(1));
        assert_eq!(enum_size(256), StorageLength::Bytes(1));
        assert_eq!(enum_size(257), StorageLength::Bytes(2));
        assert_eq!(enum_size(65_536), StorageLength::Bytes(2));
        assert_eq!(enum_size(65_537), StorageLength::Bytes(3));
    }

    #[test]
    fn unknown_enum_fails() {
        let err = storage_size(
            &TypeRef::enum_ref(9, "Missing"),
            &Registry::new(),
            &mut StorageAllocations::default(),
            &LayoutConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            strata_core::StrataError::UnknownUserDefinedType { .. }
        ));
    }

    #[test]
    fn elementary_storage_sizes() {
        let registry = Registry::new();
        let config = LayoutConfig::default();
        let mut cache = StorageAllocations::default();
        let mut size = |ty: TypeRef| storage_size(&ty, &registry, &mut cache, &config).unwrap();

        assert_eq!(size(TypeRef::Bool), StorageLength::Bytes(1));
        assert_eq!(size(TypeRef::address()), StorageLength::Bytes(20));
        assert_eq!(size(TypeRef::int(24)), StorageLength::Bytes(3));
        assert_eq!(size(TypeRef::fixed_bytes(32)), StorageLength::Bytes(32));
        assert_eq!(size(TypeRef::String), StorageLength::Words(1));
        assert_eq!(
            size(TypeRef::Function {
                visibility: FunctionVisibility::Internal
            }),
            StorageLength::Bytes(8)
        );
        assert_eq!(
            size(TypeRef::Function {
                visibility: FunctionVisibility::External
            }),
            StorageLength::Bytes(24)
        );
    }

    #[test]
    fn static_array_storage_sizes() {
        let registry = Registry::new();
        let config = LayoutConfig::default();
        let mut cache = StorageAllocations::default();
        let mut size = |ty: TypeRef| storage_size(&ty, &registry, &mut cache, &config).unwrap();

        assert_eq!(size(TypeRef::static_array(TypeRef::uint(8), 0)), StorageLength::Words(1));
        assert_eq!(size(TypeRef::static_array(TypeRef::uint(8), 32)), StorageLength::Words(1));
        assert_eq!(size(TypeRef::static_array(TypeRef::uint(8), 33)), StorageLength::Words(2));
        // 20-byte elements: one per word.
        assert_eq!(size(TypeRef::static_array(TypeRef::address(), 3)), StorageLength::Words(3));
        assert_eq!(size(TypeRef::static_array(TypeRef::uint(128), 3)), StorageLength::Words(2));
        assert_eq!(
            size(TypeRef::static_array(TypeRef::static_array(TypeRef::uint(256), 2), 3)),
            StorageLength::Words(6)
        );
        assert_eq!(size(TypeRef::dynamic_array(TypeRef::uint(8))), StorageLength::Words(1));
    }

    #[test]
    fn abi_array_dynamicity() {
        let registry = Registry::new();
        let mut cache = AbiAllocations::default();
        let mut info = |ty: TypeRef| abi_size_info(&ty, &registry, &mut cache).unwrap();

        let strings = info(TypeRef::static_array(TypeRef::String, 2)).unwrap();
        assert!(strings.dynamic);
        assert_eq!(strings.size, 32);

        let empty = info(TypeRef::static_array(TypeRef::String, 0)).unwrap();
        assert!(!empty.dynamic);
        assert_eq!(empty.size, 0);

        let words = info(TypeRef::static_array(TypeRef::uint(8), 3)).unwrap();
        assert_eq!(words, AbiSizeInfo { size: 96, dynamic: false });

        assert!(info(TypeRef::dynamic_array(TypeRef::Bool)).unwrap().dynamic);
        assert!(info(TypeRef::mapping(TypeRef::Bool, TypeRef::Bool)).is_none());
        assert!(info(TypeRef::dynamic_array(TypeRef::mapping(TypeRef::Bool, TypeRef::Bool)))
            .is_none());
    }

    #[test]
    fn struct_size_is_allocated_on_demand() {
        let mut registry = Registry::new();
        registry.insert(StructDefinition {
            id: 5.into(),
            name: "Pair".into(),
            members: vec![
                VariableDeclaration::new(6, "a", TypeRef::uint(256)),
                VariableDeclaration::new(7, "b", TypeRef::uint(256)),
            ],
        });
        let mut cache = StorageAllocations::default();
        let size = storage_size(
            &TypeRef::static_array(TypeRef::struct_ref(5, "Pair"), 2),
            &registry,
            &mut cache,
            &LayoutConfig::default(),
        )
        .unwrap();
        assert_eq!(size, StorageLength::Words(4));
        assert!(cache.get(5.into()).is_some());
    }
}
