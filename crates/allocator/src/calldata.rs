//! Calldata and return-data allocation for functions, getters and constructors.
//!
//! ABI entries are matched back to their declarations by name and canonical
//! parameter types, searching the contract's linearization most-derived
//! first so that redeclared functions and variables shadow their bases.

use crate::abi::{allocate_members, AbiAllocations, AbiPointer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strata_core::abi::AbiParameter;
use strata_core::{
    AbiConstructor, AbiEntry, AbiFunction, ContractDefinition, DeclarationId, FunctionKind,
    LayoutConfig, Registry, Selector, StrataError, StrataResult, TypeRef, VariableDeclaration,
    Visibility,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalldataKind {
    Function,
    Constructor,
}

/// Where an argument's head slot lives, counted from the start of calldata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentAllocation {
    pub name: String,
    pub type_ref: TypeRef,
    pub pointer: AbiPointer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalldataAllocation {
    pub kind: CalldataKind,
    pub name: String,
    pub contract_id: DeclarationId,
    /// Function, or public state variable for getters. `None` for an
    /// implicit constructor.
    pub definition_id: Option<DeclarationId>,
    pub selector: Option<Selector>,
    /// Byte offset at which the argument tuple begins.
    pub offset: usize,
    pub arguments: Vec<ArgumentAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturndataAllocation {
    pub name: String,
    pub selector: Selector,
    pub arguments: Vec<ArgumentAllocation>,
}

/// Calldata and return-data layouts of one externally callable function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAllocation {
    pub calldata: CalldataAllocation,
    pub returndata: ReturndataAllocation,
}

/// All calldata layouts for one contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCalldataAllocations {
    pub constructor: Option<CalldataAllocation>,
    pub functions: HashMap<Selector, FunctionAllocation>,
}

/// A declaration resolved for an ABI function entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub definition_id: DeclarationId,
    pub inputs: Vec<(String, TypeRef)>,
    pub outputs: Vec<(String, TypeRef)>,
    pub getter: bool,
}

fn named(variables: &[VariableDeclaration]) -> Vec<(String, TypeRef)> {
    variables
        .iter()
        .map(|v| (v.name.clone(), v.type_ref.clone()))
        .collect()
}

/// Parameters and outputs of the implicit getter of a public variable.
///
/// Each mapping level contributes its key type and each array level a
/// `uint256` index. A struct result is returned member-wise, omitting
/// mappings and arrays.
pub fn getter_signature(
    variable: &VariableDeclaration,
    registry: &Registry,
) -> StrataResult<(Vec<(String, TypeRef)>, Vec<(String, TypeRef)>)> {
    let mut inputs = Vec::new();
    let mut ty = &variable.type_ref;
    loop {
        match ty {
            TypeRef::Mapping { key, value } => {
                inputs.push((String::new(), (**key).clone()));
                ty = value;
            }
            TypeRef::Array { base, .. } => {
                inputs.push((String::new(), TypeRef::uint(256)));
                ty = base;
            }
            _ => break,
        }
    }

    let outputs = match ty {
        TypeRef::Struct { id, .. } => registry
            .require_struct(*id)?
            .members
            .iter()
            .filter(|m| !matches!(m.type_ref, TypeRef::Mapping { .. } | TypeRef::Array { .. }))
            .map(|m| (m.name.clone(), m.type_ref.clone()))
            .collect(),
        other => vec![(String::new(), other.clone())],
    };
    Ok((inputs, outputs))
}

fn types_match(
    params: &[(String, TypeRef)],
    abi: &[AbiParameter],
    registry: &Registry,
) -> StrataResult<bool> {
    if params.len() != abi.len() {
        return Ok(false);
    }
    for ((_, ty), expected) in params.iter().zip(abi) {
        if registry.abi_type_string(ty)?.as_deref() != Some(expected.canonical_type().as_str()) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Finds the declaration behind an ABI function entry, most-derived first.
pub fn resolve_function(
    entry: &AbiFunction,
    contract: &ContractDefinition,
    registry: &Registry,
) -> StrataResult<ResolvedFunction> {
    for base in registry.linearization(contract)? {
        for function in &base.functions {
            if function.kind != FunctionKind::Function || function.name != entry.name {
                continue;
            }
            if !matches!(function.visibility, Visibility::Public | Visibility::External) {
                continue;
            }
            let inputs = named(&function.parameters);
            if types_match(&inputs, &entry.inputs, registry)? {
                return Ok(ResolvedFunction {
                    definition_id: function.id,
                    inputs,
                    outputs: named(&function.return_parameters),
                    getter: false,
                });
            }
        }
        for variable in &base.state_variables {
            if variable.visibility != Visibility::Public || variable.name != entry.name {
                continue;
            }
            let (inputs, outputs) = getter_signature(variable, registry)?;
            if types_match(&inputs, &entry.inputs, registry)? {
                return Ok(ResolvedFunction {
                    definition_id: variable.id,
                    inputs,
                    outputs,
                    getter: true,
                });
            }
        }
    }
    Err(StrataError::NoMatchingDeclaration(entry.signature()))
}

fn place_arguments(
    label: &str,
    params: &[(String, TypeRef)],
    offset: usize,
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> StrataResult<Vec<ArgumentAllocation>> {
    let members = params.iter().map(|(name, ty)| (name.as_str(), ty));
    let layout = allocate_members(members, offset, registry, allocations)?.ok_or_else(|| {
        StrataError::InvalidInput(format!("{label} has parameters that cannot be ABI-encoded"))
    })?;
    Ok(layout
        .members
        .into_iter()
        .map(|m| ArgumentAllocation {
            name: m.name,
            type_ref: m.type_ref,
            pointer: m.pointer,
        })
        .collect())
}

/// Calldata layout of a function call: selector, then the argument tuple.
pub fn allocate_function_calldata(
    entry: &AbiFunction,
    contract: &ContractDefinition,
    registry: &Registry,
    allocations: &mut AbiAllocations,
    config: &LayoutConfig,
) -> StrataResult<CalldataAllocation> {
    let resolved = resolve_function(entry, contract, registry)?;
    let signature = entry.signature();
    let arguments = place_arguments(
        &signature,
        &resolved.inputs,
        config.selector_size,
        registry,
        allocations,
    )?;
    Ok(CalldataAllocation {
        kind: CalldataKind::Function,
        name: entry.name.clone(),
        contract_id: contract.id,
        definition_id: Some(resolved.definition_id),
        selector: Some(entry.selector()),
        offset: config.selector_size,
        arguments,
    })
}

/// Return-data layout of a function or getter; the tuple starts at byte 0.
pub fn allocate_returndata(
    entry: &AbiFunction,
    contract: &ContractDefinition,
    registry: &Registry,
    allocations: &mut AbiAllocations,
) -> StrataResult<ReturndataAllocation> {
    let resolved = resolve_function(entry, contract, registry)?;
    let arguments = place_arguments(
        &format!("{} outputs", entry.signature()),
        &resolved.outputs,
        0,
        registry,
        allocations,
    )?;
    Ok(ReturndataAllocation {
        name: entry.name.clone(),
        selector: entry.selector(),
        arguments,
    })
}

/// Constructor arguments are appended to the creation bytecode, so the
/// tuple begins at `bytecode_length`.
pub fn allocate_constructor_calldata(
    entry: Option<&AbiConstructor>,
    contract: &ContractDefinition,
    registry: &Registry,
    allocations: &mut AbiAllocations,
    bytecode_length: usize,
) -> StrataResult<CalldataAllocation> {
    let constructor = contract
        .functions
        .iter()
        .find(|f| f.kind == FunctionKind::Constructor);

    let (definition_id, inputs) = match constructor {
        Some(f) => (Some(f.id), named(&f.parameters)),
        None => (None, Vec::new()),
    };
    if let Some(entry) = entry {
        if !types_match(&inputs, &entry.inputs, registry)? {
            return Err(StrataError::NoMatchingDeclaration(format!(
                "constructor of {}",
                contract.name
            )));
        }
    }

    let arguments = place_arguments(
        &format!("constructor of {}", contract.name),
        &inputs,
        bytecode_length,
        registry,
        allocations,
    )?;
    Ok(CalldataAllocation {
        kind: CalldataKind::Constructor,
        name: contract.name.clone(),
        contract_id: contract.id,
        definition_id,
        selector: None,
        offset: bytecode_length,
        arguments,
    })
}

/// Allocates the constructor and every function of a contract's ABI.
///
/// Entries that cannot be resolved or encoded are logged and left out.
pub fn allocate_contract_calldata(
    contract: &ContractDefinition,
    abi: &[AbiEntry],
    registry: &Registry,
    allocations: &mut AbiAllocations,
    config: &LayoutConfig,
    creation_bytecode_length: Option<usize>,
) -> ContractCalldataAllocations {
    let mut result = ContractCalldataAllocations::default();

    if let Some(length) = creation_bytecode_length {
        let entry = abi.iter().find_map(|e| match e {
            AbiEntry::Constructor(c) => Some(c),
            _ => None,
        });
        match allocate_constructor_calldata(entry, contract, registry, allocations, length) {
            Ok(allocation) => result.constructor = Some(allocation),
            Err(e) => {
                tracing::warn!(contract = %contract.name, error = %e, "skipping constructor allocation")
            }
        }
    }

    for entry in abi {
        let AbiEntry::Function(function) = entry else {
            continue;
        };
        let allocation = allocate_function_calldata(function, contract, registry, allocations, config)
            .and_then(|calldata| {
                let returndata = allocate_returndata(function, contract, registry, allocations)?;
                Ok(FunctionAllocation {
                    calldata,
                    returndata,
                })
            });
        match allocation {
            Ok(allocation) => {
                result.functions.insert(function.selector(), allocation);
            }
            Err(e) => {
                tracing::warn!(contract = %contract.name, function = %function.signature(), error = %e, "skipping function allocation")
            }
        }
    }

    tracing::debug!(contract = %contract.name, functions = result.functions.len(), "allocated calldata");
    result
}
