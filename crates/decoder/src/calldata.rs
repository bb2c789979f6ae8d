//! Function-call, constructor and return-data decoding.

use crate::abi::decode_abi;
use crate::info::DecoderInfo;
use crate::value::Value;
use serde::Serialize;
use strata_allocator::calldata::{ArgumentAllocation, CalldataKind};
use strata_allocator::{CalldataAllocation, ContractCalldataAllocations, FunctionAllocation};
use strata_core::{DeclarationId, Selector, StrataError, StrataResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedCall {
    pub kind: CalldataKind,
    pub name: String,
    pub definition_id: Option<DeclarationId>,
    pub selector: Option<Selector>,
    pub arguments: Vec<Argument>,
}

impl DecodedCall {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.iter().find(|a| a.name == name).map(|a| &a.value)
    }
}

fn decode_arguments(
    info: &DecoderInfo<'_>,
    arguments: &[ArgumentAllocation],
    bytes: &[u8],
    base: usize,
) -> Vec<Argument> {
    arguments
        .iter()
        .map(|a| Argument {
            name: a.name.clone(),
            value: decode_abi(info, bytes, &a.type_ref, a.pointer.start, base, 0),
        })
        .collect()
}

/// Decodes `calldata` against a known layout.
pub fn decode_call_with(
    info: &DecoderInfo<'_>,
    allocation: &CalldataAllocation,
    calldata: &[u8],
) -> DecodedCall {
    DecodedCall {
        kind: allocation.kind,
        name: allocation.name.clone(),
        definition_id: allocation.definition_id,
        selector: allocation.selector,
        arguments: decode_arguments(info, &allocation.arguments, calldata, allocation.offset),
    }
}

/// Decodes a function call, dispatching on its selector.
pub fn decode_calldata(
    info: &DecoderInfo<'_>,
    allocations: &ContractCalldataAllocations,
    calldata: &[u8],
) -> StrataResult<DecodedCall> {
    info.config.validate()?;
    let prefix = calldata
        .get(..Selector::len_bytes())
        .ok_or_else(|| {
            StrataError::InvalidInput(format!("calldata of {} bytes has no selector", calldata.len()))
        })?;
    let selector = Selector::from_slice(prefix);
    let function = allocations
        .functions
        .get(&selector)
        .ok_or_else(|| StrataError::NoMatchingDeclaration(format!("selector {selector}")))?;

    tracing::debug!(%selector, function = %function.calldata.name, "decoding call");
    Ok(decode_call_with(info, &function.calldata, calldata))
}

/// Decodes constructor arguments appended to creation bytecode.
pub fn decode_constructor_arguments(
    info: &DecoderInfo<'_>,
    allocations: &ContractCalldataAllocations,
    creation_input: &[u8],
) -> StrataResult<DecodedCall> {
    let constructor = allocations
        .constructor
        .as_ref()
        .ok_or_else(|| StrataError::NoMatchingDeclaration("constructor".into()))?;
    if creation_input.len() < constructor.offset {
        return Err(StrataError::InvalidInput(format!(
            "creation input of {} bytes is shorter than its bytecode ({} bytes)",
            creation_input.len(),
            constructor.offset
        )));
    }
    Ok(decode_call_with(info, constructor, creation_input))
}

/// Decodes the return data of a call to `function`.
pub fn decode_returndata(
    info: &DecoderInfo<'_>,
    function: &FunctionAllocation,
    returndata: &[u8],
) -> Vec<Argument> {
    decode_arguments(info, &function.returndata.arguments, returndata, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_call;
    use crate::value::{Data, StringValue};
    use alloy_primitives::U256;
    use strata_allocator::calldata::allocate_contract_calldata;
    use strata_allocator::Allocations;
    use strata_core::abi::{AbiParameter, StateMutability};
    use strata_core::{
        AbiEntry, AbiFunction, ContractDefinition, ContractKind, FunctionDefinition, FunctionKind,
        LayoutConfig, Registry, TypeRef, VariableDeclaration, Visibility,
    };

    fn setup() -> (Registry, Vec<AbiEntry>) {
        let mut registry = Registry::new();
        registry.insert(ContractDefinition {
            id: 1.into(),
            name: "Greeter".into(),
            contract_kind: ContractKind::Contract,
            linearized_base_contracts: vec![1.into()],
            state_variables: vec![],
            functions: vec![FunctionDefinition {
                id: 2.into(),
                name: "f".into(),
                kind: FunctionKind::Function,
                visibility: Visibility::External,
                parameters: vec![VariableDeclaration::new(3, "greeting", TypeRef::String)],
                return_parameters: vec![VariableDeclaration::new(4, "count", TypeRef::uint(256))],
            }],
            events: vec![],
        });
        let abi = vec![AbiEntry::Function(AbiFunction {
            name: "f".into(),
            inputs: vec![AbiParameter::new("greeting", "string")],
            outputs: vec![AbiParameter::new("count", "uint256")],
            state_mutability: StateMutability::Nonpayable,
        })];
        (registry, abi)
    }

    #[test]
    fn call_round_trips_through_encoder() {
        let (registry, abi) = setup();
        let config = LayoutConfig::default();
        let mut allocations = Allocations::for_registry(&registry, &config);
        let contract = registry.contract_definition(1.into()).unwrap();
        let calldata_allocations =
            allocate_contract_calldata(contract, &abi, &registry, &mut allocations.abi, &config, None);
        let info = DecoderInfo::new(&registry, &allocations, &config);

        let selector = strata_core::abi::selector("f(string)");
        let hi = Value::new(TypeRef::String, Data::String(StringValue::Valid("hi".into())));
        let calldata = encode_call(selector, &[hi.clone()]).unwrap();
        assert_eq!(calldata.len(), 4 + 96);

        let call = decode_calldata(&info, &calldata_allocations, &calldata).unwrap();
        assert_eq!(call.name, "f");
        assert_eq!(call.argument("greeting"), Some(&hi));

        let returned = U256::from(3).to_be_bytes::<32>();
        let outputs = decode_returndata(&info, &calldata_allocations.functions[&selector], &returned);
        assert_eq!(outputs[0].value.as_uint(), Some(U256::from(3)));
    }

    #[test]
    fn unknown_selector_and_short_calldata() {
        let (registry, abi) = setup();
        let config = LayoutConfig::default();
        let mut allocations = Allocations::for_registry(&registry, &config);
        let contract = registry.contract_definition(1.into()).unwrap();
        let calldata_allocations =
            allocate_contract_calldata(contract, &abi, &registry, &mut allocations.abi, &config, None);
        let info = DecoderInfo::new(&registry, &allocations, &config);

        assert!(matches!(
            decode_calldata(&info, &calldata_allocations, &[0xde, 0xad, 0xbe, 0xef]),
            Err(StrataError::NoMatchingDeclaration(_))
        ));
        assert!(matches!(
            decode_calldata(&info, &calldata_allocations, &[0x01]),
            Err(StrataError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_constructor_arguments(&info, &calldata_allocations, &[]),
            Err(StrataError::NoMatchingDeclaration(_))
        ));
    }

    #[test]
    fn unsupported_selector_size_is_reported() {
        let (registry, abi) = setup();
        let config = LayoutConfig::default();
        let mut allocations = Allocations::for_registry(&registry, &config);
        let contract = registry.contract_definition(1.into()).unwrap();
        let calldata_allocations =
            allocate_contract_calldata(contract, &abi, &registry, &mut allocations.abi, &config, None);
        let wide = LayoutConfig {
            selector_size: 8,
            ..LayoutConfig::default()
        };
        let info = DecoderInfo::new(&registry, &allocations, &wide);

        let result = decode_calldata(&info, &calldata_allocations, &[0u8; 68]);
        assert!(matches!(result, Err(StrataError::InvalidInput(ref msg)) if msg.contains("selector size")));
    }
}
