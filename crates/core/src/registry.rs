//! Compiler-emitted declarations and the registry that indexes them.
//!
//! Declarations are produced once per compilation and consumed read-only.
//! Everything downstream (sizes, allocations, decoding) refers to them by
//! [`DeclarationId`].

use crate::error::{StrataError, StrataResult};
use crate::types::{FunctionVisibility, TypeRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Compiler-assigned AST node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclarationId(pub u64);

impl From<u64> for DeclarationId {
    fn from(id: u64) -> Self {
        DeclarationId(id)
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    #[default]
    Contract,
    Library,
    Interface,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractKind::Contract => write!(f, "contract"),
            ContractKind::Library => write!(f, "library"),
            ContractKind::Interface => write!(f, "interface"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    #[default]
    Internal,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    #[default]
    Function,
    Constructor,
    Fallback,
    Receive,
}

/// A state variable, struct member, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDeclaration {
    pub id: DeclarationId,
    #[serde(default)]
    pub name: String,
    pub type_ref: TypeRef,
    #[serde(default)]
    pub constant: bool,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub visibility: Visibility,
    /// Event parameters only.
    #[serde(default)]
    pub indexed: bool,
    /// Literal initial value for constants, in Solidity source form
    /// (`42`, `-1`, `true`, `0xdead`, `"text"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl VariableDeclaration {
    pub fn new(id: impl Into<DeclarationId>, name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            type_ref,
            constant: false,
            immutable: false,
            visibility: Visibility::Internal,
            indexed: false,
            value: None,
        }
    }

    pub fn public(mut self) -> Self {
        self.visibility = Visibility::Public;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn constant(mut self, value: impl Into<String>) -> Self {
        self.constant = true;
        self.value = Some(value.into());
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDefinition {
    pub id: DeclarationId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<VariableDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDefinition {
    pub id: DeclarationId,
    pub name: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: DeclarationId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: FunctionKind,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub parameters: Vec<VariableDeclaration>,
    #[serde(default)]
    pub return_parameters: Vec<VariableDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: DeclarationId,
    pub name: String,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub parameters: Vec<VariableDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDefinition {
    pub id: DeclarationId,
    pub name: String,
    #[serde(default)]
    pub contract_kind: ContractKind,
    /// Most-derived first, starting with the contract itself (solc order).
    #[serde(default)]
    pub linearized_base_contracts: Vec<DeclarationId>,
    #[serde(default)]
    pub state_variables: Vec<VariableDeclaration>,
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
    #[serde(default)]
    pub events: Vec<EventDefinition>,
}

/// Any declaration the registry can index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "nodeType")]
pub enum Declaration {
    #[serde(rename = "StructDefinition")]
    Struct(StructDefinition),
    #[serde(rename = "EnumDefinition")]
    Enum(EnumDefinition),
    #[serde(rename = "ContractDefinition")]
    Contract(ContractDefinition),
}

impl Declaration {
    pub fn id(&self) -> DeclarationId {
        match self {
            Declaration::Struct(s) => s.id,
            Declaration::Enum(e) => e.id,
            Declaration::Contract(c) => c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Declaration::Struct(s) => &s.name,
            Declaration::Enum(e) => &e.name,
            Declaration::Contract(c) => &c.name,
        }
    }
}

/// Id-indexed view of every declaration in a compilation.
///
/// State variables are additionally indexed by their own id so constant and
/// immutable pointers can refer back to their declaration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    declarations: HashMap<DeclarationId, Declaration>,
    variables: HashMap<DeclarationId, (DeclarationId, usize)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a JSON array of declarations.
    pub fn from_json(json: &str) -> StrataResult<Self> {
        let declarations: Vec<Declaration> = serde_json::from_str(json)
            .map_err(|e| StrataError::InvalidInput(format!("Malformed registry JSON: {e}")))?;
        Ok(declarations.into_iter().collect())
    }

    pub fn insert(&mut self, declaration: impl Into<Declaration>) {
        let declaration = declaration.into();
        let id = declaration.id();
        if let Declaration::Contract(contract) = &declaration {
            for (index, variable) in contract.state_variables.iter().enumerate() {
                self.variables.insert(variable.id, (id, index));
            }
        }
        if self.declarations.insert(id, declaration).is_some() {
            tracing::debug!(%id, "replaced existing declaration");
        }
    }

    pub fn get(&self, id: DeclarationId) -> Option<&Declaration> {
        self.declarations.get(&id)
    }

    pub fn struct_definition(&self, id: DeclarationId) -> Option<&StructDefinition> {
        match self.declarations.get(&id) {
            Some(Declaration::Struct(s)) => Some(s),
            _ => None,
        }
    }

    pub fn enum_definition(&self, id: DeclarationId) -> Option<&EnumDefinition> {
        match self.declarations.get(&id) {
            Some(Declaration::Enum(e)) => Some(e),
            _ => None,
        }
    }

    pub fn contract_definition(&self, id: DeclarationId) -> Option<&ContractDefinition> {
        match self.declarations.get(&id) {
            Some(Declaration::Contract(c)) => Some(c),
            _ => None,
        }
    }

    /// A state variable by its own id.
    pub fn variable(&self, id: DeclarationId) -> Option<&VariableDeclaration> {
        let (contract, index) = self.variables.get(&id)?;
        self.contract_definition(*contract)?
            .state_variables
            .get(*index)
    }

    /// Struct definition or the error every allocator reports for a dangling id.
    pub fn require_struct(&self, id: DeclarationId) -> StrataResult<&StructDefinition> {
        self.struct_definition(id)
            .ok_or_else(|| StrataError::UnknownUserDefinedType {
                id,
                type_string: format!("struct #{id}"),
            })
    }

    pub fn require_enum(&self, id: DeclarationId) -> StrataResult<&EnumDefinition> {
        self.enum_definition(id)
            .ok_or_else(|| StrataError::UnknownUserDefinedType {
                id,
                type_string: format!("enum #{id}"),
            })
    }

    /// Resolves a contract's linearization, most-derived first.
    pub fn linearization(
        &self,
        contract: &ContractDefinition,
    ) -> StrataResult<Vec<&ContractDefinition>> {
        contract
            .linearized_base_contracts
            .iter()
            .map(|&base| {
                self.contract_definition(base)
                    .ok_or_else(|| StrataError::UnknownBaseContractId {
                        derived_id: contract.id,
                        derived_name: contract.name.clone(),
                        derived_kind: contract.contract_kind,
                        missing_id: base,
                    })
            })
            .collect()
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDefinition> {
        self.declarations.values().filter_map(|d| match d {
            Declaration::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ContractDefinition> {
        self.declarations.values().filter_map(|d| match d {
            Declaration::Contract(c) => Some(c),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Canonical ABI type string (`uint8` for enums, tuples for structs).
    ///
    /// Returns `Ok(None)` for types that have no ABI representation.
    pub fn abi_type_string(&self, ty: &TypeRef) -> StrataResult<Option<String>> {
        let s = match ty {
            TypeRef::Bool => "bool".to_string(),
            TypeRef::Address { .. } | TypeRef::Contract { .. } => "address".to_string(),
            TypeRef::Uint { bits } => format!("uint{bits}"),
            TypeRef::Int { bits } => format!("int{bits}"),
            TypeRef::Fixed { bits, places } => format!("fixed{bits}x{places}"),
            TypeRef::Ufixed { bits, places } => format!("ufixed{bits}x{places}"),
            TypeRef::Enum { .. } => "uint8".to_string(),
            TypeRef::Bytes { length: Some(n) } => format!("bytes{n}"),
            TypeRef::Bytes { length: None } => "bytes".to_string(),
            TypeRef::String => "string".to_string(),
            TypeRef::Function {
                visibility: FunctionVisibility::External,
            } => "function".to_string(),
            TypeRef::Function {
                visibility: FunctionVisibility::Internal,
            }
            | TypeRef::Mapping { .. } => return Ok(None),
            TypeRef::Array { base, length } => {
                let Some(base) = self.abi_type_string(base)? else {
                    return Ok(None);
                };
                match length {
                    Some(n) => format!("{base}[{n}]"),
                    None => format!("{base}[]"),
                }
            }
            TypeRef::Struct { id, .. } => {
                let definition = self.require_struct(*id)?;
                let mut members = Vec::with_capacity(definition.members.len());
                for member in &definition.members {
                    match self.abi_type_string(&member.type_ref)? {
                        Some(s) => members.push(s),
                        None => return Ok(None),
                    }
                }
                format!("({})", members.join(","))
            }
        };
        Ok(Some(s))
    }
}

impl FromIterator<Declaration> for Registry {
    fn from_iter<I: IntoIterator<Item = Declaration>>(iter: I) -> Self {
        let mut registry = Registry::new();
        for declaration in iter {
            registry.insert(declaration);
        }
        registry
    }
}

impl From<StructDefinition> for Declaration {
    fn from(s: StructDefinition) -> Self {
        Declaration::Struct(s)
    }
}

impl From<EnumDefinition> for Declaration {
    fn from(e: EnumDefinition) -> Self {
        Declaration::Enum(e)
    }
}

impl From<ContractDefinition> for Declaration {
    fn from(c: ContractDefinition) -> Self {
        Declaration::Contract(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Registry {
        let point = StructDefinition {
            id: 2.into(),
            name: "Point".into(),
            members: vec![
                VariableDeclaration::new(3, "x", TypeRef::int(128)),
                VariableDeclaration::new(4, "tags", TypeRef::dynamic_array(TypeRef::String)),
            ],
        };
        let color = EnumDefinition {
            id: 5.into(),
            name: "Color".into(),
            options: vec!["Red".into(), "Green".into()],
        };
        let token = ContractDefinition {
            id: 1.into(),
            name: "Token".into(),
            contract_kind: ContractKind::Contract,
            linearized_base_contracts: vec![1.into()],
            state_variables: vec![VariableDeclaration::new(
                10,
                "origin",
                TypeRef::struct_ref(2, "Point"),
            )],
            functions: vec![],
            events: vec![],
        };
        let declarations: [Declaration; 3] = [point.into(), color.into(), token.into()];
        declarations.into_iter().collect()
    }

    #[test]
    fn typed_lookups() {
        let registry = sample();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.struct_definition(2.into()).unwrap().name, "Point");
        assert!(registry.struct_definition(5.into()).is_none());
        assert_eq!(registry.enum_definition(5.into()).unwrap().options.len(), 2);
        assert_eq!(registry.variable(10.into()).unwrap().name, "origin");
    }

    #[test]
    fn abi_type_string_expands_structs() {
        let registry = sample();
        let ty = TypeRef::static_array(TypeRef::struct_ref(2, "Point"), 2);
        assert_eq!(
            registry.abi_type_string(&ty).unwrap().as_deref(),
            Some("(int128,string[])[2]")
        );
        assert_eq!(
            registry
                .abi_type_string(&TypeRef::enum_ref(5, "Color"))
                .unwrap()
                .as_deref(),
            Some("uint8")
        );
        assert_eq!(
            registry
                .abi_type_string(&TypeRef::mapping(TypeRef::Bool, TypeRef::Bool))
                .unwrap(),
            None
        );
    }

    #[test]
    fn missing_struct_is_unknown_type() {
        let registry = sample();
        let err = registry
            .abi_type_string(&TypeRef::struct_ref(99, "Ghost"))
            .unwrap_err();
        assert!(matches!(err, StrataError::UnknownUserDefinedType { id, .. } if id == 99.into()));
    }

    #[test]
    fn linearization_reports_missing_base() {
        let mut registry = sample();
        registry.insert(ContractDefinition {
            id: 20.into(),
            name: "Child".into(),
            contract_kind: ContractKind::Contract,
            linearized_base_contracts: vec![20.into(), 77.into()],
            state_variables: vec![],
            functions: vec![],
            events: vec![],
        });
        let child = registry.contract_definition(20.into()).unwrap();
        let err = registry.linearization(child).unwrap_err();
        assert_eq!(
            err,
            StrataError::UnknownBaseContractId {
                derived_id: 20.into(),
                derived_name: "Child".into(),
                derived_kind: ContractKind::Contract,
                missing_id: 77.into(),
            }
        );
    }

    #[test]
    fn loads_from_json() {
        let json = r#"[
            {"nodeType":"EnumDefinition","id":7,"name":"State","options":["A","B","C"]},
            {"nodeType":"StructDefinition","id":8,"name":"S","members":[
                {"id":9,"name":"s","typeRef":{"typeClass":"enum","id":7,"name":"State"}}
            ]}
        ]"#;
        let registry = Registry::from_json(json).unwrap();
        assert_eq!(registry.enum_definition(7.into()).unwrap().options.len(), 3);
        assert_eq!(registry.struct_definition(8.into()).unwrap().members.len(), 1);
        assert!(Registry::from_json("{").is_err());
    }
}
