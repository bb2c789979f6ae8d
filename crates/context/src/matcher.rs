//! Finding the compiled context behind a piece of deployed code.

use crate::context::{Context, ContextInput};
use crate::normalize::{clean, matches_prefix};
use alloy_primitives::B256;
use rayon::prelude::*;
use std::collections::HashMap;
use strata_core::WORD_SIZE;

/// Hex digits in one EVM word.
const WORD_HEX: usize = 2 * WORD_SIZE;

fn matches(context: &Context, code: &str) -> bool {
    if !matches_prefix(&context.pattern, code) {
        return false;
    }
    let extra = code.len() - context.pattern.len();
    extra == 0 || (context.allows_trailing_words() && extra % WORD_HEX == 0)
}

/// Finds the context `bytecode` was compiled from.
///
/// When a contract and one of its bases both match, the derived one wins.
/// Among unrelated matches the choice is unspecified.
pub fn find_context<'c>(
    contexts: impl IntoIterator<Item = &'c Context>,
    bytecode: &str,
) -> Option<&'c Context> {
    let code = clean(bytecode);
    let candidates: Vec<&Context> = contexts.into_iter().filter(|c| matches(c, &code)).collect();
    if candidates.len() > 1 {
        tracing::debug!(matches = candidates.len(), "several contexts match");
    }
    candidates
        .iter()
        .find(|c| !candidates.iter().any(|other| c.is_ancestor_of(other)))
        .or_else(|| candidates.first())
        .copied()
}

/// Normalized contexts keyed by the hash of their raw bytecode.
#[derive(Debug, Clone, Default)]
pub struct ContextSet {
    contexts: HashMap<B256, Context>,
}

impl ContextSet {
    /// Normalizes every input in parallel. Only inputs with identical
    /// bytecode collapse into one context.
    pub fn new(inputs: Vec<ContextInput>) -> Self {
        let total = inputs.len();
        let contexts: HashMap<B256, Context> = inputs
            .into_par_iter()
            .map(Context::new)
            .map(|c| (c.context_hash, c))
            .collect();
        tracing::info!(inputs = total, contexts = contexts.len(), "built context set");
        Self { contexts }
    }

    pub fn find(&self, bytecode: &str) -> Option<&Context> {
        find_context(self.contexts.values(), bytecode)
    }

    pub fn get(&self, hash: &B256) -> Option<&Context> {
        self.contexts.get(hash)
    }

    pub fn insert(&mut self, input: ContextInput) -> B256 {
        let context = Context::new(input);
        let hash = context.context_hash;
        self.contexts.insert(hash, context);
        hash
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Compiler;
    use strata_core::DeclarationId;

    fn input(name: &str, binary: &str, id: u64, bases: &[u64]) -> ContextInput {
        ContextInput {
            binary: binary.into(),
            contract_name: name.into(),
            contract_id: Some(DeclarationId(id)),
            linearized_base_contracts: bases.iter().copied().map(DeclarationId).collect(),
            ..ContextInput::default()
        }
    }

    #[test]
    fn exact_length_required_for_deployed_code() {
        let context = Context::new(input("A", "0x6080", 1, &[1]));
        assert!(find_context([&context], "0x6080").is_some());
        assert!(find_context([&context], &format!("0x6080{}", "00".repeat(32))).is_none());
        assert!(find_context([&context], "0x6081").is_none());
    }

    #[test]
    fn case_insensitive() {
        let context = Context::new(input("A", "0xABCDEF", 1, &[1]));
        assert!(find_context([&context], "0xabcdef").is_some());
    }

    #[test]
    fn constructor_allows_appended_arguments() {
        let mut constructor = input("A", "0x6080", 1, &[1]);
        constructor.is_constructor = true;
        let context = Context::new(constructor);
        assert!(find_context([&context], &format!("0x6080{}", "00".repeat(64))).is_some());
        assert!(find_context([&context], &format!("0x6080{}", "00".repeat(3))).is_none());
    }

    #[test]
    fn vyper_allows_appended_words() {
        let mut vyper = input("V", "0x6080", 1, &[1]);
        vyper.compiler = Some(Compiler {
            name: "vyper".into(),
            version: "0.3.10".into(),
        });
        let context = Context::new(vyper);
        assert!(find_context([&context], &format!("0x6080{}", "ff".repeat(32))).is_some());
    }

    #[test]
    fn derived_contract_preferred_over_base() {
        let set = ContextSet::new(vec![
            input("Base", "0x60806040", 1, &[1]),
            input("Proxy", "0x6080....", 2, &[2, 1]),
        ]);
        assert_eq!(set.len(), 2);
        let found = set.find("0x60806040").unwrap();
        assert_eq!(found.contract_name, "Proxy");
    }

    #[test]
    fn derived_contract_differing_only_in_metadata() {
        let code = |fill: &str| {
            format!(
                "0x6080604052600080fda2646970667358221220{}64736f6c63430008140033",
                fill.repeat(32)
            )
        };
        let base = input("Base", &code("aa"), 1, &[1]);
        let proxy = input("Proxy", &code("bb"), 2, &[2, 1]);

        for inputs in [vec![base.clone(), proxy.clone()], vec![proxy, base]] {
            let set = ContextSet::new(inputs);
            assert_eq!(set.len(), 2);
            assert_eq!(set.find(&code("cc")).map(|c| c.contract_name.as_str()), Some("Proxy"));
        }
    }
}
