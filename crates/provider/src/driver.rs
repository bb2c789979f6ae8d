//! Async drivers that answer a decode's requests.

use crate::cache::StateCache;
use crate::prefetcher::{with_retry, Prefetcher};
use crate::StateProvider;
use alloy_primitives::{Address, Bytes, B256, U256};
use strata_allocator::StateAllocation;
use strata_core::{StrataError, StrataResult};
use strata_decoder::{decode_variable, DecoderInfo, Decoding, EvmState, Progress, Value};

async fn storage<P: StateProvider + ?Sized>(
    provider: &P,
    cache: &StateCache,
    block: u64,
    address: Address,
    slot: U256,
) -> StrataResult<B256> {
    if let Some(word) = cache.storage(block, address, slot) {
        return Ok(word);
    }
    let word = with_retry(|| provider.storage_at(address, slot, block)).await?;
    cache.insert_storage(block, address, slot, word);
    Ok(word)
}

async fn code<P: StateProvider + ?Sized>(
    provider: &P,
    cache: &StateCache,
    block: u64,
    address: Address,
) -> StrataResult<Bytes> {
    if let Some(code) = cache.code(block, address) {
        return Ok(code);
    }
    let code = with_retry(|| provider.code_at(address, block)).await?;
    cache.insert_code(block, address, code.clone());
    Ok(code)
}

/// Resumes `decoding` until it finishes, answering each request in turn.
///
/// Storage is read from the decoding's own address at `block`, from `cache`
/// when possible.
pub async fn drive<P: StateProvider + ?Sized>(
    mut decoding: Decoding<'_>,
    provider: &P,
    cache: &StateCache,
    block: u64,
) -> StrataResult<(Value, EvmState)> {
    let address = decoding.address();
    loop {
        match decoding.step() {
            Progress::Done(value) => {
                tracing::debug!(%address, block, passes = decoding.passes(), "decode complete");
                return Ok((value, decoding.into_state()));
            }
            Progress::NeedsStorage(slots) => {
                for slot in slots {
                    let word = storage(provider, cache, block, address, slot).await?;
                    decoding.provide_storage(slot, word);
                }
            }
            Progress::NeedsCode(code_address) => {
                let bytes = code(provider, cache, block, code_address).await?;
                decoding.provide_code(code_address, bytes);
            }
        }
    }
}

/// Decodes several state variables of the contract at `state.address`.
///
/// All variables advance together: each round collects the missing slots
/// of every unfinished decode and prefetches them as one batch.
/// `state` seeds every decode, e.g. with watched mapping keys.
pub async fn decode_state<P: StateProvider + 'static>(
    info: DecoderInfo<'_>,
    allocation: &StateAllocation,
    names: &[&str],
    state: EvmState,
    prefetcher: &Prefetcher<P>,
    cache: &StateCache,
    block: u64,
) -> StrataResult<Vec<(String, Value)>> {
    let address = state.address;
    let mut decodings = names
        .iter()
        .map(|name| decode_variable(info, state.clone(), allocation, name))
        .collect::<StrataResult<Vec<_>>>()?;
    let mut results: Vec<Option<Value>> = vec![None; decodings.len()];
    let mut rounds = 0usize;

    loop {
        let mut wanted: Vec<(usize, U256)> = Vec::new();
        for (i, decoding) in decodings.iter_mut().enumerate() {
            if results[i].is_some() {
                continue;
            }
            loop {
                match decoding.step() {
                    Progress::Done(value) => {
                        results[i] = Some(value);
                        break;
                    }
                    Progress::NeedsStorage(slots) => {
                        let before = wanted.len();
                        for slot in slots {
                            match cache.storage(block, address, slot) {
                                Some(word) => decoding.provide_storage(slot, word),
                                None => wanted.push((i, slot)),
                            }
                        }
                        if wanted.len() > before {
                            break;
                        }
                    }
                    Progress::NeedsCode(code_address) => {
                        let bytes = code(prefetcher.provider().as_ref(), cache, block, code_address).await?;
                        decoding.provide_code(code_address, bytes);
                    }
                }
            }
        }
        if wanted.is_empty() {
            break;
        }

        rounds += 1;
        let slots: Vec<U256> = wanted.iter().map(|&(_, slot)| slot).collect();
        prefetcher.prefetch(cache, block, address, &slots).await?;
        for (i, slot) in wanted {
            let word = cache.storage(block, address, slot).ok_or_else(|| {
                StrataError::Provider(format!("could not fetch slot {slot} of {address} at block {block}"))
            })?;
            decodings[i].provide_storage(slot, word);
        }
    }

    tracing::info!(%address, block, variables = names.len(), rounds, "decoded contract state");
    Ok(names
        .iter()
        .map(|name| name.to_string())
        .zip(results.into_iter().flatten())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryProvider;
    use std::sync::Arc;
    use strata_allocator::storage::{allocate_contract_state, CodeRange, ImmutableReferences};
    use strata_allocator::Allocations;
    use strata_core::{ContractDefinition, ContractKind, LayoutConfig, Registry, TypeRef, VariableDeclaration};
    use strata_decoder::data_slot;

    fn word(v: u64) -> B256 {
        B256::from(U256::from(v).to_be_bytes::<32>())
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.insert(ContractDefinition {
            id: 1.into(),
            name: "Pool".into(),
            contract_kind: ContractKind::Contract,
            linearized_base_contracts: vec![1.into()],
            state_variables: vec![
                VariableDeclaration::new(2, "reserves", TypeRef::dynamic_array(TypeRef::uint(256))),
                VariableDeclaration::new(3, "fee", TypeRef::uint(24)),
                VariableDeclaration::new(4, "factory", TypeRef::address()).immutable(),
            ],
            functions: vec![],
            events: vec![],
        });
        registry
    }

    fn allocate(registry: &Registry, config: &LayoutConfig) -> (Allocations, StateAllocation) {
        let mut allocations = Allocations::for_registry(registry, config);
        let immutables = ImmutableReferences::from([(4.into(), vec![CodeRange { start: 0, length: 20 }])]);
        let state = allocate_contract_state(
            registry.contract_definition(1.into()).unwrap(),
            registry,
            &mut allocations.storage,
            config,
            Some(&immutables),
        )
        .unwrap();
        (allocations, state)
    }

    fn provider(pool: Address) -> MemoryProvider {
        let data = data_slot(U256::ZERO);
        MemoryProvider::new()
            .with_storage(pool, U256::ZERO, word(2))
            .with_storage(pool, data, word(100))
            .with_storage(pool, data + U256::from(1), word(200))
            .with_storage(pool, U256::from(1), word(3000))
            .with_code(pool, vec![0x11; 20])
    }

    #[tokio::test]
    async fn drive_uses_cache_on_second_decode() {
        let registry = registry();
        let config = LayoutConfig::default();
        let (allocations, state) = allocate(&registry, &config);
        let info = DecoderInfo::new(&registry, &allocations, &config);
        let pool = Address::repeat_byte(0xee);
        let provider = provider(pool);
        let cache = StateCache::new();

        for _ in 0..2 {
            let decoding = decode_variable(info, EvmState::at(pool), &state, "reserves").unwrap();
            let (value, _) = drive(decoding, &provider, &cache, 1).await.unwrap();
            let reserves: Vec<_> = value.elements().unwrap().iter().filter_map(Value::as_uint).collect();
            assert_eq!(reserves, [U256::from(100), U256::from(200)]);
        }
        assert_eq!(provider.requests(), 3);

        let decoding = decode_variable(info, EvmState::at(pool), &state, "factory").unwrap();
        let (factory, _) = drive(decoding, &provider, &cache, 1).await.unwrap();
        assert_eq!(factory.as_address(), Some(Address::repeat_byte(0x11)));
    }

    #[tokio::test]
    async fn decode_state_batches_rounds() {
        let registry = registry();
        let config = LayoutConfig::default();
        let (allocations, state) = allocate(&registry, &config);
        let info = DecoderInfo::new(&registry, &allocations, &config);
        let pool = Address::repeat_byte(0xee);
        let provider = Arc::new(provider(pool));
        let prefetcher = Prefetcher::new(provider.clone()).with_concurrency(4);
        let cache = StateCache::new();

        let values = decode_state(
            info,
            &state,
            &["reserves", "fee", "factory"],
            EvmState::at(pool),
            &prefetcher,
            &cache,
            9,
        )
        .await
        .unwrap();

        let names: Vec<_> = values.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["reserves", "fee", "factory"]);
        assert_eq!(values[1].1.as_uint(), Some(U256::from(3000)));
        assert_eq!(values[2].1.as_address(), Some(Address::repeat_byte(0x11)));
        assert_eq!(cache.storage_len(), 4);
        // Four slots over two rounds, plus the code.
        assert_eq!(provider.requests(), 5);
    }

    #[tokio::test]
    async fn unknown_variable_is_an_error() {
        let registry = registry();
        let config = LayoutConfig::default();
        let (allocations, state) = allocate(&registry, &config);
        let info = DecoderInfo::new(&registry, &allocations, &config);
        let prefetcher = Prefetcher::new(Arc::new(MemoryProvider::new()));

        let result = decode_state(
            info,
            &state,
            &["missing"],
            EvmState::default(),
            &prefetcher,
            &StateCache::new(),
            1,
        )
        .await;
        assert!(matches!(result, Err(StrataError::InvalidInput(_))));
    }
}
