//! Decoding contract state through a provider, cache, and prefetcher.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::sync::Arc;
use strata_allocator::storage::allocate_contract_state;
use strata_allocator::{Allocations, StateAllocation};
use strata_core::{
    ContractDefinition, ContractKind, LayoutConfig, Registry, StrataError, StrataResult, TypeRef,
    VariableDeclaration,
};
use strata_decoder::{decode_variable, mapping_slot, Data, DecoderInfo, EvmState, Value};
use strata_provider::{decode_state, drive, MemoryProvider, Prefetcher, StateCache, StateProvider};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strata_provider=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn word(v: u64) -> B256 {
    B256::from(U256::from(v).to_be_bytes::<32>())
}

struct Token {
    registry: Registry,
    config: LayoutConfig,
    allocations: Allocations,
    state: StateAllocation,
}

fn token() -> Token {
    let mut registry = Registry::new();
    registry.insert(ContractDefinition {
        id: 1.into(),
        name: "Token".into(),
        contract_kind: ContractKind::Contract,
        linearized_base_contracts: vec![1.into()],
        state_variables: vec![
            VariableDeclaration::new(2, "totalSupply", TypeRef::uint(256)),
            VariableDeclaration::new(
                3,
                "balances",
                TypeRef::mapping(TypeRef::address(), TypeRef::uint(256)),
            ),
            VariableDeclaration::new(4, "paused", TypeRef::Bool),
        ],
        functions: vec![],
        events: vec![],
    });
    let config = LayoutConfig::default();
    let mut allocations = Allocations::for_registry(&registry, &config);
    let contract = registry.contract_definition(1.into()).unwrap().clone();
    let state = allocate_contract_state(&contract, &registry, &mut allocations.storage, &config, None).unwrap();
    Token {
        registry,
        config,
        allocations,
        state,
    }
}

#[tokio::test]
async fn watched_balances_are_prefetched() {
    init_tracing();
    let t = token();
    let info = DecoderInfo::new(&t.registry, &t.allocations, &t.config);
    let token_address = Address::repeat_byte(0x70);

    let alice = Value::new(TypeRef::address(), Data::Address(Address::repeat_byte(0xa1)));
    let bob = Value::new(TypeRef::address(), Data::Address(Address::repeat_byte(0xb0)));
    let provider = Arc::new(
        MemoryProvider::new()
            .with_storage(token_address, U256::ZERO, word(1_000))
            .with_storage(token_address, mapping_slot(&alice, U256::from(1)).unwrap(), word(600))
            .with_storage(token_address, mapping_slot(&bob, U256::from(1)).unwrap(), word(400))
            .with_storage(token_address, U256::from(2), word(1)),
    );

    let mut state = EvmState::at(token_address);
    state.watch_mapping_key(U256::from(1), alice.clone());
    state.watch_mapping_key(U256::from(1), bob.clone());

    let prefetcher = Prefetcher::new(provider.clone()).with_concurrency(2);
    let cache = StateCache::new();
    let values = decode_state(
        info,
        &t.state,
        &["totalSupply", "balances", "paused"],
        state,
        &prefetcher,
        &cache,
        18_000_000,
    )
    .await
    .unwrap();

    assert_eq!(values[0].1.as_uint(), Some(U256::from(1_000)));
    let Some(Data::Mapping(entries)) = values[1].1.data() else {
        panic!("expected a mapping, got {}", values[1].1);
    };
    let balances: Vec<_> = entries
        .iter()
        .map(|e| (e.key.clone(), e.value.as_uint()))
        .collect();
    assert_eq!(
        balances,
        [(alice, Some(U256::from(600))), (bob, Some(U256::from(400)))]
    );
    assert_eq!(values[2].1.as_bool(), Some(true));
    assert_eq!(provider.requests(), 4);

    // Everything is cached now; a second pass costs nothing.
    let decoding = decode_variable(info, EvmState::at(token_address), &t.state, "totalSupply").unwrap();
    let (total, _) = drive(decoding, provider.as_ref(), &cache, 18_000_000).await.unwrap();
    assert_eq!(total.as_uint(), Some(U256::from(1_000)));
    assert_eq!(provider.requests(), 4);
}

struct Unreachable;

#[async_trait]
impl StateProvider for Unreachable {
    async fn storage_at(&self, _: Address, _: U256, _: u64) -> StrataResult<B256> {
        Err(StrataError::InvalidInput("unknown block".into()))
    }

    async fn code_at(&self, _: Address, _: u64) -> StrataResult<Bytes> {
        Err(StrataError::InvalidInput("unknown block".into()))
    }
}

#[tokio::test]
async fn provider_errors_abort_the_decode() {
    init_tracing();
    let t = token();
    let info = DecoderInfo::new(&t.registry, &t.allocations, &t.config);

    let decoding = decode_variable(info, EvmState::default(), &t.state, "paused").unwrap();
    let result = drive(decoding, &Unreachable, &StateCache::new(), 1).await;
    assert!(matches!(result, Err(StrataError::InvalidInput(_))));

    let prefetcher = Prefetcher::new(Arc::new(Unreachable));
    let result = decode_state(
        info,
        &t.state,
        &["paused"],
        EvmState::default(),
        &prefetcher,
        &StateCache::new(),
        1,
    )
    .await;
    assert!(matches!(result, Err(StrataError::Provider(_))));
}
