//! The byte sources a decode reads from.
//!
//! Memory, calldata, return data and logs are handed over whole. Storage
//! words and contract code are filled in lazily: reads that miss turn into
//! a [`Request`] the caller has to satisfy before decoding resumes. A storage
//! request carries every slot one pass found missing.

use crate::value::Value;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use strata_allocator::event::MAX_TOPICS;

/// Data the decoder needs and does not have yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Request {
    /// Missing storage words, in the order they were first read.
    Storage { slots: Vec<U256> },
    Code { address: Address },
}

/// Result of a read that may have to wait for the caller.
pub(crate) type Fetch<T> = Result<T, Request>;

#[derive(Debug, Clone, Default)]
pub struct EvmState {
    /// Address of the contract whose storage and code are being read.
    pub address: Address,
    pub storage: HashMap<U256, B256>,
    pub code: HashMap<Address, Bytes>,
    pub memory: Bytes,
    pub calldata: Bytes,
    pub returndata: Bytes,
    pub topics: SmallVec<[B256; MAX_TOPICS]>,
    pub event_data: Bytes,
    /// Mapping keys to decode, by the mapping's absolute slot.
    mapping_keys: HashMap<U256, Vec<Value>>,
}

impl EvmState {
    pub fn at(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn with_storage(mut self, slot: U256, word: B256) -> Self {
        self.storage.insert(slot, word);
        self
    }

    pub fn with_memory(mut self, memory: impl Into<Bytes>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn with_calldata(mut self, calldata: impl Into<Bytes>) -> Self {
        self.calldata = calldata.into();
        self
    }

    pub fn with_returndata(mut self, returndata: impl Into<Bytes>) -> Self {
        self.returndata = returndata.into();
        self
    }

    pub fn with_log(mut self, topics: impl IntoIterator<Item = B256>, data: impl Into<Bytes>) -> Self {
        self.topics = topics.into_iter().collect();
        self.event_data = data.into();
        self
    }

    /// Asks for the entry under `key` whenever the mapping at `slot` is decoded.
    pub fn watch_mapping_key(&mut self, slot: U256, key: Value) {
        let keys = self.mapping_keys.entry(slot).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    pub fn mapping_keys(&self, slot: U256) -> &[Value] {
        self.mapping_keys.get(&slot).map_or(&[], Vec::as_slice)
    }

    pub fn insert_storage(&mut self, slot: U256, word: B256) {
        self.storage.insert(slot, word);
    }

    pub fn insert_code(&mut self, address: Address, code: Bytes) {
        self.code.insert(address, code);
    }

    pub(crate) fn contract_code(&self, address: Address) -> Fetch<&Bytes> {
        self.code.get(&address).ok_or(Request::Code { address })
    }
}

/// Reads storage words for one pass, noting each one that is missing.
pub(crate) struct StorageReader<'s> {
    pub(crate) state: &'s EvmState,
    missing: Vec<U256>,
    seen: HashSet<U256>,
}

impl<'s> StorageReader<'s> {
    pub(crate) fn new(state: &'s EvmState) -> Self {
        Self {
            state,
            missing: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// The word at `slot`, or `None` after recording it as missing.
    pub(crate) fn word(&mut self, slot: U256) -> Option<B256> {
        let word = self.state.storage.get(&slot).copied();
        if word.is_none() && self.seen.insert(slot) {
            self.missing.push(slot);
        }
        word
    }

    /// Request for everything the pass lacked, if anything.
    pub(crate) fn into_request(self) -> Option<Request> {
        (!self.missing.is_empty()).then_some(Request::Storage {
            slots: self.missing,
        })
    }
}
