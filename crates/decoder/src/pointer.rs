//! Absolute locations of values inside an [`EvmState`](crate::EvmState).

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use strata_allocator::{StorageLength, StorageRange};
use strata_core::{DeclarationId, WORD_SIZE};

const LAST_INDEX: u8 = (WORD_SIZE - 1) as u8;

/// A byte position in storage: absolute slot, byte index from the most
/// significant end of the word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPosition {
    pub slot: U256,
    pub index: u8,
}

/// Inclusive storage byte range with absolute slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub from: SlotPosition,
    pub to: SlotPosition,
}

impl SlotRange {
    /// The full word at `slot`.
    pub fn word(slot: U256) -> Self {
        Self::words(slot, 1)
    }

    pub fn words(slot: U256, count: u64) -> Self {
        Self {
            from: SlotPosition { slot, index: 0 },
            to: SlotPosition {
                slot: slot.wrapping_add(U256::from(count.max(1) - 1)),
                index: LAST_INDEX,
            },
        }
    }

    /// A relative allocation range placed at `base`.
    pub fn offset(base: U256, range: &StorageRange) -> Self {
        Self {
            from: SlotPosition {
                slot: base.wrapping_add(U256::from(range.from.slot)),
                index: range.from.index,
            },
            to: SlotPosition {
                slot: base.wrapping_add(U256::from(range.to.slot)),
                index: range.to.index,
            },
        }
    }

    /// Where a value of size `length` sits when it starts a fresh slot:
    /// packed values hug the low-order end of the word.
    pub fn starting_at(slot: U256, length: StorageLength) -> Self {
        match length {
            StorageLength::Bytes(bytes) => Self {
                from: SlotPosition {
                    slot,
                    index: (WORD_SIZE - bytes.clamp(1, WORD_SIZE)) as u8,
                },
                to: SlotPosition {
                    slot,
                    index: LAST_INDEX,
                },
            },
            StorageLength::Words(words) => Self::words(slot, words),
        }
    }

    /// Range of element `i` of an array whose elements start at `base`.
    ///
    /// Packed elements fill each word from the low-order end.
    pub fn element(base: U256, i: u64, element: StorageLength) -> Self {
        match element {
            StorageLength::Bytes(bytes) => {
                let bytes = bytes.clamp(1, WORD_SIZE);
                let per_word = (WORD_SIZE / bytes) as u64;
                let slot = base.wrapping_add(U256::from(i / per_word));
                let position = (i % per_word) as usize;
                let to = WORD_SIZE - 1 - position * bytes;
                Self {
                    from: SlotPosition {
                        slot,
                        index: (to + 1 - bytes) as u8,
                    },
                    to: SlotPosition {
                        slot,
                        index: to as u8,
                    },
                }
            }
            StorageLength::Words(words) => {
                let slot = base.wrapping_add(U256::from(i).wrapping_mul(U256::from(words)));
                Self::words(slot, words)
            }
        }
    }
}

/// Where a value to be decoded lives.
///
/// ABI locations carry both the head slot of the value and the base that
/// tail offsets found in it are relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "camelCase")]
pub enum DataPointer {
    Storage(SlotRange),
    /// Word holding the value, or a pointer to it for reference types.
    Memory { start: usize },
    Calldata { start: usize, base: usize },
    Returndata { start: usize, base: usize },
    EventData { start: usize, base: usize },
    EventTopic { topic: usize },
    /// Bytes inside the code of the contract being decoded.
    Code { start: usize, length: usize },
    Constant { definition: DeclarationId },
    Nowhere,
}
