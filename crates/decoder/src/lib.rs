//! Decodes EVM state and messages into typed value trees.
//!
//! Reads from memory, calldata, return data and logs are synchronous. Reads
//! from storage and contract code go through [`Decoding`], which reports the
//! next missing datum instead of fetching it, so any I/O layer can drive it.

pub mod abi;
mod basic;
pub mod calldata;
mod constant;
pub mod decode;
pub mod encode;
pub mod event;
pub mod info;
mod memory;
pub mod pointer;
pub mod state;
pub mod storage;
pub mod value;

pub use calldata::{
    decode_call_with, decode_calldata, decode_constructor_arguments, decode_returndata, Argument,
    DecodedCall,
};
pub use decode::{decode_value, decode_variable, Decoding, Progress};
pub use encode::{encode_call, encode_values};
pub use event::{decode_event, decode_event_with, DecodedEvent};
pub use info::{DecoderInfo, InternalFunctionEntry, InternalFunctionTable};
pub use pointer::{DataPointer, SlotPosition, SlotRange};
pub use state::{EvmState, Request};
pub use storage::{data_slot, mapping_slot};
pub use value::{Data, DecodingError, InternalFunction, Member, MappingEntry, StringValue, Value, ValueKind};
