//! Matches deployed bytecode to the compiled contract it came from.
//!
//! Each compiled artifact becomes a [`Context`] whose bytecode is normalized
//! into a pattern: link placeholders, immutables, a library's own address
//! and metadata hashes turn into wildcards.

pub mod cbor;
pub mod context;
pub mod matcher;
pub mod normalize;

pub use context::{Compiler, Context, ContextInput};
pub use matcher::{find_context, ContextSet};
pub use normalize::{normalize, Normalization};
