//! Layout configuration shared by allocators and decoders.

use crate::abi::Selector;
use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};

const DEFAULT_ADDRESS_SIZE: usize = 20;
const DEFAULT_SELECTOR_SIZE: usize = 4;
const DEFAULT_PC_SIZE: usize = 4;

/// Machine parameters the layout rules depend on.
///
/// Every field has a default matching mainnet Solidity, so an empty JSON
/// object (`{}`) deserializes to [`LayoutConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutConfig {
    pub address_size: usize,
    pub selector_size: usize,
    /// Bytes per program counter inside an internal function pointer.
    pub pc_size: usize,
    /// Reject ABI words whose padding bytes are not clean.
    pub strict_abi: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            address_size: DEFAULT_ADDRESS_SIZE,
            selector_size: DEFAULT_SELECTOR_SIZE,
            pc_size: DEFAULT_PC_SIZE,
            strict_abi: true,
        }
    }
}

impl LayoutConfig {
    pub fn from_json(json: &str) -> StrataResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StrataError::InvalidInput(format!("Malformed layout config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Storage bytes of an internal function pointer (two jump destinations).
    pub fn internal_function_size(&self) -> usize {
        2 * self.pc_size
    }

    /// Storage bytes of an external function pointer.
    pub fn external_function_size(&self) -> usize {
        self.address_size + self.selector_size
    }

    /// Checks that the sizes describe a machine the layout rules support.
    pub fn validate(&self) -> StrataResult<()> {
        if self.selector_size != Selector::len_bytes() {
            return Err(StrataError::InvalidInput(format!(
                "selector size must be {} bytes, got {}",
                Selector::len_bytes(),
                self.selector_size
            )));
        }
        if self.internal_function_size() > crate::WORD_SIZE
            || self.external_function_size() > crate::WORD_SIZE
        {
            return Err(StrataError::InvalidInput(
                "function pointer sizes must fit in one word".into(),
            ));
        }
        Ok(())
    }
}
