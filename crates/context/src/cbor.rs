//! Compiler metadata appended to contract bytecode.
//!
//! Solidity ends the runtime code with a CBOR map followed by its length as
//! a big-endian `u16`. Only the subset of CBOR that compilers emit is parsed.

use serde::{Deserialize, Serialize};

/// Keys whose value is a hash of the contract's metadata file.
pub const HASH_KEYS: [&str; 3] = ["ipfs", "bzzr0", "bzzr1"];

const MAX_NESTING: usize = 8;

/// Location of a trailing metadata blob, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CborMetadata {
    /// Start of the CBOR map.
    pub offset: usize,
    /// Length of the map, excluding the two length bytes.
    pub length: usize,
    pub keys: Vec<String>,
}

impl CborMetadata {
    /// The metadata-hash key present in the map, if any.
    pub fn hash_key(&self) -> Option<&str> {
        self.keys
            .iter()
            .map(String::as_str)
            .find(|k| HASH_KEYS.contains(k))
    }
}

/// Finds the metadata map at the end of `code`, if one is there and parses.
pub fn trailing_metadata(code: &[u8]) -> Option<CborMetadata> {
    let len = code.len();
    if len < 2 {
        return None;
    }
    let length = usize::from(u16::from_be_bytes([code[len - 2], code[len - 1]]));
    if length == 0 || length + 2 > len {
        return None;
    }
    let offset = len - 2 - length;
    let keys = map_keys(&code[offset..len - 2])?;
    tracing::trace!(offset, length, ?keys, "found trailing metadata");
    Some(CborMetadata {
        offset,
        length,
        keys,
    })
}

/// Text keys of a CBOR map that spans all of `blob`.
fn map_keys(blob: &[u8]) -> Option<Vec<String>> {
    let mut reader = Reader { blob, position: 0 };
    let (major, entries) = reader.header()?;
    if major != 5 {
        return None;
    }
    let mut keys = Vec::with_capacity(usize::try_from(entries).ok()?.min(16));
    for _ in 0..entries {
        let (major, length) = reader.header()?;
        if major != 3 {
            return None;
        }
        let key = reader.take(length)?;
        keys.push(String::from_utf8(key.to_vec()).ok()?);
        reader.skip_item(0)?;
    }
    (reader.position == blob.len()).then_some(keys)
}

struct Reader<'a> {
    blob: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Option<u8> {
        let b = *self.blob.get(self.position)?;
        self.position += 1;
        Some(b)
    }

    fn take(&mut self, length: u64) -> Option<&'a [u8]> {
        let end = self.position.checked_add(usize::try_from(length).ok()?)?;
        let bytes = self.blob.get(self.position..end)?;
        self.position = end;
        Some(bytes)
    }

    fn uint(&mut self, width: u64) -> Option<u64> {
        let bytes = self.take(width)?;
        Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Major type and argument of the next item.
    fn header(&mut self) -> Option<(u8, u64)> {
        let initial = self.byte()?;
        let major = initial >> 5;
        let argument = match initial & 0x1f {
            n @ 0..=23 => u64::from(n),
            24 => self.uint(1)?,
            25 => self.uint(2)?,
            26 => self.uint(4)?,
            27 => self.uint(8)?,
            _ => return None,
        };
        Some((major, argument))
    }

    fn skip_item(&mut self, depth: usize) -> Option<()> {
        if depth > MAX_NESTING {
            return None;
        }
        let (major, argument) = self.header()?;
        match major {
            0 | 1 | 7 => Some(()),
            2 | 3 => self.take(argument).map(drop),
            4 => (0..argument).try_for_each(|_| self.skip_item(depth + 1)),
            5 => (0..argument).try_for_each(|_| {
                self.skip_item(depth + 1)?;
                self.skip_item(depth + 1)
            }),
            6 => self.skip_item(depth + 1),
            _ => None,
        }
    }
}
