//! Bytecode normalization: everything that legitimately differs between a
//! compiled artifact and the code found on chain becomes a wildcard run.
//!
//! Patterns are lowercase hex text without `0x`, where [`WILDCARD`] matches
//! any single hex digit. Link placeholders are not hex, so normalization
//! works on text rather than bytes.

use crate::cbor::{trailing_metadata, HASH_KEYS};
use strata_allocator::storage::CodeRange;

pub const WILDCARD: u8 = b'.';

/// Hex digits in a 20-byte link placeholder.
const PLACEHOLDER_LENGTH: usize = 40;

/// Library name characters that fit in an old-style placeholder.
const MAX_PLACEHOLDER_NAME: usize = PLACEHOLDER_LENGTH - 4;

/// `PUSH20` opcode.
const PUSH20: &str = "73";

/// What to wildcard in one bytecode string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalization<'a> {
    pub libraries: &'a [String],
    pub is_library: bool,
    pub is_constructor: bool,
    pub immutables: &'a [CodeRange],
}

/// Lowercases `hex` and strips its `0x` prefix.
pub fn clean(hex: &str) -> String {
    let hex = hex.trim();
    hex.strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex)
        .to_ascii_lowercase()
}

/// Applies every normalization step, in order.
pub fn normalize(binary: &str, options: &Normalization<'_>) -> String {
    let mut pattern = clean(binary).into_bytes();
    replace_library_placeholders(&mut pattern, options.libraries);
    replace_generic_placeholders(&mut pattern);
    if options.is_library && !options.is_constructor {
        replace_library_guard(&mut pattern);
    }
    if !options.is_constructor {
        for range in options.immutables {
            wildcard(&mut pattern, 2 * range.start, 2 * range.length);
        }
    }
    replace_trailing_metadata(&mut pattern);
    replace_embedded_hashes(&mut pattern);
    // Only ASCII was written into `pattern`.
    String::from_utf8_lossy(&pattern).into_owned()
}

fn wildcard(pattern: &mut [u8], start: usize, length: usize) {
    let end = start.saturating_add(length).min(pattern.len());
    if start < end {
        pattern[start..end].fill(WILDCARD);
    }
}

/// `__Name____...` placeholders, longest names first so that `Math` does
/// not eat the start of `MathExtra`.
fn replace_library_placeholders(pattern: &mut [u8], libraries: &[String]) {
    let mut names: Vec<&str> = libraries.iter().map(String::as_str).collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));

    for name in names {
        let name = &name[..floor_char_boundary(name, MAX_PLACEHOLDER_NAME)];
        let prefix = format!("__{}", name.to_ascii_lowercase()).into_bytes();
        let mut i = 0;
        while i + PLACEHOLDER_LENGTH <= pattern.len() {
            let window = &pattern[i..i + PLACEHOLDER_LENGTH];
            if window.starts_with(&prefix) && window[prefix.len()..].iter().all(|&c| c == b'_') {
                wildcard(pattern, i, PLACEHOLDER_LENGTH);
                i += PLACEHOLDER_LENGTH;
            } else {
                i += 1;
            }
        }
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    (0..=max.min(s.len()))
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0)
}

/// Any remaining `__...__` run of placeholder length, old or new style
/// (`__$<hash>$__`).
fn replace_generic_placeholders(pattern: &mut [u8]) {
    let mut i = 0;
    while i + PLACEHOLDER_LENGTH <= pattern.len() {
        if pattern[i..].starts_with(b"__") && pattern[i + PLACEHOLDER_LENGTH - 2..].starts_with(b"__") {
            wildcard(pattern, i, PLACEHOLDER_LENGTH);
            i += PLACEHOLDER_LENGTH;
        } else {
            i += 2;
        }
    }
}

/// Deployed libraries start with `PUSH20 <own address>`, compiled as zeros.
fn replace_library_guard(pattern: &mut [u8]) {
    let address = 2..2 + PLACEHOLDER_LENGTH;
    if pattern.starts_with(PUSH20.as_bytes())
        && pattern.get(address.clone()).is_some_and(|a| a.iter().all(|&c| c == b'0'))
    {
        wildcard(pattern, address.start, PLACEHOLDER_LENGTH);
    }
}

fn replace_trailing_metadata(pattern: &mut [u8]) {
    if pattern.len() % 2 != 0 {
        return;
    }
    let Some(code) = decode_tail(pattern) else {
        return;
    };
    let Some(metadata) = trailing_metadata(&code) else {
        return;
    };
    if metadata.hash_key().is_none() {
        tracing::trace!(keys = ?metadata.keys, "metadata without a hash left as is");
        return;
    }
    let skipped = pattern.len() / 2 - code.len();
    wildcard(pattern, 2 * (skipped + metadata.offset), 2 * metadata.length);
}

/// Bytes of the hex-clean suffix of `pattern` that can hold metadata.
fn decode_tail(pattern: &[u8]) -> Option<Vec<u8>> {
    let length_digits = pattern.get(pattern.len().checked_sub(4)?..)?;
    let length = usize::from_str_radix(std::str::from_utf8(length_digits).ok()?, 16).ok()?;
    let start = pattern.len().checked_sub(2 * (length + 2))?;
    hex::decode(&pattern[start..]).ok()
}

/// Hash prefixes of metadata maps, as hex, and the hash length in bytes.
fn hash_prefixes() -> [(String, usize); 3] {
    HASH_KEYS.map(|key| {
        let (tag, length) = if key == "ipfs" { ("5822", 34) } else { ("5820", 32) };
        let header = 0x60 + key.len() as u8;
        (format!("{header:02x}{}{tag}", hex::encode(key)), length)
    })
}

/// Metadata hashes of contracts embedded in this one (for `new`) sit in
/// the middle of the code; wildcard the hash wherever a prefix is found.
fn replace_embedded_hashes(pattern: &mut [u8]) {
    for (prefix, length) in hash_prefixes() {
        let prefix = prefix.as_bytes();
        let mut i = 0;
        while i + prefix.len() <= pattern.len() {
            if pattern[i..].starts_with(prefix) {
                let start = i + prefix.len();
                wildcard(pattern, start, 2 * length);
                i = start + 2 * length;
            } else {
                i += 2;
            }
        }
    }
}

/// Whether `code` (clean hex) matches `pattern` at every non-wildcard digit,
/// with `pattern` covering a prefix of `code`.
pub fn matches_prefix(pattern: &str, code: &str) -> bool {
    code.len() >= pattern.len()
        && pattern
            .bytes()
            .zip(code.bytes())
            .all(|(p, c)| p == WILDCARD || p.eq_ignore_ascii_case(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(fill: &str) -> String {
        let mut hex = String::from("a2646970667358221220");
        hex.push_str(&fill.repeat(32));
        hex.push_str("64736f6c6343000814");
        hex.push_str("0033");
        hex
    }

    #[test]
    fn trailing_metadata_becomes_wildcards() {
        let code = format!("0x6080604052fe{}", metadata("ab"));
        let pattern = normalize(&code, &Normalization::default());
        assert!(pattern.starts_with("6080604052fe"));
        assert!(pattern.ends_with("0033"));
        assert_eq!(pattern.len(), code.len() - 2);
        assert_eq!(pattern.bytes().filter(|&c| c == WILDCARD).count(), 2 * 51);
        assert!(matches_prefix(&pattern, &format!("6080604052fe{}", metadata("cd"))));
    }

    #[test]
    fn library_placeholders_longest_first() {
        let math = format!("__Math{}", "_".repeat(34));
        let extra = format!("__MathExtra{}", "_".repeat(29));
        let code = format!("73{math}00{extra}00");
        let libraries = vec!["Math".to_string(), "MathExtra".to_string()];
        let pattern = normalize(
            &code,
            &Normalization {
                libraries: &libraries,
                ..Normalization::default()
            },
        );
        assert_eq!(pattern, format!("73{}00{}00", ".".repeat(40), ".".repeat(40)));
    }

    #[test]
    fn new_style_placeholder_is_generic() {
        let code = format!("73__${}$__5b", "0".repeat(34));
        let pattern = normalize(&code, &Normalization::default());
        assert_eq!(pattern, format!("73{}5b", ".".repeat(40)));
    }

    #[test]
    fn library_guard_only_when_deployed() {
        let code = format!("73{}3014", "0".repeat(40));
        let deployed = Normalization {
            is_library: true,
            ..Normalization::default()
        };
        assert_eq!(normalize(&code, &deployed), format!("73{}3014", ".".repeat(40)));

        let constructor = Normalization {
            is_constructor: true,
            ..deployed
        };
        assert_eq!(normalize(&code, &constructor), code);
    }

    #[test]
    fn immutables_are_blanked() {
        let ranges = [CodeRange { start: 1, length: 2 }];
        let pattern = normalize(
            "0xaabbccdd",
            &Normalization {
                immutables: &ranges,
                ..Normalization::default()
            },
        );
        assert_eq!(pattern, "aa....dd");
    }

    #[test]
    fn embedded_child_hash() {
        let child = format!("a165627a7a72305820{}0029", "11".repeat(32));
        let code = format!("6080{child}6080{}", metadata("ab"));
        let pattern = normalize(&code, &Normalization::default());
        assert!(pattern.starts_with(&format!("6080a165627a7a72305820{}0029", ".".repeat(64))));
    }
}
