//! Obfuscated mapper tables.
//!
//! The original tool chain ships three index files next to the content:
//! a package-name to relative-path map, the composite package map, and an
//! object redirector map. They are flat `|`-delimited text tables behind a
//! keyed byte obfuscation: each 8-byte group is XORed with a repeating key
//! and then transposed with a fixed permutation. This is obfuscation, not
//! cryptography; both directions are cheap and exact inverses.

use std::collections::HashMap;

use thiserror::Error;

/// Repeating XOR key applied before transposition.
const XOR_KEY: [u8; 16] = [
    0x2F, 0xA1, 0x5C, 0x08, 0x99, 0xE3, 0x41, 0xD6, 0x7B, 0x10, 0xC4, 0x8E, 0x35, 0xF2, 0x6A,
    0x0D,
];

/// Output position `i` takes input position `PERMUTATION[i]`.
const PERMUTATION: [usize; 8] = [5, 2, 7, 0, 3, 6, 1, 4];

/// Inverse of [`PERMUTATION`].
const INVERSE: [usize; 8] = [3, 6, 1, 4, 7, 0, 5, 2];

/// Errors decoding a mapper table.
#[derive(Debug, Error)]
pub enum MapperError {
    /// Decrypted bytes are not a UTF-8 text table.
    #[error("mapper data is not valid UTF-8")]
    Utf8,

    /// A record has the wrong number of fields.
    #[error("mapper line {line}: expected {expected} fields, found {found}")]
    BadRecord {
        line: usize,
        expected: usize,
        found: usize,
    },

    /// A numeric field failed to parse.
    #[error("mapper line {line}: invalid number {value:?}")]
    BadNumber { line: usize, value: String },
}

/// Obfuscate plain bytes.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = plain
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ XOR_KEY[i % XOR_KEY.len()])
        .collect();
    for group in out.chunks_exact_mut(8) {
        let src: [u8; 8] = group.try_into().expect("chunk of 8");
        for (i, slot) in group.iter_mut().enumerate() {
            *slot = src[PERMUTATION[i]];
        }
    }
    out
}

/// Recover plain bytes. Exact inverse of [`encrypt`]; the trailing group
/// shorter than 8 bytes is XOR-only in both directions.
pub fn decrypt(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    for group in out.chunks_exact_mut(8) {
        let src: [u8; 8] = group.try_into().expect("chunk of 8");
        for (i, slot) in group.iter_mut().enumerate() {
            *slot = src[INVERSE[i]];
        }
    }
    for (i, b) in out.iter_mut().enumerate() {
        *b ^= XOR_KEY[i % XOR_KEY.len()];
    }
    out
}

/// Decrypt and split into records of exactly `fields` fields.
///
/// Records are newline-separated; empty lines are skipped. Field values are
/// trimmed of surrounding whitespace.
pub fn parse_records(data: &[u8], fields: usize) -> Result<Vec<Vec<String>>, MapperError> {
    let text = String::from_utf8(decrypt(data)).map_err(|_| MapperError::Utf8)?;
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<String> = line.split('|').map(|f| f.trim().to_string()).collect();
        if values.len() != fields {
            return Err(MapperError::BadRecord {
                line: line_no + 1,
                expected: fields,
                found: values.len(),
            });
        }
        records.push(values);
    }
    Ok(records)
}

/// Decode the package-name → relative-path map.
///
/// Keys are lowercased; package name comparisons are case-insensitive
/// everywhere in the engine.
pub fn parse_package_map(data: &[u8]) -> Result<HashMap<String, String>, MapperError> {
    let records = parse_records(data, 2)?;
    Ok(records
        .into_iter()
        .map(|mut r| {
            let path = r.pop().expect("two fields");
            let name = r.pop().expect("two fields");
            (name.to_ascii_lowercase(), path)
        })
        .collect())
}

/// Decode the object redirector map (`from` → `to` object paths).
pub fn parse_redirect_map(data: &[u8]) -> Result<HashMap<String, String>, MapperError> {
    let records = parse_records(data, 2)?;
    Ok(records
        .into_iter()
        .map(|mut r| {
            let to = r.pop().expect("two fields");
            let from = r.pop().expect("two fields");
            (from.to_ascii_lowercase(), to)
        })
        .collect())
}

/// Encode a text table for fixture and round-trip use.
pub fn encode_records(records: &[Vec<String>]) -> Vec<u8> {
    let text = records
        .iter()
        .map(|r| r.join("|"))
        .collect::<Vec<_>>()
        .join("\n");
    encrypt(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_tables_are_inverses() {
        for i in 0..8 {
            assert_eq!(INVERSE[PERMUTATION[i]], i);
        }
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        for len in [0usize, 1, 7, 8, 9, 15, 16, 17, 255] {
            let plain: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            let cipher = encrypt(&plain);
            if len > 4 {
                assert_ne!(cipher, plain, "len {} should actually obfuscate", len);
            }
            assert_eq!(decrypt(&cipher), plain, "len {}", len);
        }
    }

    #[test]
    fn test_parse_package_map() {
        let data = encode_records(&[
            vec!["Art_Deco".into(), "CookedPC/Art_Deco.gpk".into()],
            vec!["Sound_FX".into(), "CookedPC/Audio/Sound_FX.gpk".into()],
        ]);
        let map = parse_package_map(&data).unwrap();
        assert_eq!(
            map.get("art_deco"),
            Some(&"CookedPC/Art_Deco.gpk".to_string())
        );
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_parse_redirect_map() {
        let data = encode_records(&[vec![
            "Props.OldDoor".into(),
            "Props_V2.Door".into(),
        ]]);
        let map = parse_redirect_map(&data).unwrap();
        assert_eq!(map.get("props.olddoor"), Some(&"Props_V2.Door".to_string()));
    }

    #[test]
    fn test_wrong_field_count_is_error() {
        let data = encrypt(b"OnlyOneField");
        let err = parse_records(&data, 2).unwrap_err();
        assert!(matches!(
            err,
            MapperError::BadRecord {
                line: 1,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let data = encrypt(b"\nA|B\n\nC|D\n");
        let records = parse_records(&data, 2).unwrap();
        assert_eq!(records.len(), 2);
    }
}
