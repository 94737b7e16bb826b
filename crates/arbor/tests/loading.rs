#![allow(clippy::unwrap_used)]

mod common;

use arbor::{load, parse, LoadError, Registry, FORMAT_VERSION};
use common::{statements, SIMPL_EXPRESSIONS};
use rstest::rstest;

fn blob() -> Vec<u8> {
    arbor::compile_json(SIMPL_EXPRESSIONS).unwrap().to_bytes()
}

#[rstest]
#[case::wrong_magic(|b: &mut Vec<u8>| b[0] = b'X', LoadError::BadMagic)]
#[case::shorter_than_magic(|b: &mut Vec<u8>| b.truncate(2), LoadError::BadMagic)]
#[case::empty(|b: &mut Vec<u8>| b.clear(), LoadError::BadMagic)]
#[case::newer_version(
    |b: &mut Vec<u8>| b[4] = 2,
    LoadError::IncompatibleVersion { found: 2, expected: FORMAT_VERSION }
)]
#[case::cut_in_header(|b: &mut Vec<u8>| b.truncate(10), LoadError::Truncated)]
#[case::cut_in_payload(|b: &mut Vec<u8>| { b.pop(); }, LoadError::Truncated)]
#[case::trailing_bytes(
    |b: &mut Vec<u8>| b.push(b' '),
    LoadError::Corrupt("1 trailing bytes".to_string())
)]
fn test_load_rejects(#[case] damage: fn(&mut Vec<u8>), #[case] expected: LoadError) {
    let mut bytes = blob();
    damage(&mut bytes);
    assert_eq!(load(&bytes).err(), Some(expected));
}

#[rstest]
#[case(20)]
#[case(40)]
#[case(1)]
fn test_load_detects_payload_corruption(#[case] from_end: usize) {
    let compiled = arbor::compile_json(SIMPL_EXPRESSIONS).unwrap();
    let mut bytes = compiled.to_bytes();
    let at = bytes.len() - from_end;
    bytes[at] ^= 0x01;
    match load(&bytes) {
        Err(LoadError::ChecksumMismatch { stored, computed }) => {
            assert_eq!(stored, compiled.fingerprint());
            assert_ne!(stored, computed);
        }
        other => panic!("expected a checksum mismatch, got {other:?}"),
    }
}

#[test]
fn test_loaded_language_parses_like_the_compiled_one() {
    let compiled = arbor::compile_json(SIMPL_EXPRESSIONS).unwrap();
    let bytes = compiled.to_bytes();
    let loaded = load(&bytes).unwrap();
    let direct = arbor::Language::from_compiled(compiled).unwrap();
    assert!(loaded.same_grammar(&direct));
    assert!(!loaded.same_handle(&direct));
    let text = "1 + x * 2.";
    assert_eq!(parse(&loaded, text).debug_dump(), parse(&direct, text).debug_dump());
}

#[test]
fn test_registry_keeps_languages_apart() {
    let mut registry = Registry::new();
    let simpl = registry.load(&blob()).unwrap();
    registry.insert(statements());
    assert_eq!(registry.len(), 2);
    assert!(registry.get("simpl_expressions").unwrap().same_handle(&simpl));
    assert_eq!(
        parse(registry.get("stmts").unwrap(), "a;").to_sexp(),
        "(program (stmt (expr (ident))))"
    );
    assert!(registry.unload("simpl_expressions").is_some());
    assert!(registry.get("simpl_expressions").is_none());
}
