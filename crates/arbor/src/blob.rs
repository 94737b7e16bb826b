//! The serialized form of a compiled grammar.
//!
//! Layout, all integers little-endian:
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 4    | magic `ARBR`                  |
//! | 4      | 2    | format version                |
//! | 6      | 2    | reserved, zero                |
//! | 8      | 4    | payload length                |
//! | 12     | 8    | `FxHasher` checksum of payload |
//! | 20     | n    | JSON payload                  |
//!
//! The header is checked field by field before the payload is touched, so a
//! blob from an incompatible engine is rejected without decoding anything.

use rustc_hash::FxHasher;
use std::hash::Hasher;
use thiserror::Error;

use crate::table::ParseTable;

/// Leading bytes of every blob.
pub const MAGIC: [u8; 4] = *b"ARBR";
/// The payload format this engine reads and writes.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 20;

/// Errors raised while loading a blob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The blob does not start with the expected magic bytes.
    #[error("not a compiled grammar (bad magic)")]
    BadMagic,

    /// The blob was written by an engine with another format version.
    #[error("incompatible format version {found}, expected {expected}")]
    IncompatibleVersion {
        /// Version stored in the blob.
        found: u16,
        /// Version this engine understands.
        expected: u16,
    },

    /// The blob ends before its declared length.
    #[error("blob is truncated")]
    Truncated,

    /// The payload does not match its checksum.
    #[error("checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        stored: u64,
        /// Checksum of the payload as read.
        computed: u64,
    },

    /// The payload passed the checksum but is not a usable table.
    #[error("corrupt grammar payload: {0}")]
    Corrupt(String),
}

pub(crate) fn payload(table: &ParseTable) -> String {
    facet_json::to_string(table)
}

pub(crate) fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

pub(crate) fn encode(table: &ParseTable) -> Vec<u8> {
    let payload = payload(table);
    let length = u32::try_from(payload.len()).unwrap_or(u32::MAX);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&checksum(payload.as_bytes()).to_le_bytes());
    bytes.extend_from_slice(payload.as_bytes());
    bytes
}

fn read<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], LoadError> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(LoadError::Truncated)
}

/// Checks the header and decodes the payload of `bytes`, returning the table
/// and its checksum.
pub(crate) fn decode(bytes: &[u8]) -> Result<(ParseTable, u64), LoadError> {
    if bytes.get(..MAGIC.len()) != Some(&MAGIC[..]) {
        return Err(LoadError::BadMagic);
    }
    let found = u16::from_le_bytes(read(bytes, 4)?);
    if found != FORMAT_VERSION {
        return Err(LoadError::IncompatibleVersion {
            found,
            expected: FORMAT_VERSION,
        });
    }
    let length = u32::from_le_bytes(read(bytes, 8)?) as usize;
    let stored = u64::from_le_bytes(read(bytes, 12)?);

    let body = &bytes[HEADER_LEN.min(bytes.len())..];
    if body.len() < length {
        return Err(LoadError::Truncated);
    }
    if body.len() > length {
        return Err(LoadError::Corrupt(format!(
            "{} trailing bytes",
            body.len() - length
        )));
    }
    let computed = checksum(body);
    if computed != stored {
        return Err(LoadError::ChecksumMismatch { stored, computed });
    }

    let text = std::str::from_utf8(body).map_err(|e| LoadError::Corrupt(e.to_string()))?;
    let table: ParseTable =
        facet_json::from_str(text).map_err(|e| LoadError::Corrupt(e.to_string()))?;
    table.check_consistency().map_err(LoadError::Corrupt)?;
    Ok((table, computed))
}
