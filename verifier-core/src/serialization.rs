//! Encodings used by the verifier.
//!
//! Node records are persisted as canonical CBOR so that a record written by one
//! verifier process decodes identically in the next (the challenge nonce, the
//! cached ciphertext and the registrar keys all survive restarts). Payloads
//! exchanged with nodes and published to subscribers are JSON.
//!
//! ## Record encoding rules
//! 1. Struct fields in declaration order; map-valued fields are `BTreeMap`s,
//!    so their keys come out sorted
//! 2. Integers in minimal form
//! 3. No indefinite-length encoding; decoding rejects it
//!
//! Rule 1 makes the bytes deterministic for a given type but is narrower than
//! RFC 8949 Section 4.2: struct fields are not re-sorted by encoded key.

use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("CBOR encoding error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("CBOR decoding error: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Non-canonical encoding: {0}")]
    NonCanonical(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SerializationError>;

/// Serialize a value to canonical CBOR bytes.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;

    // ciborium never emits indefinite lengths for sized serde types; check anyway
    // since records from other writers pass through `from_canonical_cbor` too.
    verify_canonical(&buf)?;

    Ok(buf)
}

/// Deserialize a value from canonical CBOR bytes, refusing indefinite-length items.
pub fn from_canonical_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    verify_canonical(bytes)?;
    let value = ciborium::from_reader(bytes)?;
    Ok(value)
}

/// Serialize a wire payload to compact JSON.
pub fn to_wire_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Parse a wire payload from JSON bytes.
pub fn from_wire_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn verify_canonical(bytes: &[u8]) -> Result<()> {
    let mut cursor = std::io::Cursor::new(bytes);
    verify_canonical_item(&mut cursor)
}

fn verify_canonical_item<R: Read>(reader: &mut R) -> Result<()> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;

    let major_type = (buf[0] & 0xE0) >> 5;
    let additional_info = buf[0] & 0x1F;

    if additional_info == 31 {
        return Err(SerializationError::NonCanonical("indefinite-length item"));
    }

    let length = match additional_info {
        0..=23 => additional_info as usize,
        24 => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            buf[0] as usize
        }
        25 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            u16::from_be_bytes(buf) as usize
        }
        26 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            u32::from_be_bytes(buf) as usize
        }
        27 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            u64::from_be_bytes(buf) as usize
        }
        _ => return Err(SerializationError::NonCanonical("reserved additional info")),
    };

    match major_type {
        // Simple values and floats carry their payload in the header bytes
        0 | 1 | 7 => {}
        2 | 3 => {
            let mut remaining = length as u64;
            let copied = std::io::copy(&mut reader.by_ref().take(remaining), &mut std::io::sink())?;
            remaining -= copied;
            if remaining != 0 {
                return Err(SerializationError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
        }
        4 => {
            for _ in 0..length {
                verify_canonical_item(reader)?;
            }
        }
        5 => {
            for _ in 0..length {
                verify_canonical_item(reader)?;
                verify_canonical_item(reader)?;
            }
        }
        6 => verify_canonical_item(reader)?,
        _ => {}
    }

    Ok(())
}
