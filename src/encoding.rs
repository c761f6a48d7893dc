//! Binary encoding of draw sequences and reproduction tokens.
//!
//! ```text
//! "CJ" | version: u8 | count: u32 BE | count × (n_bits: u8 | value: ceil(n_bits/8) bytes BE)
//! ```
//!
//! The same bytes are stored in the example database and, wrapped in URL-safe
//! base64 without padding, handed out as reproduction tokens. The version byte
//! lets a newer engine reject old data explicitly instead of misreading it.

use std::io::{Cursor, Read};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::data::{DrawRecord, DrawSequence};
use crate::error::TokenError;

pub const FORMAT_VERSION: u8 = 1;
const MAGIC: &[u8; 2] = b"CJ";
const HEADER_LEN: usize = 2 + 1 + 4;

fn value_width(n_bits: u8) -> usize {
    (n_bits as usize + 7) / 8
}

/// Size in bytes of the serialized form of `sequence`.
pub fn encoded_len(sequence: &DrawSequence) -> usize {
    HEADER_LEN
        + sequence
            .draws()
            .iter()
            .map(|d| 1 + value_width(d.n_bits))
            .sum::<usize>()
}

pub fn serialize(sequence: &DrawSequence) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(sequence));
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    // Writes into a Vec cannot fail.
    let _ = out.write_u32::<BigEndian>(sequence.len() as u32);
    for draw in sequence.draws() {
        out.push(draw.n_bits);
        let width = value_width(draw.n_bits);
        if width > 0 {
            let _ = out.write_uint::<BigEndian>(draw.value, width);
        }
    }
    out
}

fn malformed<E: std::fmt::Display>(e: E) -> TokenError {
    TokenError::Malformed(e.to_string())
}

pub fn deserialize(bytes: &[u8]) -> Result<DrawSequence, TokenError> {
    let mut cursor = Cursor::new(bytes);

    let mut magic = [0u8; 2];
    cursor.read_exact(&mut magic).map_err(malformed)?;
    if &magic != MAGIC {
        return Err(TokenError::Malformed("missing format marker".to_string()));
    }
    let version = cursor.read_u8().map_err(malformed)?;
    if version != FORMAT_VERSION {
        return Err(TokenError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }

    let count = cursor.read_u32::<BigEndian>().map_err(malformed)? as usize;
    // Every draw takes at least one byte, which bounds the allocation.
    let remaining = bytes.len().saturating_sub(HEADER_LEN);
    if count > remaining {
        return Err(TokenError::Malformed(format!(
            "{} draws declared but only {} bytes follow",
            count, remaining
        )));
    }

    let mut draws = Vec::with_capacity(count);
    for _ in 0..count {
        let n_bits = cursor.read_u8().map_err(malformed)?;
        if n_bits > 64 {
            return Err(TokenError::Malformed(format!("draw of {} bits", n_bits)));
        }
        let width = value_width(n_bits);
        let value = if width > 0 {
            cursor.read_uint::<BigEndian>(width).map_err(malformed)?
        } else {
            0
        };
        if value != DrawRecord::new(n_bits, value).value {
            return Err(TokenError::Malformed(format!("value {} does not fit in {} bits", value, n_bits)));
        }
        draws.push(DrawRecord::new(n_bits, value));
    }

    if (cursor.position() as usize) != bytes.len() {
        return Err(TokenError::Malformed("trailing bytes after last draw".to_string()));
    }
    Ok(DrawSequence::new(draws))
}

pub fn encode_token(sequence: &DrawSequence) -> String {
    URL_SAFE_NO_PAD.encode(serialize(sequence))
}

pub fn decode_token(token: &str) -> Result<DrawSequence, TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(token.trim())?;
    deserialize(&bytes)
}
