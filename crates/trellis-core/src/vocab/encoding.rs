//! Token surface strings to raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How token strings in the vocabulary map to bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VocabEncoding {
    /// Token strings are the text itself.
    #[default]
    Plain,
    /// SentencePiece byte fallback: `<0xAB>` is byte 0xAB and `▁` is a space.
    ByteFallback,
    /// GPT-2 byte-level BPE: every byte is mapped to a printable character.
    ByteLevel,
}

impl VocabEncoding {
    /// Classify a decoder type name.
    pub fn from_decoder_type(kind: &str) -> Option<Self> {
        match kind {
            "ByteFallback" => Some(VocabEncoding::ByteFallback),
            "ByteLevel" => Some(VocabEncoding::ByteLevel),
            _ => None,
        }
    }

    /// Raw bytes of a token string under this encoding.
    pub fn token_bytes(&self, token: &str) -> Result<Vec<u8>, String> {
        match self {
            VocabEncoding::Plain => Ok(token.as_bytes().to_vec()),
            VocabEncoding::ByteFallback => byte_fallback_bytes(token),
            VocabEncoding::ByteLevel => Ok(byte_level_bytes(token)),
        }
    }
}

impl fmt::Display for VocabEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VocabEncoding::Plain => "plain",
            VocabEncoding::ByteFallback => "byte-fallback",
            VocabEncoding::ByteLevel => "byte-level",
        };
        f.write_str(name)
    }
}

fn byte_fallback_bytes(token: &str) -> Result<Vec<u8>, String> {
    if token.len() == 6 && token.starts_with("<0x") && token.ends_with('>') {
        let byte = u8::from_str_radix(&token[3..5], 16)
            .map_err(|_| format!("invalid byte fallback token: {token}"))?;
        return Ok(vec![byte]);
    }
    Ok(token.replace('\u{2581}', " ").into_bytes())
}

fn byte_level_bytes(token: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(token.len());
    for c in token.chars() {
        match byte_level_char_to_byte(c as u32) {
            Some(b) => bytes.push(b),
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    bytes
}

/// Inverse of GPT-2's `bytes_to_unicode()`.
///
/// Printable bytes map to themselves; the 68 remaining bytes were assigned
/// codepoints 256.. in ascending byte order.
fn byte_level_char_to_byte(cp: u32) -> Option<u8> {
    match cp {
        0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF => Some(cp as u8),
        256..=288 => Some((cp - 256) as u8),
        289..=322 => Some((cp - 289) as u8 + 0x7F),
        323 => Some(0xAD),
        _ => None,
    }
}
