//! Principal type and its textual encoding.
//!
//! A `Principal` is the opaque identity handle a provider hands back once the
//! user is authenticated. On the wire it is a short byte string (at most 29
//! bytes). For humans it is rendered as lowercase base32 of
//! `crc32(bytes) ‖ bytes`, split into dash-separated groups of five:
//!
//! ```text
//! bytes [0x04]      → "2vxsx-fae"       (anonymous)
//! bytes []          → "aaaaa-aa"        (management)
//! sha224(der) ‖ 02  → "xxxxx-xxxxx-…"   (self-authenticating)
//! ```
//!
//! The checksum makes typos detectable: parsing validates it and rejects
//! non-canonical text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha224};

/// Longest principal the platform accepts.
pub const MAX_PRINCIPAL_LEN: usize = 29;

const ANONYMOUS_TAG: u8 = 0x04;
const SELF_AUTHENTICATING_TAG: u8 = 0x02;
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Errors from constructing or parsing a principal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrincipalError {
    #[error("principal is {0} bytes, maximum is {MAX_PRINCIPAL_LEN}")]
    TooLong(usize),
    #[error("invalid character in principal text")]
    InvalidCharacter,
    #[error("principal text is too short")]
    TooShort,
    #[error("principal checksum mismatch")]
    ChecksumMismatch,
    #[error("principal text is not in canonical form (expected {0})")]
    NotCanonical(String),
}

/// An opaque authenticated-identity handle.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(Vec<u8>);

impl Principal {
    /// Build a principal from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrincipalError> {
        if bytes.len() > MAX_PRINCIPAL_LEN {
            return Err(PrincipalError::TooLong(bytes.len()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// The identity of an unauthenticated caller.
    pub fn anonymous() -> Self {
        Self(vec![ANONYMOUS_TAG])
    }

    /// Principal owned by a public key: `sha224(der_public_key) ‖ 0x02`.
    pub fn self_authenticating(der_public_key: &[u8]) -> Self {
        let mut bytes = Sha224::digest(der_public_key).to_vec();
        bytes.push(SELF_AUTHENTICATING_TAG);
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == [ANONYMOUS_TAG]
    }

    /// Checksummed, dash-grouped base32 text form.
    pub fn to_text(&self) -> String {
        let mut payload = Vec::with_capacity(4 + self.0.len());
        payload.extend_from_slice(&crc32fast::hash(&self.0).to_be_bytes());
        payload.extend_from_slice(&self.0);

        let encoded = base32_encode(&payload);
        let mut text = String::with_capacity(encoded.len() + encoded.len() / 5);
        for (i, c) in encoded.chars().enumerate() {
            if i > 0 && i % 5 == 0 {
                text.push('-');
            }
            text.push(c);
        }
        text
    }
}

impl FromStr for Principal {
    type Err = PrincipalError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let compact: String = text
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let payload = base32_decode(&compact).ok_or(PrincipalError::InvalidCharacter)?;
        if payload.len() < 4 {
            return Err(PrincipalError::TooShort);
        }

        let (checksum, bytes) = payload.split_at(4);
        let principal = Self::from_slice(bytes)?;
        if checksum != crc32fast::hash(bytes).to_be_bytes() {
            return Err(PrincipalError::ChecksumMismatch);
        }

        let canonical = principal.to_text();
        if canonical != text.to_ascii_lowercase() {
            return Err(PrincipalError::NotCanonical(canonical));
        }
        Ok(principal)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.to_text())
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ── base32 (RFC 4648, lowercase, unpadded) ──────────────────────────────────

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for c in text.bytes() {
        let value = BASE32_ALPHABET.iter().position(|&a| a == c)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Some(out)
}

// ============================================================================
// Tests
// ============================================================================
