//! Ledger account identifiers derived from principals.
//!
//! An account id is a one-way function of `(principal, subaccount)`:
//!
//! ```text
//! hash     = sha224("\x0Aaccount-id" ‖ principal ‖ subaccount)
//! account  = crc32(hash) ‖ hash          (32 bytes, shown as 64 hex chars)
//! ```
//!
//! The session never stores an account id on its own; it is always recomputed
//! from the current principal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha224};

use crate::principal::Principal;

const ACCOUNT_DOMAIN_SEPARATOR: &[u8] = b"\x0Aaccount-id";

/// A 32-byte subaccount selector. The default (all zeros) is the main account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Subaccount(pub [u8; 32]);

/// Errors from parsing an account id.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccountIdError {
    #[error("account id must be 64 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("account id is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("account id checksum mismatch")]
    ChecksumMismatch,
}

/// A ledger account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId([u8; 32]);

impl AccountId {
    /// Main account of `principal`.
    pub fn from_principal(principal: &Principal) -> Self {
        Self::new(principal, &Subaccount::default())
    }

    pub fn new(principal: &Principal, subaccount: &Subaccount) -> Self {
        let mut hasher = Sha224::new();
        hasher.update(ACCOUNT_DOMAIN_SEPARATOR);
        hasher.update(principal.as_slice());
        hasher.update(subaccount.0);
        let hash = hasher.finalize();

        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&crc32fast::hash(&hash).to_be_bytes());
        bytes[4..].copy_from_slice(&hash);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(AccountIdError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        if bytes[..4] != crc32fast::hash(&bytes[4..]).to_be_bytes() {
            return Err(AccountIdError::ChecksumMismatch);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
