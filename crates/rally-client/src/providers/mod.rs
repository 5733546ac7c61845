//! Built-in identity providers.
//!
//! |------------------------|-------------------------------------------------|
//! | Provider               | Identity source                                 |
//! |------------------------|-------------------------------------------------|
//! | [`KeyPairProvider`]    | Ed25519 seed stored in the data dir             |
//! | [`DelegationProvider`] | Delegation document written by an external app  |
//! |------------------------|-------------------------------------------------|

mod delegation;
mod keypair;

pub use delegation::{DelegationDocument, DelegationProvider};
pub use keypair::KeyPairProvider;

/// DER prefix of an Ed25519 `SubjectPublicKeyInfo`; the raw 32-byte key follows.
pub(crate) const ED25519_DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

pub(crate) fn ed25519_der(public_key: &[u8; 32]) -> Vec<u8> {
    let mut der = Vec::with_capacity(ED25519_DER_PREFIX.len() + 32);
    der.extend_from_slice(&ED25519_DER_PREFIX);
    der.extend_from_slice(public_key);
    der
}
