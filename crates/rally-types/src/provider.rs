//! Provider discriminators and the bootstrap state enum.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Raised when a discriminator maps to no provider implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider")]
pub struct UnknownProvider(pub u32);

/// Which identity provider implementation a session uses.
///
/// The numeric discriminant is what gets persisted for session resumption,
/// so existing values must never be renumbered.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[repr(u32)]
pub enum ProviderType {
    /// Locally generated Ed25519 key.
    #[strum(to_string = "keypair", serialize = "key")]
    KeyPair = 1,
    /// Delegation issued by an external signer.
    Delegation = 2,
}

impl ProviderType {
    pub const ALL: [ProviderType; 2] = [ProviderType::KeyPair, ProviderType::Delegation];

    pub fn discriminant(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ProviderType {
    type Error = UnknownProvider;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|p| p.discriminant() == value)
            .ok_or(UnknownProvider(value))
    }
}

/// Bootstrap pipeline state.
///
/// ```text
/// Idle → Initializing → Initialized → Connecting → Connected → Configuring → Configured
///             │                            │
///             └──────────► Disconnected ◄──┘
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderState {
    #[default]
    Idle,
    Initializing,
    Disconnected,
    Initialized,
    Connecting,
    Connected,
    Configuring,
    Configured,
}

impl ProviderState {
    /// True once the pipeline has stopped on its own (success or failure).
    pub fn is_settled(self) -> bool {
        matches!(self, ProviderState::Configured | ProviderState::Disconnected)
    }
}
