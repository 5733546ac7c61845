//! Shared identity and session types for rally.
//!
//! Pure leaf crate: no async, no I/O. The session state machine in
//! `rally-client` publishes these types; UI code reads them.
//!
//! # Key Types
//!
//! |--------------------|-----------------------------------------------|
//! | Type               | Purpose                                       |
//! |--------------------|-----------------------------------------------|
//! | [`Principal`]      | Opaque authenticated identity handle          |
//! | [`AccountId`]      | Ledger address derived from a principal       |
//! | [`ProviderType`]   | Persistable identity provider discriminator   |
//! | [`ProviderState`]  | Bootstrap pipeline state                      |
//! | [`UserProfile`]    | Profile record from the main backend          |
//! | [`Session`]        | Published session snapshot                    |
//! | [`SessionView`]    | Derived read-only projection for UI           |
//! |--------------------|-----------------------------------------------|

pub mod account;
pub mod principal;
pub mod profile;
pub mod provider;
pub mod session;

pub use account::{AccountId, AccountIdError, Subaccount};
pub use principal::{MAX_PRINCIPAL_LEN, Principal, PrincipalError};
pub use profile::{RpcResult, UserProfile};
pub use provider::{ProviderState, ProviderType, UnknownProvider};
pub use session::{Session, SessionView};

/// Current time as Unix nanoseconds.
pub fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
