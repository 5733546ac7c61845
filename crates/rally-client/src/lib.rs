//! Rally session client
//!
//! Owns the identity bootstrap pipeline: pick an identity provider, drive it
//! through initialize → connect → configure, create backend actors, derive
//! the principal and account id, and load the caller's profile.
//!
//! ```text
//!   login(kind) ──▶ Initializing ──▶ Initialized ──▶ Connecting ──▶ Connected
//!                        │                                │
//!                        ▼                                ▼
//!                   Disconnected                     Disconnected
//!
//!   Connected ──▶ Configuring ──▶ Configured (principal, account id, profile)
//! ```
//!
//! Everything hangs off a [`SessionHandle`]; create one with
//! [`spawn_session`] (explicit dependencies) or [`spawn_session_with_config`].

pub mod backend;
pub mod config;
pub mod constants;
pub mod locks;
pub mod provider;
pub mod providers;
pub mod session;
pub mod storage;

pub use backend::{BackendError, HttpProfileBackend, ProfileBackend};
pub use config::{CanisterIds, ConfigError, SessionConfig};
pub use provider::{ActorHandle, IdentityProvider, ProviderError, ProviderRegistry, ServiceId};
pub use providers::{DelegationDocument, DelegationProvider, KeyPairProvider};
pub use session::{SessionError, SessionHandle, spawn_session, spawn_session_with_config};
pub use storage::{FileStorage, LocalStorage, MemoryStorage, StorageError};

pub use rally_types::{
    AccountId, Principal, ProviderState, ProviderType, Session, SessionView, UnknownProvider,
    UserProfile,
};
