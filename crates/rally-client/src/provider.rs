//! Identity provider capability contract and the provider registry.
//!
//! Every authentication mechanism implements [`IdentityProvider`]. The
//! session never names a concrete provider: it asks a [`ProviderRegistry`]
//! to build one for a [`ProviderType`] and drives it through the trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rally_types::{Principal, ProviderType, UnknownProvider};

use crate::config::SessionConfig;
use crate::providers::{DelegationProvider, KeyPairProvider};

/// Errors reported by identity providers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider not initialized")]
    NotInitialized,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("login failed: {0}")]
    Login(String),
    #[error("logout failed: {0}")]
    Logout(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Io(e.to_string())
    }
}

/// Backend services a session holds actors for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceId {
    /// Campaigns, users, moderation.
    Main,
    /// Token ledger.
    Ledger,
    /// Media and document storage.
    Storage,
}

impl ServiceId {
    pub const ALL: [ServiceId; 3] = [ServiceId::Main, ServiceId::Ledger, ServiceId::Storage];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Main => "main",
            ServiceId::Ledger => "ledger",
            ServiceId::Storage => "storage",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend handle bound to one service and the caller identity.
///
/// Cheap to clone; the RPC layer ([`crate::backend`]) turns it into calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActorHandle {
    pub service: ServiceId,
    pub canister_id: String,
    pub host: String,
    pub caller: Principal,
}

impl ActorHandle {
    pub fn new(config: &SessionConfig, service: ServiceId, caller: Principal) -> Self {
        Self {
            service,
            canister_id: config.canisters.get(service).to_string(),
            host: config.backend_host.trim_end_matches('/').to_string(),
            caller,
        }
    }

    /// Endpoint for an update/query method on this actor's canister.
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/api/v2/canister/{}/call/{}", self.host, self.canister_id, method)
    }
}

/// Capability contract every identity provider satisfies.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Prepare the provider (load stored keys, etc). `false` means unusable.
    async fn initialize(&self) -> bool;

    /// Establish whatever connection the provider needs.
    async fn connect(&self) -> Result<(), ProviderError>;

    /// Interactive authentication.
    async fn login(&self) -> Result<(), ProviderError>;

    async fn logout(&self) -> Result<(), ProviderError>;

    async fn is_authenticated(&self) -> bool;

    async fn principal(&self) -> Option<Principal>;

    /// Build an actor for `service` bound to this provider's identity.
    async fn create_actor(&self, service: ServiceId) -> Result<ActorHandle, ProviderError>;
}

type ProviderConstructor = Arc<dyn Fn() -> Arc<dyn IdentityProvider> + Send + Sync>;

/// Maps provider discriminators to constructors.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: HashMap<ProviderType, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in key-pair and delegation providers.
    pub fn with_defaults(config: &SessionConfig) -> Self {
        let mut registry = Self::new();

        let cfg = config.clone();
        registry.register(ProviderType::KeyPair, move || {
            Arc::new(KeyPairProvider::new(&cfg)) as Arc<dyn IdentityProvider>
        });

        let cfg = config.clone();
        registry.register(ProviderType::Delegation, move || {
            Arc::new(DelegationProvider::new(&cfg)) as Arc<dyn IdentityProvider>
        });

        registry
    }

    pub fn register<F>(&mut self, kind: ProviderType, constructor: F)
    where
        F: Fn() -> Arc<dyn IdentityProvider> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    pub fn contains(&self, kind: ProviderType) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Build a fresh provider instance.
    pub fn create(&self, kind: ProviderType) -> Result<Arc<dyn IdentityProvider>, UnknownProvider> {
        self.constructors
            .get(&kind)
            .map(|ctor| ctor())
            .ok_or(UnknownProvider(kind.discriminant()))
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
