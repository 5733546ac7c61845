//! Delegation identity provider.
//!
//! An external signer (browser extension, wallet app) writes a delegation
//! document granting a public key the right to act until `expiration`:
//!
//! ```json
//! { "public_key": "302a3005…", "expiration": 1767225600000000000, "targets": [] }
//! ```
//!
//! This provider only reads it. `logout` forgets the loaded document but
//! leaves the file alone; the signer owns it.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use rally_types::{Principal, now_nanos};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::provider::{ActorHandle, IdentityProvider, ProviderError, ServiceId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationDocument {
    /// Hex of the DER-encoded delegated public key.
    pub public_key: String,
    /// Expiry (Unix nanos).
    pub expiration: u64,
    /// Canister ids the delegation is limited to; empty means any.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl DelegationDocument {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }

    pub fn allows(&self, canister_id: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| t == canister_id)
    }
}

struct Loaded {
    document: DelegationDocument,
    principal: Principal,
}

pub struct DelegationProvider {
    config: SessionConfig,
    path: PathBuf,
    loaded: RwLock<Option<Loaded>>,
}

impl DelegationProvider {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            config: config.clone(),
            path: config.delegation_path(),
            loaded: RwLock::new(None),
        }
    }

    async fn read_document(&self) -> Result<Loaded, ProviderError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let document: DelegationDocument = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Io(format!("malformed delegation: {e}")))?;
        let der = hex::decode(&document.public_key)
            .map_err(|e| ProviderError::Io(format!("malformed public key: {e}")))?;
        let principal = Principal::self_authenticating(&der);
        Ok(Loaded { document, principal })
    }

    fn active_principal(&self) -> Option<Principal> {
        let loaded = self.loaded.read();
        loaded
            .as_ref()
            .filter(|l| !l.document.is_expired(now_nanos()))
            .map(|l| l.principal.clone())
    }
}

#[async_trait]
impl IdentityProvider for DelegationProvider {
    async fn initialize(&self) -> bool {
        match self.read_document().await {
            Ok(loaded) => {
                tracing::debug!(principal = %loaded.principal, "loaded delegation");
                *self.loaded.write() = Some(loaded);
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "delegation provider unusable: {e}");
                false
            }
        }
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if self.loaded.read().is_none() {
            return Err(ProviderError::NotInitialized);
        }
        Ok(())
    }

    async fn login(&self) -> Result<(), ProviderError> {
        let loaded = self.loaded.read();
        let Some(loaded) = loaded.as_ref() else {
            return Err(ProviderError::NotInitialized);
        };
        if loaded.document.is_expired(now_nanos()) {
            return Err(ProviderError::Login("delegation expired".into()));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        *self.loaded.write() = None;
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.active_principal().is_some()
    }

    async fn principal(&self) -> Option<Principal> {
        self.active_principal()
    }

    async fn create_actor(&self, service: ServiceId) -> Result<ActorHandle, ProviderError> {
        let canister_id = self.config.canisters.get(service);
        let covered = self
            .loaded
            .read()
            .as_ref()
            .is_none_or(|l| l.document.allows(canister_id));
        if !covered {
            return Err(ProviderError::Connection(format!(
                "delegation does not cover {service} ({canister_id})"
            )));
        }
        let caller = self.active_principal().unwrap_or_else(Principal::anonymous);
        Ok(ActorHandle::new(&self.config, service, caller))
    }
}
