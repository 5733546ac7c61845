//! Ed25519 key-pair identity provider.
//!
//! The identity is a 32-byte seed kept hex-encoded in a key file. The
//! principal is self-authenticating: `sha224(der(public_key)) ‖ 0x02`.
//!
//! - `initialize` loads an existing seed; a missing file is fine (not yet
//!   logged in), a corrupt one makes the provider unusable.
//! - `login` generates and persists a seed if there is none.
//! - `logout` forgets the seed and deletes the file.

use std::path::PathBuf;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rally_types::Principal;

use super::ed25519_der;
use crate::config::SessionConfig;
use crate::provider::{ActorHandle, IdentityProvider, ProviderError, ServiceId};

#[derive(Default)]
struct KeyState {
    initialized: bool,
    key: Option<SigningKey>,
}

pub struct KeyPairProvider {
    config: SessionConfig,
    key_path: PathBuf,
    state: RwLock<KeyState>,
}

impl KeyPairProvider {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            config: config.clone(),
            key_path: config.key_path(),
            state: RwLock::new(KeyState::default()),
        }
    }

    async fn load_seed(&self) -> Result<Option<SigningKey>, ProviderError> {
        let text = match tokio::fs::read_to_string(&self.key_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut seed = [0u8; 32];
        hex::decode_to_slice(text.trim(), &mut seed)
            .map_err(|e| ProviderError::Io(format!("corrupt key file: {e}")))?;
        Ok(Some(SigningKey::from_bytes(&seed)))
    }

    async fn store_seed(&self, key: &SigningKey) -> Result<(), ProviderError> {
        if let Some(parent) = self.key_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.key_path, hex::encode(key.to_bytes())).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.key_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        Ok(())
    }

    fn current_principal(&self) -> Option<Principal> {
        let state = self.state.read();
        state
            .key
            .as_ref()
            .map(|k| Principal::self_authenticating(&ed25519_der(&k.verifying_key().to_bytes())))
    }
}

#[async_trait]
impl IdentityProvider for KeyPairProvider {
    async fn initialize(&self) -> bool {
        match self.load_seed().await {
            Ok(key) => {
                let mut state = self.state.write();
                state.initialized = true;
                state.key = key;
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.key_path.display(), "key-pair provider unusable: {e}");
                false
            }
        }
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if !self.state.read().initialized {
            return Err(ProviderError::NotInitialized);
        }
        Ok(())
    }

    async fn login(&self) -> Result<(), ProviderError> {
        {
            let state = self.state.read();
            if !state.initialized {
                return Err(ProviderError::NotInitialized);
            }
            if state.key.is_some() {
                return Ok(());
            }
        }

        let key = SigningKey::generate(&mut OsRng);
        self.store_seed(&key)
            .await
            .map_err(|e| ProviderError::Login(e.to_string()))?;
        tracing::info!(path = %self.key_path.display(), "generated new identity key");
        self.state.write().key = Some(key);
        Ok(())
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.state.write().key = None;
        match tokio::fs::remove_file(&self.key_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::Logout(e.to_string())),
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.state.read().key.is_some()
    }

    async fn principal(&self) -> Option<Principal> {
        self.current_principal()
    }

    async fn create_actor(&self, service: ServiceId) -> Result<ActorHandle, ProviderError> {
        let caller = self.current_principal().unwrap_or_else(Principal::anonymous);
        Ok(ActorHandle::new(&self.config, service, caller))
    }
}
