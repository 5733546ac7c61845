//! Session bootstrap state machine.
//!
//! A [`SessionHandle`] owns the identity provider lifecycle and publishes the
//! resulting [`Session`] through a `watch` channel. Every committed state
//! transition is also sent to a supervisor task, which starts the phase the
//! new state calls for:
//!
//! ```text
//!   SessionHandle (Clone, Send+Sync)            supervisor (tokio task)
//!   ┌──────────────────────────┐  transitions  ┌─────────────────────────────┐
//!   │ .login() .logout()       │ ────────────▶ │ Idle + provider → initialize│
//!   │ .resume() .update()      │    mpsc       │ Initialized     → connect   │
//!   │ .view() .subscribe()     │               │ Connected       → configure │
//!   └──────────────────────────┘               └──────────────┬──────────────┘
//!                ▲                                            │ tokio::spawn
//!                │            watch<Session>                  ▼
//!                └──────────────────────────────────  phase (lock-guarded)
//! ```
//!
//! Each phase holds its [`PhaseLocks`] entry while it runs; a notification
//! for a phase already in flight is dropped. Every commit carries the epoch
//! the phase started under; `login`, `resume` and `logout` bump the epoch, so
//! a phase that finishes after the session moved on cannot write stale
//! identity data back.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::RwLock;
use rally_types::{
    ProviderState, ProviderType, Session, SessionView, UnknownProvider, UserProfile,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backend::{HttpProfileBackend, ProfileBackend};
use crate::config::SessionConfig;
use crate::constants::AUTH_PROVIDER_KEY;
use crate::locks::{Phase, PhaseLocks};
use crate::provider::{ActorHandle, IdentityProvider, ProviderError, ProviderRegistry, ServiceId};
use crate::storage::{FileStorage, LocalStorage, StorageError};

// ============================================================================
// Error Type
// ============================================================================

/// Errors returned from [`SessionHandle::login`] and [`SessionHandle::resume`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),
    #[error("provider failed to initialize")]
    InitializeFailed,
    /// The provider's own login error, unchanged.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("session was reset while logging in")]
    Superseded,
}

// ============================================================================
// Shared state
// ============================================================================

/// The provider currently owned by the session.
#[derive(Clone)]
struct Attached {
    kind: ProviderType,
    provider: Arc<dyn IdentityProvider>,
    epoch: u64,
}

struct SessionInner {
    registry: ProviderRegistry,
    backend: Arc<dyn ProfileBackend>,
    storage: Arc<dyn LocalStorage>,
    state_tx: watch::Sender<Session>,
    transitions: mpsc::UnboundedSender<ProviderState>,
    attached: RwLock<Option<Attached>>,
    actors: RwLock<HashMap<ServiceId, ActorHandle>>,
    locks: PhaseLocks,
    epoch: AtomicU64,
}

impl SessionInner {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new epoch; everything started under an older one goes stale.
    fn begin_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn state(&self) -> ProviderState {
        self.state_tx.borrow().provider_state
    }

    /// Apply `f` if `epoch` is still current, then notify the supervisor.
    ///
    /// The epoch check runs under the watch lock, so it cannot interleave
    /// with a concurrent reset.
    fn commit(&self, epoch: u64, f: impl FnOnce(&mut Session)) -> bool {
        self.commit_if(epoch, |_| true, f)
    }

    fn commit_if(
        &self,
        epoch: u64,
        guard: impl FnOnce(&Session) -> bool,
        f: impl FnOnce(&mut Session),
    ) -> bool {
        let mut state = ProviderState::Idle;
        let applied = self.state_tx.send_if_modified(|session| {
            if self.current_epoch() != epoch || !guard(session) {
                return false;
            }
            f(session);
            state = session.provider_state;
            true
        });
        if applied {
            debug!(%state, epoch, "session transition");
            let _ = self.transitions.send(state);
        } else {
            debug!(epoch, current = self.current_epoch(), "dropping stale commit");
        }
        applied
    }

    fn set_state(&self, epoch: u64, state: ProviderState) -> bool {
        self.commit(epoch, |s| s.provider_state = state)
    }

    /// Let go of a provider that a new login replaces.
    ///
    /// The stored choice is forgotten until the new login succeeds. A
    /// provider of the same kind shares its on-disk identity with the new
    /// instance, so only a different kind is logged out.
    async fn release(&self, replaced: Attached, next: ProviderType) {
        if let Err(e) = self.storage.remove(AUTH_PROVIDER_KEY) {
            warn!("failed to clear provider choice: {e}");
        }
        if replaced.kind == next {
            return;
        }
        info!(provider = %replaced.kind, "logging out replaced provider");
        if let Err(e) = replaced.provider.logout().await {
            warn!(provider = %replaced.kind, "provider logout failed: {e}");
        }
    }

    // ── Supervisor ───────────────────────────────────────────────────────

    /// Start whichever phase the current state calls for.
    fn dispatch(self: &Arc<Self>) {
        let Some(attached) = self.attached.read().clone() else {
            return;
        };
        let phase = match self.state() {
            ProviderState::Idle => Phase::Initialize,
            ProviderState::Initialized => Phase::Connect,
            ProviderState::Connected => Phase::Configure,
            _ => return,
        };
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_phase(phase, attached).await });
    }

    async fn run_phase(self: Arc<Self>, phase: Phase, attached: Attached) {
        {
            let Some(_guard) = self.locks.try_acquire(phase) else {
                debug!(%phase, "phase already running, dropping notification");
                return;
            };
            match phase {
                Phase::Initialize => self.initialize(&attached).await,
                Phase::Connect => self.connect(&attached).await,
                Phase::Configure => self.configure(&attached).await,
            }
        }

        // A stale phase commits nothing, so it cannot drive the next
        // transition. Notifications for the current epoch may have been
        // dropped while it held the lock.
        if self.current_epoch() != attached.epoch {
            debug!(%phase, epoch = attached.epoch, "stale phase released, re-dispatching");
            self.dispatch();
        }
    }

    /// Move from `from` to `to` if the session is still in `from`.
    fn enter(&self, epoch: u64, from: ProviderState, to: ProviderState) -> bool {
        self.commit_if(
            epoch,
            |s| s.provider_state == from,
            |s| s.provider_state = to,
        )
    }

    // ── Phases ───────────────────────────────────────────────────────────

    async fn initialize(&self, attached: &Attached) {
        let epoch = attached.epoch;
        if !self.enter(epoch, ProviderState::Idle, ProviderState::Initializing) {
            return;
        }
        if !attached.provider.initialize().await {
            warn!(provider = %attached.kind, "provider initialization failed");
            self.set_state(epoch, ProviderState::Disconnected);
            return;
        }
        self.set_state(epoch, ProviderState::Initialized);
    }

    async fn connect(&self, attached: &Attached) {
        let epoch = attached.epoch;
        if !self.enter(epoch, ProviderState::Initialized, ProviderState::Connecting) {
            return;
        }
        match attached.provider.connect().await {
            Ok(()) => {
                self.set_state(epoch, ProviderState::Connected);
            }
            Err(e) => {
                warn!(provider = %attached.kind, "provider connection failed: {e}");
                self.set_state(epoch, ProviderState::Disconnected);
            }
        }
    }

    async fn configure(&self, attached: &Attached) {
        let epoch = attached.epoch;
        if !self.enter(epoch, ProviderState::Connected, ProviderState::Configuring) {
            return;
        }

        let actors = self.create_actors(attached.provider.as_ref()).await;
        let main = actors.get(&ServiceId::Main).cloned();
        {
            let mut published = self.actors.write();
            if self.current_epoch() != epoch {
                return;
            }
            *published = actors;
        }

        let principal = if attached.provider.is_authenticated().await {
            attached.provider.principal().await
        } else {
            None
        };

        let Some(principal) = principal else {
            self.commit(epoch, |s| {
                s.clear_identity();
                s.provider_state = ProviderState::Configured;
            });
            return;
        };

        info!(%principal, "authenticated");
        if !self.commit(epoch, |s| s.set_principal(Some(principal))) {
            return;
        }

        let user = match main {
            Some(actor) => self.fetch_profile(&actor).await,
            None => None,
        };
        self.commit(epoch, |s| {
            s.set_user(user);
            s.provider_state = ProviderState::Configured;
        });
    }

    /// Build all service actors concurrently. Failures are logged and skipped.
    async fn create_actors(&self, provider: &dyn IdentityProvider) -> HashMap<ServiceId, ActorHandle> {
        let (main, ledger, storage) = futures::join!(
            provider.create_actor(ServiceId::Main),
            provider.create_actor(ServiceId::Ledger),
            provider.create_actor(ServiceId::Storage),
        );

        [(ServiceId::Main, main), (ServiceId::Ledger, ledger), (ServiceId::Storage, storage)]
            .into_iter()
            .filter_map(|(service, result)| match result {
                Ok(actor) => Some((service, actor)),
                Err(e) => {
                    warn!(%service, "failed to create actor: {e}");
                    None
                }
            })
            .collect()
    }

    /// Any failure, including a panicking backend, means "no profile".
    async fn fetch_profile(&self, actor: &ActorHandle) -> Option<UserProfile> {
        match AssertUnwindSafe(self.backend.find_me(actor)).catch_unwind().await {
            Ok(Ok(Some(profile))) => Some(profile),
            Ok(Ok(None)) => {
                debug!(caller = %actor.caller, "no profile registered");
                None
            }
            Ok(Err(e)) => {
                debug!(caller = %actor.caller, "profile lookup failed: {e}");
                None
            }
            Err(_) => {
                warn!(caller = %actor.caller, "profile lookup panicked");
                None
            }
        }
    }
}

async fn supervise(inner: Weak<SessionInner>, mut rx: mpsc::UnboundedReceiver<ProviderState>) {
    while let Some(observed) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!(%observed, "supervisor observed transition");
        inner.dispatch();
    }
    debug!("session supervisor shutting down");
}

// ============================================================================
// SessionHandle (public API)
// ============================================================================

/// Cloneable handle to the process-wide session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

/// Create a session and spawn its supervisor on the current tokio runtime.
pub fn spawn_session(
    registry: ProviderRegistry,
    backend: Arc<dyn ProfileBackend>,
    storage: Arc<dyn LocalStorage>,
) -> SessionHandle {
    let (state_tx, _) = watch::channel(Session::default());
    let (transitions, rx) = mpsc::unbounded_channel();
    let inner = Arc::new(SessionInner {
        registry,
        backend,
        storage,
        state_tx,
        transitions,
        attached: RwLock::new(None),
        actors: RwLock::new(HashMap::new()),
        locks: PhaseLocks::default(),
        epoch: AtomicU64::new(0),
    });
    tokio::spawn(supervise(Arc::downgrade(&inner), rx));
    SessionHandle { inner }
}

/// Session with the built-in providers, HTTP backend and file storage.
pub fn spawn_session_with_config(config: &SessionConfig) -> Result<SessionHandle, StorageError> {
    let storage = FileStorage::open(config.storage_path())?;
    Ok(spawn_session(
        ProviderRegistry::with_defaults(config),
        Arc::new(HttpProfileBackend::new()),
        Arc::new(storage),
    ))
}

impl SessionHandle {
    /// Log in with the given provider.
    ///
    /// Unknown providers fail before anything changes. Otherwise the current
    /// identity is cleared and any replaced provider is released first. An
    /// initialization failure leaves the session `Disconnected`; a provider
    /// login failure is returned as-is and leaves it `Initialized`. On
    /// success the provider is attached and the pipeline continues with
    /// connect and configure.
    pub async fn login(&self, kind: ProviderType) -> Result<(), SessionError> {
        let provider = self.inner.registry.create(kind)?;
        let inner = &self.inner;

        let epoch = inner.begin_epoch();
        let replaced = inner.attached.write().take();
        inner.actors.write().clear();
        info!(provider = %kind, epoch, "login");

        inner.commit(epoch, |s| {
            s.clear_identity();
            s.provider_type = None;
            s.provider_state = ProviderState::Initializing;
        });
        if let Some(replaced) = replaced {
            inner.release(replaced, kind).await;
        }

        if !provider.initialize().await {
            inner.set_state(epoch, ProviderState::Disconnected);
            return Err(SessionError::InitializeFailed);
        }
        inner.set_state(epoch, ProviderState::Initialized);

        provider.login().await?;

        if inner.current_epoch() != epoch {
            return Err(SessionError::Superseded);
        }
        if let Err(e) = inner.storage.set(AUTH_PROVIDER_KEY, &kind.discriminant().to_string()) {
            warn!("failed to persist provider choice: {e}");
        }
        *inner.attached.write() = Some(Attached { kind, provider, epoch });
        inner.commit(epoch, |s| {
            s.provider_type = Some(kind);
            s.provider_state = ProviderState::Initialized;
        });
        Ok(())
    }

    /// Resume with the provider persisted by the last successful login.
    ///
    /// Returns `Ok(false)` when nothing was stored. The provider is attached
    /// in `Idle`, which starts the initialize phase.
    pub fn resume(&self) -> Result<bool, SessionError> {
        let inner = &self.inner;
        let Some(raw) = inner.storage.get(AUTH_PROVIDER_KEY) else {
            return Ok(false);
        };

        let discriminant = raw.trim().parse::<u32>().unwrap_or(0);
        let created = ProviderType::try_from(discriminant)
            .and_then(|kind| Ok((kind, inner.registry.create(kind)?)));
        let (kind, provider) = match created {
            Ok(found) => found,
            Err(e) => {
                warn!(stored = %raw, "discarding stored provider choice");
                if let Err(e) = inner.storage.remove(AUTH_PROVIDER_KEY) {
                    warn!("failed to clear provider choice: {e}");
                }
                return Err(e.into());
            }
        };

        let epoch = inner.begin_epoch();
        info!(provider = %kind, epoch, "resuming session");
        *inner.attached.write() = Some(Attached { kind, provider, epoch });
        inner.commit(epoch, |s| {
            s.clear_identity();
            s.provider_type = Some(kind);
            s.provider_state = ProviderState::Idle;
        });
        Ok(true)
    }

    /// Clear identity, release the provider and forget the stored choice.
    ///
    /// The provider's own logout is best-effort: failures are logged.
    pub async fn logout(&self) {
        let inner = &self.inner;
        let epoch = inner.begin_epoch();
        let attached = inner.attached.write().take();
        inner.actors.write().clear();

        inner.commit(epoch, |s| {
            s.clear_identity();
            s.provider_type = None;
            s.provider_state = ProviderState::Idle;
        });
        if let Err(e) = inner.storage.remove(AUTH_PROVIDER_KEY) {
            warn!("failed to clear provider choice: {e}");
        }

        if let Some(attached) = attached {
            info!(provider = %attached.kind, "logout");
            if let Err(e) = attached.provider.logout().await {
                warn!(provider = %attached.kind, "provider logout failed: {e}");
            }
        }
    }

    /// Replace the local profile without refetching. Ignored when no
    /// principal is set.
    pub fn update(&self, profile: UserProfile) {
        // `set_user` also reports true for an identical profile, so watchers
        // are notified on every accepted update.
        let applied = self
            .inner
            .state_tx
            .send_if_modified(|s| s.set_user(Some(profile)));
        if !applied {
            warn!("ignoring profile update without an authenticated principal");
        }
    }

    /// Ask the supervisor to look at the current state again.
    pub fn reevaluate(&self) {
        let _ = self.inner.transitions.send(self.inner.state());
    }

    pub fn state(&self) -> ProviderState {
        self.inner.state()
    }

    pub fn snapshot(&self) -> Session {
        self.inner.state_tx.borrow().clone()
    }

    pub fn view(&self) -> SessionView {
        self.inner.state_tx.borrow().view()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the session satisfies `predicate`.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&Session) -> bool) -> Session {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| predicate(s)).await {
            Ok(session) => session.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Wait until the pipeline reaches `Configured` or `Disconnected`.
    pub async fn settled(&self) -> Session {
        self.wait_for(|s| s.provider_state.is_settled()).await
    }

    /// Actor published by the last configure phase.
    pub fn actor(&self, service: ServiceId) -> Option<ActorHandle> {
        self.inner.actors.read().get(&service).cloned()
    }
}

// ============================================================================
// Tests
// ============================================================================
