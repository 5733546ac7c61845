//! End-to-end tests of the session bootstrap pipeline against scripted
//! providers and backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rally_client::constants::AUTH_PROVIDER_KEY;
use rally_client::{
    AccountId, ActorHandle, BackendError, IdentityProvider, LocalStorage, MemoryStorage,
    Principal, ProfileBackend, ProviderError, ProviderRegistry, ProviderState, ProviderType,
    ServiceId, Session, SessionConfig, SessionError, SessionHandle, UserProfile, spawn_session,
};
use tokio::sync::Notify;

// ============================================================================
// Scripted collaborators
// ============================================================================

#[derive(Default)]
struct Calls {
    initialize: AtomicUsize,
    connect: AtomicUsize,
    login: AtomicUsize,
    logout: AtomicUsize,
}

struct StubProvider {
    initialize_ok: bool,
    connect_error: Option<ProviderError>,
    login_error: Option<ProviderError>,
    logout_error: Option<ProviderError>,
    principal: Option<Principal>,
    calls: Calls,
}

impl StubProvider {
    fn authenticated(principal: Principal) -> Self {
        Self {
            initialize_ok: true,
            connect_error: None,
            login_error: None,
            logout_error: None,
            principal: Some(principal),
            calls: Calls::default(),
        }
    }

    fn anonymous() -> Self {
        Self {
            principal: None,
            ..Self::authenticated(Principal::anonymous())
        }
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn initialize(&self) -> bool {
        self.calls.initialize.fetch_add(1, Ordering::SeqCst);
        self.initialize_ok
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        self.calls.connect.fetch_add(1, Ordering::SeqCst);
        self.connect_error.clone().map_or(Ok(()), Err)
    }

    async fn login(&self) -> Result<(), ProviderError> {
        self.calls.login.fetch_add(1, Ordering::SeqCst);
        self.login_error.clone().map_or(Ok(()), Err)
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.calls.logout.fetch_add(1, Ordering::SeqCst);
        self.logout_error.clone().map_or(Ok(()), Err)
    }

    async fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    async fn principal(&self) -> Option<Principal> {
        self.principal.clone()
    }

    async fn create_actor(&self, service: ServiceId) -> Result<ActorHandle, ProviderError> {
        let caller = self.principal.clone().unwrap_or_else(Principal::anonymous);
        Ok(ActorHandle::new(&SessionConfig::default(), service, caller))
    }
}

enum Reply {
    /// Profile named after the caller's principal text.
    Profile,
    Named(&'static str),
    Missing,
    Fail,
    Panic,
}

struct StubBackend {
    reply: Reply,
    gate: Option<Notify>,
    calls: AtomicUsize,
}

impl StubBackend {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn gated(reply: Reply) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new(reply)
        }
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl ProfileBackend for StubBackend {
    async fn find_me(&self, actor: &ActorHandle) -> Result<Option<UserProfile>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.reply {
            Reply::Profile => Ok(Some(UserProfile::new(7, actor.caller.to_text()))),
            Reply::Named(name) => Ok(Some(UserProfile::new(1, name))),
            Reply::Missing => Ok(None),
            Reply::Fail => Err(BackendError::Remote("User not found".into())),
            Reply::Panic => panic!("backend exploded"),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    session: SessionHandle,
    storage: Arc<MemoryStorage>,
    backend: Arc<StubBackend>,
}

fn harness(providers: Vec<(ProviderType, Arc<StubProvider>)>, backend: StubBackend) -> Harness {
    let mut registry = ProviderRegistry::new();
    for (kind, provider) in providers {
        registry.register(kind, move || provider.clone() as Arc<dyn IdentityProvider>);
    }
    let storage = Arc::new(MemoryStorage::new());
    let backend = Arc::new(backend);
    let session = spawn_session(registry, backend.clone(), storage.clone());
    Harness {
        session,
        storage,
        backend,
    }
}

fn principal(tag: u8) -> Principal {
    Principal::from_slice(&[tag, 0xca, 0xfe, 0x01]).unwrap()
}

async fn settled(session: &SessionHandle) -> Session {
    tokio::time::timeout(Duration::from_secs(5), session.settled())
        .await
        .expect("pipeline did not settle")
}

async fn wait_until(session: &SessionHandle, predicate: impl FnMut(&Session) -> bool) -> Session {
    tokio::time::timeout(Duration::from_secs(5), session.wait_for(predicate))
        .await
        .expect("condition never reached")
}

async fn wait_for_calls(counter: &AtomicUsize, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counter.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("call never happened");
}

/// Give spawned phases a chance to run (or not).
async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn test_login_runs_full_pipeline() {
    let p = principal(1);
    let provider = Arc::new(StubProvider::authenticated(p.clone()));
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    let session = settled(&h.session).await;

    assert_eq!(session.provider_state, ProviderState::Configured);
    assert_eq!(session.provider_type, Some(ProviderType::KeyPair));
    assert_eq!(session.principal(), Some(&p));
    assert_eq!(session.account_id(), Some(&AccountId::from_principal(&p)));
    assert_eq!(session.user().map(|u| u.name.clone()), Some(p.to_text()));

    let view = h.session.view();
    assert!(view.is_authenticated);
    assert!(view.is_logged);

    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY).as_deref(), Some("1"));
    for service in ServiceId::ALL {
        assert_eq!(h.session.actor(service).unwrap().caller, p);
    }
    assert_eq!(StubProvider::count(&provider.calls.login), 1);
    assert_eq!(StubProvider::count(&provider.calls.connect), 1);
}

#[tokio::test]
async fn test_alice_end_to_end() {
    let p = principal(42);
    let h = harness(
        vec![(ProviderType::KeyPair, Arc::new(StubProvider::authenticated(p.clone())))],
        StubBackend::new(Reply::Named("Alice")),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    let session = settled(&h.session).await;

    assert_eq!(session.provider_state, ProviderState::Configured);
    assert_eq!(session.principal(), Some(&p));
    assert_eq!(session.account_id(), Some(&AccountId::from_principal(&p)));
    assert_eq!(session.user().map(|u| u.name.as_str()), Some("Alice"));
}

#[tokio::test]
async fn test_unknown_provider_changes_nothing() {
    let provider = Arc::new(StubProvider::authenticated(principal(1)));
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    let err = h.session.login(ProviderType::Delegation).await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownProvider(_)));
    assert_eq!(err.to_string(), "Unknown provider");

    assert_eq!(h.session.snapshot(), Session::default());
    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY), None);
    assert_eq!(StubProvider::count(&provider.calls.initialize), 0);
}

#[tokio::test]
async fn test_initialize_failure_disconnects() {
    let provider = Arc::new(StubProvider {
        initialize_ok: false,
        ..StubProvider::authenticated(principal(1))
    });
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    let err = h.session.login(ProviderType::KeyPair).await.unwrap_err();
    assert!(matches!(err, SessionError::InitializeFailed));
    assert_eq!(h.session.state(), ProviderState::Disconnected);
    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY), None);
    assert_eq!(StubProvider::count(&provider.calls.login), 0);
}

#[tokio::test]
async fn test_login_error_propagates_verbatim() {
    let provider = Arc::new(StubProvider {
        login_error: Some(ProviderError::Login("user cancelled".into())),
        ..StubProvider::authenticated(principal(1))
    });
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    let err = h.session.login(ProviderType::KeyPair).await.unwrap_err();
    assert_eq!(err.to_string(), "login failed: user cancelled");
    match err {
        SessionError::Provider(ProviderError::Login(msg)) => assert_eq!(msg, "user cancelled"),
        other => panic!("unexpected error: {other:?}"),
    }

    quiesce().await;
    // Provider was never attached, so the pipeline holds at Initialized.
    assert_eq!(h.session.state(), ProviderState::Initialized);
    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY), None);
    assert_eq!(StubProvider::count(&provider.calls.connect), 0);
}

#[tokio::test]
async fn test_connect_failure_disconnects() {
    let provider = Arc::new(StubProvider {
        connect_error: Some(ProviderError::Connection("refused".into())),
        ..StubProvider::authenticated(principal(1))
    });
    let h = harness(
        vec![(ProviderType::KeyPair, provider)],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    let session = settled(&h.session).await;
    assert_eq!(session.provider_state, ProviderState::Disconnected);
    assert!(session.principal().is_none());
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Configure
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_provider_clears_identity() {
    let h = harness(
        vec![(ProviderType::KeyPair, Arc::new(StubProvider::anonymous()))],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    let session = settled(&h.session).await;
    assert_eq!(session.provider_state, ProviderState::Configured);
    assert!(session.principal().is_none());
    assert!(session.account_id().is_none());
    assert!(session.user().is_none());
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_profile_lookup_failures_leave_user_empty() {
    for reply in [Reply::Missing, Reply::Fail, Reply::Panic] {
        let p = principal(2);
        let h = harness(
            vec![(ProviderType::KeyPair, Arc::new(StubProvider::authenticated(p.clone())))],
            StubBackend::new(reply),
        );

        h.session.login(ProviderType::KeyPair).await.unwrap();
        let session = settled(&h.session).await;
        assert_eq!(session.provider_state, ProviderState::Configured);
        assert_eq!(session.principal(), Some(&p));
        assert!(session.account_id().is_some());
        assert!(session.user().is_none());
        assert!(!h.session.view().is_logged);
    }
}

#[tokio::test]
async fn test_account_id_derived_before_configured() {
    let p = principal(3);
    let h = harness(
        vec![(ProviderType::KeyPair, Arc::new(StubProvider::authenticated(p.clone())))],
        StubBackend::gated(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    wait_for_calls(&h.backend.calls, 1).await;

    // Profile fetch is blocked: principal and account id are already public.
    let mid = h.session.snapshot();
    assert_eq!(mid.provider_state, ProviderState::Configuring);
    assert_eq!(mid.principal(), Some(&p));
    assert_eq!(mid.account_id(), Some(&AccountId::from_principal(&p)));
    assert!(mid.user().is_none());

    h.backend.release();
    let done = settled(&h.session).await;
    assert_eq!(done.provider_state, ProviderState::Configured);
    assert!(done.user().is_some());
}

#[tokio::test]
async fn test_duplicate_notifications_do_not_rerun_phases() {
    let provider = Arc::new(StubProvider::authenticated(principal(4)));
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    settled(&h.session).await;
    for _ in 0..20 {
        h.session.reevaluate();
    }
    quiesce().await;

    assert_eq!(StubProvider::count(&provider.calls.initialize), 1);
    assert_eq!(StubProvider::count(&provider.calls.connect), 1);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.state(), ProviderState::Configured);
}

// ============================================================================
// Logout
// ============================================================================

#[tokio::test]
async fn test_logout_clears_everything() {
    let provider = Arc::new(StubProvider::authenticated(principal(5)));
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    settled(&h.session).await;
    h.session.logout().await;

    let session = h.session.snapshot();
    assert_eq!(session, Session::default());
    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY), None);
    assert!(h.session.actor(ServiceId::Main).is_none());
    assert_eq!(StubProvider::count(&provider.calls.logout), 1);

    quiesce().await;
    assert_eq!(StubProvider::count(&provider.calls.initialize), 1);
}

#[tokio::test]
async fn test_logout_swallows_provider_error() {
    let provider = Arc::new(StubProvider {
        logout_error: Some(ProviderError::Logout("signer offline".into())),
        ..StubProvider::authenticated(principal(6))
    });
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    settled(&h.session).await;
    h.session.logout().await;

    assert!(!h.session.view().is_authenticated);
    assert_eq!(h.session.state(), ProviderState::Idle);
}

#[tokio::test]
async fn test_logout_during_configure_discards_late_result() {
    let provider = Arc::new(StubProvider::authenticated(principal(7)));
    let h = harness(
        vec![(ProviderType::KeyPair, provider)],
        StubBackend::gated(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    wait_for_calls(&h.backend.calls, 1).await;

    h.session.logout().await;
    h.backend.release();
    quiesce().await;

    let session = h.session.snapshot();
    assert_eq!(session.provider_state, ProviderState::Idle);
    assert!(session.principal().is_none());
    assert!(session.account_id().is_none());
    assert!(session.user().is_none());
}

#[tokio::test]
async fn test_logout_without_provider() {
    let h = harness(vec![], StubBackend::new(Reply::Profile));
    h.session.logout().await;
    assert_eq!(h.session.snapshot(), Session::default());
}

#[tokio::test]
async fn test_relogin_after_stale_configure_completes() {
    let p = principal(12);
    let h = harness(
        vec![(ProviderType::KeyPair, Arc::new(StubProvider::authenticated(p.clone())))],
        StubBackend::gated(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    wait_for_calls(&h.backend.calls, 1).await;

    // The first configure is still blocked on the backend and holds its lock.
    h.session.logout().await;
    h.session.login(ProviderType::KeyPair).await.unwrap();
    wait_until(&h.session, |s| s.provider_state == ProviderState::Connected).await;

    h.backend.release();
    wait_for_calls(&h.backend.calls, 2).await;
    h.backend.release();

    let session = settled(&h.session).await;
    assert_eq!(session.provider_state, ProviderState::Configured);
    assert_eq!(session.principal(), Some(&p));
    assert_eq!(session.user().map(|u| u.name.clone()), Some(p.to_text()));
}

// ============================================================================
// Re-login, update, resume
// ============================================================================

#[tokio::test]
async fn test_switching_provider_refreshes_identity() {
    let (first, second) = (principal(8), principal(9));
    let h = harness(
        vec![
            (ProviderType::KeyPair, Arc::new(StubProvider::authenticated(first.clone()))),
            (ProviderType::Delegation, Arc::new(StubProvider::authenticated(second.clone()))),
        ],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    settled(&h.session).await;

    h.session.login(ProviderType::Delegation).await.unwrap();
    let session = wait_until(&h.session, |s| {
        s.provider_state == ProviderState::Configured && s.principal() == Some(&second)
    })
    .await;

    assert_eq!(session.provider_type, Some(ProviderType::Delegation));
    assert_eq!(session.account_id(), Some(&AccountId::from_principal(&second)));
    assert_eq!(session.user().map(|u| u.name.clone()), Some(second.to_text()));
    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY).as_deref(), Some("2"));
}

#[tokio::test]
async fn test_update_replaces_profile_without_refetch() {
    let h = harness(
        vec![(ProviderType::KeyPair, Arc::new(StubProvider::authenticated(principal(10))))],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    settled(&h.session).await;

    let mut edited = UserProfile::new(7, "Renamed");
    edited.country = Some("NZ".into());
    h.session.update(edited.clone());

    assert_eq!(h.session.view().user, Some(edited));
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resume_uses_stored_provider() {
    let p = principal(11);
    let provider = Arc::new(StubProvider::authenticated(p.clone()));
    let h = harness(
        vec![(ProviderType::Delegation, provider.clone())],
        StubBackend::new(Reply::Profile),
    );
    h.storage.set(AUTH_PROVIDER_KEY, "2").unwrap();

    assert!(h.session.resume().unwrap());
    let session = settled(&h.session).await;

    assert_eq!(session.provider_state, ProviderState::Configured);
    assert_eq!(session.principal(), Some(&p));
    assert_eq!(StubProvider::count(&provider.calls.initialize), 1);
    assert_eq!(StubProvider::count(&provider.calls.login), 0);
}

#[tokio::test]
async fn test_resume_discards_unknown_choice() {
    for stored in ["99", "not-a-number", "1"] {
        // Only delegation is registered, so "1" is unknown here too.
        let h = harness(
            vec![(ProviderType::Delegation, Arc::new(StubProvider::anonymous()))],
            StubBackend::new(Reply::Profile),
        );
        h.storage.set(AUTH_PROVIDER_KEY, stored).unwrap();

        let err = h.session.resume().unwrap_err();
        assert!(matches!(err, SessionError::UnknownProvider(_)), "{stored}");
        assert_eq!(h.storage.get(AUTH_PROVIDER_KEY), None);
        assert_eq!(h.session.state(), ProviderState::Idle);
    }
}

#[tokio::test]
async fn test_resume_while_pipeline_in_flight() {
    let p = principal(13);
    let provider = Arc::new(StubProvider::authenticated(p.clone()));
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::gated(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    wait_for_calls(&h.backend.calls, 1).await;

    assert!(h.session.resume().unwrap());
    wait_until(&h.session, |s| s.provider_state == ProviderState::Connected).await;

    h.backend.release();
    wait_for_calls(&h.backend.calls, 2).await;
    h.backend.release();

    let session = settled(&h.session).await;
    assert_eq!(session.provider_state, ProviderState::Configured);
    assert_eq!(session.principal(), Some(&p));
    assert!(session.user().is_some());
    assert_eq!(StubProvider::count(&provider.calls.initialize), 2);
}

#[tokio::test]
async fn test_failed_relogin_drops_previous_identity() {
    let first = Arc::new(StubProvider::authenticated(principal(14)));
    let broken = Arc::new(StubProvider {
        initialize_ok: false,
        ..StubProvider::authenticated(principal(15))
    });
    let h = harness(
        vec![
            (ProviderType::KeyPair, first.clone()),
            (ProviderType::Delegation, broken),
        ],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    settled(&h.session).await;

    let err = h.session.login(ProviderType::Delegation).await.unwrap_err();
    assert!(matches!(err, SessionError::InitializeFailed));

    let session = h.session.snapshot();
    assert_eq!(session.provider_state, ProviderState::Disconnected);
    assert_eq!(session.provider_type, None);
    assert!(session.principal().is_none());
    assert!(session.account_id().is_none());
    assert!(session.user().is_none());
    assert!(!h.session.view().is_authenticated);
    assert!(h.session.actor(ServiceId::Main).is_none());

    assert_eq!(StubProvider::count(&first.calls.logout), 1);
    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY), None);
}

#[tokio::test]
async fn test_relogin_same_kind_keeps_provider_identity() {
    let p = principal(16);
    let provider = Arc::new(StubProvider::authenticated(p.clone()));
    let h = harness(
        vec![(ProviderType::KeyPair, provider.clone())],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    settled(&h.session).await;
    h.session.login(ProviderType::KeyPair).await.unwrap();
    let session = settled(&h.session).await;

    assert_eq!(session.provider_state, ProviderState::Configured);
    assert_eq!(session.principal(), Some(&p));
    assert_eq!(StubProvider::count(&provider.calls.logout), 0);
    assert_eq!(h.storage.get(AUTH_PROVIDER_KEY).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_identical_update_still_notifies_watchers() {
    let p = principal(17);
    let h = harness(
        vec![(ProviderType::KeyPair, Arc::new(StubProvider::authenticated(p.clone())))],
        StubBackend::new(Reply::Profile),
    );

    h.session.login(ProviderType::KeyPair).await.unwrap();
    let session = settled(&h.session).await;
    let current = session.user().cloned().unwrap();

    let mut rx = h.session.subscribe();
    h.session.update(current.clone());

    assert!(rx.has_changed().unwrap());
    assert_eq!(h.session.view().user, Some(current));
}
