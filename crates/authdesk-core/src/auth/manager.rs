//! The session manager: owns the client's belief about who is signed in.
//!
//! It is responsible for:
//! - Restoring the session from the token store at startup (`initialize`)
//! - Signing in with tokens handed over by the identity provider (`login`)
//! - Best-effort sign-out that always clears local state (`logout`)
//! - Refreshing the access token, shared with the API client's 401 recovery
//!
//! `SessionManager` is constructed once and cloned into every consumer;
//! clones share the same state. Consumers read with `snapshot()` or follow
//! changes through `subscribe()`.
//!
//! # Staleness
//!
//! Every logout and every login bumps a generation counter. Verify and
//! refresh results are tagged with the generation they started in, and a
//! result that arrives after the session changed hands is dropped. A late
//! restore can neither resurrect a logged-out session nor end or overwrite
//! a newer login.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::api::Transport;
use crate::models::User;

use super::backend::AuthApi;
use super::refresh::RefreshCoordinator;
use super::{ActiveSession, AuthError, SessionEvent, SessionState, SignInReason, TokenStore};

/// Shown after a failed startup restore. The underlying reason is only logged.
const SESSION_EXPIRED_MESSAGE: &str = "Session expired";

/// Buffered session events per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 16;

struct Inner {
    store: Arc<dyn TokenStore>,
    auth: AuthApi,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    refresh: RefreshCoordinator,
    initialized: OnceCell<()>,
    login_lock: Mutex<()>,
    generation: AtomicU64,
}

/// Clone is cheap - all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                store,
                auth: AuthApi::new(transport),
                state,
                events,
                refresh: RefreshCoordinator::default(),
                initialized: OnceCell::new(),
                login_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    // ===== Read / subscribe =====

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once the state is no longer loading.
    pub async fn wait_until_ready(&self) -> SessionState {
        let mut rx = self.subscribe();
        let ready = rx.wait_for(|state| !state.is_loading()).await;
        match ready {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    // ===== Lifecycle operations =====

    /// Restore the session from the token store. Runs at most once per
    /// manager; later or concurrent calls wait for the first run.
    pub async fn initialize(&self) -> SessionState {
        self.inner
            .initialized
            .get_or_init(|| self.run_initialize())
            .await;
        self.snapshot()
    }

    async fn run_initialize(&self) {
        let generation = self.generation();
        let refresh_token = self.stored_refresh_token();

        let Some(access_token) = self.stored_access_token() else {
            info!("No stored session");
            self.set_state(SessionState::Unauthenticated { error: None });
            return;
        };

        self.set_state(SessionState::Verifying);
        match self.inner.auth.verify(&access_token).await {
            Ok(user) => {
                if self.is_stale(generation) {
                    debug!("Discarding verify result from a superseded session");
                    return;
                }
                info!(user_id = user.id, "Restored stored session");
                self.set_state(SessionState::Authenticated(ActiveSession {
                    user: Some(user),
                    access_token,
                    refresh_token,
                }));
                return;
            }
            Err(err) => {
                warn!(error = %err, "Stored access token failed verification");
            }
        }

        if self.is_stale(generation) {
            return;
        }

        if let Some(refresh_token) = refresh_token {
            let expired = Some(SESSION_EXPIRED_MESSAGE.to_string());
            match self.refresh_shared(&refresh_token, expired).await {
                Ok(access_token) => {
                    if self.is_stale(generation) {
                        return;
                    }
                    info!("Restored session with a refreshed access token");
                    self.set_state(SessionState::Authenticated(ActiveSession {
                        user: None,
                        access_token,
                        refresh_token: Some(refresh_token),
                    }));
                    return;
                }
                Err(AuthError::Superseded) => return,
                Err(err) => {
                    warn!(error = %err, "Could not restore session");
                    // The failed refresh already logged out and notified
                    // listeners. It carries the expiry message unless another
                    // caller started it.
                    self.inner.state.send_if_modified(|state| match state {
                        SessionState::Unauthenticated { error } if error.is_none() => {
                            *error = Some(SESSION_EXPIRED_MESSAGE.to_string());
                            true
                        }
                        _ => false,
                    });
                    return;
                }
            }
        }

        self.purge_tokens();
        self.set_state(SessionState::Unauthenticated {
            error: Some(SESSION_EXPIRED_MESSAGE.to_string()),
        });
        self.emit(SessionEvent::SignInRequired(SignInReason::InitializeFailed));
    }

    /// Sign in with tokens freshly issued by the identity provider.
    ///
    /// Tokens are persisted only after the backend verifies them. Calls are
    /// serialized; a repeat call with the tokens already committed returns
    /// the committed user without touching the backend or the store.
    ///
    /// A login takes over the session: restore or refresh work still in
    /// flight is superseded and its outcome discarded.
    pub async fn login(&self, access_token: &str, refresh_token: &str) -> Result<User, AuthError> {
        let _guard = self.inner.login_lock.lock().await;

        if let Some(user) = self.committed_user(access_token, refresh_token) {
            debug!("Login with already-committed tokens, nothing to do");
            return Ok(user);
        }

        let generation = self.supersede();
        self.set_state(SessionState::Verifying);

        match self.inner.auth.verify(access_token).await {
            Ok(user) => {
                if self.is_stale(generation) {
                    return Err(AuthError::Superseded);
                }
                if let Err(e) = self.inner.store.save_tokens(access_token, refresh_token) {
                    warn!(error = %e, "Failed to persist session tokens");
                }
                info!(user_id = user.id, "Signed in");
                self.set_state(SessionState::Authenticated(ActiveSession {
                    user: Some(user.clone()),
                    access_token: access_token.to_string(),
                    refresh_token: Some(refresh_token.to_string()),
                }));
                self.emit(SessionEvent::SignedIn);
                Ok(user)
            }
            Err(err) => {
                if self.is_stale(generation) {
                    return Err(AuthError::Superseded);
                }
                warn!(error = %err, "Login verification failed");
                self.set_state(SessionState::Unauthenticated {
                    error: Some(err.to_string()),
                });
                Err(err)
            }
        }
    }

    /// Sign out. Never fails: the backend call is best effort and local
    /// state is cleared regardless of its outcome.
    pub async fn logout(&self) {
        self.terminate(SignInReason::LoggedOut, None).await;
    }

    /// Exchange `refresh_token` for a new access token.
    ///
    /// Concurrent calls (including the API client's 401 recovery) share one
    /// backend request. On failure the session is logged out before the
    /// error is returned.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, AuthError> {
        self.inner.state.send_modify(|state| {
            let next = match state {
                SessionState::Authenticated(active) => SessionState::Refreshing(active.clone()),
                _ => return,
            };
            *state = next;
        });
        let result = self.refresh_shared(refresh_token, None).await;

        // A joined refresh may have settled before this call marked the
        // session as refreshing
        self.inner.state.send_if_modified(|state| {
            let SessionState::Refreshing(active) = state else {
                return false;
            };
            let mut active = active.clone();
            if let Ok(token) = &result {
                active.access_token = token.clone();
            }
            *state = SessionState::Authenticated(active);
            true
        });
        result
    }

    pub fn clear_error(&self) {
        self.inner.state.send_modify(|state| {
            if let SessionState::Unauthenticated { error } = state {
                *error = None;
            }
        });
    }

    // ===== Hooks for the API client =====

    /// Read at call time so a refreshed token is picked up by the next request.
    pub(crate) fn stored_access_token(&self) -> Option<String> {
        self.read_token(self.inner.store.access_token(), "access")
    }

    pub(crate) fn stored_refresh_token(&self) -> Option<String> {
        self.read_token(self.inner.store.refresh_token(), "refresh")
    }

    /// Recover from a 401: refresh with the stored refresh token. Without
    /// one the session is unrecoverable and is ended here.
    pub(crate) async fn recover_from_unauthorized(&self) -> Result<String, AuthError> {
        match self.stored_refresh_token() {
            Some(refresh_token) => self.refresh_shared(&refresh_token, None).await,
            None => {
                self.terminate(SignInReason::Unauthorized, None).await;
                Err(AuthError::NoRefreshToken)
            }
        }
    }

    pub(crate) fn notify_sign_in_required(&self, reason: SignInReason) {
        self.emit(SessionEvent::SignInRequired(reason));
    }

    // ===== Internals =====

    /// `failure_error` is the message left on the session if this call
    /// starts the refresh and it fails. Joiners inherit the starter's.
    async fn refresh_shared(
        &self,
        refresh_token: &str,
        failure_error: Option<String>,
    ) -> Result<String, AuthError> {
        let manager = self.clone();
        let refresh_token = refresh_token.to_string();
        self.inner
            .refresh
            .run(move || async move { manager.perform_refresh(refresh_token, failure_error).await })
            .await
    }

    async fn perform_refresh(
        &self,
        refresh_token: String,
        failure_error: Option<String>,
    ) -> Result<String, AuthError> {
        let generation = self.generation();

        match self.inner.auth.refresh(&refresh_token).await {
            Ok(access_token) => {
                if self.is_stale(generation) {
                    debug!("Discarding refreshed token from a superseded session");
                    return Err(AuthError::Superseded);
                }
                if let Err(e) = self.inner.store.set_access_token(&access_token) {
                    warn!(error = %e, "Failed to persist refreshed access token");
                }
                let token = access_token.clone();
                self.inner.state.send_modify(move |state| {
                    let next = match state {
                        SessionState::Authenticated(active) | SessionState::Refreshing(active) => {
                            let mut active = active.clone();
                            active.access_token = token;
                            SessionState::Authenticated(active)
                        }
                        _ => return,
                    };
                    *state = next;
                });
                info!("Access token refreshed");
                Ok(access_token)
            }
            Err(err) => {
                if self.is_stale(generation) {
                    return Err(AuthError::Superseded);
                }
                warn!(error = %err, "Token refresh failed, ending session");
                self.terminate(SignInReason::RefreshFailed, failure_error).await;
                Err(err)
            }
        }
    }

    /// End the session. `error` goes straight into the final state so
    /// listeners never see an intermediate error-free one.
    async fn terminate(&self, reason: SignInReason, error: Option<String>) {
        self.supersede();
        self.set_state(SessionState::LoggingOut);

        if let Some(refresh_token) = self.stored_refresh_token() {
            let access_token = self.stored_access_token();
            if let Err(err) = self
                .inner
                .auth
                .logout(&refresh_token, access_token.as_deref())
                .await
            {
                warn!(error = %err, "Logout request failed, clearing local session anyway");
            }
        }

        self.purge_tokens();
        self.set_state(SessionState::Unauthenticated { error });
        info!(?reason, "Session ended");
        self.emit(SessionEvent::SignInRequired(reason));
    }

    fn committed_user(&self, access_token: &str, refresh_token: &str) -> Option<User> {
        match &*self.inner.state.borrow() {
            SessionState::Authenticated(active)
                if active.access_token == access_token
                    && active.refresh_token.as_deref() == Some(refresh_token) =>
            {
                active.user.clone()
            }
            _ => None,
        }
    }

    fn read_token(&self, result: anyhow::Result<Option<String>>, kind: &str) -> Option<String> {
        match result {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, kind, "Failed to read token from store");
                None
            }
        }
    }

    fn purge_tokens(&self) {
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
    }

    fn set_state(&self, next: SessionState) {
        debug!(state = next.label(), "Session state changed");
        self.inner.state.send_replace(next);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Invalidate every in-flight verify/refresh; returns the new generation.
    fn supersede(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::auth::{MemoryTokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::testing::{FakeBackend, ScriptedTransport};

    fn store_with(access: Option<&str>, refresh: Option<&str>) -> Arc<MemoryTokenStore> {
        let store = Arc::new(MemoryTokenStore::new());
        if let Some(token) = access {
            store.set(ACCESS_TOKEN_KEY, token).unwrap();
        }
        if let Some(token) = refresh {
            store.set(REFRESH_TOKEN_KEY, token).unwrap();
        }
        store
    }

    fn manager(store: &Arc<MemoryTokenStore>, transport: &Arc<ScriptedTransport>) -> SessionManager {
        SessionManager::new(store.clone(), transport.clone())
    }

    fn tokens(store: &MemoryTokenStore) -> (Option<String>, Option<String>) {
        (store.access_token().unwrap(), store.refresh_token().unwrap())
    }

    // -------------------------------------------------------------------------
    // Initialize
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_without_tokens_makes_no_calls() {
        let transport = FakeBackend::new().into_transport();
        let store = store_with(None, None);
        let session = manager(&store, &transport);
        assert!(session.snapshot().is_loading());

        let state = session.initialize().await;
        assert_eq!(state, SessionState::Unauthenticated { error: None });
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_with_only_refresh_token_makes_no_calls() {
        let transport = FakeBackend::new().with_refresh_grant("r1", "a2").into_transport();
        let store = store_with(None, Some("r1"));
        let session = manager(&store, &transport);

        let state = session.initialize().await;
        assert_eq!(state, SessionState::Unauthenticated { error: None });
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_with_valid_token() {
        let transport = FakeBackend::new().with_valid_access("a1").into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);

        let state = session.initialize().await;
        assert!(state.is_authenticated());
        assert_eq!(state.user().map(|u| u.id), Some(FakeBackend::USER_ID));
        assert_eq!(state.access_token(), Some("a1"));
        assert_eq!(tokens(&store), (Some("a1".into()), Some("r1".into())));
        assert_eq!(transport.count("/auth/verify"), 1);
        assert_eq!(transport.count("/auth/refresh"), 0);
    }

    #[tokio::test]
    async fn test_initialize_recovers_with_refresh_without_reverifying() {
        let transport = FakeBackend::new()
            .with_refresh_grant("valid-r1", "new-a1")
            .into_transport();
        let store = store_with(Some("expired"), Some("valid-r1"));
        let session = manager(&store, &transport);

        let state = session.initialize().await;
        assert!(state.is_authenticated());
        assert_eq!(state.access_token(), Some("new-a1"));
        assert_eq!(state.refresh_token(), Some("valid-r1"));
        assert_eq!(tokens(&store), (Some("new-a1".into()), Some("valid-r1".into())));

        let verified: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.path == "/auth/verify")
            .filter_map(|r| r.body.and_then(|b| b["token"].as_str().map(str::to_string)))
            .collect();
        assert_eq!(verified, vec!["expired".to_string()]);
        assert_eq!(transport.count("/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_initialize_recovery_is_repeatable() {
        for _ in 0..2 {
            let transport = FakeBackend::new()
                .with_refresh_grant("valid-r1", "new-a1")
                .into_transport();
            let store = store_with(Some("expired"), Some("valid-r1"));
            let state = manager(&store, &transport).initialize().await;
            assert_eq!(state.access_token(), Some("new-a1"));
            assert_eq!(tokens(&store), (Some("new-a1".into()), Some("valid-r1".into())));
        }
    }

    #[tokio::test]
    async fn test_initialize_with_expired_tokens_purges_storage() {
        let transport = FakeBackend::new().into_transport();
        let store = store_with(Some("expired"), Some("expired-r"));
        let session = manager(&store, &transport);
        let mut events = session.events();

        let state = session.initialize().await;
        assert_eq!(
            state,
            SessionState::Unauthenticated {
                error: Some("Session expired".to_string())
            }
        );
        assert_eq!(tokens(&store), (None, None));
        assert_eq!(
            events.try_recv().ok(),
            Some(SessionEvent::SignInRequired(SignInReason::RefreshFailed))
        );
    }

    #[tokio::test]
    async fn test_initialize_with_expired_access_and_no_refresh() {
        let transport = FakeBackend::new().into_transport();
        let store = store_with(Some("expired"), None);
        let session = manager(&store, &transport);
        let mut events = session.events();

        let state = session.initialize().await;
        assert_eq!(state.error(), Some("Session expired"));
        assert_eq!(tokens(&store), (None, None));
        assert_eq!(transport.count("/auth/refresh"), 0);
        assert_eq!(
            events.try_recv().ok(),
            Some(SessionEvent::SignInRequired(SignInReason::InitializeFailed))
        );
    }

    #[tokio::test]
    async fn test_initialize_timeout_falls_through_to_refresh() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_refresh_grant("r1", "a2")
            .with_verify_timeout()
            .into_transport();
        let store = store_with(Some("a1"), Some("r1"));

        let state = manager(&store, &transport).initialize().await;
        assert_eq!(state.access_token(), Some("a2"));
        assert_eq!(tokens(&store), (Some("a2".into()), Some("r1".into())));
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let transport = FakeBackend::new().with_valid_access("a1").into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);

        let (first, second) = tokio::join!(session.initialize(), session.initialize());
        assert_eq!(first, second);
        session.initialize().await;
        assert_eq!(transport.count("/auth/verify"), 1);
    }

    #[tokio::test]
    async fn test_wait_until_ready_blocks_while_verifying() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_delay("/auth/verify", Duration::from_millis(20))
            .into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);

        let background = session.clone();
        let handle = tokio::spawn(async move { background.initialize().await });

        let ready = session.wait_until_ready().await;
        assert!(ready.is_authenticated());
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_expired_restore_reports_error_with_event() {
        let transport = FakeBackend::new()
            .with_delay("/auth/refresh", Duration::from_millis(10))
            .into_transport();
        let store = store_with(Some("expired"), Some("expired-r"));
        let session = manager(&store, &transport);
        let mut events = session.events();

        let background = session.clone();
        let handle = tokio::spawn(async move { background.initialize().await });

        // Listeners reacting to the event already see the final state
        let event = events.recv().await.unwrap();
        assert_eq!(event, SessionEvent::SignInRequired(SignInReason::RefreshFailed));
        assert_eq!(
            session.snapshot(),
            SessionState::Unauthenticated {
                error: Some("Session expired".to_string())
            }
        );

        let ready = session.wait_until_ready().await;
        assert_eq!(ready.error(), Some("Session expired"));
        handle.await.unwrap();
        assert!(events.try_recv().is_err());
    }

    // -------------------------------------------------------------------------
    // Login
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_login_success_persists_tokens() {
        let transport = FakeBackend::new().with_valid_access("a1").into_transport();
        let store = store_with(None, None);
        let session = manager(&store, &transport);
        session.initialize().await;
        let mut events = session.events();

        let user = session.login("a1", "r1").await.expect("login should succeed");
        assert_eq!(user.id, FakeBackend::USER_ID);
        assert_eq!(tokens(&store), (Some("a1".into()), Some("r1".into())));

        let state = session.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.refresh_token(), Some("r1"));
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::SignedIn));
    }

    #[tokio::test]
    async fn test_login_failure_persists_nothing_and_reports_reason() {
        let transport = FakeBackend::new().into_transport();
        let store = store_with(None, None);
        let session = manager(&store, &transport);

        let err = session.login("bogus", "r1").await.unwrap_err();
        assert_eq!(err, AuthError::VerificationFailed("Invalid token".to_string()));
        assert_eq!(tokens(&store), (None, None));
        assert_eq!(session.snapshot().error(), Some("Invalid token"));
        // Login never tries to refresh
        assert_eq!(transport.count("/auth/refresh"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_concurrent_login_commits_once() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_delay("/auth/verify", Duration::from_millis(20))
            .into_transport();
        let store = store_with(None, None);
        let session = manager(&store, &transport);

        let (first, second) = tokio::join!(session.login("a1", "r1"), session.login("a1", "r1"));
        assert_eq!(first.unwrap().id, FakeBackend::USER_ID);
        assert_eq!(second.unwrap().id, FakeBackend::USER_ID);
        assert_eq!(transport.count("/auth/verify"), 1);
        assert_eq!(tokens(&store), (Some("a1".into()), Some("r1".into())));
    }

    #[tokio::test]
    async fn test_clear_error() {
        let transport = FakeBackend::new().into_transport();
        let store = store_with(None, None);
        let session = manager(&store, &transport);

        let _ = session.login("bogus", "r1").await;
        assert!(session.snapshot().error().is_some());

        session.clear_error();
        assert_eq!(session.snapshot(), SessionState::Unauthenticated { error: None });
    }

    // -------------------------------------------------------------------------
    // Logout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_logout_clears_even_when_endpoint_fails() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_failing_logout()
            .into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);
        session.initialize().await;
        let mut events = session.events();

        session.logout().await;
        assert_eq!(session.snapshot(), SessionState::Unauthenticated { error: None });
        assert_eq!(tokens(&store), (None, None));
        assert_eq!(transport.count("/auth/logout"), 1);
        assert_eq!(
            events.try_recv().ok(),
            Some(SessionEvent::SignInRequired(SignInReason::LoggedOut))
        );
    }

    #[tokio::test]
    async fn test_logout_without_refresh_token_skips_backend() {
        let transport = FakeBackend::new().into_transport();
        let store = store_with(Some("a1"), None);
        let session = manager(&store, &transport);

        session.logout().await;
        assert_eq!(transport.count("/auth/logout"), 0);
        assert_eq!(tokens(&store), (None, None));
        assert!(!session.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_during_verify_is_not_resurrected() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_delay("/auth/verify", Duration::from_millis(30))
            .into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);

        let late_logout = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            session.logout().await;
        };
        let (state, ()) = tokio::join!(session.initialize(), late_logout);

        assert_eq!(state, SessionState::Unauthenticated { error: None });
        assert_eq!(tokens(&store), (None, None));
    }

    #[tokio::test]
    async fn test_login_during_restore_verify_wins() {
        let transport = FakeBackend::new()
            .with_valid_access("fresh-a")
            .with_delay("/auth/verify", Duration::from_millis(10))
            .into_transport();
        let store = store_with(Some("stale-a"), Some("stale-r"));
        let session = manager(&store, &transport);

        let login = async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            session.login("fresh-a", "fresh-r").await
        };
        let (_, login) = tokio::join!(session.initialize(), login);

        assert_eq!(login.map(|u| u.id), Ok(FakeBackend::USER_ID));
        let state = session.snapshot();
        assert!(matches!(state, SessionState::Authenticated(_)));
        assert_eq!(state.access_token(), Some("fresh-a"));
        assert_eq!(tokens(&store), (Some("fresh-a".into()), Some("fresh-r".into())));
        // The restore gave up instead of trying the old refresh token
        assert_eq!(transport.count("/auth/refresh"), 0);
        assert_eq!(transport.count("/auth/logout"), 0);
    }

    #[tokio::test]
    async fn test_login_during_restore_refresh_is_not_logged_out() {
        let transport = FakeBackend::new()
            .with_valid_access("fresh-a")
            .with_delay("/auth/refresh", Duration::from_millis(20))
            .into_transport();
        let store = store_with(Some("stale-a"), Some("stale-r"));
        let session = manager(&store, &transport);
        let mut events = session.events();

        let login = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            session.login("fresh-a", "fresh-r").await
        };
        let (_, login) = tokio::join!(session.initialize(), login);

        assert!(login.is_ok());
        assert_eq!(transport.count("/auth/refresh"), 1);
        assert_eq!(transport.count("/auth/logout"), 0);
        let state = session.snapshot();
        assert!(matches!(state, SessionState::Authenticated(_)));
        assert_eq!(state.access_token(), Some("fresh-a"));
        assert_eq!(tokens(&store), (Some("fresh-a".into()), Some("fresh-r".into())));
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::SignedIn));
        assert!(events.try_recv().is_err());
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_updates_session_and_store() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_refresh_grant("r1", "a2")
            .into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);
        session.initialize().await;

        let token = session.refresh_access_token("r1").await.unwrap();
        assert_eq!(token, "a2");
        let state = session.snapshot();
        assert!(matches!(state, SessionState::Authenticated(_)));
        assert_eq!(state.access_token(), Some("a2"));
        // Profile from the first verify is kept
        assert_eq!(state.user().map(|u| u.id), Some(FakeBackend::USER_ID));
        assert_eq!(tokens(&store), (Some("a2".into()), Some("r1".into())));
    }

    #[tokio::test]
    async fn test_refresh_failure_logs_out() {
        let transport = FakeBackend::new().with_valid_access("a1").into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);
        session.initialize().await;
        let mut events = session.events();

        let err = session.refresh_access_token("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
        assert_eq!(session.snapshot(), SessionState::Unauthenticated { error: None });
        assert_eq!(tokens(&store), (None, None));
        assert_eq!(transport.count("/auth/logout"), 1);
        assert_eq!(
            events.try_recv().ok(),
            Some(SessionEvent::SignInRequired(SignInReason::RefreshFailed))
        );
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_refresh_grant("r1", "a2")
            .with_delay("/auth/refresh", Duration::from_millis(20))
            .into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);
        session.initialize().await;

        let (a, b, c) = tokio::join!(
            session.refresh_access_token("r1"),
            session.refresh_access_token("r1"),
            session.recover_from_unauthorized(),
        );
        assert_eq!(a, Ok("a2".to_string()));
        assert_eq!(b, Ok("a2".to_string()));
        assert_eq!(c, Ok("a2".to_string()));
        assert_eq!(transport.count("/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_refresh_joining_recovery_settles_authenticated() {
        let transport = FakeBackend::new()
            .with_valid_access("a1")
            .with_refresh_grant("r1", "a2")
            .with_delay("/auth/refresh", Duration::from_millis(10))
            .into_transport();
        let store = store_with(Some("a1"), Some("r1"));
        let session = manager(&store, &transport);
        session.initialize().await;

        // The 401 path starts the refresh; the explicit call joins it
        let joined = async {
            tokio::task::yield_now().await;
            session.refresh_access_token("r1").await
        };
        let (recovered, refreshed) = tokio::join!(session.recover_from_unauthorized(), joined);

        assert_eq!(recovered, Ok("a2".to_string()));
        assert_eq!(refreshed, Ok("a2".to_string()));
        assert_eq!(transport.count("/auth/refresh"), 1);
        let state = session.snapshot();
        assert!(matches!(state, SessionState::Authenticated(_)));
        assert!(!state.is_loading());
        assert_eq!(state.access_token(), Some("a2"));
    }

    #[tokio::test]
    async fn test_restore_by_refresh_is_authenticated_without_profile() {
        let transport = FakeBackend::new().with_refresh_grant("r1", "a2").into_transport();
        let store = store_with(Some("expired"), Some("r1"));

        let state = manager(&store, &transport).initialize().await;
        assert!(state.is_authenticated());
        assert!(state.user().is_none());
    }
}
