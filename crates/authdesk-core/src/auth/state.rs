use crate::models::User;

/// Credentials and profile of a signed-in session.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    /// Profile returned by verify. `None` when the session was restored
    /// through a refresh at startup, which does not return a profile.
    pub user: Option<User>,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// The client's belief about whether the user is signed in.
///
/// ```text
/// Uninitialized ──→ Verifying ──→ Authenticated ──→ LoggingOut ──→ Unauthenticated
///                       │              │    ▲
///                       │              ▼    │
///                       │          Refreshing ──→ LoggingOut
///                       ▼
///                Unauthenticated
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Verifying,
    Authenticated(ActiveSession),
    Refreshing(ActiveSession),
    LoggingOut,
    Unauthenticated {
        error: Option<String>,
    },
}

impl SessionState {
    /// True while the outcome is unknown. Consumers must not treat a loading
    /// state as signed out (e.g. must not redirect to sign-in).
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            SessionState::Uninitialized
                | SessionState::Verifying
                | SessionState::Refreshing(_)
                | SessionState::LoggingOut
        )
    }

    /// True for `Authenticated` and `Refreshing`. A session restored at
    /// startup by a refresh (the stored access token failed verification)
    /// is authenticated with `user: None` until a later verify fills it in;
    /// consumers that need the profile must check [`SessionState::user`].
    pub fn is_authenticated(&self) -> bool {
        self.active().is_some()
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        match self {
            SessionState::Authenticated(active) | SessionState::Refreshing(active) => Some(active),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.active().and_then(|a| a.user.as_ref())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.active().map(|a| a.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.active().and_then(|a| a.refresh_token.as_deref())
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SessionState::Unauthenticated { error } => error.as_deref(),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Verifying => "verifying",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Refreshing(_) => "refreshing",
            SessionState::LoggingOut => "logging_out",
            SessionState::Unauthenticated { .. } => "unauthenticated",
        }
    }
}

/// Why the session ended and the user has to sign in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInReason {
    InitializeFailed,
    RefreshFailed,
    LoggedOut,
    Unauthorized,
}

/// Broadcast to listeners outside the network layer. Navigation to the
/// sign-in boundary is the listener's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignInRequired(SignInReason),
}
