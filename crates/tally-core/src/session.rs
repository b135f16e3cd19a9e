//! # Session State Machine
//!
//! PIN-gated session flow and the route guard that consumes it.
//!
//! ## States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │                     ┌──────────────────┐                                │
//! │        ┌───────────►│ Unauthenticated  │◄──────────── LoggedOut         │
//! │        │            └────────┬─────────┘             (from any state)   │
//! │        │                     │ LoggedIn                                 │
//! │        │           has_pin?  │                                          │
//! │        │       ┌──── no ─────┴───── yes ────┐                           │
//! │        │       ▼                            ▼                           │
//! │        │  ┌────────────────────┐   ┌──────────────────┐                 │
//! │        │  │ AuthenticatedNoPin │   │   PinPending     │◄─┐ PinRejected  │
//! │        │  └─────────┬──────────┘   └────────┬─────────┘──┘              │
//! │        │            │ PinCreated            │ PinVerified               │
//! │        │            ▼                       ▼                           │
//! │        │        ┌──────────────────────────────┐                        │
//! │        └────────│          Authorized          │                        │
//! │                 └──────────────────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The machine is pure: it never talks to the identity provider or the
//! remote store. The session service performs the I/O and feeds the outcome
//! in as a [`SessionEvent`].
//!
//! ## Guard
//! Only `Authorized` sessions reach catalog, sales and analytics routes.
//! Every other state is sent to the single route it is allowed to see.
//! The PIN is a UX deterrent checked against a raw stored value, not a
//! credential.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Identity
// =============================================================================

/// The authenticated account as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Identity {
    /// Opaque user id. Scopes every remote path and the offline queue.
    pub uid: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>, email: Option<String>) -> Self {
        Identity {
            uid: uid.into(),
            email,
        }
    }
}

// =============================================================================
// States and Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum SessionState {
    Unauthenticated,
    /// Logged in, no PIN on file yet.
    AuthenticatedNoPin,
    /// Logged in, PIN on file but not verified this session.
    PinPending,
    Authorized,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unauthenticated => "Unauthenticated",
            SessionState::AuthenticatedNoPin => "AuthenticatedNoPin",
            SessionState::PinPending => "PinPending",
            SessionState::Authorized => "Authorized",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Login (or sign-up) succeeded. `has_pin` says whether a PIN is on file.
    LoggedIn { identity: Identity, has_pin: bool },
    PinCreated,
    PinVerified,
    PinRejected,
    LoggedOut,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::LoggedIn { .. } => "LoggedIn",
            SessionEvent::PinCreated => "PinCreated",
            SessionEvent::PinVerified => "PinVerified",
            SessionEvent::PinRejected => "PinRejected",
            SessionEvent::LoggedOut => "LoggedOut",
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Current session: state, identity and whether a PIN is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    state: SessionState,
    identity: Option<Identity>,
    has_pin: bool,
    failed_pin_attempts: u32,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    /// Starts unauthenticated.
    pub fn new() -> Self {
        Session {
            state: SessionState::Unauthenticated,
            identity: None,
            has_pin: false,
            failed_pin_attempts: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[inline]
    pub fn has_pin(&self) -> bool {
        self.has_pin
    }

    #[inline]
    pub fn is_authorized(&self) -> bool {
        self.state == SessionState::Authorized
    }

    /// Consecutive rejected PIN attempts since the last login or success.
    #[inline]
    pub fn failed_pin_attempts(&self) -> u32 {
        self.failed_pin_attempts
    }

    /// The authenticated user id, or `NotAuthenticated`.
    pub fn uid(&self) -> CoreResult<&str> {
        self.identity
            .as_ref()
            .map(|identity| identity.uid.as_str())
            .ok_or(CoreError::NotAuthenticated)
    }

    /// Applies an event and returns the new state.
    ///
    /// Events that are not valid in the current state leave the session
    /// untouched and return `InvalidTransition`. `LoggedOut` is valid
    /// everywhere.
    pub fn transition(&mut self, event: SessionEvent) -> CoreResult<SessionState> {
        let next = match (self.state, &event) {
            (_, SessionEvent::LoggedOut) => {
                *self = Session::new();
                return Ok(self.state);
            }
            (SessionState::Unauthenticated, SessionEvent::LoggedIn { identity, has_pin }) => {
                self.identity = Some(identity.clone());
                self.has_pin = *has_pin;
                self.failed_pin_attempts = 0;
                if *has_pin {
                    SessionState::PinPending
                } else {
                    SessionState::AuthenticatedNoPin
                }
            }
            (SessionState::AuthenticatedNoPin, SessionEvent::PinCreated) => {
                self.has_pin = true;
                SessionState::Authorized
            }
            (SessionState::PinPending, SessionEvent::PinVerified) => {
                self.failed_pin_attempts = 0;
                SessionState::Authorized
            }
            (SessionState::PinPending, SessionEvent::PinRejected) => {
                self.failed_pin_attempts += 1;
                SessionState::PinPending
            }
            (state, event) => {
                return Err(CoreError::InvalidTransition {
                    state: state.to_string(),
                    event: event.name().to_string(),
                })
            }
        };

        self.state = next;
        Ok(next)
    }

    /// Decides whether the current session may view `route`.
    pub fn guard(&self, route: Route) -> RouteDecision {
        guard(self.state, route)
    }
}

// =============================================================================
// Route Guard
// =============================================================================

/// Views of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum Route {
    Login,
    Signup,
    PinSetup,
    PinVerify,
    Home,
    Stock,
    Sell,
    Analytics,
    Account,
}

impl Route {
    /// Routes that show store data.
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            Route::Home | Route::Stock | Route::Sell | Route::Analytics | Route::Account
        )
    }

    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Signup => "/signup",
            Route::PinSetup => "/pin-setup",
            Route::PinVerify => "/pin-verify",
            Route::Home => "/",
            Route::Stock => "/stock",
            Route::Sell => "/sell",
            Route::Analytics => "/analytics",
            Route::Account => "/account",
        }
    }

    /// Resolves a path; unknown paths fall back to home.
    pub fn from_path(path: &str) -> Route {
        match path.trim_end_matches('/') {
            "/login" => Route::Login,
            "/signup" => Route::Signup,
            "/pin-setup" => Route::PinSetup,
            "/pin-verify" => Route::PinVerify,
            "/stock" => Route::Stock,
            "/sell" => Route::Sell,
            "/analytics" => Route::Analytics,
            "/account" => Route::Account,
            _ => Route::Home,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum RouteDecision {
    Allow,
    Redirect(Route),
}

/// Route guard as a pure function of session state.
///
/// ```text
/// state               allowed                     otherwise
/// ──────────────────  ──────────────────────────  ──────────
/// Unauthenticated     Login, Signup               → Login
/// AuthenticatedNoPin  PinSetup                    → PinSetup
/// PinPending          PinVerify                   → PinVerify
/// Authorized          protected routes            → Home
/// ```
pub fn guard(state: SessionState, route: Route) -> RouteDecision {
    let allowed = match state {
        SessionState::Unauthenticated => matches!(route, Route::Login | Route::Signup),
        SessionState::AuthenticatedNoPin => route == Route::PinSetup,
        SessionState::PinPending => route == Route::PinVerify,
        SessionState::Authorized => route.is_protected(),
    };

    if allowed {
        return RouteDecision::Allow;
    }

    RouteDecision::Redirect(match state {
        SessionState::Unauthenticated => Route::Login,
        SessionState::AuthenticatedNoPin => Route::PinSetup,
        SessionState::PinPending => Route::PinVerify,
        SessionState::Authorized => Route::Home,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn login(has_pin: bool) -> SessionEvent {
        SessionEvent::LoggedIn {
            identity: Identity::new("uid-1", Some("owner@shop.test".to_string())),
            has_pin,
        }
    }

    #[test]
    fn test_login_without_pin_reaches_exactly_no_pin() {
        let mut session = Session::new();
        let state = session.transition(login(false)).unwrap();
        assert_eq!(state, SessionState::AuthenticatedNoPin);
        assert!(!session.is_authorized());
        assert_eq!(session.uid().unwrap(), "uid-1");
    }

    #[test]
    fn test_login_with_pin_requires_verification() {
        let mut session = Session::new();
        assert_eq!(session.transition(login(true)).unwrap(), SessionState::PinPending);
        assert_eq!(
            session.transition(SessionEvent::PinVerified).unwrap(),
            SessionState::Authorized
        );
    }

    #[test]
    fn test_pin_setup_authorizes() {
        let mut session = Session::new();
        session.transition(login(false)).unwrap();
        session.transition(SessionEvent::PinCreated).unwrap();
        assert!(session.is_authorized());
        assert!(session.has_pin());
    }

    #[test]
    fn test_rejected_pin_stays_pending() {
        let mut session = Session::new();
        session.transition(login(true)).unwrap();
        for _ in 0..3 {
            assert_eq!(
                session.transition(SessionEvent::PinRejected).unwrap(),
                SessionState::PinPending
            );
        }
        assert_eq!(session.failed_pin_attempts(), 3);

        session.transition(SessionEvent::PinVerified).unwrap();
        assert_eq!(session.failed_pin_attempts(), 0);
    }

    #[test]
    fn test_logout_from_any_state() {
        for has_pin in [false, true] {
            let mut session = Session::new();
            session.transition(login(has_pin)).unwrap();
            session.transition(SessionEvent::LoggedOut).unwrap();
            assert_eq!(session.state(), SessionState::Unauthenticated);
            assert!(session.identity().is_none());
            assert!(matches!(session.uid(), Err(CoreError::NotAuthenticated)));
        }

        let mut idle = Session::new();
        assert_eq!(
            idle.transition(SessionEvent::LoggedOut).unwrap(),
            SessionState::Unauthenticated
        );
    }

    #[test]
    fn test_invalid_transitions_leave_state_untouched() {
        let mut session = Session::new();
        assert!(matches!(
            session.transition(SessionEvent::PinVerified),
            Err(CoreError::InvalidTransition { .. })
        ));
        assert_eq!(session.state(), SessionState::Unauthenticated);

        session.transition(login(false)).unwrap();
        // cannot skip setup by "verifying" a PIN that does not exist
        assert!(session.transition(SessionEvent::PinVerified).is_err());
        assert_eq!(session.state(), SessionState::AuthenticatedNoPin);

        session.transition(SessionEvent::PinCreated).unwrap();
        assert!(session.transition(login(true)).is_err());
    }

    #[test]
    fn test_guard_table() {
        use RouteDecision::*;

        assert_eq!(guard(SessionState::Unauthenticated, Route::Login), Allow);
        assert_eq!(guard(SessionState::Unauthenticated, Route::Signup), Allow);
        assert_eq!(
            guard(SessionState::Unauthenticated, Route::Stock),
            Redirect(Route::Login)
        );
        assert_eq!(
            guard(SessionState::AuthenticatedNoPin, Route::Analytics),
            Redirect(Route::PinSetup)
        );
        assert_eq!(guard(SessionState::AuthenticatedNoPin, Route::PinSetup), Allow);
        assert_eq!(
            guard(SessionState::PinPending, Route::Home),
            Redirect(Route::PinVerify)
        );
        assert_eq!(
            guard(SessionState::PinPending, Route::PinSetup),
            Redirect(Route::PinVerify)
        );
        assert_eq!(guard(SessionState::Authorized, Route::Sell), Allow);
        assert_eq!(
            guard(SessionState::Authorized, Route::Login),
            Redirect(Route::Home)
        );
    }

    #[test]
    fn test_protected_routes_need_authorization() {
        let protected = [
            Route::Home,
            Route::Stock,
            Route::Sell,
            Route::Analytics,
            Route::Account,
        ];
        for state in [
            SessionState::Unauthenticated,
            SessionState::AuthenticatedNoPin,
            SessionState::PinPending,
        ] {
            for route in protected {
                assert_ne!(guard(state, route), RouteDecision::Allow);
            }
        }
    }

    #[test]
    fn test_route_paths() {
        assert_eq!(Route::from_path("/pin-verify"), Route::PinVerify);
        assert_eq!(Route::from_path("/stock/"), Route::Stock);
        assert_eq!(Route::from_path("/nowhere"), Route::Home);
        assert_eq!(Route::Analytics.path(), "/analytics");
    }
}
