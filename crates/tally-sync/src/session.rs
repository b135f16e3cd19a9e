//! # Session Service
//!
//! Drives the [`Session`] state machine from real sign-in, sign-up and PIN
//! operations, and publishes the signed-in identity for the cache and the
//! reconciler.
//!
//! ## PIN Gate
//! ```text
//!   log_in ──► pin on file? ──yes──► PinPending ──verify_pin(ok)──► Authorized
//!                   │                    ▲   │
//!                   no                   └───┘ verify_pin(wrong)
//!                   ▼
//!          AuthenticatedNoPin ──set_up_pin──► Authorized
//! ```
//!
//! The PIN is stored as typed (`users/{uid}/pin`). It keeps a passer-by off
//! an unlocked till; it is not a credential.
//!
//! State and identity are published together as one [`SessionView`], so a
//! reader never pairs one account's state with another account's uid. The
//! identity-only channel the cache and reconciler follow is updated after.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use tally_core::validation::{validate_email, validate_password, validate_pin};
use tally_core::{
    CoreError, Identity, Route, RouteDecision, Session, SessionEvent, SessionState, StoreProfile,
};

use crate::activity::ActivityLog;
use crate::codec::encode;
use crate::error::{SyncError, SyncResult};
use crate::identity::{AuthOutcome, IdentityProvider};
use crate::remote::{paths, RemoteStore};

/// Session state and the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub state: SessionState,
    pub identity: Option<Identity>,
}

impl SessionView {
    fn signed_out() -> Self {
        SessionView {
            state: SessionState::Unauthenticated,
            identity: None,
        }
    }
}

pub struct SessionService {
    identity: Arc<dyn IdentityProvider>,
    remote: Arc<dyn RemoteStore>,
    activity: ActivityLog,
    session: RwLock<Session>,
    view_tx: watch::Sender<SessionView>,
    identity_tx: watch::Sender<Option<Identity>>,
}

impl SessionService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        remote: Arc<dyn RemoteStore>,
        activity: ActivityLog,
    ) -> Self {
        let (view_tx, _) = watch::channel(SessionView::signed_out());
        let (identity_tx, _) = watch::channel(None);

        SessionService {
            identity,
            remote,
            activity,
            session: RwLock::new(Session::new()),
            view_tx,
            identity_tx,
        }
    }

    // =========================================================================
    // Sign-in / Sign-up
    // =========================================================================

    /// Creates an account with a default store profile. The new session
    /// needs a PIN before anything else.
    pub async fn sign_up(&self, email: &str, password: &str) -> SyncResult<SessionState> {
        validate_email(email)?;
        validate_password(password)?;

        let outcome = self.identity.create_account(email, password).await?;

        let profile = encode(&StoreProfile::default())?;
        if let Err(e) = self.remote.set(&paths::store_info(&outcome.uid), profile).await {
            warn!(uid = %outcome.uid, error = %e, "Default store profile not written");
        }
        self.activity.record(&outcome.uid, "Account created").await;

        self.establish(outcome, false).await
    }

    pub async fn log_in(&self, email: &str, password: &str) -> SyncResult<SessionState> {
        validate_email(email)?;

        let outcome = self.identity.login(email, password).await?;
        let has_pin = self.pin_on_file(&outcome.uid).await?;
        self.activity.record(&outcome.uid, "Logged in").await;

        self.establish(outcome, has_pin).await
    }

    /// Federated sign-in. First-time accounts get the default store profile.
    pub async fn log_in_federated(&self) -> SyncResult<SessionState> {
        let outcome = self.identity.login_with_federated_provider().await?;
        let uid = outcome.uid.clone();

        if self.remote.get(&paths::store_info(&uid)).await?.is_none() {
            let profile = encode(&StoreProfile::default())?;
            if let Err(e) = self.remote.set(&paths::store_info(&uid), profile).await {
                warn!(uid = %uid, error = %e, "Default store profile not written");
            }
        }

        let has_pin = self.pin_on_file(&uid).await?;
        let event = if outcome.is_new { "Account created" } else { "Logged in" };
        self.activity.record(&uid, event).await;

        self.establish(outcome, has_pin).await
    }

    /// Ends the session. Local state is cleared even if the provider fails.
    pub async fn log_out(&self) -> SyncResult<()> {
        if let Some(identity) = self.identity() {
            self.activity.record(&identity.uid, "Logged out").await;
        }

        let result = self.identity.logout().await;

        {
            let mut session = self.session.write().await;
            session.transition(SessionEvent::LoggedOut)?;
        }
        self.publish(None, SessionState::Unauthenticated);
        info!("Logged out");

        result
    }

    async fn establish(&self, outcome: AuthOutcome, has_pin: bool) -> SyncResult<SessionState> {
        let identity = Identity::new(outcome.uid, outcome.email);

        let state = {
            let mut session = self.session.write().await;
            if session.state() != SessionState::Unauthenticated {
                session.transition(SessionEvent::LoggedOut)?;
            }
            session.transition(SessionEvent::LoggedIn {
                identity: identity.clone(),
                has_pin,
            })?
        };

        info!(uid = %identity.uid, state = %state, "Signed in");
        self.publish(Some(identity), state);
        Ok(state)
    }

    async fn pin_on_file(&self, uid: &str) -> SyncResult<bool> {
        Ok(self.remote.get(&paths::pin(uid)).await?.is_some())
    }

    // =========================================================================
    // PIN
    // =========================================================================

    /// Stores the first PIN of a fresh session.
    pub async fn set_up_pin(&self, pin: &str) -> SyncResult<SessionState> {
        validate_pin(pin)?;

        let mut session = self.session.write().await;
        let mut next = session.clone();
        let state = next.transition(SessionEvent::PinCreated)?;
        let uid = next.uid()?.to_string();

        self.remote.set(&paths::pin(&uid), json!(pin)).await?;
        *session = next;
        drop(session);

        self.activity.record(&uid, "PIN created").await;
        info!(uid = %uid, "PIN created");
        self.publish_state(state);
        Ok(state)
    }

    /// Checks `pin` against the stored one. A wrong PIN leaves the session
    /// waiting for another try.
    pub async fn verify_pin(&self, pin: &str) -> SyncResult<bool> {
        validate_pin(pin)?;

        let mut session = self.session.write().await;
        if session.state() != SessionState::PinPending {
            // reports the proper InvalidTransition without touching state
            session.clone().transition(SessionEvent::PinVerified)?;
        }
        let uid = session.uid()?.to_string();

        let stored = self.remote.get(&paths::pin(&uid)).await?;
        let matches = stored.as_ref().and_then(Value::as_str) == Some(pin);

        let event = if matches {
            SessionEvent::PinVerified
        } else {
            SessionEvent::PinRejected
        };
        let state = session.transition(event)?;
        let attempts = session.failed_pin_attempts();
        drop(session);

        if matches {
            info!(uid = %uid, "PIN verified");
        } else {
            warn!(uid = %uid, attempts, "Wrong PIN");
        }
        self.publish_state(state);
        Ok(matches)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn view(&self) -> SessionView {
        self.view_tx.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.view_tx.borrow().state
    }

    pub fn identity(&self) -> Option<Identity> {
        self.view_tx.borrow().identity.clone()
    }

    /// The signed-in uid, or `NotAuthenticated`.
    pub fn require_uid(&self) -> SyncResult<String> {
        self.identity()
            .map(|identity| identity.uid)
            .ok_or(SyncError::Core(CoreError::NotAuthenticated))
    }

    /// The uid, if the session may open `route`. State and uid come from
    /// the same published view.
    pub fn authorized_uid(&self, route: Route) -> SyncResult<String> {
        let view = self.view_tx.borrow();
        match (tally_core::session::guard(view.state, route), &view.identity) {
            (RouteDecision::Allow, Some(identity)) => Ok(identity.uid.clone()),
            _ => Err(CoreError::NotAuthenticated.into()),
        }
    }

    pub async fn snapshot(&self) -> Session {
        self.session.read().await.clone()
    }

    pub fn guard(&self, route: Route) -> RouteDecision {
        tally_core::session::guard(self.state(), route)
    }

    pub fn subscribe_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity_tx.subscribe()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    fn publish(&self, identity: Option<Identity>, state: SessionState) {
        self.view_tx.send_replace(SessionView {
            state,
            identity: identity.clone(),
        });
        self.identity_tx.send_if_modified(|current| {
            if *current != identity {
                *current = identity;
                true
            } else {
                false
            }
        });
    }

    fn publish_state(&self, state: SessionState) {
        self.view_tx.send_modify(|view| view.state = state);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
