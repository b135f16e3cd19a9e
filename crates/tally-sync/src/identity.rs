//! # Identity Provider
//!
//! The seam to the backend's account service. Only the outcome of a
//! sign-in matters to the app: a stable uid and whether the account is new.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// Result of a successful sign-in or sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub uid: String,
    pub email: Option<String>,
    /// True when this call created the account.
    pub is_new: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> SyncResult<AuthOutcome>;

    async fn login(&self, email: &str, password: &str) -> SyncResult<AuthOutcome>;

    /// Popup/redirect sign-in with a federated provider.
    async fn login_with_federated_provider(&self) -> SyncResult<AuthOutcome>;

    async fn logout(&self) -> SyncResult<()>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    password: Option<String>,
}

/// Account table held in memory.
///
/// The federated flow signs in as a preconfigured email; without one it
/// behaves like a cancelled popup.
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
    federated_email: Option<String>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_federated_identity(mut self, email: impl Into<String>) -> Self {
        self.federated_email = Some(email.into().to_lowercase());
        self
    }

    pub async fn account_count(&self) -> usize {
        self.accounts.read().await.len()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> SyncResult<AuthOutcome> {
        let email = email.trim().to_lowercase();
        let mut accounts = self.accounts.write().await;

        if accounts.contains_key(&email) {
            return Err(SyncError::AuthFailed("email already in use".into()));
        }

        let uid = Uuid::new_v4().simple().to_string();
        accounts.insert(
            email.clone(),
            Account {
                uid: uid.clone(),
                password: Some(password.to_string()),
            },
        );

        info!(uid = %uid, "Account created");
        Ok(AuthOutcome {
            uid,
            email: Some(email),
            is_new: true,
        })
    }

    async fn login(&self, email: &str, password: &str) -> SyncResult<AuthOutcome> {
        let email = email.trim().to_lowercase();
        let accounts = self.accounts.read().await;

        match accounts.get(&email) {
            Some(account) if account.password.as_deref() == Some(password) => {
                debug!(uid = %account.uid, "Password sign-in");
                Ok(AuthOutcome {
                    uid: account.uid.clone(),
                    email: Some(email),
                    is_new: false,
                })
            }
            _ => Err(SyncError::AuthFailed("invalid email or password".into())),
        }
    }

    async fn login_with_federated_provider(&self) -> SyncResult<AuthOutcome> {
        let email = self
            .federated_email
            .clone()
            .ok_or_else(|| SyncError::AuthFailed("federated sign-in was cancelled".into()))?;

        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get(&email) {
            return Ok(AuthOutcome {
                uid: account.uid.clone(),
                email: Some(email),
                is_new: false,
            });
        }

        let uid = Uuid::new_v4().simple().to_string();
        accounts.insert(
            email.clone(),
            Account {
                uid: uid.clone(),
                password: None,
            },
        );
        info!(uid = %uid, "Account created via federated provider");

        Ok(AuthOutcome {
            uid,
            email: Some(email),
            is_new: true,
        })
    }

    async fn logout(&self) -> SyncResult<()> {
        Ok(())
    }
}
