use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use janus_db::Database;
use janus_types::models::{Principal, PrincipalKind};
use janus_types::{JanusError, JanusResult};

use crate::password::CredentialHasher;
use crate::tokens::TokenStore;

/// Where to look a username up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginScope {
    Owner,
    Participant { event_id: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Accepted for any account when set. Only honoured by debug builds, and
    /// the server only sets it when debug mode is switched on.
    pub debug_master_password: Option<String>,
}

/// Verifies credentials for either principal kind and issues bearer tokens.
pub struct Authenticator {
    db: Arc<Database>,
    tokens: TokenStore,
    hasher: Arc<dyn CredentialHasher>,
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    config: AuthConfig,
}

impl Authenticator {
    pub fn new(
        db: Arc<Database>,
        tokens: TokenStore,
        hasher: Arc<dyn CredentialHasher>,
        config: AuthConfig,
    ) -> Self {
        if config.debug_master_password.is_some() {
            if cfg!(debug_assertions) {
                warn!("Debug master password is active");
            } else {
                warn!("Debug master password configured but ignored in release builds");
            }
        }
        Self {
            db,
            tokens,
            hasher,
            config,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Check `username`/`password` within `scope` and hand back a fresh token.
    ///
    /// Unknown user and wrong password both come back as `InvalidCredentials`.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        scope: LoginScope,
    ) -> JanusResult<String> {
        let principal = self
            .find_principal(username, scope)?
            .ok_or(JanusError::InvalidCredentials)?;

        if !self.master_override(password) && !self.hasher.verify(password, principal.password_hash())
        {
            return Err(JanusError::InvalidCredentials);
        }

        let token = match self.tokens.issue(principal.principal_id()) {
            Err(JanusError::DuplicateKeyCollision { .. }) => {
                warn!("Token issue exhausted its attempts, retrying once");
                self.tokens.issue(principal.principal_id())?
            }
            other => other?,
        };

        if let Principal::Owner(owner) = &principal {
            self.db.touch_owner_authentication(owner.id, Utc::now())?;
        }

        info!(kind = ?principal.kind(), id = principal.id(), "Authenticated");
        Ok(token)
    }

    /// The live principal behind `token`.
    pub fn resolve(&self, token: &str) -> JanusResult<Principal> {
        let principal = self
            .tokens
            .validate(token)
            .ok_or(JanusError::TokenNotFoundOrExpired)?;

        match principal.kind {
            PrincipalKind::Owner => self
                .db
                .get_owner(principal.id)?
                .map(Principal::Owner)
                .ok_or(JanusError::TokenNotFoundOrExpired),
            PrincipalKind::Participant => self
                .db
                .get_participant(principal.id)?
                .map(Principal::Participant)
                .ok_or(JanusError::ParticipantNotFound),
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.revoke(token)
    }

    pub fn hash_password(&self, password: &str) -> JanusResult<String> {
        Ok(self.hasher.hash(password)?)
    }

    fn find_principal(&self, username: &str, scope: LoginScope) -> JanusResult<Option<Principal>> {
        let principal = match scope {
            LoginScope::Owner => self
                .db
                .find_owner_by_username(username)?
                .map(Principal::Owner),
            LoginScope::Participant { event_id } => self
                .db
                .find_participant_by_event_and_username(event_id, username)?
                .map(Principal::Participant),
        };
        Ok(principal)
    }

    #[cfg(debug_assertions)]
    fn master_override(&self, password: &str) -> bool {
        self.config.debug_master_password.as_deref() == Some(password)
    }

    #[cfg(not(debug_assertions))]
    fn master_override(&self, _password: &str) -> bool {
        false
    }
}
