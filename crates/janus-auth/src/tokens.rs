use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use janus_types::models::{PrincipalId, Timestamp};
use janus_types::{JanusError, JanusResult};

use crate::keys;

/// Fresh values drawn per `issue` call before giving up on collisions.
pub(crate) const MAX_ISSUE_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub ttl: Duration,
    /// Store size at which an insert triggers a sweep of expired entries.
    pub sweep_threshold: usize,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::days(7),
            sweep_threshold: 8192,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenEntry {
    principal: PrincipalId,
    expires_at: Timestamp,
}

impl TokenEntry {
    fn is_expired_at(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

type TokenGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// In-memory bearer tokens for both principal kinds.
///
/// Cheap to clone; every clone shares the same map. Reads take the shared
/// lock, while insert, sweep and expiry removal take the exclusive one.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<TokenStoreInner>,
}

struct TokenStoreInner {
    tokens: RwLock<HashMap<String, TokenEntry>>,
    config: TokenStoreConfig,
    generate: TokenGenerator,
}

impl TokenStore {
    pub fn new(config: TokenStoreConfig) -> Self {
        Self::with_generator(config, Box::new(keys::generate_token))
    }

    /// Store drawing token values from `generate` instead of the CSPRNG.
    pub fn with_generator(config: TokenStoreConfig, generate: TokenGenerator) -> Self {
        Self {
            inner: Arc::new(TokenStoreInner {
                tokens: RwLock::new(HashMap::new()),
                config,
                generate,
            }),
        }
    }

    pub fn issue(&self, principal: PrincipalId) -> JanusResult<String> {
        self.issue_at(principal, Utc::now())
    }

    /// Bind a new token to `principal`, valid until `now + ttl`.
    pub fn issue_at(&self, principal: PrincipalId, now: Timestamp) -> JanusResult<String> {
        let mut tokens = self
            .inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let token = (self.inner.generate)();
            if tokens.contains_key(&token) {
                warn!("Token collision on attempt {}, regenerating", attempt);
                continue;
            }

            tokens.insert(
                token.clone(),
                TokenEntry {
                    principal,
                    expires_at: now + self.inner.config.ttl,
                },
            );

            if tokens.len() >= self.inner.config.sweep_threshold {
                let removed = sweep(&mut tokens, now);
                debug!("Token sweep removed {} expired entries, {} remain", removed, tokens.len());
            }

            return Ok(token);
        }

        Err(JanusError::DuplicateKeyCollision {
            attempts: MAX_ISSUE_ATTEMPTS,
        })
    }

    pub fn validate(&self, token: &str) -> Option<PrincipalId> {
        self.validate_at(token, Utc::now())
    }

    /// The principal bound to `token`, if it exists and has not expired.
    /// An expired token is removed on the way out.
    pub fn validate_at(&self, token: &str, now: Timestamp) -> Option<PrincipalId> {
        {
            let tokens = self
                .inner
                .tokens
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match tokens.get(token) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.principal),
                Some(_) => {}
            }
        }

        let mut tokens = self
            .inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Re-check: another caller may have replaced or removed it meanwhile.
        if tokens.get(token).is_some_and(|entry| entry.is_expired_at(now)) {
            tokens.remove(token);
        }
        None
    }

    /// Explicit logout.
    pub fn revoke(&self, token: &str) -> bool {
        self.inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    /// Drop every entry that expired before `now`. Returns how many went.
    pub fn sweep_expired_at(&self, now: Timestamp) -> usize {
        let mut tokens = self
            .inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sweep(&mut tokens, now)
    }

    pub fn len(&self) -> usize {
        self.inner
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep(tokens: &mut HashMap<String, TokenEntry>, now: Timestamp) -> usize {
    let before = tokens.len();
    tokens.retain(|_, entry| !entry.is_expired_at(now));
    before - tokens.len()
}
