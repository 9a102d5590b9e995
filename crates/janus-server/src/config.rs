use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use janus_api::Limits;
use janus_auth::{AuthConfig, TokenStoreConfig};
use janus_gateway::FlowConfig;

pub const DEFAULT_PEPPER: &str = "saltysalt";

/// Process configuration, read from `JANUS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub hash_pepper: String,
    pub token_ttl: chrono::Duration,
    pub token_sweep_threshold: usize,
    pub session_ttl: chrono::Duration,
    pub storage_timeout: Duration,
    pub debug: bool,
    pub debug_master_password: Option<String>,
    pub limits: Limits,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            host: var("JANUS_HOST", "0.0.0.0"),
            port: parse(&lookup, "JANUS_PORT", 8000)?,
            db_path: PathBuf::from(var("JANUS_DB_PATH", "janus.db")),
            hash_pepper: var("JANUS_HASH_PEPPER", DEFAULT_PEPPER),
            token_ttl: chrono::Duration::seconds(parse(&lookup, "JANUS_TOKEN_TTL_SECS", 604_800)?),
            token_sweep_threshold: parse(&lookup, "JANUS_TOKEN_SWEEP_THRESHOLD", 8192)?,
            session_ttl: chrono::Duration::seconds(parse(
                &lookup,
                "JANUS_SESSION_TTL_SECS",
                604_800,
            )?),
            storage_timeout: Duration::from_millis(parse(&lookup, "JANUS_STORAGE_TIMEOUT_MS", 2000)?),
            debug: parse(&lookup, "JANUS_DEBUG", false)?,
            debug_master_password: lookup("JANUS_DEBUG_MASTER_PASSWORD").filter(|p| !p.is_empty()),
            limits: Limits {
                max_free_events: parse(&lookup, "JANUS_MAX_FREE_EVENTS", 5)?,
                max_free_participants: parse(&lookup, "JANUS_MAX_FREE_PARTICIPANTS", 2)?,
            },
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn token_store(&self) -> TokenStoreConfig {
        TokenStoreConfig {
            ttl: self.token_ttl,
            sweep_threshold: self.token_sweep_threshold,
        }
    }

    /// The master password only takes effect in debug mode.
    pub fn auth(&self) -> AuthConfig {
        AuthConfig {
            debug_master_password: self
                .debug_master_password
                .clone()
                .filter(|_| self.debug),
        }
    }

    pub fn flow(&self) -> FlowConfig {
        FlowConfig {
            storage_timeout: self.storage_timeout,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.db_path, PathBuf::from("janus.db"));
        assert_eq!(cfg.hash_pepper, DEFAULT_PEPPER);
        assert_eq!(cfg.token_ttl, chrono::Duration::days(7));
        assert_eq!(cfg.token_sweep_threshold, 8192);
        assert_eq!(cfg.storage_timeout, Duration::from_secs(2));
        assert_eq!(cfg.limits.max_free_events, 5);
        assert_eq!(cfg.limits.max_free_participants, 2);
        assert!(!cfg.debug);
        assert_eq!(cfg.addr().unwrap().to_string(), "0.0.0.0:8000");
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("JANUS_PORT", "9100"),
            ("JANUS_TOKEN_TTL_SECS", "60"),
            ("JANUS_MAX_FREE_EVENTS", "1"),
            ("JANUS_DEBUG", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.token_store().ttl, chrono::Duration::seconds(60));
        assert_eq!(cfg.limits.max_free_events, 1);
        assert!(cfg.debug);
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = config(&[("JANUS_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("JANUS_PORT"));
    }

    #[test]
    fn master_password_requires_debug_mode() {
        let off = config(&[("JANUS_DEBUG_MASTER_PASSWORD", "open")]).unwrap();
        assert_eq!(off.auth().debug_master_password, None);

        let on = config(&[
            ("JANUS_DEBUG", "true"),
            ("JANUS_DEBUG_MASTER_PASSWORD", "open"),
        ])
        .unwrap();
        assert_eq!(on.auth().debug_master_password.as_deref(), Some("open"));
    }
}
