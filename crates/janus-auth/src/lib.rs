//! Janus authentication.
//!
//! Opaque bearer tokens for owners and participants, the connection-session
//! registry used by the realtime gateway, and password verification against
//! stored argon2 hashes.

pub mod authenticator;
pub mod keys;
pub mod password;
pub mod sessions;
pub mod tokens;

pub use authenticator::{AuthConfig, Authenticator, LoginScope};
pub use password::{Argon2Hasher, CredentialHasher};
pub use sessions::{ConnectionSession, ConnectionSessionRegistry};
pub use tokens::{TokenStore, TokenStoreConfig};
