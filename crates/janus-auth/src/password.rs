use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

/// Password hashing capability. `verify` never fails loudly: a malformed
/// stored hash is simply a mismatch.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> anyhow::Result<String>;
    fn verify(&self, password: &str, stored_hash: &str) -> bool;
}

/// Argon2id with a server-wide pepper appended to every password.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    pepper: String,
}

impl Argon2Hasher {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            argon2: Argon2::default(),
            pepper: pepper.into(),
        }
    }

    /// Custom cost parameters, e.g. a cheap profile for tests.
    pub fn with_params(pepper: impl Into<String>, params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            pepper: pepper.into(),
        }
    }

    fn peppered(&self, password: &str) -> String {
        format!("{}{}", password, self.pepper)
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(self.peppered(password).as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        self.argon2
            .verify_password(self.peppered(password).as_bytes(), &parsed)
            .is_ok()
    }
}
