use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of bearer tokens and premium claim tokens.
pub const TOKEN_LENGTH: usize = 128;

/// Length of the throwaway password given to participants created without one.
pub const GENERATED_PASSWORD_LENGTH: usize = 32;

/// Random string over `[0-9A-Za-z]` from the thread-local CSPRNG.
pub fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn generate_token() -> String {
    random_alphanumeric(TOKEN_LENGTH)
}

/// Human-typable event key of the requested length.
pub fn generate_event_key(len: usize) -> String {
    random_alphanumeric(len)
}

pub fn generate_password() -> String {
    random_alphanumeric(GENERATED_PASSWORD_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn consecutive_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn event_key_honours_length() {
        assert_eq!(generate_event_key(8).len(), 8);
        assert_eq!(generate_event_key(11).len(), 11);
    }
}
