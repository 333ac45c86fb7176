//! Single-use request nonces.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated nonces.
pub const NONCE_LENGTH: usize = 30;

/// Generate a random alphanumeric nonce of [`NONCE_LENGTH`] characters.
#[must_use]
pub fn create_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LENGTH)
        .map(char::from)
        .collect()
}
