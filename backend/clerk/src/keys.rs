use rand::RngCore;

/// Produces a token value from a number of entropy bytes.
///
/// Output must be `2 * entropy_bytes` characters long, matching [`random_key`].
pub type KeyFn = Box<dyn Fn(usize) -> String + Send + Sync>;

/// Hex encoded bytes from the thread-local CSPRNG.
pub fn random_key(entropy_bytes: usize) -> String {
    let mut bytes = vec![0u8; entropy_bytes];
    rand::rng().fill_bytes(&mut bytes);

    hex::encode(bytes)
}
