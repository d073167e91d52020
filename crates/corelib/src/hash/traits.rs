//! Core hash function trait.

/// Deterministic mapping from arbitrary bytes to a point in `[0, 2^32)`.
///
/// Implementations are stateless and thread-safe, so a single instance can
/// be shared by every ring snapshot and every request thread.
pub trait HashFunction: Send + Sync + 'static {
    /// Hash `key` into the ring space.
    fn hash(&self, key: &[u8]) -> u32;

    /// Returns the name of this hash function.
    fn name(&self) -> &'static str;
}
