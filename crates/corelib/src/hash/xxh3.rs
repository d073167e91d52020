//! XXH3 hash function (default).

use crate::hash::traits::HashFunction;
use xxhash_rust::xxh3::xxh3_64;

/// XXH3-64 with the default (fixed) seed, folded to 32 bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct Xxh3Hash;

impl HashFunction for Xxh3Hash {
    fn hash(&self, key: &[u8]) -> u32 {
        super::fold(xxh3_64(key))
    }

    fn name(&self) -> &'static str {
        "xxh3"
    }
}
