//! SipHash-1-3 hash function.

use crate::hash::traits::HashFunction;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// SipHash-1-3 keyed with zeros, folded to 32 bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct SipHash13;

impl HashFunction for SipHash13 {
    fn hash(&self, key: &[u8]) -> u32 {
        let mut hasher = SipHasher13::new();
        hasher.write(key);
        super::fold(hasher.finish())
    }

    fn name(&self) -> &'static str {
        "siphash13"
    }
}
