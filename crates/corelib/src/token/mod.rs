//! Positions on the hash ring.
//!
//! The hash space is `[0, 2^32)`. Every key hash and every virtual node
//! position is a [`Token`] in that space, and the space wraps around at the
//! top so that `Token::MAX` is immediately followed by `Token::ZERO`.

use std::fmt;

/// A point in the 32-bit hash space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Token(pub u32);

impl Token {
    /// Start of the ring.
    pub const ZERO: Token = Token(0);
    /// Last point before the ring wraps back to [`Token::ZERO`].
    pub const MAX: Token = Token(u32::MAX);

    /// Number of distinct points in the hash space.
    pub const SPACE: u64 = 1 << 32;

    /// Clockwise distance from `self` to `other`.
    ///
    /// The result is in `[0, 2^32)`; a token's distance to itself is zero.
    #[inline]
    pub fn distance_to(&self, other: &Token) -> u64 {
        if other.0 >= self.0 {
            u64::from(other.0 - self.0)
        } else {
            Self::SPACE - u64::from(self.0) + u64::from(other.0)
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_max(&self) -> bool {
        self.0 == u32::MAX
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
