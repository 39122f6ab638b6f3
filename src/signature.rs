//! 2-bit packed sequence signatures.
//!
//! Each nucleotide takes two bits, least-significant symbol first:
//!
//! ```text
//! A = 00   C = 01   G = 10   T = 11
//! ```
//!
//! A signature is a single `u64`, so only the first [`MAX_SYMBOLS`] symbols
//! of a sequence contribute. Anything past that is dropped.

use std::fmt;

/// Number of symbols that fit in one signature.
pub const MAX_SYMBOLS: usize = 32;

/// High bit of every 2-bit symbol.
const HIGH_BITS: u64 = 0xAAAA_AAAA_AAAA_AAAA;
/// Low bit of every 2-bit symbol.
const LOW_BITS: u64 = 0x5555_5555_5555_5555;

const SYMBOLS: [char; 4] = ['A', 'C', 'G', 'T'];

/// A fixed-width, bit-packed encoding of a sequence prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Signature(u64);

impl Signature {
    /// Number of bits in a signature (one bit plane each in a node matrix).
    pub const BITS: usize = 64;

    #[inline]
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Bit `i` of the signature, `0` being the least significant.
    #[inline]
    pub fn bit(self, i: usize) -> bool {
        debug_assert!(i < Self::BITS);
        (self.0 >> i) & 1 != 0
    }

    /// Encode a nucleotide sequence.
    ///
    /// `C`, `G` and `T` (either case) map to `01`, `10`, `11`; every other
    /// byte, including `A` and ambiguity codes such as `N`, maps to `00`.
    pub fn encode(sequence: &[u8]) -> Self {
        let mut sig = 0u64;
        for (i, &c) in sequence.iter().take(MAX_SYMBOLS).enumerate() {
            sig |= u64::from(symbol_code(c)) << (i * 2);
        }
        Self(sig)
    }

    /// Decode the first `len` symbols back into nucleotide letters.
    ///
    /// Lossy: anything that encoded as `00` comes back as `A`.
    pub fn decode(self, len: usize) -> String {
        (0..len.min(MAX_SYMBOLS))
            .map(|i| SYMBOLS[((self.0 >> (i * 2)) & 0b11) as usize])
            .collect()
    }

    /// Number of symbol positions at which the two signatures differ.
    ///
    /// A mismatch in either bit of a symbol counts once, so the result is in
    /// `0..=32`.
    #[inline]
    pub fn distance(self, other: Self) -> u32 {
        let x = self.0 ^ other.0;
        (((x & HIGH_BITS) >> 1) | (x & LOW_BITS)).count_ones()
    }
}

#[inline]
fn symbol_code(c: u8) -> u8 {
    match c {
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 0,
    }
}

/// Free-function form of [`Signature::distance`].
#[inline]
pub fn distance(a: Signature, b: Signature) -> u32 {
    a.distance(b)
}

impl From<u64> for Signature {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl From<Signature> for u64 {
    fn from(sig: Signature) -> Self {
        sig.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:#018x})", self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
