//! Bit-plane transposed signature storage.
//!
//! A node holds up to `order` signatures. Instead of storing them row by
//! row, the node keeps one *plane* per signature bit: plane `i` is a bitmap
//! with one bit per child, set when that child's signature has bit `i` set.
//!
//! ```text
//!            child:  0 1 2 3 ... order-1
//! plane  0  [word 0][word 1]...          <- bit 0 of every child
//! plane  1  [word 0][word 1]...
//!   ...
//! plane 63  [word 0][word 1]...
//! ```
//!
//! Each plane is `ceil(order / 64)` words wide. Inserting, removing or
//! reconstructing one child touches exactly one bit per plane, no matter how
//! many other children the node holds.
//!
//! Words are atomics because the arena shares them between threads; writers
//! are serialized by the owning node's lock, readers outside that lock only
//! get a best-effort view.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::signature::Signature;

/// Number of bit planes in every matrix.
pub const PLANES: usize = Signature::BITS;

/// Words per plane needed to give every one of `order` children a bit.
#[inline]
pub fn words_per_plane(order: usize) -> usize {
    order.div_ceil(64)
}

/// Total words backing one matrix for the given order.
#[inline]
pub fn matrix_words(order: usize) -> usize {
    PLANES * words_per_plane(order)
}

/// A borrowed view of one node's matrix.
#[derive(Clone, Copy)]
pub struct BitMatrix<'a> {
    words: &'a [AtomicU64],
    stride: usize,
}

impl<'a> BitMatrix<'a> {
    /// Wrap `words`, which must hold exactly `PLANES * stride` words.
    pub fn new(words: &'a [AtomicU64], stride: usize) -> Self {
        debug_assert_eq!(words.len(), PLANES * stride);
        Self { words, stride }
    }

    /// Maximum number of children this matrix can address.
    #[inline]
    pub fn slots(&self) -> usize {
        self.stride * 64
    }

    #[inline]
    fn locate(&self, child: usize) -> (usize, u64) {
        debug_assert!(child < self.slots(), "child {child} out of range");
        (child / 64, 1u64 << (child % 64))
    }

    /// Set or clear bit `bit` of child `child`.
    #[inline]
    pub fn set_child_bit(&self, child: usize, bit: usize, value: bool) {
        debug_assert!(bit < PLANES);
        let (col, mask) = self.locate(child);
        let word = &self.words[bit * self.stride + col];
        if value {
            word.fetch_or(mask, Ordering::Relaxed);
        } else {
            word.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    /// Store `sig` in slot `child`, overwriting whatever was there.
    pub fn add_signature(&self, child: usize, sig: Signature) {
        for bit in 0..PLANES {
            self.set_child_bit(child, bit, sig.bit(bit));
        }
    }

    /// Clear slot `child` in every plane.
    pub fn remove_signature(&self, child: usize) {
        let (col, mask) = self.locate(child);
        for plane in 0..PLANES {
            self.words[plane * self.stride + col].fetch_and(!mask, Ordering::Relaxed);
        }
    }

    /// Rebuild the signature stored in slot `child`.
    pub fn extract_signature(&self, child: usize) -> Signature {
        let (col, mask) = self.locate(child);
        let mut bits = 0u64;
        for plane in 0..PLANES {
            if self.words[plane * self.stride + col].load(Ordering::Relaxed) & mask != 0 {
                bits |= 1u64 << plane;
            }
        }
        Signature::new(bits)
    }

    /// Rebuild the first `count` signatures, in slot order.
    pub fn extract_all(&self, count: usize, out: &mut impl Extend<Signature>) {
        out.extend((0..count).map(|child| self.extract_signature(child)));
    }

    /// Zero every plane.
    pub fn clear(&self) {
        for word in self.words {
            word.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(order: usize) -> (Vec<AtomicU64>, usize) {
        let stride = words_per_plane(order);
        let words = (0..PLANES * stride).map(|_| AtomicU64::new(0)).collect();
        (words, stride)
    }

    #[test]
    fn test_words_per_plane() {
        assert_eq!(words_per_plane(1), 1);
        assert_eq!(words_per_plane(10), 1);
        assert_eq!(words_per_plane(64), 1);
        assert_eq!(words_per_plane(65), 2);
        assert_eq!(matrix_words(130), 64 * 3);
    }

    #[test]
    fn test_add_extract() {
        let (words, stride) = storage(10);
        let m = BitMatrix::new(&words, stride);
        let sigs = [
            Signature::new(0),
            Signature::new(u64::MAX),
            Signature::encode(b"GATTACA"),
            Signature::new(0x8000_0000_0000_0001),
        ];
        for (i, &s) in sigs.iter().enumerate() {
            m.add_signature(i, s);
        }
        for (i, &s) in sigs.iter().enumerate() {
            assert_eq!(m.extract_signature(i), s, "slot {i}");
        }
        // Untouched slots stay empty.
        assert_eq!(m.extract_signature(9), Signature::new(0));
    }

    #[test]
    fn test_overwrite_and_remove_leave_neighbours_alone() {
        let (words, stride) = storage(4);
        let m = BitMatrix::new(&words, stride);
        m.add_signature(0, Signature::new(u64::MAX));
        m.add_signature(1, Signature::new(u64::MAX));
        m.add_signature(2, Signature::new(u64::MAX));

        m.add_signature(1, Signature::new(0x0F));
        assert_eq!(m.extract_signature(1), Signature::new(0x0F));

        m.remove_signature(0);
        assert_eq!(m.extract_signature(0), Signature::new(0));
        assert_eq!(m.extract_signature(1), Signature::new(0x0F));
        assert_eq!(m.extract_signature(2), Signature::new(u64::MAX));
    }

    #[test]
    fn test_set_child_bit() {
        let (words, stride) = storage(3);
        let m = BitMatrix::new(&words, stride);
        m.set_child_bit(2, 5, true);
        m.set_child_bit(2, 63, true);
        assert_eq!(m.extract_signature(2).bits(), (1 << 5) | (1 << 63));
        m.set_child_bit(2, 5, false);
        assert_eq!(m.extract_signature(2).bits(), 1 << 63);
        assert_eq!(m.extract_signature(1).bits(), 0);
    }

    #[test]
    fn test_wide_matrix_second_word() {
        let (words, stride) = storage(100);
        let m = BitMatrix::new(&words, stride);
        let s = Signature::encode(b"ACGTTGCA");
        m.add_signature(70, s);
        m.add_signature(5, Signature::new(1));
        assert_eq!(m.extract_signature(70), s);
        assert_eq!(m.extract_signature(6), Signature::new(0));

        let mut all = Vec::new();
        m.extract_all(6, &mut all);
        assert_eq!(all.len(), 6);
        assert_eq!(all[5], Signature::new(1));

        m.clear();
        assert_eq!(m.extract_signature(70), Signature::new(0));
    }
}
