//! Compact bitset representation for the sample set under a node.
//!
//! # Overview
//! The split hasher needs, for every internal node, the set of sample keys
//! beneath it. Sample keys are sorted alphabetically and numbered, so a set of
//! keys becomes a set of bit positions, and reading the set bits back in
//! increasing order yields the keys already sorted.
//!
//! # Example
//! For keys `["s1", "s2", "s3", "s4"]` mapped to indices `[0, 1, 2, 3]`:
//! - node over {s1, s3} → bitset `0b0101` (bits 0 and 2 set)
//! - node over {s2, s3, s4} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset over sample indices.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily many
/// samples. Each u64 word holds 64 sample indices.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed. Calculate as `num_samples.div_ceil(64)`
    ///
    /// # Example
    /// ```
    /// # use tanglegram::bitset::Bitset;
    /// // 100 samples need 2 words (128 bits)
    /// let bs = Bitset::zeros(2);
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use tanglegram::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6; // idx / 64
        let bit = idx & 63; // idx % 64
        self.0[word] |= 1u64 << bit;
    }

    /// Union in place: `self` becomes `self ∪ other`.
    ///
    /// # Example
    /// ```
    /// # use tanglegram::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set(0);
    ///
    /// let mut right = Bitset::zeros(1);
    /// right.set(1);
    ///
    /// left.or_assign(&right);
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Number of samples in the set.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set bit positions in increasing order.
    ///
    /// # Example
    /// ```
    /// # use tanglegram::bitset::Bitset;
    /// let mut bs = Bitset::zeros(2);
    /// bs.set(70);
    /// bs.set(3);
    /// assert_eq!(bs.iter_ones().collect::<Vec<_>>(), vec![3, 70]);
    /// ```
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1; // clear lowest set bit
                Some(w * 64 + offset)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_or() {
        let mut bs1 = Bitset::zeros(1);
        bs1.set(0);
        bs1.set(1);

        let mut bs2 = Bitset::zeros(1);
        bs2.set(2);
        bs2.set(3);

        bs1.or_assign(&bs2);
        assert_eq!(bs1.0[0], 0b1111);
        assert_eq!(bs1.count_ones(), 4);
    }

    /// How the sample sets of the crate's four-sample test tree look.
    ///
    /// ```text
    ///          root
    ///         /    \
    ///        a      b
    ///       / \    / \
    ///      s1  s2 s3  s4
    /// ```
    ///
    /// Key mapping: s1=0, s2=1, s3=2, s4=3
    ///
    /// - a: {s1, s2} → `0b0011`
    /// - b: {s3, s4} → `0b1100`
    /// - root: a ∪ b → `0b1111`
    #[test]
    fn test_four_sample_tree_sets() {
        let mut a = Bitset::zeros(1);
        a.set(0);
        a.set(1);
        let mut b = Bitset::zeros(1);
        b.set(2);
        b.set(3);

        let mut root = Bitset::zeros(1);
        root.or_assign(&a);
        root.or_assign(&b);
        assert_eq!(root.0[0], 0b1111);
        assert_eq!(b.iter_ones().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_iter_ones_across_words() {
        let mut bs = Bitset::zeros(2);
        bs.set(0);
        bs.set(63);
        bs.set(64);
        bs.set(127);

        assert_eq!(bs.count_ones(), 4);
        assert_eq!(bs.iter_ones().collect::<Vec<_>>(), vec![0, 63, 64, 127]);
    }

    #[test]
    fn test_iter_ones_empty() {
        assert_eq!(Bitset::zeros(3).iter_ones().count(), 0);
    }
}
