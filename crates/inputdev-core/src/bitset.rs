// Inputdev Bit Sets
// Fixed-width bitmasks over a word array (modifier and capability masks)

use std::fmt;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-width bitmask stored in `WORDS` 64-bit words.
///
/// Bits outside the mask are treated as cleared: `test` returns false and
/// the mutating helpers ignore them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitSet<const WORDS: usize> {
    words: [u64; WORDS],
}

/// Modifier state of one device (see `keymap::ModifierBit`)
pub type ModifierMask = BitSet<1>;

/// Event-type capability mask as reported by EVIOCGBIT(0, ..)
pub type EventMask = BitSet<1>;

impl<const WORDS: usize> BitSet<WORDS> {
    /// Number of addressable bits
    pub const BITS: usize = WORDS * WORD_BITS;

    /// Create an empty set
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Create a set from raw words (lowest bit of word 0 is bit 0)
    pub const fn from_words(words: [u64; WORDS]) -> Self {
        Self { words }
    }

    fn locate(bit: usize) -> Option<(usize, u64)> {
        (bit < Self::BITS).then(|| (bit / WORD_BITS, 1u64 << (bit % WORD_BITS)))
    }

    /// Check whether `bit` is set
    pub fn test(&self, bit: usize) -> bool {
        Self::locate(bit)
            .map(|(idx, m)| self.words[idx] & m != 0)
            .unwrap_or(false)
    }

    pub fn set(&mut self, bit: usize) {
        if let Some((idx, m)) = Self::locate(bit) {
            self.words[idx] |= m;
        }
    }

    pub fn clear(&mut self, bit: usize) {
        if let Some((idx, m)) = Self::locate(bit) {
            self.words[idx] &= !m;
        }
    }

    /// Flip `bit`
    pub fn toggle(&mut self, bit: usize) {
        if let Some((idx, m)) = Self::locate(bit) {
            self.words[idx] ^= m;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate over the indices of all set bits, lowest first
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::BITS).filter(move |bit| self.test(*bit))
    }
}

impl<const WORDS: usize> Default for BitSet<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WORDS: usize> FromIterator<usize> for BitSet<WORDS> {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for bit in iter {
            set.set(bit);
        }
        set
    }
}

impl<const WORDS: usize> fmt::Debug for BitSet<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<const WORDS: usize> fmt::LowerHex for BitSet<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for w in self.words.iter().rev() {
            write!(f, "{:016x}", w)?;
        }
        Ok(())
    }
}
