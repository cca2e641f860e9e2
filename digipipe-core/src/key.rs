//! Container keys.
//!
//! A [`Key`] identifies one container inside an event: the event mask selects
//! the logical data stream (signal, overlay, ...) and the item is a 32-bit
//! hash of the container name. The raw 64-bit form is `(mask << 32) | item`,
//! so ordering by `(mask, item)` matches ordering by the raw value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event/output stream selector.
pub type Mask = u16;

/// Hash of a container name.
pub type ItemKey = u32;

/// Identifier of a container within an event.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Key {
    mask: Mask,
    item: ItemKey,
}

impl Key {
    /// Creates a key from a mask and a container name.
    #[must_use]
    pub fn new(mask: Mask, name: &str) -> Self {
        Self {
            mask,
            item: Self::item_hash(name),
        }
    }

    /// Creates a key from a mask and an already hashed item.
    #[inline]
    #[must_use]
    pub fn from_parts(mask: Mask, item: ItemKey) -> Self {
        Self { mask, item }
    }

    /// Decodes a raw 64-bit key. Bits above the mask are ignored.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            mask: ((raw >> 32) & 0xFFFF) as Mask,
            item: (raw & 0xFFFF_FFFF) as ItemKey,
        }
    }

    /// Returns the raw 64-bit value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.mask) << 32) | u64::from(self.item)
    }

    /// Returns the event mask.
    #[inline]
    #[must_use]
    pub fn mask(&self) -> Mask {
        self.mask
    }

    /// Returns the container item hash.
    #[inline]
    #[must_use]
    pub fn item(&self) -> ItemKey {
        self.item
    }

    /// Returns the same item under a different mask.
    #[inline]
    #[must_use]
    pub fn with_mask(&self, mask: Mask) -> Self {
        Self {
            mask,
            item: self.item,
        }
    }

    /// Hashes a container name (Jenkins one-at-a-time).
    ///
    /// Must stay bit-compatible with the writer of the input containers.
    /// Bytes are added as signed `char` values, so non-ASCII UTF-8 bytes
    /// are sign-extended before mixing.
    #[must_use]
    pub fn item_hash(name: &str) -> ItemKey {
        let mut hash: u32 = 0;
        for &byte in name.as_bytes() {
            let extended = if byte & 0x80 == 0 {
                u32::from(byte)
            } else {
                u32::from(byte) | 0xFFFF_FF00
            };
            hash = hash.wrapping_add(extended);
            hash = hash.wrapping_add(hash << 10);
            hash ^= hash >> 6;
        }
        hash = hash.wrapping_add(hash << 3);
        hash ^= hash >> 11;
        hash.wrapping_add(hash << 15)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(mask={:#06x}, item={:#010x})", self.mask, self.item)
    }
}

impl From<Key> for u64 {
    fn from(key: Key) -> Self {
        key.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        let key = Key::new(0x0A, "ecal");
        assert_eq!(Key::from_raw(key.as_u64()), key);
        assert_eq!(key.as_u64() >> 32, 0x0A);
    }

    #[test]
    fn test_same_name_same_item() {
        let a = Key::new(1, "hcal");
        let b = Key::new(2, "hcal");
        assert_eq!(a.item(), b.item());
        assert_ne!(a, b);
        assert_eq!(a.with_mask(2), b);
    }

    #[test]
    fn test_ordering_matches_raw_value() {
        let mut keys = vec![
            Key::new(3, "a"),
            Key::new(0, "zzz"),
            Key::new(1, "b"),
            Key::new(0, "a"),
        ];
        let mut raw: Vec<u64> = keys.iter().map(Key::as_u64).collect();
        keys.sort();
        raw.sort_unstable();
        assert_eq!(keys.iter().map(Key::as_u64).collect::<Vec<_>>(), raw);
    }

    #[test]
    fn test_item_hash_known_values() {
        assert_eq!(Key::item_hash(""), 0);
        // One-at-a-time reference value for "a".
        assert_eq!(Key::item_hash("a"), 0xCA2E_9442);
        assert_ne!(Key::item_hash("ecal"), Key::item_hash("hcal"));
    }

    #[test]
    fn test_item_hash_sign_extends_high_bytes() {
        // "é" is 0xC3 0xA9 in UTF-8; both bytes count as negative chars.
        assert_eq!(Key::item_hash("é"), 0x0191_48AE);
        assert_eq!(Key::item_hash("ecal"), 0x9A61_D055);
    }
}
