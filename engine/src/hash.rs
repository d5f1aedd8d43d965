// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hashing names into the `u64` ids used as [`SHashMap`] keys and stored in
//! packed asset files.
//!
//! [`SHashMap`]: crate::collections::SHashMap

use core::hash::Hasher;

use siphasher::sip::SipHasher13;

/// Hashes the string into an id with SipHash-1-3 and zero keys. The same
/// string always produces the same id, also across platforms and builds,
/// since the ids are written into asset files: the hash works on `u64`s
/// regardless of the target's pointer width.
pub fn string_id(name: &str) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(name.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::string_id;

    #[test]
    fn ids_are_stable_and_distinct() {
        assert_eq!(string_id("Armature|Walk"), string_id("Armature|Walk"));
        assert_ne!(string_id("hips"), string_id("spine"));
        assert_ne!(string_id(""), string_id("a"));
    }

    #[test]
    fn ids_match_the_ones_in_packed_files() {
        assert_eq!(0x4b42_1fa9_a747_a791, string_id("hips"));
        assert_eq!(0x1632_5e2d_ed0c_2196, string_id("spine"));
        assert_eq!(0xd1fb_a762_150c_532c, string_id(""));
    }
}
