//! Security module (§4.2): PWK/LWK generation and constant-time
//! verification. Payload encryption is an explicit non-goal (§1) — this
//! module only ever authenticates session participants.

use crate::{ct::ct_eq_bytes, random::Generator};
use zeroize::Zeroize;

pub const KEY_LEN: usize = 16;

/// A 16-byte PWK or LWK.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    #[inline]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Byte-equality that does not short-circuit on the first mismatch.
    #[inline]
    pub fn verify(&self, expected: &Key) -> bool {
        ct_eq_bytes(&self.0, &expected.0)
    }
}

impl core::fmt::Debug for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print key material.
        f.write_str("Key(..)")
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        // Zeroes key material before the memory is released (§4.2); this
        // does not fetch fresh randomness from a `Generator` to overwrite
        // with first, since `Drop` has no access to one and a thread-local
        // CSPRNG would be pure ceremony over a plain zero-fill.
        self.0.zeroize();
    }
}

/// Generates a fresh host PWK from `generator`.
pub fn generate_pwk(generator: &mut dyn Generator) -> Key {
    let mut bytes = [0u8; KEY_LEN];
    generator.private_random_fill(&mut bytes);
    Key(bytes)
}

/// Generates a fresh client LWK from `generator`.
pub fn generate_lwk(generator: &mut dyn Generator) -> Key {
    let mut bytes = [0u8; KEY_LEN];
    generator.private_random_fill(&mut bytes);
    Key(bytes)
}

/// Verifies `received` against `expected` without leaking timing
/// information about which byte first differed.
#[inline]
pub fn verify_key(received: &Key, expected: &Key) -> bool {
    received.verify(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::testing::Fixed;

    #[test]
    fn generated_keys_round_trip_through_verify() {
        let mut gen = Fixed::default();
        let pwk = generate_pwk(&mut gen);
        assert!(verify_key(&pwk, &pwk));
    }

    #[test]
    fn distinct_keys_do_not_verify() {
        let mut gen = Fixed::default();
        let a = generate_pwk(&mut gen);
        let b = generate_pwk(&mut gen);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert!(!verify_key(&a, &b));
    }
}
