//! A single keyring entry: creation time, validity window, and the key material itself.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size, in bytes, of a key's symmetric material (AES-128 + room for the HMAC
/// derivation the codec performs on top of it).
pub const KEY_SIZE: usize = 16;

/// Raw symmetric key bytes, zeroized on drop.
///
/// This stands in for the mlock'd secure-memory storage the upstream project uses
/// for key material; a long-running WebKDC process keeps very few of these alive at
/// once (one ring, a handful of keys), so heap storage with zeroize-on-drop is
/// sufficient rather than a custom allocator.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct KeyBytes([u8; KEY_SIZE]);

impl KeyBytes {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Generates a fresh random key using the OS RNG.
    pub fn generate() -> Self {
        use rand::RngCore as _;

        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl core::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyBytes").finish_non_exhaustive()
    }
}

/// One entry in a keyring: the key material plus its lifecycle timestamps.
///
/// A key becomes eligible for encrypting new tokens once `valid_after` has passed,
/// but remains usable for decrypting tokens encrypted under it indefinitely (the
/// keyring never discards old keys on its own; that is an operational decision left
/// to whoever prunes the keyring file).
#[derive(Clone, Debug)]
pub struct Key {
    pub created_at: i64,
    pub valid_after: i64,
    pub bytes: KeyBytes,
}

impl Key {
    pub fn new(created_at: i64, valid_after: i64, bytes: KeyBytes) -> Self {
        Self {
            created_at,
            valid_after,
            bytes,
        }
    }

    /// Generates a new key valid starting `valid_after`, created "now".
    pub fn generate(created_at: i64, valid_after: i64) -> Self {
        Self::new(created_at, valid_after, KeyBytes::generate())
    }

    /// Whether this key may be used to encrypt new tokens as of `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.valid_after <= now
    }
}
