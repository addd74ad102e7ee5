//! On-disk keyring format: header, record layout, and load/save/auto-update logic.
//!
//! Wire format (all integers big-endian):
//!
//! ```text
//! magic:        4 bytes   b"WKR1"
//! version:      u32       currently 1
//! count:        u32       number of records that follow
//! record[count]:
//!     created_at:   i64
//!     valid_after:  i64
//!     key_bytes:    [u8; 16]
//! ```

use std::io;
use std::path::Path;

use camino::Utf8Path;

use super::key::{Key, KeyBytes, KEY_SIZE};

const MAGIC: &[u8; 4] = b"WKR1";
const VERSION: u32 = 1;
const RECORD_SIZE: usize = 8 + 8 + KEY_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("keyring I/O error")]
    Io(#[from] io::Error),
    #[error("keyring file is truncated")]
    Truncated,
    #[error("keyring file has bad magic bytes")]
    BadMagic,
    #[error("keyring file has unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("keyring has no keys")]
    Empty,
}

/// An in-memory, ordered collection of keys.
///
/// Keys are kept sorted by `created_at` ascending. The "current" encryption key is
/// the newest key whose `valid_after` has already passed; decryption tries every key
/// in the ring, newest first, since a token may have been encrypted under an older
/// key that is still within its rotation window.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: Vec<Key>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Key) {
        let pos = self.keys.partition_point(|k| k.created_at <= key.created_at);
        self.keys.insert(pos, key);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// The newest key valid for encrypting new tokens as of `now`, if any.
    pub fn current_key(&self, now: i64) -> Option<&Key> {
        self.keys.iter().rev().find(|k| k.is_valid_at(now))
    }

    /// All keys, newest first, for attempting decryption.
    pub fn keys_newest_first(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter().rev()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, KeyringError> {
        if bytes.len() < 12 {
            return Err(KeyringError::Truncated);
        }
        if &bytes[0..4] != MAGIC {
            return Err(KeyringError::BadMagic);
        }
        let version = u32::from_be_bytes(bytes[4..8].try_into().expect("slice is 4 bytes"));
        if version != VERSION {
            return Err(KeyringError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes(bytes[8..12].try_into().expect("slice is 4 bytes")) as usize;

        let expected_len = 12 + count * RECORD_SIZE;
        if bytes.len() < expected_len {
            return Err(KeyringError::Truncated);
        }

        let mut keyring = Self::new();
        let mut offset = 12;
        for _ in 0..count {
            let record = &bytes[offset..offset + RECORD_SIZE];
            let created_at = i64::from_be_bytes(record[0..8].try_into().expect("slice is 8 bytes"));
            let valid_after = i64::from_be_bytes(record[8..16].try_into().expect("slice is 8 bytes"));
            let mut key_bytes = [0u8; KEY_SIZE];
            key_bytes.copy_from_slice(&record[16..16 + KEY_SIZE]);
            keyring.insert(Key::new(created_at, valid_after, KeyBytes::new(key_bytes)));
            offset += RECORD_SIZE;
        }

        Ok(keyring)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.keys.len() * RECORD_SIZE);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&(self.keys.len() as u32).to_be_bytes());
        for key in &self.keys {
            out.extend_from_slice(&key.created_at.to_be_bytes());
            out.extend_from_slice(&key.valid_after.to_be_bytes());
            out.extend_from_slice(key.bytes.as_bytes());
        }
        out
    }
}

/// Loads a keyring from `path`, creating it (with a single freshly generated key)
/// if it does not exist yet.
///
/// `now` is the creation timestamp recorded for an auto-created key.
pub fn load_or_create(path: impl AsRef<Path>, now: i64) -> Result<Keyring, KeyringError> {
    let path = path.as_ref();
    match std::fs::read(path) {
        Ok(bytes) => Keyring::decode(&bytes),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut keyring = Keyring::new();
            keyring.insert(Key::generate(now, now));
            save(path, &keyring)?;
            Ok(keyring)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn save(path: impl AsRef<Path>, keyring: &Keyring) -> Result<(), KeyringError> {
    let path = path.as_ref();
    let encoded = keyring.encode();
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, &encoded)?;
    std::fs::rename(&tmp_path, path)?;
    if let Some(dir) = path.parent() {
        std::fs::File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// Outcome of a call to [`auto_update`]: whether the ring was freshly created, had a
/// key appended, or needed no change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KauStatus {
    /// The keyring file did not exist and was created with one fresh key.
    Created,
    /// A new key was appended to an existing, stale ring.
    Updated,
    /// No change was necessary (or `update_enabled` was false).
    None,
}

/// Ensures a key valid as of `now` exists, generating and persisting one valid
/// `lifetime / 10` seconds in the future if the current newest key is older than
/// `lifetime`. Callers invoke this periodically (e.g. from a background task) rather
/// than managing rotation by hand.
///
/// `update_enabled` gates the append/create step only; a ring can always be read
/// without it. Returns `Updated`/`Created` so the caller can log the lifecycle event
/// distinctly from a simple boolean.
pub fn auto_update(
    path: impl AsRef<Path>,
    keyring: &mut Keyring,
    now: i64,
    lifetime: i64,
    update_enabled: bool,
) -> Result<KauStatus, KeyringError> {
    if keyring.is_empty() {
        if !update_enabled {
            return Err(KeyringError::Empty);
        }
        keyring.insert(Key::generate(now, now));
        save(path.as_ref(), keyring)?;
        return Ok(KauStatus::Created);
    }

    if !update_enabled {
        return Ok(KauStatus::None);
    }

    let needs_new_key = match keyring.keys_newest_first().next() {
        Some(newest) => now - newest.created_at > lifetime,
        None => true,
    };

    if !needs_new_key {
        return Ok(KauStatus::None);
    }

    keyring.insert(Key::generate(now, now + lifetime / 10));
    save(path.as_ref(), keyring)?;
    Ok(KauStatus::Updated)
}

/// A cheaply cloneable handle around a shared, mutex-protected keyring.
///
/// Cloning an instance shares the same underlying ring; each clone observes
/// rotations performed through any other clone.
#[derive(Clone)]
pub struct KeyringHandle {
    inner: std::sync::Arc<parking_lot::Mutex<KeyringHandleInner>>,
}

struct KeyringHandleInner {
    path: camino::Utf8PathBuf,
    keyring: Keyring,
}

impl KeyringHandle {
    pub fn load_or_create(path: impl AsRef<Utf8Path>, now: i64) -> Result<Self, KeyringError> {
        let path = path.as_ref().to_owned();
        let keyring = load_or_create(&path, now)?;
        Ok(Self {
            inner: std::sync::Arc::new(parking_lot::Mutex::new(KeyringHandleInner { path, keyring })),
        })
    }

    /// The key to use for encrypting a new token, if one is currently valid.
    pub fn current_key(&self, now: i64) -> Option<Key> {
        self.inner.lock().keyring.current_key(now).cloned()
    }

    /// Every key in the ring, newest first, for attempting decryption.
    pub fn all_keys(&self, now: i64) -> Vec<Key> {
        let _ = now;
        self.inner.lock().keyring.keys_newest_first().cloned().collect()
    }

    /// Rotates in a new key if the newest one has aged past `lifetime`.
    pub fn maybe_rotate(&self, now: i64, lifetime: i64) -> Result<KauStatus, KeyringError> {
        let mut guard = self.inner.lock();
        let KeyringHandleInner { path, keyring } = &mut *guard;
        auto_update(path.as_std_path(), keyring, now, lifetime, true)
    }
}

impl core::fmt::Debug for KeyringHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyringHandle").finish_non_exhaustive()
    }
}
