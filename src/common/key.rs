//! Overlay key: a node position or a message destination
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1_smol::Sha1;
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of keys in bytes.
pub const KEY_SIZE: usize = 20;
/// The length of a key's canonical string form.
pub const KEY_STR_LEN: usize = KEY_SIZE * 2;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Fixed-width overlay key.
///
/// Its canonical string form (`keystr`) is 40 lowercase hex digits.
pub struct Key(#[serde(with = "serde_bytes")] pub [u8; KEY_SIZE]);

impl Key {
    pub fn random() -> Key {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; KEY_SIZE] = rng.gen();

        Key(random_bytes)
    }

    /// Derive a key from arbitrary bytes, by hashing them with SHA-1.
    pub fn hash<T: AsRef<[u8]>>(data: T) -> Key {
        let mut hasher = Sha1::new();
        hasher.update(data.as_ref());

        Key(hasher.digest().bytes())
    }

    /// Create a new Key from some bytes. Returns Err if `bytes` is not of length
    /// [KEY_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Key> {
        let bytes = bytes.as_ref();
        let array: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("{} bytes", bytes.len())))?;

        Ok(Key(array))
    }

    /// Xor distance between this key and a target.
    pub fn xor(&self, other: &Key) -> [u8; KEY_SIZE] {
        let mut result = [0_u8; KEY_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        result
    }

    /// Compare the xor distances of `a` and `b` to this key.
    ///
    /// Returns [Ordering::Less] if `a` is closer.
    pub fn closer(&self, a: &Key, b: &Key) -> Ordering {
        self.xor(a).cmp(&self.xor(b))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Key> {
        if s.len() != KEY_STR_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidKey(s.to_string()));
        }

        let mut bytes = [0_u8; KEY_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte =
                u8::from_str_radix(pair, 16).map_err(|_| Error::InvalidKey(s.to_string()))?;
        }

        Ok(Key(bytes))
    }
}

impl From<[u8; KEY_SIZE]> for Key {
    fn from(bytes: [u8; KEY_SIZE]) -> Key {
        Key(bytes)
    }
}
