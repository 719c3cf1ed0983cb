//! Derive overlay keys from application values.
//!
//! A value is canonically encoded with bencode, hashed, optionally salted with a
//! process-wide counter, and the composition is hashed again into a [Key].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use sha1_smol::Sha1;

use crate::common::Key;
use crate::{Error, Result};

/// Salt appended to seeded keys; strictly increasing for the lifetime of the process.
static SALT: AtomicU64 = AtomicU64::new(0);

/// Make a key for `value` that is distinct from every other seeded key made in this process.
///
/// Equivalent to `make_key_with(value, true)`.
pub fn make_key<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    make_key_with(value, true)
}

/// Make a key for `value` that is identical for equal values.
///
/// Equivalent to `make_key_with(value, false)`.
pub fn make_key_unseeded<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    make_key_with(value, false)
}

/// Make a key for `value`, and return its string form.
///
/// Fails with [Error::UnhashableValue] if `value` has no canonical encoding,
/// for example floats, or maps with non string keys.
pub fn make_key_with<T: Serialize + ?Sized>(value: &T, seed: bool) -> Result<String> {
    Ok(derive_key(value, seed)?.to_string())
}

pub(crate) fn derive_key<T: Serialize + ?Sized>(value: &T, seed: bool) -> Result<Key> {
    let mut composed = value_hash(value)?;

    if seed {
        let salt = SALT.fetch_add(1, Ordering::Relaxed) + 1;
        composed.push_str(&salt.to_string());
    }

    Ok(Key::hash(composed))
}

/// Fixed width hex digest of the canonical encoding of `value`.
fn value_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let encoded = serde_bencode::to_bytes(&value)
        .map_err(|error| Error::UnhashableValue(error.to_string()))?;

    let mut hasher = Sha1::new();
    hasher.update(&encoded);
    let digest = hasher.digest().bytes();

    Ok(digest[..8].iter().map(|byte| format!("{byte:02x}")).collect())
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeMap, HashSet};

    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Tasklet {
        name: &'static str,
        args: Vec<i64>,
    }

    #[test]
    fn unseeded_is_deterministic() {
        let a = make_key_unseeded("ping_channel").unwrap();
        let b = make_key_unseeded("ping_channel").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert_ne!(a, make_key_unseeded("pong_channel").unwrap());
    }

    #[test]
    fn unsized_values() {
        let owned = String::from("ping_channel");
        let bytes: &[u8] = b"ping_channel";

        assert_eq!(
            make_key_unseeded("ping_channel").unwrap(),
            make_key_unseeded(&owned).unwrap()
        );
        assert_eq!(
            make_key_unseeded(serde_bytes::Bytes::new(bytes)).unwrap(),
            make_key_unseeded(&owned).unwrap()
        );
    }

    #[test]
    fn seeded_is_distinct() {
        let keys: HashSet<String> = (0..1000)
            .map(|_| make_key("same value").unwrap())
            .collect();

        assert_eq!(keys.len(), 1000);
        assert!(!keys.contains(&make_key_unseeded("same value").unwrap()));
    }

    #[test]
    fn structured_values() {
        let tasklet = Tasklet {
            name: "MyTasklet",
            args: vec![1, 2, 3],
        };

        assert_eq!(
            make_key_unseeded(&tasklet).unwrap(),
            make_key_unseeded(&Tasklet {
                name: "MyTasklet",
                args: vec![1, 2, 3],
            })
            .unwrap()
        );

        let mut map = BTreeMap::new();
        map.insert("k", 1);

        assert!(make_key_unseeded(&map).is_ok());
        assert!(make_key_unseeded(&(1, "two", vec![3_u8])).is_ok());
    }

    #[test]
    fn unhashable_values() {
        assert!(matches!(
            make_key(&1.5_f64),
            Err(Error::UnhashableValue(_))
        ));

        let mut map = BTreeMap::new();
        map.insert(1, "non string key");

        assert!(matches!(
            make_key_unseeded(&map),
            Err(Error::UnhashableValue(_))
        ));
    }

    #[test]
    fn derived_from_value_hash() {
        let hash = value_hash("ping_channel").unwrap();

        assert_eq!(hash.len(), 16);
        assert_eq!(
            derive_key("ping_channel", false).unwrap(),
            Key::hash(hash.as_bytes())
        );
    }
}
