use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// 64-bit content hash of a document, used for change detection only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Fingerprint)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fingerprint of the canonical JSON encoding of `value`: object keys
/// sorted, no insignificant whitespace.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<Fingerprint> {
    // `Value` objects are BTreeMap-backed, so re-encoding sorts every key.
    let canonical = serde_json::to_string(&serde_json::to_value(value)?)?;
    Ok(fingerprint_bytes(canonical.as_bytes()))
}

/// Leading 64 bits of the SHA-256 digest, so fingerprints agree across
/// builds and processes.
pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Fingerprint(u64::from_be_bytes(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn key_order_does_not_matter() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());

        let mut m1 = HashMap::new();
        let mut m2 = HashMap::new();
        for i in 0..32 {
            m1.insert(format!("k{}", i), i);
        }
        for i in (0..32).rev() {
            m2.insert(format!("k{}", i), i);
        }
        assert_eq!(fingerprint(&m1).unwrap(), fingerprint(&m2).unwrap());
    }

    #[test]
    fn content_changes_change_fingerprint() {
        let a = serde_json::json!({"routes": ["a"]});
        let b = serde_json::json!({"routes": ["b"]});
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn bytes_hash_to_a_fixed_value() {
        // First eight bytes of SHA-256("abc").
        assert_eq!(fingerprint_bytes(b"abc"), Fingerprint(0xba7816bf8f01cfea));
    }

    #[test]
    fn renders_as_fixed_width_hex() {
        let fp = Fingerprint(0xab);
        assert_eq!(fp.to_string(), "00000000000000ab");
        assert_eq!("00000000000000ab".parse::<Fingerprint>().unwrap(), fp);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, "\"00000000000000ab\"");
        assert_eq!(serde_json::from_str::<Fingerprint>(&json).unwrap(), fp);
    }
}
