//! Key fingerprint type
//!
//! 20 bytes, rendered as 40 uppercase hex characters so the same value can
//! name a native key or an OpenPGP v4 key held by gpg.

use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

const DOMAIN: &[u8] = b"takeout-key-fingerprint-v1";

/// Shortest key id suffix accepted when resolving a key reference
pub const MIN_KEY_ID_LEN: usize = 8;

/// A fingerprint uniquely identifying a public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Truncated BLAKE3 over the signing and encryption public keys
    pub fn from_key_material(verifying: &[u8; 32], encryption: &[u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN);
        hasher.update(verifying);
        hasher.update(encryption);
        let hash = hasher.finalize();

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[..20]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Parse 40 hex characters; spaces and a `0x` prefix are ignored
    pub fn from_hex(s: &str) -> CoreResult<Self> {
        let normalized = normalize_reference(s);
        let bytes = hex::decode(&normalized)
            .map_err(|e| CoreError::InvalidKey(format!("Bad fingerprint {s:?}: {e}")))?;
        let arr: [u8; 20] = bytes.try_into().map_err(|b: Vec<u8>| {
            CoreError::InvalidKey(format!("Fingerprint must be 20 bytes, got {}", b.len()))
        })?;
        Ok(Self(arr))
    }

    /// Long key id (last 16 hex characters), the way gpg prints it
    pub fn key_id(&self) -> String {
        hex::encode_upper(&self.0[12..])
    }

    /// Whether `reference` is this full fingerprint or a hex suffix of it
    pub fn matches(&self, reference: &str) -> bool {
        let normalized = normalize_reference(reference);
        normalized.len() >= MIN_KEY_ID_LEN
            && normalized.chars().all(|c| c.is_ascii_hexdigit())
            && self.to_hex().ends_with(&normalized)
    }

    /// Space-separated groups of four for display
    pub fn grouped(&self) -> String {
        self.to_hex()
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn normalize_reference(s: &str) -> String {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.key_id())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
