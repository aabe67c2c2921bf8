//! ASCII armor for keys, detached signatures and ciphertext
//!
//! Format:
//! ```text
//! ----- BEGIN TAKEOUT SIGNATURE -----
//! Version: 1
//! Algorithm: ED25519
//! Signer: 6F0D4C0B9A1E22D7C07F51B3A2E5D8C4F1A09B3E
//!
//! 3q2+7wAAAAC4Vn...
//! (base64 continues)
//! ----- END TAKEOUT SIGNATURE -----
//! ```

use crate::error::{ProtoError, ProtoResult};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::collections::HashMap;

const BEGIN_PREFIX: &str = "----- BEGIN TAKEOUT ";
const END_PREFIX: &str = "----- END TAKEOUT ";
const SUFFIX: &str = " -----";

/// Types of armored content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorType {
    PublicKey,
    SecretKey,
    Signature,
    Message,
}

impl ArmorType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PublicKey => "PUBLIC KEY",
            Self::SecretKey => "SECRET KEY",
            Self::Signature => "SIGNATURE",
            Self::Message => "MESSAGE",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "PUBLIC KEY" => Some(Self::PublicKey),
            "SECRET KEY" => Some(Self::SecretKey),
            "SIGNATURE" => Some(Self::Signature),
            "MESSAGE" => Some(Self::Message),
            _ => None,
        }
    }
}

/// Parsed armor block
#[derive(Debug)]
pub struct ArmorBlock {
    pub armor_type: ArmorType,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl ArmorBlock {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Fetch a header that must be present
    pub fn require_header(&self, key: &str) -> ProtoResult<&str> {
        self.header(key)
            .ok_or_else(|| ProtoError::ArmorParse(format!("Missing {key} header")))
    }
}

/// Encode data as ASCII armor
pub fn armor_encode(armor_type: ArmorType, headers: &[(&str, &str)], payload: &[u8]) -> String {
    let mut result = String::new();

    result.push_str(&format!("{BEGIN_PREFIX}{}{SUFFIX}\n", armor_type.label()));

    for (key, value) in headers {
        result.push_str(&format!("{key}: {value}\n"));
    }

    // Blank line before payload
    result.push('\n');

    // Base64 payload (wrapped at 64 chars)
    let b64 = BASE64.encode(payload);
    for chunk in b64.as_bytes().chunks(64) {
        result.push_str(&String::from_utf8_lossy(chunk));
        result.push('\n');
    }

    result.push_str(&format!("{END_PREFIX}{}{SUFFIX}\n", armor_type.label()));

    result
}

/// Identify the armor type of a text blob without decoding the payload
pub fn detect_armor(s: &str) -> Option<ArmorType> {
    s.lines()
        .map(str::trim_end)
        .find_map(|l| l.strip_prefix(BEGIN_PREFIX))
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .and_then(ArmorType::from_label)
}

/// Decode ASCII armor to bytes
///
/// Tolerates CRLF line endings so artifacts survive a round trip through
/// platforms that rewrite them.
pub fn armor_decode(s: &str) -> ProtoResult<ArmorBlock> {
    let lines: Vec<&str> = s.lines().map(str::trim_end).collect();

    // Find BEGIN line
    let begin_idx = lines
        .iter()
        .position(|l| l.starts_with(BEGIN_PREFIX))
        .ok_or_else(|| ProtoError::ArmorParse("Missing BEGIN line".into()))?;

    // Parse armor type from BEGIN line
    let type_str = lines[begin_idx]
        .strip_prefix(BEGIN_PREFIX)
        .and_then(|s| s.strip_suffix(SUFFIX))
        .ok_or_else(|| ProtoError::ArmorParse("Invalid BEGIN format".into()))?;

    let armor_type = ArmorType::from_label(type_str)
        .ok_or_else(|| ProtoError::ArmorParse(format!("Unknown armor type: {type_str}")))?;

    // Find END line
    let end_marker = format!("{END_PREFIX}{}{SUFFIX}", armor_type.label());
    let end_idx = lines
        .iter()
        .skip(begin_idx)
        .position(|l| *l == end_marker)
        .map(|i| i + begin_idx)
        .ok_or_else(|| ProtoError::ArmorParse("Missing END line".into()))?;

    // Parse headers (until blank line)
    let mut headers = HashMap::new();
    let mut payload_start = begin_idx + 1;

    for (i, line) in lines[begin_idx + 1..end_idx].iter().enumerate() {
        if line.is_empty() {
            payload_start = begin_idx + 1 + i + 1;
            break;
        }
        if let Some((key, value)) = line.split_once(": ") {
            headers.insert(key.to_string(), value.to_string());
        }
    }

    // Decode base64 payload
    let payload_b64: String = lines[payload_start..end_idx]
        .iter()
        .flat_map(|l| l.chars())
        .filter(|c| !c.is_whitespace())
        .collect();

    let payload = BASE64.decode(&payload_b64)?;

    Ok(ArmorBlock {
        armor_type,
        headers,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armor_roundtrip() {
        let payload = b"Hello, takeout!";
        let headers = [("Version", "1"), ("Algorithm", "ED25519")];

        let armored = armor_encode(ArmorType::Signature, &headers, payload);
        let decoded = armor_decode(&armored).unwrap();

        assert_eq!(decoded.armor_type, ArmorType::Signature);
        assert_eq!(decoded.header("Version"), Some("1"));
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_armor_long_payload() {
        let payload = vec![0u8; 1024];
        let armored = armor_encode(ArmorType::Message, &[], &payload);
        assert!(armored.lines().all(|l| l.len() <= 64 || l.starts_with("-----")));

        let decoded = armor_decode(&armored).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_armor_survives_crlf() {
        let armored = armor_encode(ArmorType::PublicKey, &[("Version", "1")], b"key bytes");
        let crlf = armored.replace('\n', "\r\n");

        let decoded = armor_decode(&crlf).unwrap();
        assert_eq!(decoded.payload, b"key bytes");
        assert_eq!(decoded.header("Version"), Some("1"));
    }

    #[test]
    fn test_detect_armor() {
        let armored = armor_encode(ArmorType::SecretKey, &[], b"x");
        assert_eq!(detect_armor(&armored), Some(ArmorType::SecretKey));
        assert_eq!(detect_armor("plain text"), None);
    }

    #[test]
    fn test_missing_end_line() {
        let armored = armor_encode(ArmorType::Message, &[], b"abc");
        let truncated: String = armored.lines().take(3).collect::<Vec<_>>().join("\n");
        assert!(armor_decode(&truncated).is_err());
    }
}
