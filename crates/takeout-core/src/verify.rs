//! Client side: open an export archive, decrypt, check the signature

use serde::Serialize;
use takeout_proto::{DumpFormat, ExportArchive};

use crate::backend::CryptoBackend;
use crate::error::{CoreError, CoreResult};
use crate::fingerprint::Fingerprint;

/// A decrypted export and the verdict on its signature
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedExport {
    /// Plaintext member name (`.gpg` stripped)
    pub payload_name: String,
    pub signature_name: String,
    #[serde(skip)]
    pub signature: String,
    /// Decrypted payload, CRLF folded to LF when it is text
    #[serde(skip)]
    pub plaintext: Vec<u8>,
    pub format: Option<DumpFormat>,
    pub encrypted: bool,
    pub valid: bool,
    pub signer: Option<Fingerprint>,
    pub diagnostics: String,
}

impl VerifiedExport {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.plaintext).ok()
    }

    /// First `n` lines of a text payload
    pub fn preview(&self, n: usize) -> Vec<&str> {
        self.text()
            .map(|t| t.lines().take(n).collect())
            .unwrap_or_default()
    }
}

/// Decrypt (when needed) and verify an export archive
///
/// The signature is checked over the exact decrypted bytes; an invalid
/// signature yields `valid == false` rather than an error.
pub async fn verify_and_decrypt(
    backend: &dyn CryptoBackend,
    container: &[u8],
    trusted_public_key: Option<&str>,
    passphrase: Option<&str>,
) -> CoreResult<VerifiedExport> {
    let archive = ExportArchive::read(container)?;
    let encrypted = archive.is_encrypted();

    let raw = if encrypted {
        backend.decrypt(&archive.payload, passphrase).await?
    } else {
        archive.payload.clone()
    };

    let signature = String::from_utf8(archive.signature.clone())
        .map_err(|_| CoreError::Verification("signature member is not text".into()))?;

    let verification = backend
        .verify(&raw, &signature, trusted_public_key)
        .await?;
    tracing::debug!(
        payload = %archive.payload_name,
        encrypted,
        valid = verification.valid,
        "Verified export archive"
    );

    Ok(VerifiedExport {
        payload_name: archive.plaintext_name().to_string(),
        signature_name: archive.signature_name.clone(),
        signature,
        plaintext: normalize_line_endings(raw),
        format: archive.format(),
        encrypted,
        valid: verification.valid,
        signer: verification.signer,
        diagnostics: verification.diagnostics,
    })
}

fn normalize_line_endings(bytes: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(bytes) {
        Ok(text) if text.contains("\r\n") => text.replace("\r\n", "\n").into_bytes(),
        Ok(text) => text.into_bytes(),
        Err(e) => e.into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings(b"a\r\nb\r\n".to_vec()), b"a\nb\n");
        assert_eq!(normalize_line_endings(b"a\nb".to_vec()), b"a\nb");
        let binary = vec![0xff, b'\r', b'\n'];
        assert_eq!(normalize_line_endings(binary.clone()), binary);
    }
}
