//! Sealing a serialized payload into an export bundle
//!
//! sign -> [encrypt] -> archive, inside a per-request working directory
//! that is removed before [`BundleSealer::seal`] returns, on every path.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use takeout_proto::{DumpFormat, MemberNames, ProtoError, write_archive};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::backend::CryptoBackend;
use crate::error::CoreError;
use crate::fingerprint::Fingerprint;

/// Whether exports are encrypted or only signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Sign, then encrypt the payload to the recipient key
    #[default]
    Encrypted,
    /// Sign only; the payload ships as plaintext
    Signed,
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportMode::Encrypted => write!(f, "encrypted"),
            ExportMode::Signed => write!(f, "signed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealStage {
    Signing,
    Encrypting,
    Archiving,
}

impl fmt::Display for SealStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SealStage::Signing => write!(f, "signing"),
            SealStage::Encrypting => write!(f, "encrypting"),
            SealStage::Archiving => write!(f, "archiving"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("{stage} failed: {source}")]
    Crypto {
        stage: SealStage,
        #[source]
        source: CoreError,
    },

    #[error("{stage} exceeded the {}s deadline", .deadline.as_secs())]
    Timeout { stage: SealStage, deadline: Duration },

    #[error("archiving failed: {0}")]
    Archive(#[from] ProtoError),

    #[error("working directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl BundleError {
    pub fn stage(&self) -> SealStage {
        match self {
            BundleError::Crypto { stage, .. } | BundleError::Timeout { stage, .. } => *stage,
            BundleError::Archive(_) | BundleError::Io(_) => SealStage::Archiving,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            BundleError::Timeout { .. } => true,
            BundleError::Crypto { source, .. } => matches!(source, CoreError::Timeout(_)),
            _ => false,
        }
    }
}

/// A finished export archive
#[derive(Debug, Clone)]
pub struct SealedBundle {
    pub names: MemberNames,
    pub bytes: Vec<u8>,
}

impl SealedBundle {
    pub fn file_name(&self) -> &str {
        &self.names.archive
    }
}

/// Signs, optionally encrypts and archives payloads with fixed keys
pub struct BundleSealer {
    backend: Arc<dyn CryptoBackend>,
    signing_key: Fingerprint,
    recipient: Option<Fingerprint>,
    passphrase: Option<Zeroizing<String>>,
    deadline: Duration,
    temp_root: PathBuf,
}

impl BundleSealer {
    /// A sealer that only signs; see [`BundleSealer::encrypt_to`]
    pub fn new(backend: Arc<dyn CryptoBackend>, signing_key: Fingerprint) -> Self {
        Self {
            backend,
            signing_key,
            recipient: None,
            passphrase: None,
            deadline: Duration::from_secs(30),
            temp_root: std::env::temp_dir(),
        }
    }

    pub fn encrypt_to(mut self, recipient: Fingerprint) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase.map(Zeroizing::new);
        self
    }

    /// Deadline applied to each cryptographic step
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_temp_root(mut self, root: impl AsRef<Path>) -> Self {
        self.temp_root = root.as_ref().to_path_buf();
        self
    }

    pub fn mode(&self) -> ExportMode {
        if self.recipient.is_some() {
            ExportMode::Encrypted
        } else {
            ExportMode::Signed
        }
    }

    pub fn signing_key(&self) -> &Fingerprint {
        &self.signing_key
    }

    pub fn backend(&self) -> &Arc<dyn CryptoBackend> {
        &self.backend
    }

    async fn step<T, F>(&self, stage: SealStage, op: F) -> Result<T, BundleError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match tokio::time::timeout(self.deadline, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(BundleError::Crypto { stage, source }),
            Err(_) => Err(BundleError::Timeout {
                stage,
                deadline: self.deadline,
            }),
        }
    }

    /// Seal `payload` for `subject` (already sanitized)
    ///
    /// Artifacts are staged in `takeout-{request_id}-*` under the temp root;
    /// the directory is gone by the time this returns.
    pub async fn seal(
        &self,
        request_id: &str,
        subject: &str,
        format: DumpFormat,
        payload: &[u8],
    ) -> Result<SealedBundle, BundleError> {
        let workdir = tempfile::Builder::new()
            .prefix(&format!("takeout-{request_id}-"))
            .tempdir_in(&self.temp_root)?;
        let names = MemberNames::new(subject, format, self.recipient.is_some());

        tracing::debug!(request_id, stage = %SealStage::Signing, key = %self.signing_key, "Sealing export");
        let signature = self
            .step(
                SealStage::Signing,
                self.backend.detach_sign(
                    payload,
                    &self.signing_key,
                    self.passphrase.as_deref().map(String::as_str),
                ),
            )
            .await?;
        tokio::fs::write(workdir.path().join(&names.signature), &signature).await?;

        let member = match &self.recipient {
            Some(recipient) => {
                tracing::debug!(request_id, stage = %SealStage::Encrypting, %recipient, "Sealing export");
                self.step(
                    SealStage::Encrypting,
                    self.backend.encrypt(payload, recipient),
                )
                .await?
            }
            None => payload.to_vec(),
        };
        tokio::fs::write(workdir.path().join(&names.payload), &member).await?;

        tracing::debug!(request_id, stage = %SealStage::Archiving, "Sealing export");
        let bytes = write_archive(&[
            (names.payload.as_str(), member.as_slice()),
            (names.signature.as_str(), signature.as_bytes()),
        ])?;
        tokio::fs::write(workdir.path().join(&names.archive), &bytes).await?;

        workdir.close()?;
        Ok(SealedBundle { names, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use crate::keyring::Keyring;
    use crate::keys::KdfParams;
    use takeout_proto::ExportArchive;

    async fn sealer(temp_root: &Path) -> BundleSealer {
        let backend = NativeBackend::new(Keyring::in_memory().with_kdf(KdfParams::new(64, 1, 1)));
        let fp = backend.generate_key("ops", None).await.unwrap();
        BundleSealer::new(Arc::new(backend), fp).with_temp_root(temp_root)
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_signed_bundle_layout() {
        let temp = tempfile::tempdir().unwrap();
        let sealer = sealer(temp.path()).await;
        assert_eq!(sealer.mode(), ExportMode::Signed);

        let bundle = sealer
            .seal("req1", "bob", DumpFormat::Json, b"{}\n")
            .await
            .unwrap();
        assert_eq!(bundle.file_name(), "bob_export.zip");

        let archive = ExportArchive::read(&bundle.bytes).unwrap();
        assert_eq!(archive.payload_name, "bob_export.json");
        assert_eq!(archive.signature_name, "bob_export.json.asc");
        assert_eq!(archive.payload, b"{}\n");
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_encrypted_bundle_layout() {
        let temp = tempfile::tempdir().unwrap();
        let sealer = sealer(temp.path()).await;
        let fp = *sealer.signing_key();
        let sealer = sealer.encrypt_to(fp);
        assert_eq!(sealer.mode(), ExportMode::Encrypted);

        let bundle = sealer
            .seal("req2", "bob", DumpFormat::Sql, b"-- nothing\n")
            .await
            .unwrap();
        let archive = ExportArchive::read(&bundle.bytes).unwrap();
        assert!(archive.is_encrypted());
        assert_eq!(archive.payload_name, "bob_export.sql.gpg");
        assert_ne!(archive.payload, b"-- nothing\n");
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_signing_failure_cleans_up() {
        let temp = tempfile::tempdir().unwrap();
        let backend = Arc::new(NativeBackend::new(Keyring::in_memory()));
        let missing = Fingerprint::from_bytes([9; 20]);
        let sealer = BundleSealer::new(backend, missing).with_temp_root(temp.path());

        let err = sealer
            .seal("req3", "bob", DumpFormat::Sql, b"x")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), SealStage::Signing);
        assert!(!err.is_timeout());
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_encryption_failure_reports_stage() {
        let temp = tempfile::tempdir().unwrap();
        let sealer = sealer(temp.path())
            .await
            .encrypt_to(Fingerprint::from_bytes([3; 20]));

        let err = sealer
            .seal("req4", "bob", DumpFormat::Sql, b"x")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), SealStage::Encrypting);
        assert_eq!(entries(temp.path()), 0);
    }
}
