//! Pluggable signing and encryption backends
//!
//! | Backend  | Keys                          | Artifacts                         |
//! |----------|-------------------------------|-----------------------------------|
//! | `native` | [`Keyring`](crate::Keyring)   | TAKEOUT armor (Ed25519, X25519)   |
//! | `gpg`    | a GnuPG home directory        | OpenPGP armor via the gpg binary  |

pub mod gpg;
pub mod native;

pub use gpg::GpgBackend;
pub use native::NativeBackend;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::fingerprint::Fingerprint;
use crate::keyring::{KeyInfo, Keyring};
use crate::trust::TrustLevel;

/// Which backend implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Native,
    Gpg,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Gpg => write!(f, "gpg"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" | "builtin" | "rust" => Ok(BackendKind::Native),
            "gpg" | "gnupg" | "openpgp" => Ok(BackendKind::Gpg),
            other => Err(CoreError::Backend(format!("Unknown backend: {other}"))),
        }
    }
}

/// Outcome of checking a detached signature
///
/// A bad signature is a normal outcome (`valid == false`), not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub valid: bool,
    pub signer: Option<Fingerprint>,
    /// Human-readable report, in the style of `gpg --verify`
    pub diagnostics: String,
}

impl Verification {
    pub fn invalid(diagnostics: impl Into<String>) -> Self {
        Self {
            valid: false,
            signer: None,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Detached signing, encryption and key management
///
/// Key references are fingerprints, key id suffixes or user id fragments.
/// Signatures and ciphertext are ASCII armored.
#[async_trait]
pub trait CryptoBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Resolve a key reference to exactly one public key
    async fn resolve_key(&self, reference: &str) -> CoreResult<Fingerprint>;

    /// Resolve a key reference to a key whose secret material is usable
    /// with `passphrase`
    async fn resolve_signing_key(
        &self,
        reference: &str,
        passphrase: Option<&str>,
    ) -> CoreResult<Fingerprint>;

    async fn export_public_key(&self, key: &Fingerprint) -> CoreResult<String>;

    /// Produce an armored detached signature over `payload`
    async fn detach_sign(
        &self,
        payload: &[u8],
        key: &Fingerprint,
        passphrase: Option<&str>,
    ) -> CoreResult<String>;

    /// Encrypt `payload` to `recipient`, returning armored ciphertext
    async fn encrypt(&self, payload: &[u8], recipient: &Fingerprint) -> CoreResult<Vec<u8>>;

    /// Decrypt with whichever local secret key the ciphertext names
    async fn decrypt(&self, ciphertext: &[u8], passphrase: Option<&str>) -> CoreResult<Vec<u8>>;

    /// Check `signature` over `payload`
    ///
    /// With `public_key`, only that armored key is consulted; otherwise the
    /// backend's own key store is.
    async fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        public_key: Option<&str>,
    ) -> CoreResult<Verification>;

    async fn import_key(&self, armored: &str) -> CoreResult<Fingerprint>;

    async fn trust_key(&self, key: &Fingerprint, level: TrustLevel) -> CoreResult<()>;

    async fn generate_key(&self, user_id: &str, passphrase: Option<&str>)
    -> CoreResult<Fingerprint>;

    async fn list_keys(&self) -> CoreResult<Vec<KeyInfo>>;
}

/// Everything needed to open a backend
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub kind: BackendKind,
    /// Native keyring directory; `None` keeps keys in memory
    pub keyring_dir: Option<PathBuf>,
    pub gpg_program: PathBuf,
    /// GnuPG home; `None` uses gpg's default
    pub gnupg_home: Option<PathBuf>,
    /// Where gpg scratch files go; `None` uses the system temp dir
    pub scratch_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            kind: BackendKind::Native,
            keyring_dir: None,
            gpg_program: PathBuf::from("gpg"),
            gnupg_home: None,
            scratch_dir: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Open the configured backend
pub fn open_backend(options: &BackendOptions) -> CoreResult<Arc<dyn CryptoBackend>> {
    tracing::debug!(backend = %options.kind, "Opening crypto backend");
    match options.kind {
        BackendKind::Native => {
            let keyring = match &options.keyring_dir {
                Some(dir) => Keyring::open(dir)?,
                None => Keyring::in_memory(),
            };
            Ok(Arc::new(NativeBackend::new(keyring)))
        }
        BackendKind::Gpg => {
            let mut backend =
                GpgBackend::new(&options.gpg_program, options.gnupg_home.clone(), options.timeout);
            if let Some(dir) = &options.scratch_dir {
                backend = backend.with_scratch_dir(dir);
            }
            Ok(Arc::new(backend))
        }
    }
}
