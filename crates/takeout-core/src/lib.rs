//! # takeout-core: Keys, signing and encryption for account exports
//!
//! - **Pluggable backends**: `native` (Ed25519 + X25519, pure Rust) or
//!   `gpg` (drives the GnuPG binary)
//! - **Keyring**: directory of armored keys with owner trust
//! - **Bundle sealing**: sign, optionally encrypt, archive
//! - **Verification**: the inverse, for clients holding the export
//!
//! ## Example: Seal and verify
//!
//! ```rust
//! use std::sync::Arc;
//! use takeout_core::{BundleSealer, CryptoBackend, Keyring, NativeBackend, verify_and_decrypt};
//! use takeout_proto::DumpFormat;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(NativeBackend::new(Keyring::in_memory()));
//! let fp = backend.generate_key("Takeout Export <ops@example.com>", None).await?;
//! let public = backend.export_public_key(&fp).await?;
//!
//! let sealer = BundleSealer::new(backend.clone(), fp).encrypt_to(fp);
//! let bundle = sealer.seal("doc", "bob", DumpFormat::Sql, b"-- empty\n").await?;
//!
//! let export = verify_and_decrypt(backend.as_ref(), &bundle.bytes, Some(&public), None).await?;
//! assert!(export.valid);
//! assert_eq!(export.plaintext, b"-- empty\n");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bundle;
pub mod error;
pub mod fingerprint;
pub mod keyring;
pub mod keys;
pub mod trust;
pub mod verify;

// Re-exports for convenience
pub use backend::{
    BackendKind, BackendOptions, CryptoBackend, GpgBackend, NativeBackend, Verification,
    open_backend,
};
pub use bundle::{BundleError, BundleSealer, ExportMode, SealStage, SealedBundle};
pub use error::{CoreError, CoreResult};
pub use fingerprint::Fingerprint;
pub use keyring::{KeyInfo, Keyring};
pub use keys::{KdfParams, KeyPair, LockedSecretKey, PublicKeyBundle};
pub use trust::TrustLevel;
pub use verify::{VerifiedExport, verify_and_decrypt};
