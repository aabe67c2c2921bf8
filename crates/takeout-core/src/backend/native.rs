//! In-process backend: Ed25519 signatures, X25519 + XChaCha20-Poly1305 encryption
//!
//! Signature armor (`TAKEOUT SIGNATURE`), payload is the 64-byte Ed25519
//! signature over `DOMAIN || created(8, BE) || BLAKE3(payload)`:
//! ```text
//! Version: 1
//! Algorithm: ED25519
//! Signer: <FINGERPRINT>
//! Created: <unix seconds>
//! ```
//!
//! Message armor (`TAKEOUT MESSAGE`), payload is
//! `ephemeral_pk(32) || nonce(24) || ciphertext`, keyed by
//! `BLAKE3-derive-key(shared || ephemeral_pk || recipient_pk)` with the
//! recipient fingerprint as associated data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit, Payload},
};
use ed25519_dalek::{Signature, Signer, Verifier};
use rand::{RngCore, rngs::OsRng};
use takeout_proto::{ArmorBlock, ArmorType, armor_decode, armor_encode};
use tokio::sync::RwLock;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

use super::{BackendKind, CryptoBackend, Verification};
use crate::error::{CoreError, CoreResult};
use crate::fingerprint::Fingerprint;
use crate::keyring::{KeyInfo, Keyring};
use crate::keys::{KeyPair, PublicKeyBundle};
use crate::trust::TrustLevel;

const SIGNATURE_DOMAIN: &[u8] = b"takeout-detached-signature-v1\0";
const MESSAGE_KEY_CONTEXT: &str = "takeout 2026-01 x25519-xchacha20poly1305 message key";
const SIGNATURE_ALGORITHM: &str = "ED25519";
const MESSAGE_ALGORITHM: &str = "X25519-XCHACHA20POLY1305";
const NONCE_LEN: usize = 24;

/// Pure-Rust backend over a [`Keyring`]
///
/// Unlocked secret keys are cached for the life of the backend, so a
/// passphrase is only checked the first time a key is used.
pub struct NativeBackend {
    keyring: RwLock<Keyring>,
    unlocked: RwLock<HashMap<Fingerprint, Arc<KeyPair>>>,
}

impl NativeBackend {
    pub fn new(keyring: Keyring) -> Self {
        Self {
            keyring: RwLock::new(keyring),
            unlocked: RwLock::new(HashMap::new()),
        }
    }

    async fn unlock(&self, fp: &Fingerprint, passphrase: Option<&str>) -> CoreResult<Arc<KeyPair>> {
        if let Some(keypair) = self.unlocked.read().await.get(fp) {
            return Ok(keypair.clone());
        }

        let locked = self
            .keyring
            .read()
            .await
            .secret_key(fp)
            .cloned()
            .ok_or_else(|| CoreError::KeyNotFound(format!("no secret key for {fp}")))?;

        // Argon2id runs on the blocking pool
        let passphrase = passphrase.map(|p| Zeroizing::new(p.to_string()));
        let keypair = tokio::task::spawn_blocking(move || {
            locked.unlock(passphrase.as_deref().map(String::as_str))
        })
        .await
        .map_err(|e| CoreError::Backend(format!("Key unlock task failed: {e}")))??;

        let keypair = Arc::new(keypair);
        self.unlocked.write().await.insert(*fp, keypair.clone());
        tracing::debug!(fingerprint = %fp, "Unlocked secret key");
        Ok(keypair)
    }
}

fn signed_message(created: i64, payload: &[u8]) -> Vec<u8> {
    let digest = blake3::hash(payload);
    let mut msg = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 8 + 32);
    msg.extend_from_slice(SIGNATURE_DOMAIN);
    msg.extend_from_slice(&created.to_be_bytes());
    msg.extend_from_slice(digest.as_bytes());
    msg
}

fn message_key(
    shared: &[u8; 32],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> Zeroizing<[u8; 32]> {
    let mut material = Zeroizing::new([0u8; 96]);
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral.as_bytes());
    material[64..].copy_from_slice(recipient.as_bytes());
    Zeroizing::new(blake3::derive_key(MESSAGE_KEY_CONTEXT, &material[..]))
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%a %d %b %Y %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("@{secs}"))
}

fn parse_signature(signature: &str) -> Result<(ArmorBlock, Fingerprint, i64), String> {
    let block = armor_decode(signature).map_err(|e| format!("no valid signature data found: {e}"))?;
    if block.armor_type != ArmorType::Signature {
        return Err(format!(
            "expected a signature, found {}",
            block.armor_type.label()
        ));
    }
    if let Some(algorithm) = block.header("Algorithm") {
        if algorithm != SIGNATURE_ALGORITHM {
            return Err(format!("unsupported signature algorithm {algorithm}"));
        }
    }
    let signer = block
        .header("Signer")
        .and_then(|s| Fingerprint::from_hex(s).ok())
        .ok_or_else(|| "signature does not name its signer".to_string())?;
    let created = block
        .header("Created")
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| "signature has no creation time".to_string())?;
    Ok((block, signer, created))
}

#[async_trait]
impl CryptoBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn name(&self) -> &'static str {
        "Native (Ed25519 + X25519)"
    }

    async fn resolve_key(&self, reference: &str) -> CoreResult<Fingerprint> {
        self.keyring.read().await.resolve(reference)
    }

    async fn resolve_signing_key(
        &self,
        reference: &str,
        passphrase: Option<&str>,
    ) -> CoreResult<Fingerprint> {
        let fp = self.keyring.read().await.resolve_secret(reference)?;
        self.unlock(&fp, passphrase).await?;
        Ok(fp)
    }

    async fn export_public_key(&self, key: &Fingerprint) -> CoreResult<String> {
        self.keyring.read().await.export_public(key)
    }

    async fn detach_sign(
        &self,
        payload: &[u8],
        key: &Fingerprint,
        passphrase: Option<&str>,
    ) -> CoreResult<String> {
        let keypair = self.unlock(key, passphrase).await?;
        let created = chrono::Utc::now().timestamp();
        let signature = keypair
            .signing_key()
            .try_sign(&signed_message(created, payload))
            .map_err(|e| CoreError::Signing(e.to_string()))?;

        let signer = key.to_hex();
        let created = created.to_string();
        Ok(armor_encode(
            ArmorType::Signature,
            &[
                ("Version", "1"),
                ("Algorithm", SIGNATURE_ALGORITHM),
                ("Signer", signer.as_str()),
                ("Created", created.as_str()),
            ],
            &signature.to_bytes(),
        ))
    }

    async fn encrypt(&self, payload: &[u8], recipient: &Fingerprint) -> CoreResult<Vec<u8>> {
        let bundle = self
            .keyring
            .read()
            .await
            .public_key(recipient)
            .cloned()
            .ok_or_else(|| CoreError::KeyNotFound(recipient.to_hex()))?;

        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pk = X25519PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(bundle.encryption_key());
        if !shared.was_contributory() {
            return Err(CoreError::Encryption(format!(
                "Recipient {recipient} has a degenerate encryption key"
            )));
        }
        let key = message_key(shared.as_bytes(), &ephemeral_pk, bundle.encryption_key());

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| CoreError::Encryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(
                &nonce.into(),
                Payload {
                    msg: payload,
                    aad: recipient.as_bytes(),
                },
            )
            .map_err(|e| CoreError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(32 + NONCE_LEN + ciphertext.len());
        body.extend_from_slice(ephemeral_pk.as_bytes());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&ciphertext);

        let recipient_hex = recipient.to_hex();
        Ok(armor_encode(
            ArmorType::Message,
            &[
                ("Version", "1"),
                ("Algorithm", MESSAGE_ALGORITHM),
                ("Recipient", recipient_hex.as_str()),
            ],
            &body,
        )
        .into_bytes())
    }

    async fn decrypt(&self, ciphertext: &[u8], passphrase: Option<&str>) -> CoreResult<Vec<u8>> {
        let text = std::str::from_utf8(ciphertext)
            .map_err(|_| CoreError::Decryption("ciphertext is not armored text".into()))?;
        let block = armor_decode(text)?;
        if block.armor_type != ArmorType::Message {
            return Err(CoreError::Decryption(format!(
                "expected an encrypted message, found {}",
                block.armor_type.label()
            )));
        }
        let recipient = Fingerprint::from_hex(block.require_header("Recipient")?)?;

        let keypair = self.unlock(&recipient, passphrase).await.map_err(|e| match e {
            CoreError::KeyNotFound(_) => {
                CoreError::Decryption(format!("no secret key for recipient {recipient}"))
            }
            other => other,
        })?;

        let body = &block.payload;
        if body.len() < 32 + NONCE_LEN {
            return Err(CoreError::Decryption("message too short".into()));
        }
        let (ephemeral_bytes, rest) = body.split_at(32);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let ephemeral: [u8; 32] = ephemeral_bytes
            .try_into()
            .map_err(|_| CoreError::Decryption("bad ephemeral key".into()))?;
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| CoreError::Decryption("bad nonce".into()))?;
        let ephemeral = X25519PublicKey::from(ephemeral);

        let shared = keypair.encryption_secret().diffie_hellman(&ephemeral);
        let key = message_key(
            shared.as_bytes(),
            &ephemeral,
            keypair.public().encryption_key(),
        );
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| CoreError::Decryption(e.to_string()))?;
        cipher
            .decrypt(
                &nonce.into(),
                Payload {
                    msg: sealed,
                    aad: recipient.as_bytes(),
                },
            )
            .map_err(|_| CoreError::Decryption("message authentication failed".into()))
    }

    async fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        public_key: Option<&str>,
    ) -> CoreResult<Verification> {
        let (block, signer, created) = match parse_signature(signature) {
            Ok(parsed) => parsed,
            Err(reason) => return Ok(Verification::invalid(reason)),
        };

        let keyring = self.keyring.read().await;
        let bundle = match public_key {
            Some(text) => PublicKeyBundle::from_armored(text)?,
            None => match keyring.public_key(&signer) {
                Some(bundle) => bundle.clone(),
                None => {
                    return Ok(Verification {
                        valid: false,
                        signer: Some(signer),
                        diagnostics: format!(
                            "Signature made {}\n                using {SIGNATURE_ALGORITHM} key {signer}\n\
                             Can't check signature: No public key",
                            format_timestamp(created)
                        ),
                    });
                }
            },
        };
        let trust = keyring.trust_of(&bundle.fingerprint());
        drop(keyring);

        let mut diagnostics = format!(
            "Signature made {}\n                using {SIGNATURE_ALGORITHM} key {signer}\n",
            format_timestamp(created)
        );

        if bundle.fingerprint() != signer {
            diagnostics.push_str(&format!(
                "Can't check signature: made by {signer}, expected {}",
                bundle.fingerprint()
            ));
            return Ok(Verification {
                valid: false,
                signer: Some(signer),
                diagnostics,
            });
        }

        let valid = <[u8; 64]>::try_from(block.payload.as_slice())
            .map(|bytes| Signature::from_bytes(&bytes))
            .is_ok_and(|sig| {
                bundle
                    .verifying_key()
                    .verify(&signed_message(created, payload), &sig)
                    .is_ok()
            });

        if valid {
            diagnostics.push_str(&format!(
                "Good signature from \"{}\" [{trust}]",
                bundle.user_id
            ));
            if !trust.is_trusted() {
                diagnostics.push_str(
                    "\nWARNING: This key is not certified with a trusted signature!\n\
                     \x20        There is no indication that the signature belongs to the owner.",
                );
            }
        } else {
            diagnostics.push_str(&format!("BAD signature from \"{}\" [{trust}]", bundle.user_id));
        }

        tracing::debug!(signer = %signer, valid, "Checked detached signature");
        Ok(Verification {
            valid,
            signer: Some(signer),
            diagnostics,
        })
    }

    async fn import_key(&self, armored: &str) -> CoreResult<Fingerprint> {
        let fp = self.keyring.write().await.import_armored(armored)?;
        tracing::info!(fingerprint = %fp, "Imported key");
        Ok(fp)
    }

    async fn trust_key(&self, key: &Fingerprint, level: TrustLevel) -> CoreResult<()> {
        self.keyring.write().await.set_trust(key, level)
    }

    async fn generate_key(
        &self,
        user_id: &str,
        passphrase: Option<&str>,
    ) -> CoreResult<Fingerprint> {
        let kdf = self.keyring.read().await.kdf();
        let user_id = user_id.to_string();
        let passphrase = passphrase.map(|p| Zeroizing::new(p.to_string()));
        let locked = tokio::task::spawn_blocking(move || {
            KeyPair::generate(&user_id)?.lock(passphrase.as_deref().map(String::as_str), kdf)
        })
        .await
        .map_err(|e| CoreError::Backend(format!("Key generation task failed: {e}")))??;

        let mut keyring = self.keyring.write().await;
        let fp = keyring.insert_secret(locked)?;
        keyring.set_trust(&fp, TrustLevel::Ultimate)?;
        tracing::info!(fingerprint = %fp, "Generated key pair");
        Ok(fp)
    }

    async fn list_keys(&self) -> CoreResult<Vec<KeyInfo>> {
        Ok(self.keyring.read().await.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KdfParams;

    async fn backend_with_key(passphrase: Option<&str>) -> (NativeBackend, Fingerprint) {
        let backend =
            NativeBackend::new(Keyring::in_memory().with_kdf(KdfParams::new(64, 1, 1)));
        let fp = backend
            .generate_key("Takeout Export <ops@example.com>", passphrase)
            .await
            .unwrap();
        (backend, fp)
    }

    #[tokio::test]
    async fn test_sign_verify_roundtrip() {
        let (backend, fp) = backend_with_key(None).await;
        let payload = b"INSERT INTO \"Items\" VALUES (1);\n";

        let signature = backend.detach_sign(payload, &fp, None).await.unwrap();
        assert!(signature.contains("BEGIN TAKEOUT SIGNATURE"));

        let result = backend.verify(payload, &signature, None).await.unwrap();
        assert!(result.valid, "{}", result.diagnostics);
        assert_eq!(result.signer, Some(fp));
        assert!(result.diagnostics.contains("Good signature"));
        assert!(!result.diagnostics.contains("WARNING"));
    }

    #[tokio::test]
    async fn test_tampered_payload_is_invalid_not_error() {
        let (backend, fp) = backend_with_key(None).await;
        let signature = backend.detach_sign(b"payload", &fp, None).await.unwrap();

        let result = backend.verify(b"pAyload", &signature, None).await.unwrap();
        assert!(!result.valid);
        assert!(result.diagnostics.contains("BAD signature"));
    }

    #[tokio::test]
    async fn test_verify_against_supplied_key_warns_on_unknown_trust() {
        let (signer, fp) = backend_with_key(None).await;
        let public = signer.export_public_key(&fp).await.unwrap();
        let signature = signer.detach_sign(b"payload", &fp, None).await.unwrap();

        let client = NativeBackend::new(Keyring::in_memory());
        let result = client
            .verify(b"payload", &signature, Some(&public))
            .await
            .unwrap();
        assert!(result.valid);
        assert!(result.diagnostics.contains("WARNING"));
    }

    #[tokio::test]
    async fn test_verify_with_wrong_key() {
        let (signer, fp) = backend_with_key(None).await;
        let (other, other_fp) = backend_with_key(None).await;
        let signature = signer.detach_sign(b"payload", &fp, None).await.unwrap();
        let wrong_key = other.export_public_key(&other_fp).await.unwrap();

        let result = signer
            .verify(b"payload", &signature, Some(&wrong_key))
            .await
            .unwrap();
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn test_garbage_signature_is_invalid() {
        let (backend, _) = backend_with_key(None).await;
        let result = backend
            .verify(b"payload", "not a signature", None)
            .await
            .unwrap();
        assert!(!result.valid);
        assert_eq!(result.signer, None);
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let (backend, fp) = backend_with_key(None).await;
        let payload = b"it's mine\r\nNULL\0".to_vec();

        let ciphertext = backend.encrypt(&payload, &fp).await.unwrap();
        assert!(
            String::from_utf8_lossy(&ciphertext).contains("BEGIN TAKEOUT MESSAGE")
        );
        assert_ne!(ciphertext, payload);

        let plaintext = backend.decrypt(&ciphertext, None).await.unwrap();
        assert_eq!(plaintext, payload);
    }

    #[tokio::test]
    async fn test_decrypt_without_secret_key() {
        let (sender, fp) = backend_with_key(None).await;
        let ciphertext = sender.encrypt(b"secret", &fp).await.unwrap();

        let stranger = NativeBackend::new(Keyring::in_memory());
        let err = stranger.decrypt(&ciphertext, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_protected_key_needs_passphrase_to_resolve() {
        let (backend, fp) = backend_with_key(Some("s3cret")).await;
        let reference = fp.to_hex();

        let fresh = NativeBackend::new(Keyring::in_memory());
        let armored = backend
            .keyring
            .read()
            .await
            .secret_key(&fp)
            .unwrap()
            .to_armored();
        fresh.import_key(&armored).await.unwrap();

        assert!(matches!(
            fresh.resolve_signing_key(&reference, None).await,
            Err(CoreError::Passphrase(_))
        ));
        assert!(matches!(
            fresh.resolve_signing_key(&reference, Some("wrong")).await,
            Err(CoreError::Passphrase(_))
        ));
        assert_eq!(
            fresh
                .resolve_signing_key(&reference, Some("s3cret"))
                .await
                .unwrap(),
            fp
        );
    }

    #[tokio::test]
    async fn test_public_only_key_cannot_sign() {
        let (signer, fp) = backend_with_key(None).await;
        let public = signer.export_public_key(&fp).await.unwrap();

        let client = NativeBackend::new(Keyring::in_memory());
        client.import_key(&public).await.unwrap();
        assert!(client.resolve_key(&fp.key_id()).await.is_ok());
        assert!(client.resolve_signing_key(&fp.key_id(), None).await.is_err());
        assert!(client.detach_sign(b"x", &fp, None).await.is_err());
    }
}
