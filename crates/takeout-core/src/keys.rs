//! Key material for the native backend
//!
//! A key pair couples an Ed25519 signing key with an X25519 encryption key
//! under one user id. Both travel as ASCII armor:
//!
//! ```text
//! public payload:  version(1) || ed25519_pk(32) || x25519_pk(32) || created(8, BE) || user_id
//! secret payload:  public_len(4, BE) || public payload || sealed secrets
//! sealed secrets:  ed25519_seed(32) || x25519_sk(32)                     (Protection: none)
//!                  salt(32) || nonce(24) || XChaCha20-Poly1305(secrets)  (Protection: argon2id)
//! ```

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit, Payload},
};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{RngCore, rngs::OsRng};
use takeout_proto::{ArmorType, armor_decode, armor_encode};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CoreError, CoreResult};
use crate::fingerprint::Fingerprint;

const KEY_FORMAT_VERSION: u8 = 1;
const PUBLIC_FIXED_LEN: usize = 1 + 32 + 32 + 8;
const SECRETS_LEN: usize = 64;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Argon2id cost parameters for passphrase-protected secret keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory in KiB
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 iterations, 4 lanes
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    pub fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost,
            t_cost,
            p_cost,
        }
    }

    fn to_header(self) -> String {
        format!("m={},t={},p={}", self.m_cost, self.t_cost, self.p_cost)
    }

    fn from_header(s: &str) -> CoreResult<Self> {
        let mut params = Self::new(0, 0, 0);
        for part in s.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| CoreError::InvalidKey(format!("Bad KDF parameter: {part}")))?;
            let value: u32 = value
                .trim()
                .parse()
                .map_err(|_| CoreError::InvalidKey(format!("Bad KDF parameter: {part}")))?;
            match key.trim() {
                "m" => params.m_cost = value,
                "t" => params.t_cost = value,
                "p" => params.p_cost = value,
                other => {
                    return Err(CoreError::InvalidKey(format!("Unknown KDF parameter: {other}")));
                }
            }
        }
        Ok(params)
    }

    fn derive(&self, passphrase: &str, salt: &[u8]) -> CoreResult<Zeroizing<[u8; 32]>> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| CoreError::Passphrase(format!("Invalid Argon2 parameters: {e:?}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
            .map_err(|e| CoreError::Passphrase(format!("Argon2 key derivation failed: {e:?}")))?;
        Ok(key)
    }
}

/// How a secret key is stored at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    None,
    Argon2id(KdfParams),
}

/// The public half of a key pair
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyBundle {
    pub user_id: String,
    /// Unix seconds
    pub created_at: i64,
    verifying: VerifyingKey,
    encryption: X25519PublicKey,
}

impl PublicKeyBundle {
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub fn encryption_key(&self) -> &X25519PublicKey {
        &self.encryption
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_key_material(self.verifying.as_bytes(), self.encryption.as_bytes())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_FIXED_LEN + self.user_id.len());
        out.push(KEY_FORMAT_VERSION);
        out.extend_from_slice(self.verifying.as_bytes());
        out.extend_from_slice(self.encryption.as_bytes());
        out.extend_from_slice(&self.created_at.to_be_bytes());
        out.extend_from_slice(self.user_id.as_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < PUBLIC_FIXED_LEN {
            return Err(CoreError::InvalidKey(format!(
                "Public key record too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != KEY_FORMAT_VERSION {
            return Err(CoreError::InvalidKey(format!(
                "Unsupported key format version: {}",
                bytes[0]
            )));
        }

        let vk: [u8; 32] = bytes[1..33]
            .try_into()
            .map_err(|_| CoreError::InvalidKey("Bad verifying key length".into()))?;
        let xpk: [u8; 32] = bytes[33..65]
            .try_into()
            .map_err(|_| CoreError::InvalidKey("Bad encryption key length".into()))?;
        let created: [u8; 8] = bytes[65..73]
            .try_into()
            .map_err(|_| CoreError::InvalidKey("Bad creation time".into()))?;
        let user_id = std::str::from_utf8(&bytes[PUBLIC_FIXED_LEN..])
            .map_err(|_| CoreError::InvalidKey("User id is not UTF-8".into()))?
            .to_string();

        Ok(Self {
            user_id,
            created_at: i64::from_be_bytes(created),
            verifying: VerifyingKey::from_bytes(&vk)
                .map_err(|e| CoreError::InvalidKey(format!("Bad Ed25519 key: {e}")))?,
            encryption: X25519PublicKey::from(xpk),
        })
    }

    pub fn to_armored(&self) -> String {
        let fp = self.fingerprint().to_hex();
        let created = self.created_at.to_string();
        armor_encode(
            ArmorType::PublicKey,
            &[
                ("Version", "1"),
                ("Fingerprint", fp.as_str()),
                ("User-Id", self.user_id.as_str()),
                ("Created", created.as_str()),
            ],
            &self.to_bytes(),
        )
    }

    pub fn from_armored(text: &str) -> CoreResult<Self> {
        let block = armor_decode(text)?;
        if block.armor_type != ArmorType::PublicKey {
            return Err(CoreError::InvalidKey(format!(
                "Expected a public key, found {}",
                block.armor_type.label()
            )));
        }
        let bundle = Self::from_bytes(&block.payload)?;
        check_fingerprint_header(block.header("Fingerprint"), &bundle)?;
        Ok(bundle)
    }
}

impl fmt::Debug for PublicKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyBundle")
            .field("fingerprint", &self.fingerprint())
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

fn check_fingerprint_header(header: Option<&str>, bundle: &PublicKeyBundle) -> CoreResult<()> {
    if let Some(claimed) = header {
        if Fingerprint::from_hex(claimed)? != bundle.fingerprint() {
            return Err(CoreError::InvalidKey(format!(
                "Fingerprint header {claimed} does not match key material"
            )));
        }
    }
    Ok(())
}

/// A signing + encryption key pair with its secrets in memory
pub struct KeyPair {
    public: PublicKeyBundle,
    signing: SigningKey,
    encryption: StaticSecret,
}

impl KeyPair {
    /// Generate fresh keys for `user_id` (e.g. `Takeout Export <ops@example.com>`)
    pub fn generate(user_id: &str) -> CoreResult<Self> {
        validate_user_id(user_id)?;

        let signing = SigningKey::generate(&mut OsRng);
        let encryption = StaticSecret::random_from_rng(OsRng);
        Ok(Self::from_parts(
            user_id.to_string(),
            chrono::Utc::now().timestamp(),
            signing,
            encryption,
        ))
    }

    fn from_parts(
        user_id: String,
        created_at: i64,
        signing: SigningKey,
        encryption: StaticSecret,
    ) -> Self {
        let public = PublicKeyBundle {
            user_id,
            created_at,
            verifying: signing.verifying_key(),
            encryption: X25519PublicKey::from(&encryption),
        };
        Self {
            public,
            signing,
            encryption,
        }
    }

    pub fn public(&self) -> &PublicKeyBundle {
        &self.public
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    pub fn user_id(&self) -> &str {
        &self.public.user_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption
    }

    /// Seal the secrets for storage, optionally under a passphrase
    pub fn lock(&self, passphrase: Option<&str>, params: KdfParams) -> CoreResult<LockedSecretKey> {
        let mut secrets = Zeroizing::new([0u8; SECRETS_LEN]);
        secrets[..32].copy_from_slice(&self.signing.to_bytes());
        secrets[32..].copy_from_slice(&self.encryption.to_bytes());

        let (protection, sealed) = match passphrase {
            None => (Protection::None, secrets.to_vec()),
            Some(passphrase) => {
                let mut salt = [0u8; SALT_LEN];
                let mut nonce = [0u8; NONCE_LEN];
                OsRng.fill_bytes(&mut salt);
                OsRng.fill_bytes(&mut nonce);

                let key = params.derive(passphrase, &salt)?;
                let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
                    .map_err(|e| CoreError::Passphrase(e.to_string()))?;
                let fp = self.fingerprint();
                let ciphertext = cipher
                    .encrypt(
                        &nonce.into(),
                        Payload {
                            msg: &secrets[..],
                            aad: fp.as_bytes(),
                        },
                    )
                    .map_err(|e| CoreError::Passphrase(format!("Sealing secret key failed: {e}")))?;

                let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
                sealed.extend_from_slice(&salt);
                sealed.extend_from_slice(&nonce);
                sealed.extend_from_slice(&ciphertext);
                (Protection::Argon2id(params), sealed)
            }
        };

        Ok(LockedSecretKey {
            public: self.public.clone(),
            protection,
            sealed,
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}

fn validate_user_id(user_id: &str) -> CoreResult<()> {
    if user_id.trim().is_empty() {
        return Err(CoreError::InvalidKey("User id must not be empty".into()));
    }
    if user_id.chars().any(char::is_control) {
        return Err(CoreError::InvalidKey(
            "User id must not contain control characters".into(),
        ));
    }
    Ok(())
}

/// A secret key as stored at rest
#[derive(Clone)]
pub struct LockedSecretKey {
    public: PublicKeyBundle,
    protection: Protection,
    sealed: Vec<u8>,
}

impl LockedSecretKey {
    pub fn public(&self) -> &PublicKeyBundle {
        &self.public
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn is_protected(&self) -> bool {
        matches!(self.protection, Protection::Argon2id(_))
    }

    /// Recover the key pair; runs Argon2id when protected
    pub fn unlock(&self, passphrase: Option<&str>) -> CoreResult<KeyPair> {
        let fp = self.fingerprint();
        let secrets: Zeroizing<Vec<u8>> = match self.protection {
            Protection::None => Zeroizing::new(self.sealed.clone()),
            Protection::Argon2id(params) => {
                let passphrase = passphrase.ok_or_else(|| {
                    CoreError::Passphrase(format!("Secret key {fp} is passphrase protected"))
                })?;
                if self.sealed.len() < SALT_LEN + NONCE_LEN {
                    return Err(CoreError::InvalidKey("Sealed secret key too short".into()));
                }
                let (salt, rest) = self.sealed.split_at(SALT_LEN);
                let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
                let nonce: [u8; NONCE_LEN] = nonce
                    .try_into()
                    .map_err(|_| CoreError::InvalidKey("Bad nonce length".into()))?;

                let key = params.derive(passphrase, salt)?;
                let cipher = XChaCha20Poly1305::new_from_slice(&key[..])
                    .map_err(|e| CoreError::Passphrase(e.to_string()))?;
                let plaintext = cipher
                    .decrypt(
                        &nonce.into(),
                        Payload {
                            msg: ciphertext,
                            aad: fp.as_bytes(),
                        },
                    )
                    .map_err(|_| CoreError::Passphrase(format!("Bad passphrase for key {fp}")))?;
                Zeroizing::new(plaintext)
            }
        };

        if secrets.len() != SECRETS_LEN {
            return Err(CoreError::InvalidKey(format!(
                "Secret key material must be {SECRETS_LEN} bytes, got {}",
                secrets.len()
            )));
        }

        let mut seed = Zeroizing::new([0u8; 32]);
        let mut x_secret = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&secrets[..32]);
        x_secret.copy_from_slice(&secrets[32..]);

        let keypair = KeyPair::from_parts(
            self.public.user_id.clone(),
            self.public.created_at,
            SigningKey::from_bytes(&seed),
            StaticSecret::from(*x_secret),
        );
        if keypair.fingerprint() != fp {
            return Err(CoreError::InvalidKey(format!(
                "Secret material does not belong to key {fp}"
            )));
        }
        Ok(keypair)
    }

    pub fn to_armored(&self) -> String {
        let public = self.public.to_bytes();
        let mut payload = Vec::with_capacity(4 + public.len() + self.sealed.len());
        payload.extend_from_slice(&(public.len() as u32).to_be_bytes());
        payload.extend_from_slice(&public);
        payload.extend_from_slice(&self.sealed);

        let fp = self.fingerprint().to_hex();
        let created = self.public.created_at.to_string();
        let kdf;
        let mut headers = vec![
            ("Version", "1"),
            ("Fingerprint", fp.as_str()),
            ("User-Id", self.public.user_id.as_str()),
            ("Created", created.as_str()),
        ];
        match self.protection {
            Protection::None => headers.push(("Protection", "none")),
            Protection::Argon2id(params) => {
                kdf = params.to_header();
                headers.push(("Protection", "argon2id"));
                headers.push(("Kdf", kdf.as_str()));
            }
        }

        armor_encode(ArmorType::SecretKey, &headers, &payload)
    }

    pub fn from_armored(text: &str) -> CoreResult<Self> {
        let block = armor_decode(text)?;
        if block.armor_type != ArmorType::SecretKey {
            return Err(CoreError::InvalidKey(format!(
                "Expected a secret key, found {}",
                block.armor_type.label()
            )));
        }

        let protection = match block.header("Protection").unwrap_or("none") {
            "none" => Protection::None,
            "argon2id" => Protection::Argon2id(KdfParams::from_header(block.require_header("Kdf")?)?),
            other => {
                return Err(CoreError::InvalidKey(format!("Unknown protection: {other}")));
            }
        };

        let payload = &block.payload;
        if payload.len() < 4 {
            return Err(CoreError::InvalidKey("Secret key record too short".into()));
        }
        let (len_bytes, rest) = payload.split_at(4);
        let public_len = u32::from_be_bytes(
            len_bytes
                .try_into()
                .map_err(|_| CoreError::InvalidKey("Bad length prefix".into()))?,
        ) as usize;
        if rest.len() < public_len {
            return Err(CoreError::InvalidKey("Secret key record truncated".into()));
        }
        let (public_bytes, sealed) = rest.split_at(public_len);
        let public = PublicKeyBundle::from_bytes(public_bytes)?;
        check_fingerprint_header(block.header("Fingerprint"), &public)?;

        Ok(Self {
            public,
            protection,
            sealed: sealed.to_vec(),
        })
    }
}

impl fmt::Debug for LockedSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedSecretKey")
            .field("public", &self.public)
            .field("protection", &self.protection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_kdf() -> KdfParams {
        KdfParams::new(64, 1, 1)
    }

    #[test]
    fn test_public_armor_roundtrip() {
        let kp = KeyPair::generate("Takeout Export <ops@example.com>").unwrap();
        let armored = kp.public().to_armored();
        assert!(armored.contains("BEGIN TAKEOUT PUBLIC KEY"));

        let parsed = PublicKeyBundle::from_armored(&armored).unwrap();
        assert_eq!(&parsed, kp.public());
        assert_eq!(parsed.fingerprint(), kp.fingerprint());
    }

    #[test]
    fn test_unprotected_secret_roundtrip() {
        let kp = KeyPair::generate("alice").unwrap();
        let locked = kp.lock(None, fast_kdf()).unwrap();
        assert!(!locked.is_protected());

        let parsed = LockedSecretKey::from_armored(&locked.to_armored()).unwrap();
        let unlocked = parsed.unlock(None).unwrap();
        assert_eq!(unlocked.fingerprint(), kp.fingerprint());
        assert_eq!(
            unlocked.signing_key().to_bytes(),
            kp.signing_key().to_bytes()
        );
    }

    #[test]
    fn test_protected_secret_requires_passphrase() {
        let kp = KeyPair::generate("alice").unwrap();
        let locked = kp.lock(Some("hunter2"), fast_kdf()).unwrap();
        let armored = locked.to_armored();
        assert!(armored.contains("Protection: argon2id"));
        assert!(armored.contains("Kdf: m=64,t=1,p=1"));

        let parsed = LockedSecretKey::from_armored(&armored).unwrap();
        assert!(matches!(parsed.unlock(None), Err(CoreError::Passphrase(_))));
        assert!(matches!(
            parsed.unlock(Some("wrong")),
            Err(CoreError::Passphrase(_))
        ));
        assert_eq!(
            parsed.unlock(Some("hunter2")).unwrap().fingerprint(),
            kp.fingerprint()
        );
    }

    #[test]
    fn test_tampered_fingerprint_header_rejected() {
        let kp = KeyPair::generate("alice").unwrap();
        let other = KeyPair::generate("mallory").unwrap();
        let armored = kp
            .public()
            .to_armored()
            .replace(&kp.fingerprint().to_hex(), &other.fingerprint().to_hex());
        assert!(PublicKeyBundle::from_armored(&armored).is_err());
    }

    #[test]
    fn test_public_parser_rejects_secret_armor() {
        let kp = KeyPair::generate("alice").unwrap();
        let secret = kp.lock(None, fast_kdf()).unwrap().to_armored();
        assert!(PublicKeyBundle::from_armored(&secret).is_err());
    }

    #[test]
    fn test_user_id_validation() {
        assert!(KeyPair::generate("").is_err());
        assert!(KeyPair::generate("a\nb").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let kp = KeyPair::generate("alice").unwrap();
        assert!(format!("{kp:?}").contains("REDACTED"));
    }
}
