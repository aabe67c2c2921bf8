//! Directory-backed keyring for the native backend
//!
//! Layout:
//! ```text
//! <root>/
//!   pubring/<FINGERPRINT>.asc   armored public keys
//!   secring/<FINGERPRINT>.asc   armored (optionally protected) secret keys
//!   trustdb.json                owner trust, keyed by fingerprint
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use takeout_proto::{ArmorType, detect_armor};

use crate::error::{CoreError, CoreResult};
use crate::fingerprint::Fingerprint;
use crate::keys::{KdfParams, KeyPair, LockedSecretKey, PublicKeyBundle};
use crate::trust::TrustLevel;

const PUBRING: &str = "pubring";
const SECRING: &str = "secring";
const TRUSTDB: &str = "trustdb.json";

/// Summary of one key, as listed to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub fingerprint: Fingerprint,
    pub user_id: String,
    pub created_at: i64,
    pub has_secret: bool,
    pub trust: TrustLevel,
}

pub struct Keyring {
    root: Option<PathBuf>,
    public: BTreeMap<Fingerprint, PublicKeyBundle>,
    secret: BTreeMap<Fingerprint, LockedSecretKey>,
    trust: BTreeMap<Fingerprint, TrustLevel>,
    kdf: KdfParams,
}

impl Keyring {
    /// A keyring that never touches disk
    pub fn in_memory() -> Self {
        Self {
            root: None,
            public: BTreeMap::new(),
            secret: BTreeMap::new(),
            trust: BTreeMap::new(),
            kdf: KdfParams::default(),
        }
    }

    /// Open (creating if needed) a keyring directory
    pub fn open(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(PUBRING))?;
        fs::create_dir_all(root.join(SECRING))?;

        let mut keyring = Self {
            root: Some(root.clone()),
            ..Self::in_memory()
        };

        for text in read_armor_files(&root.join(PUBRING))? {
            let bundle = PublicKeyBundle::from_armored(&text)?;
            keyring.public.insert(bundle.fingerprint(), bundle);
        }
        for text in read_armor_files(&root.join(SECRING))? {
            let locked = LockedSecretKey::from_armored(&text)?;
            let fp = locked.fingerprint();
            keyring
                .public
                .entry(fp)
                .or_insert_with(|| locked.public().clone());
            keyring.secret.insert(fp, locked);
        }

        let trustdb = root.join(TRUSTDB);
        if trustdb.exists() {
            let contents = fs::read_to_string(&trustdb)?;
            keyring.trust = serde_json::from_str(&contents)?;
        }

        tracing::debug!(
            root = %root.display(),
            public = keyring.public.len(),
            secret = keyring.secret.len(),
            "Opened keyring"
        );
        Ok(keyring)
    }

    /// Argon2id cost used when protecting newly generated keys
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn len(&self) -> usize {
        self.public.len()
    }

    pub fn is_empty(&self) -> bool {
        self.public.is_empty()
    }

    pub fn public_key(&self, fp: &Fingerprint) -> Option<&PublicKeyBundle> {
        self.public.get(fp)
    }

    pub fn secret_key(&self, fp: &Fingerprint) -> Option<&LockedSecretKey> {
        self.secret.get(fp)
    }

    pub fn trust_of(&self, fp: &Fingerprint) -> TrustLevel {
        self.trust.get(fp).copied().unwrap_or_default()
    }

    /// Resolve a fingerprint, key id suffix or user id fragment
    pub fn resolve(&self, reference: &str) -> CoreResult<Fingerprint> {
        resolve_in(self.public.values(), reference)
    }

    /// Like [`Keyring::resolve`], but only among keys with secret material
    pub fn resolve_secret(&self, reference: &str) -> CoreResult<Fingerprint> {
        resolve_in(self.secret.values().map(LockedSecretKey::public), reference)
    }

    /// Generate a key pair, store it and mark it ultimately trusted
    pub fn generate(&mut self, user_id: &str, passphrase: Option<&str>) -> CoreResult<Fingerprint> {
        let keypair = KeyPair::generate(user_id)?;
        let locked = keypair.lock(passphrase, self.kdf)?;
        let fp = self.insert_secret(locked)?;
        self.set_trust(&fp, TrustLevel::Ultimate)?;
        tracing::info!(fingerprint = %fp, user_id, "Generated key pair");
        Ok(fp)
    }

    /// Import an armored public or secret key
    pub fn import_armored(&mut self, text: &str) -> CoreResult<Fingerprint> {
        match detect_armor(text) {
            Some(ArmorType::PublicKey) => self.insert_public(PublicKeyBundle::from_armored(text)?),
            Some(ArmorType::SecretKey) => self.insert_secret(LockedSecretKey::from_armored(text)?),
            Some(other) => Err(CoreError::InvalidKey(format!(
                "Expected a key, found {}",
                other.label()
            ))),
            None => Err(CoreError::InvalidKey("No armored key found".into())),
        }
    }

    pub fn insert_public(&mut self, bundle: PublicKeyBundle) -> CoreResult<Fingerprint> {
        let fp = bundle.fingerprint();
        self.write_file(PUBRING, &fp, &bundle.to_armored())?;
        self.public.insert(fp, bundle);
        tracing::debug!(fingerprint = %fp, "Stored public key");
        Ok(fp)
    }

    pub fn insert_secret(&mut self, locked: LockedSecretKey) -> CoreResult<Fingerprint> {
        let fp = self.insert_public(locked.public().clone())?;
        self.write_file(SECRING, &fp, &locked.to_armored())?;
        self.secret.insert(fp, locked);
        tracing::debug!(fingerprint = %fp, "Stored secret key");
        Ok(fp)
    }

    pub fn set_trust(&mut self, fp: &Fingerprint, level: TrustLevel) -> CoreResult<()> {
        if !self.public.contains_key(fp) {
            return Err(CoreError::KeyNotFound(fp.to_hex()));
        }
        self.trust.insert(*fp, level);
        if let Some(root) = &self.root {
            fs::write(root.join(TRUSTDB), serde_json::to_vec_pretty(&self.trust)?)?;
        }
        tracing::debug!(fingerprint = %fp, %level, "Updated owner trust");
        Ok(())
    }

    pub fn export_public(&self, fp: &Fingerprint) -> CoreResult<String> {
        self.public
            .get(fp)
            .map(PublicKeyBundle::to_armored)
            .ok_or_else(|| CoreError::KeyNotFound(fp.to_hex()))
    }

    pub fn list(&self) -> Vec<KeyInfo> {
        self.public
            .iter()
            .map(|(fp, bundle)| KeyInfo {
                fingerprint: *fp,
                user_id: bundle.user_id.clone(),
                created_at: bundle.created_at,
                has_secret: self.secret.contains_key(fp),
                trust: self.trust_of(fp),
            })
            .collect()
    }

    fn write_file(&self, ring: &str, fp: &Fingerprint, contents: &str) -> CoreResult<()> {
        if let Some(root) = &self.root {
            fs::write(root.join(ring).join(format!("{}.asc", fp.to_hex())), contents)?;
        }
        Ok(())
    }
}

fn read_armor_files(dir: &Path) -> CoreResult<Vec<String>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "asc"))
        .collect();
    paths.sort();
    paths
        .iter()
        .map(|p| fs::read_to_string(p).map_err(CoreError::from))
        .collect()
}

fn resolve_in<'a>(
    keys: impl Iterator<Item = &'a PublicKeyBundle>,
    reference: &str,
) -> CoreResult<Fingerprint> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(CoreError::KeyNotFound("empty key reference".into()));
    }
    let needle = reference.to_lowercase();

    let mut by_fingerprint = Vec::new();
    let mut by_user_id = Vec::new();
    for bundle in keys {
        let fp = bundle.fingerprint();
        if fp.matches(reference) {
            by_fingerprint.push(fp);
        } else if bundle.user_id.to_lowercase().contains(&needle) {
            by_user_id.push(fp);
        }
    }

    let candidates = if by_fingerprint.is_empty() {
        by_user_id
    } else {
        by_fingerprint
    };
    match candidates.as_slice() {
        [fp] => Ok(*fp),
        [] => Err(CoreError::KeyNotFound(reference.to_string())),
        many => Err(CoreError::AmbiguousKey(format!(
            "{reference} matches {} keys",
            many.len()
        ))),
    }
}
