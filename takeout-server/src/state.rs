use std::sync::Arc;

use anyhow::Context;
use takeout_core::{BundleSealer, CryptoBackend, ExportMode, Fingerprint, open_backend};
use takeout_storage::RecordFetcher;

use crate::config::Config;

/// Shared application state
///
/// Everything here is resolved once at startup; a key or database problem
/// stops the process before it binds.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn CryptoBackend>,
    pub fetcher: Arc<RecordFetcher>,
    pub sealer: Arc<BundleSealer>,
    /// Armored public half of the signing key, served at `/publickey`
    pub public_key: Arc<str>,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let temp_root = config.export.temp_root();
        std::fs::create_dir_all(&temp_root)
            .with_context(|| format!("Cannot create temp root {}", temp_root.display()))?;

        let backend = open_backend(&config.crypto.backend_options(&temp_root))
            .context("Failed to open crypto backend")?;

        let passphrase = config.crypto.passphrase.as_deref();
        let signing_key = match &config.crypto.signing_key {
            Some(reference) => backend
                .resolve_signing_key(reference, passphrase)
                .await
                .with_context(|| format!("FATAL: signing key '{reference}' is not usable"))?,
            None => sole_secret_key(backend.as_ref(), passphrase).await?,
        };
        let public_key = backend
            .export_public_key(&signing_key)
            .await
            .context("Failed to export signing public key")?;
        tracing::info!(backend = %backend.kind(), key = %signing_key, "Signing key ready");

        let mut sealer = BundleSealer::new(backend.clone(), signing_key)
            .with_passphrase(config.crypto.passphrase.clone())
            .with_deadline(config.crypto.timeout())
            .with_temp_root(&temp_root);

        if config.export.mode == ExportMode::Encrypted {
            let recipient = match &config.crypto.recipient_key {
                Some(reference) => backend
                    .resolve_key(reference)
                    .await
                    .with_context(|| format!("FATAL: recipient key '{reference}' not found"))?,
                None => signing_key,
            };
            tracing::info!(%recipient, "Exports will be encrypted");
            sealer = sealer.encrypt_to(recipient);
        } else {
            tracing::warn!("Exports will be signed but not encrypted");
        }

        let fetcher = RecordFetcher::open(&config.database_path, config.export.manifest.clone())
            .with_context(|| format!("Cannot open database {}", config.database_path.display()))?;
        tracing::info!(
            database = %config.database_path.display(),
            tables = fetcher.manifest().tables.len(),
            format = %config.export.format,
            "Record fetcher ready"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            backend,
            fetcher: Arc::new(fetcher),
            sealer: Arc::new(sealer),
            public_key: public_key.into(),
        })
    }
}

/// The signing key when none is configured: the keyring's only secret key
async fn sole_secret_key(
    backend: &dyn CryptoBackend,
    passphrase: Option<&str>,
) -> anyhow::Result<Fingerprint> {
    let secrets: Vec<_> = backend
        .list_keys()
        .await
        .context("Failed to list keys")?
        .into_iter()
        .filter(|k| k.has_secret)
        .collect();
    match secrets.as_slice() {
        [only] => {
            let fp = only.fingerprint.to_hex();
            Ok(backend
                .resolve_signing_key(&fp, passphrase)
                .await
                .with_context(|| format!("FATAL: signing key {fp} is not usable"))?)
        }
        [] => anyhow::bail!("FATAL: no secret key available; set crypto.signing_key"),
        _ => anyhow::bail!(
            "FATAL: {} secret keys available; set crypto.signing_key to pick one",
            secrets.len()
        ),
    }
}
