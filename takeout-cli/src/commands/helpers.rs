// Common helper functions

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use dialoguer::Password;
use takeout_core::{BackendKind, BackendOptions, CryptoBackend, Fingerprint};
use takeout_proto::{ArmorType, detect_armor};

use super::Context;
use crate::config::Config;

pub fn resolve_backend_kind(ctx: &Context, config: &Config) -> Result<BackendKind> {
    // Priority: --backend flag > $TAKEOUT_BACKEND env > config.backend
    if let Some(kind) = ctx.backend_override {
        return Ok(kind);
    }
    match &config.backend {
        Some(name) => name
            .parse()
            .with_context(|| format!("Invalid backend '{name}' in config")),
        None => Ok(BackendKind::default()),
    }
}

pub fn resolve_keyring_path(ctx: &Context, config: &Config) -> Result<PathBuf> {
    // Priority: --keyring flag > $TAKEOUT_KEYRING env > config.keyring_path > data dir
    if let Some(ref path) = ctx.keyring_override {
        return Ok(PathBuf::from(path));
    }
    if let Some(ref path) = config.keyring_path {
        return Ok(PathBuf::from(path));
    }
    Config::default_keyring_path()
}

pub fn open_backend(ctx: &Context, config: &Config) -> Result<Arc<dyn CryptoBackend>> {
    let kind = resolve_backend_kind(ctx, config)?;
    let options = BackendOptions {
        kind,
        keyring_dir: match kind {
            BackendKind::Native => Some(resolve_keyring_path(ctx, config)?),
            BackendKind::Gpg => None,
        },
        gnupg_home: ctx
            .gnupg_home_override
            .as_ref()
            .or(config.gnupg_home.as_ref())
            .map(PathBuf::from),
        timeout: Duration::from_secs(120),
        ..Default::default()
    };
    tracing::debug!(backend = %kind, keyring = ?options.keyring_dir, "Opening backend");
    takeout_core::open_backend(&options).context("Failed to open crypto backend")
}

pub fn resolve_server_url(ctx: &Context, config: &Config) -> Result<String> {
    // Priority: --server flag > $TAKEOUT_SERVER env > config.default_server
    if let Some(ref server) = ctx.server_override {
        return Ok(server.clone());
    }

    if let Some(ref server) = config.default_server {
        return Ok(server.clone());
    }

    anyhow::bail!("No server URL specified. Use --server <url> or set default_server in config")
}

pub fn public_key_url(server: &str) -> String {
    format!("{}/publickey", server.trim_end_matches('/'))
}

/// Download the armored public key a server signs with
pub async fn fetch_public_key(server: &str) -> Result<String> {
    let url = public_key_url(server);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to fetch public key from {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to fetch public key: {}", response.status());
    }

    let armored = response
        .text()
        .await
        .context("Failed to read public key response")?;
    ensure_public_key(&armored)?;
    tracing::debug!(url, "Fetched public key");
    Ok(armored)
}

/// Accept our own armor, or an OpenPGP key for the gpg backend
pub fn ensure_public_key(text: &str) -> Result<()> {
    if detect_armor(text) == Some(ArmorType::PublicKey)
        || text.contains("-----BEGIN PGP PUBLIC KEY BLOCK-----")
    {
        Ok(())
    } else {
        anyhow::bail!("Response is not an armored public key")
    }
}

/// Use the given passphrase, or prompt when attached to a terminal
///
/// An empty answer means no passphrase.
pub fn passphrase_or_prompt(explicit: Option<String>, prompt: &str) -> Result<Option<String>> {
    if explicit.is_some() {
        return Ok(explicit);
    }
    if !std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let entered = Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()?;
    Ok(Some(entered).filter(|p| !p.is_empty()))
}

pub async fn resolve_key(backend: &dyn CryptoBackend, reference: &str) -> Result<Fingerprint> {
    backend
        .resolve_key(reference)
        .await
        .with_context(|| format!("No unique key matches '{reference}'"))
}

pub fn format_timestamp(ts: i64) -> String {
    use chrono::{DateTime, Utc};
    let dt = DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context {
            json_output: false,
            keyring_override: None,
            backend_override: None,
            gnupg_home_override: None,
            server_override: None,
            debug: false,
        }
    }

    #[test]
    fn test_public_key_url() {
        assert_eq!(
            public_key_url("http://localhost:21121/"),
            "http://localhost:21121/publickey"
        );
        assert_eq!(public_key_url("https://x.example"), "https://x.example/publickey");
    }

    #[test]
    fn test_backend_priority() {
        let config = Config {
            backend: Some("gpg".into()),
            ..Default::default()
        };
        assert_eq!(resolve_backend_kind(&ctx(), &config).unwrap(), BackendKind::Gpg);

        let mut ctx = ctx();
        ctx.backend_override = Some(BackendKind::Native);
        assert_eq!(resolve_backend_kind(&ctx, &config).unwrap(), BackendKind::Native);

        let bad = Config {
            backend: Some("enigma".into()),
            ..Default::default()
        };
        assert!(resolve_backend_kind(&self::ctx(), &bad).is_err());
    }

    #[test]
    fn test_server_priority() {
        let config = Config {
            default_server: Some("http://config".into()),
            ..Default::default()
        };
        assert_eq!(resolve_server_url(&ctx(), &config).unwrap(), "http://config");

        let mut ctx = ctx();
        ctx.server_override = Some("http://flag".into());
        assert_eq!(resolve_server_url(&ctx, &config).unwrap(), "http://flag");
        assert!(resolve_server_url(&self::ctx(), &Config::default()).is_err());
    }

    #[test]
    fn test_ensure_public_key() {
        assert!(ensure_public_key("-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nabc\n").is_ok());
        assert!(ensure_public_key("<html>not found</html>").is_err());
    }
}
