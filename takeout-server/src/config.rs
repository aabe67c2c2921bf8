use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use takeout_core::{BackendKind, BackendOptions, ExportMode};
use takeout_proto::DumpFormat;
use takeout_storage::ExportManifest;

pub const CONFIG_FILE: &str = "takeout-server.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub crypto: CryptoConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CryptoConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Native keyring directory
    pub keyring_dir: Option<PathBuf>,
    #[serde(default = "default_gpg_program")]
    pub gpg_program: PathBuf,
    pub gnupg_home: Option<PathBuf>,
    /// Fingerprint, key id or user id; may be omitted when the keyring
    /// holds exactly one secret key
    pub signing_key: Option<String>,
    /// Defaults to the signing key
    pub recipient_key: Option<String>,
    pub passphrase: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            keyring_dir: None,
            gpg_program: default_gpg_program(),
            gnupg_home: None,
            signing_key: None,
            recipient_key: None,
            passphrase: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CryptoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backend_options(&self, scratch_dir: &Path) -> BackendOptions {
        BackendOptions {
            kind: self.backend,
            keyring_dir: self.keyring_dir.clone(),
            gpg_program: self.gpg_program.clone(),
            gnupg_home: self.gnupg_home.clone(),
            scratch_dir: Some(scratch_dir.to_path_buf()),
            timeout: self.timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ExportConfig {
    #[serde(default)]
    pub mode: ExportMode,
    #[serde(default)]
    pub format: DumpFormat,
    /// Root for per-request working directories; system temp dir if unset
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub manifest: ExportManifest,
}

impl ExportConfig {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    21121
}
fn default_database_path() -> PathBuf {
    PathBuf::from("takeout.db")
}
fn default_gpg_program() -> PathBuf {
    PathBuf::from("gpg")
}
fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// TOML file first, then `TAKEOUT_*` variables (`TAKEOUT_CRYPTO__SIGNING_KEY`)
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TAKEOUT_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let config = Config::load_from("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.port, 21121);
            assert_eq!(config.crypto.backend, BackendKind::Native);
            assert_eq!(config.crypto.timeout_secs, 30);
            assert_eq!(config.export.mode, ExportMode::Encrypted);
            assert_eq!(config.export.format, DumpFormat::Sql);
            assert_eq!(config.export.manifest.tables.len(), 26);
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "server.toml",
                r#"
                port = 8080
                database_path = "/srv/game.db"

                [crypto]
                backend = "gpg"
                signing_key = "Export Key"

                [export]
                mode = "signed"
                format = "json"

                [export.manifest]
                aggregate_key_column = "OwnerId"
                tables = ["Items"]
                "#,
            )?;
            jail.set_env("TAKEOUT_PORT", "9090");
            jail.set_env("TAKEOUT_CRYPTO__TIMEOUT_SECS", "5");

            let config = Config::load_from("server.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.port, 9090);
            assert_eq!(config.database_path, PathBuf::from("/srv/game.db"));
            assert_eq!(config.crypto.backend, BackendKind::Gpg);
            assert_eq!(config.crypto.signing_key.as_deref(), Some("Export Key"));
            assert_eq!(config.crypto.timeout(), Duration::from_secs(5));
            assert_eq!(config.export.mode, ExportMode::Signed);
            assert_eq!(config.export.format, DumpFormat::Json);
            assert_eq!(config.export.manifest.aggregate_key_column, "OwnerId");
            assert_eq!(config.export.manifest.principal_key_column, "UserId");
            Ok(())
        });
    }
}
