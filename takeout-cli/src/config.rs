// Config file handling

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use takeout_core::BackendKind;

#[derive(Serialize, Deserialize, Default)]
pub struct Config {
    pub default_server: Option<String>,
    /// "native" or "gpg"
    pub backend: Option<String>,
    pub keyring_path: Option<String>,
    pub gnupg_home: Option<String>,
    pub output_dir: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Set a key by name, as typed on the command line
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        let value = Some(value).filter(|v| !v.is_empty());
        match key {
            "default_server" => self.default_server = value,
            "backend" => {
                if let Some(name) = &value {
                    name.parse::<BackendKind>()?;
                }
                self.backend = value
            }
            "keyring_path" => self.keyring_path = value,
            "gnupg_home" => self.gnupg_home = value,
            "output_dir" => self.output_dir = value,
            other => anyhow::bail!(
                "Unknown config key '{other}'. Valid keys: default_server, backend, keyring_path, gnupg_home, output_dir"
            ),
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Native keyring used when neither flag nor config names one
    pub fn default_keyring_path() -> Result<PathBuf> {
        Ok(project_dirs()?.data_dir().join("keyring"))
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "takeout", "takeout")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_known_and_unknown_keys() {
        let mut config = Config::default();
        config.set("default_server", "http://localhost:21121".into()).unwrap();
        config.set("backend", "gpg".into()).unwrap();
        assert_eq!(config.default_server.as_deref(), Some("http://localhost:21121"));
        assert_eq!(config.backend.as_deref(), Some("gpg"));

        config.set("backend", String::new()).unwrap();
        assert!(config.backend.is_none());
        assert!(config.set("wallet", "x".into()).is_err());
        assert!(config.set("backend", "enigma".into()).is_err());
    }
}
