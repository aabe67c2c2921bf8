//! Owner trust levels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    #[default]
    Unknown,
    Never,
    Marginal,
    Full,
    Ultimate,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Unknown => "unknown",
            TrustLevel::Never => "never",
            TrustLevel::Marginal => "marginal",
            TrustLevel::Full => "full",
            TrustLevel::Ultimate => "ultimate",
        }
    }

    /// Value understood by `gpg --import-ownertrust`
    pub fn gpg_ownertrust(&self) -> u8 {
        match self {
            TrustLevel::Unknown => 2,
            TrustLevel::Never => 3,
            TrustLevel::Marginal => 4,
            TrustLevel::Full => 5,
            TrustLevel::Ultimate => 6,
        }
    }

    /// Map the ownertrust letter from a `--with-colons` listing
    pub fn from_gpg_letter(letter: &str) -> Self {
        match letter {
            "n" => TrustLevel::Never,
            "m" => TrustLevel::Marginal,
            "f" => TrustLevel::Full,
            "u" => TrustLevel::Ultimate,
            _ => TrustLevel::Unknown,
        }
    }

    /// Signatures from keys at this level verify without a trust warning
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustLevel::Full | TrustLevel::Ultimate)
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unknown" | "1" => Ok(TrustLevel::Unknown),
            "never" | "none" | "2" => Ok(TrustLevel::Never),
            "marginal" | "3" => Ok(TrustLevel::Marginal),
            "full" | "fully" | "4" => Ok(TrustLevel::Full),
            "ultimate" | "ultimately" | "5" => Ok(TrustLevel::Ultimate),
            other => Err(CoreError::InvalidKey(format!(
                "Unknown trust level: {other} (expected unknown|never|marginal|full|ultimate or 1-5)"
            ))),
        }
    }
}
