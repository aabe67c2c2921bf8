use takeout_core::BackendKind;

pub mod config;
pub mod fetch_key;
pub mod helpers;
pub mod key;
pub mod verify;

/// Global context passed to all commands
pub struct Context {
    pub json_output: bool,
    pub keyring_override: Option<String>,
    pub backend_override: Option<BackendKind>,
    pub gnupg_home_override: Option<String>,
    pub server_override: Option<String>,
    pub debug: bool,
}
