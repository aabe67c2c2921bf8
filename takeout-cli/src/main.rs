use anyhow::Result;
use clap::{Parser, Subcommand};
use takeout_core::BackendKind;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod config;
mod output;

#[derive(Parser)]
#[command(name = "takeout")]
#[command(about = "Verify and decrypt signed account exports")]
#[command(version)]
struct Cli {
    /// Output format
    #[arg(long, global = true)]
    json: bool,

    /// Native keyring directory
    #[arg(long, global = true, env = "TAKEOUT_KEYRING")]
    keyring: Option<String>,

    /// Crypto backend: native or gpg
    #[arg(long, global = true, env = "TAKEOUT_BACKEND")]
    backend: Option<BackendKind>,

    /// GnuPG home directory (gpg backend)
    #[arg(long, global = true, env = "TAKEOUT_GNUPG_HOME")]
    gnupg_home: Option<String>,

    /// Export server URL
    #[arg(long, global = true, env = "TAKEOUT_SERVER")]
    server: Option<String>,

    /// Debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt an export archive and check its signature
    Verify(commands::verify::VerifyArgs),
    /// Download the server's public key
    FetchKey(commands::fetch_key::FetchKeyArgs),
    /// Manage keys
    Key {
        #[command(subcommand)]
        action: commands::key::KeyCommand,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.debug {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("takeout_cli=debug,takeout_core=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("takeout_cli=warn"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::uptime())
        .init();

    let ctx = commands::Context {
        json_output: cli.json,
        keyring_override: cli.keyring,
        backend_override: cli.backend,
        gnupg_home_override: cli.gnupg_home,
        server_override: cli.server,
        debug: cli.debug,
    };

    match cli.command {
        Commands::Verify(args) => commands::verify::run(args, &ctx).await,
        Commands::FetchKey(args) => commands::fetch_key::run(args, &ctx).await,
        Commands::Key { action } => commands::key::run(action, &ctx).await,
        Commands::Config { action } => commands::config::run(action, &ctx).await,
    }
}
