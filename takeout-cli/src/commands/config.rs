use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::Context;
use super::helpers::{resolve_backend_kind, resolve_keyring_path};
use crate::config::Config;
use crate::output::{print_json, print_success};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Set a configuration value (empty value clears it)
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

pub async fn run(action: ConfigCommand, ctx: &Context) -> Result<()> {
    match action {
        ConfigCommand::Show => show(ctx).await,
        ConfigCommand::Set { key, value } => set(key, value).await,
    }
}

async fn show(ctx: &Context) -> Result<()> {
    let config = Config::load()?;

    if ctx.json_output {
        return print_json(&config);
    }

    println!("{}", "Configuration:".bold());
    println!(
        "  {}: {}",
        "default_server".dimmed(),
        config.default_server.as_deref().unwrap_or("(not set)")
    );
    println!("    {}", "Example: http://localhost:21121".bright_black());

    println!(
        "  {}: {}",
        "backend".dimmed(),
        resolve_backend_kind(ctx, &config)?
    );
    println!("    {}", "Valid: native, gpg".bright_black());

    println!(
        "  {}: {}",
        "keyring_path".dimmed(),
        resolve_keyring_path(ctx, &config)?.display()
    );
    println!(
        "  {}: {}",
        "gnupg_home".dimmed(),
        config.gnupg_home.as_deref().unwrap_or("(gpg default)")
    );
    println!(
        "  {}: {}",
        "output_dir".dimmed(),
        config.output_dir.as_deref().unwrap_or(".")
    );

    println!();
    println!(
        "  {}: {}",
        "Config file".dimmed(),
        Config::config_path()?.display()
    );
    Ok(())
}

async fn set(key: String, value: String) -> Result<()> {
    let mut config = Config::load()?;
    config.set(&key, value.clone())?;
    config.save()?;

    if value.is_empty() {
        print_success(format!("Cleared {key}"));
    } else {
        print_success(format!("Set {key} = {value}"));
    }
    Ok(())
}
