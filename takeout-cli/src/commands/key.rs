use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Password;
use serde::Serialize;
use takeout_core::TrustLevel;

use super::Context;
use super::helpers::{format_timestamp, open_backend, resolve_key};
use crate::config::Config;
use crate::output::{print_info, print_json, print_success};

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Generate a signing + encryption key pair
    Generate {
        /// User id, e.g. "Export Server <ops@example.com>"
        user_id: String,
        /// Passphrase protecting the secret key
        #[arg(long, env = "TAKEOUT_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
        /// Store the secret key unprotected
        #[arg(long, conflicts_with = "passphrase")]
        no_passphrase: bool,
    },
    /// Import an armored key from a file
    Import {
        file: PathBuf,
        /// Owner trust to assign after import
        #[arg(long)]
        trust: Option<TrustLevel>,
    },
    /// Print or save a public key
    Export {
        /// Fingerprint, key id or user id
        key: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Set owner trust (unknown, never, marginal, full, ultimate or 1-5)
    Trust { key: String, level: TrustLevel },
    /// List keys in the keyring
    List,
}

pub async fn run(action: KeyCommand, ctx: &Context) -> Result<()> {
    match action {
        KeyCommand::Generate {
            user_id,
            passphrase,
            no_passphrase,
        } => generate(user_id, passphrase, no_passphrase, ctx).await,
        KeyCommand::Import { file, trust } => import(file, trust, ctx).await,
        KeyCommand::Export { key, output } => export(key, output, ctx).await,
        KeyCommand::Trust { key, level } => trust(key, level, ctx).await,
        KeyCommand::List => list(ctx).await,
    }
}

async fn generate(
    user_id: String,
    passphrase: Option<String>,
    no_passphrase: bool,
    ctx: &Context,
) -> Result<()> {
    let config = Config::load()?;
    let backend = open_backend(ctx, &config)?;

    let passphrase = match (passphrase, no_passphrase) {
        (_, true) => None,
        (Some(p), false) => Some(p),
        (None, false) => {
            let p = Password::new()
                .with_prompt("Key passphrase")
                .with_confirmation("Confirm passphrase", "Passphrases don't match")
                .interact()?;
            Some(p)
        }
    };

    let fp = backend
        .generate_key(&user_id, passphrase.as_deref())
        .await
        .context("Key generation failed")?;

    if ctx.json_output {
        #[derive(Serialize)]
        struct Output<'a> {
            fingerprint: String,
            user_id: &'a str,
            protected: bool,
        }
        print_json(&Output {
            fingerprint: fp.to_hex(),
            user_id: &user_id,
            protected: passphrase.is_some(),
        })?;
    } else {
        print_success(format!("Generated key for {user_id}"));
        println!("  {}: {}", "Fingerprint".dimmed(), fp.grouped());
        if passphrase.is_none() {
            println!("  {}", "Secret key is stored without a passphrase".yellow());
        }
    }
    Ok(())
}

async fn import(file: PathBuf, trust: Option<TrustLevel>, ctx: &Context) -> Result<()> {
    let config = Config::load()?;
    let backend = open_backend(ctx, &config)?;

    let armored =
        fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let fp = backend.import_key(&armored).await.context("Import failed")?;
    if let Some(level) = trust {
        backend.trust_key(&fp, level).await?;
    }

    if ctx.json_output {
        #[derive(Serialize)]
        struct Output {
            fingerprint: String,
            trust: Option<TrustLevel>,
        }
        print_json(&Output {
            fingerprint: fp.to_hex(),
            trust,
        })?;
    } else {
        print_success(format!("Imported {}", file.display()));
        println!("  {}: {}", "Fingerprint".dimmed(), fp.grouped());
        if trust.is_none() {
            print_info("Key is not trusted yet; set trust with: takeout key trust <key> full");
        }
    }
    Ok(())
}

async fn export(key: String, output: Option<PathBuf>, ctx: &Context) -> Result<()> {
    let config = Config::load()?;
    let backend = open_backend(ctx, &config)?;

    let fp = resolve_key(backend.as_ref(), &key).await?;
    let armored = backend.export_public_key(&fp).await?;

    match output {
        Some(path) => {
            fs::write(&path, &armored)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !ctx.json_output {
                print_success(format!("Exported {} to {}", fp.key_id(), path.display()));
            }
        }
        None => print!("{armored}"),
    }
    Ok(())
}

async fn trust(key: String, level: TrustLevel, ctx: &Context) -> Result<()> {
    let config = Config::load()?;
    let backend = open_backend(ctx, &config)?;

    let fp = resolve_key(backend.as_ref(), &key).await?;
    backend.trust_key(&fp, level).await?;

    if ctx.json_output {
        print_json(&serde_json::json!({ "fingerprint": fp.to_hex(), "trust": level }))?;
    } else {
        print_success(format!("Set trust of {} to {level}", fp.key_id()));
    }
    Ok(())
}

async fn list(ctx: &Context) -> Result<()> {
    let config = Config::load()?;
    let backend = open_backend(ctx, &config)?;
    let keys = backend.list_keys().await?;

    if ctx.json_output {
        print_json(&keys)?;
        return Ok(());
    }

    if keys.is_empty() {
        print_info("No keys in keyring. Create one with: takeout key generate <user-id>");
        return Ok(());
    }

    for key in keys {
        let kind = if key.has_secret { "sec" } else { "pub" };
        println!("{} {}", kind.bold(), key.fingerprint.grouped());
        println!("    {}: {}", "User".dimmed(), key.user_id);
        println!("    {}: {}", "Trust".dimmed(), key.trust);
        if key.created_at > 0 {
            println!(
                "    {}: {}",
                "Created".dimmed(),
                format_timestamp(key.created_at)
            );
        }
    }
    Ok(())
}
