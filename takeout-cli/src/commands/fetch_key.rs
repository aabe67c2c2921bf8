use std::fs;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use takeout_core::TrustLevel;

use super::Context;
use super::helpers::{fetch_public_key, open_backend, resolve_server_url};
use crate::config::Config;
use crate::output::{print_json, print_success};

#[derive(Args)]
pub struct FetchKeyArgs {
    /// Write the key to a file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Import the key into the keyring
    #[arg(long)]
    pub import: bool,
    /// Owner trust to assign after import (unknown, never, marginal, full, ultimate)
    #[arg(long, requires = "import")]
    pub trust: Option<TrustLevel>,
}

#[derive(Serialize)]
struct FetchKeyOutput {
    server: String,
    fingerprint: Option<String>,
    trust: Option<TrustLevel>,
    output: Option<String>,
}

pub async fn run(args: FetchKeyArgs, ctx: &Context) -> Result<()> {
    let config = Config::load()?;
    let server = resolve_server_url(ctx, &config)?;
    let armored = fetch_public_key(&server).await?;

    if let Some(path) = &args.output {
        fs::write(path, &armored).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let mut fingerprint = None;
    if args.import {
        let backend = open_backend(ctx, &config)?;
        let fp = backend
            .import_key(&armored)
            .await
            .context("Failed to import server key")?;
        if let Some(level) = args.trust {
            backend.trust_key(&fp, level).await?;
        }
        fingerprint = Some(fp);
    }

    if ctx.json_output {
        print_json(&FetchKeyOutput {
            server,
            fingerprint: fingerprint.map(|fp| fp.to_hex()),
            trust: args.trust,
            output: args.output.map(|p| p.display().to_string()),
        })?;
        return Ok(());
    }

    match (&args.output, &fingerprint) {
        (None, None) => print!("{armored}"),
        (Some(path), _) => print_success(format!("Saved public key to {}", path.display())),
        _ => {}
    }
    if let Some(fp) = fingerprint {
        print_success(format!("Imported key from {server}"));
        println!("  {}: {}", "Fingerprint".dimmed(), fp.grouped());
        if let Some(level) = args.trust {
            println!("  {}: {}", "Trust".dimmed(), level);
        }
    }

    Ok(())
}
