use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use takeout_core::{CoreError, CryptoBackend, VerifiedExport, verify_and_decrypt};

use super::Context;
use super::helpers::{ensure_public_key, fetch_public_key, open_backend, passphrase_or_prompt};
use crate::config::Config;
use crate::output::{print_error, print_info, print_json, print_success};

const PREVIEW_LINES: usize = 5;

#[derive(Args)]
pub struct VerifyArgs {
    /// Export archive (.zip) downloaded from the server
    pub archive: PathBuf,
    /// Trusted public key file to verify against
    #[arg(long, conflicts_with = "fetch_key")]
    pub public_key: Option<PathBuf>,
    /// Download the trusted public key from --server
    #[arg(long)]
    pub fetch_key: bool,
    /// Passphrase for the decryption key
    #[arg(long, env = "TAKEOUT_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
    /// Where to write the payload and signature
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct VerifyOutput<'a> {
    #[serde(flatten)]
    export: &'a VerifiedExport,
    payload_path: String,
    signature_path: String,
    preview: Vec<&'a str>,
}

pub async fn run(args: VerifyArgs, ctx: &Context) -> Result<()> {
    let config = Config::load()?;
    let backend = open_backend(ctx, &config)?;

    let container = fs::read(&args.archive)
        .with_context(|| format!("Failed to read {}", args.archive.display()))?;

    let trusted_key = if let Some(path) = &args.public_key {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        ensure_public_key(&text)?;
        Some(text)
    } else if args.fetch_key {
        let server = super::helpers::resolve_server_url(ctx, &config)?;
        Some(fetch_public_key(&server).await?)
    } else {
        None
    };

    let export = decrypt_with_retry(
        backend.as_ref(),
        &container,
        trusted_key.as_deref(),
        args.passphrase,
        ctx.json_output,
    )
    .await?;

    let out_dir = args
        .out_dir
        .or_else(|| config.output_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let (payload_path, signature_path) = write_outputs(&out_dir, &export)?;
    let preview = export.preview(PREVIEW_LINES);

    if ctx.json_output {
        print_json(&VerifyOutput {
            export: &export,
            payload_path: payload_path.display().to_string(),
            signature_path: signature_path.display().to_string(),
            preview,
        })?;
    } else {
        if export.valid {
            print_success("Signature is valid");
        } else {
            print_error("Signature verification FAILED");
        }
        for line in export.diagnostics.lines() {
            println!("  {}", line.dimmed());
        }
        if ctx.debug && !export.valid {
            eprintln!("{}", export.signature.bright_black());
        }

        print_info(format!(
            "{} {} → {}",
            if export.encrypted { "Decrypted" } else { "Extracted" },
            export.payload_name,
            payload_path.display()
        ));
        print_info(format!("Signature → {}", signature_path.display()));

        if preview.is_empty() {
            println!("  {}", "(binary or empty payload)".bright_black());
        } else {
            println!("{}", format!("First {PREVIEW_LINES} lines:").bold());
            for line in preview {
                println!("  {line}");
            }
        }
    }

    if !export.valid {
        anyhow::bail!("Signature verification failed for {}", args.archive.display());
    }
    Ok(())
}

/// Try without a passphrase first; prompt only if the key turns out to need one
async fn decrypt_with_retry(
    backend: &dyn CryptoBackend,
    container: &[u8],
    trusted_key: Option<&str>,
    passphrase: Option<String>,
    quiet: bool,
) -> Result<VerifiedExport> {
    let spinner = |msg: &'static str| {
        (!quiet).then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner());
            pb.set_message(msg);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb
        })
    };

    let pb = spinner("Decrypting and verifying...");
    let first = verify_and_decrypt(backend, container, trusted_key, passphrase.as_deref()).await;
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    match first {
        Err(CoreError::Passphrase(_)) if passphrase.is_none() => {
            let Some(passphrase) = passphrase_or_prompt(None, "Key passphrase")? else {
                anyhow::bail!("The decryption key is passphrase protected; pass --passphrase");
            };
            let pb = spinner("Decrypting and verifying...");
            let second =
                verify_and_decrypt(backend, container, trusted_key, Some(&passphrase)).await;
            if let Some(pb) = &pb {
                pb.finish_and_clear();
            }
            second.context("Decryption failed (wrong passphrase?)")
        }
        other => other.context("Failed to decrypt or verify export"),
    }
}

/// Write the payload and signature under their member names
fn write_outputs(out_dir: &Path, export: &VerifiedExport) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let payload_path = out_dir.join(base_name(&export.payload_name)?);
    fs::write(&payload_path, &export.plaintext)
        .with_context(|| format!("Failed to write {}", payload_path.display()))?;

    let signature_path = out_dir.join(base_name(&export.signature_name)?);
    fs::write(&signature_path, &export.signature)
        .with_context(|| format!("Failed to write {}", signature_path.display()))?;

    Ok((payload_path, signature_path))
}

fn base_name(member: &str) -> Result<&Path> {
    Path::new(member)
        .file_name()
        .map(Path::new)
        .ok_or_else(|| anyhow::anyhow!("Archive member '{member}' has no usable file name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use takeout_proto::DumpFormat;

    fn export() -> VerifiedExport {
        VerifiedExport {
            payload_name: "alice_export.sql".into(),
            signature_name: "alice_export.sql.asc".into(),
            signature: "----- BEGIN TAKEOUT SIGNATURE -----\n".into(),
            plaintext: b"-- one\n-- two\n".to_vec(),
            format: Some(DumpFormat::Sql),
            encrypted: false,
            valid: true,
            signer: None,
            diagnostics: String::new(),
        }
    }

    #[test]
    fn test_write_outputs_uses_member_names() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let (payload, signature) = write_outputs(&out, &export()).unwrap();

        assert_eq!(payload, out.join("alice_export.sql"));
        assert_eq!(fs::read(&payload).unwrap(), b"-- one\n-- two\n");
        assert!(
            fs::read_to_string(signature)
                .unwrap()
                .starts_with("----- BEGIN TAKEOUT SIGNATURE")
        );
    }

    #[test]
    fn test_base_name_strips_directories() {
        assert_eq!(base_name("a/b/c.sql").unwrap(), Path::new("c.sql"));
        assert!(base_name("..").is_err());
    }
}
