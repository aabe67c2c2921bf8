//! GnuPG backend: drives the `gpg` binary
//!
//! Every invocation runs with `--batch --status-fd 2` against a fixed home
//! directory, under a deadline. Passphrases go through loopback pinentry on
//! stdin, never on the command line. Scratch files live in a private
//! temporary directory that is removed when the operation returns.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{BackendKind, CryptoBackend, Verification};
use crate::error::{CoreError, CoreResult};
use crate::fingerprint::Fingerprint;
use crate::keyring::KeyInfo;
use crate::trust::TrustLevel;

const STATUS_PREFIX: &str = "[GNUPG:] ";
const KEY_CHECK_PAYLOAD: &[u8] = b"takeout signing key check";

pub struct GpgBackend {
    program: PathBuf,
    home: Option<PathBuf>,
    timeout: Duration,
    scratch_dir: Option<PathBuf>,
}

/// Captured result of one gpg run
#[derive(Debug)]
struct GpgOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: String,
}

impl GpgOutput {
    /// `[GNUPG:]` status lines with the prefix removed
    fn status_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr
            .lines()
            .filter_map(|l| l.strip_prefix(STATUS_PREFIX))
    }

    fn has_status(&self, keyword: &str) -> bool {
        self.status_lines()
            .any(|l| l.split_whitespace().next() == Some(keyword))
    }

    /// Human-readable stderr, without status lines or the `gpg: ` prefix
    fn messages(&self) -> String {
        self.stderr
            .lines()
            .filter(|l| !l.starts_with(STATUS_PREFIX))
            .map(|l| l.strip_prefix("gpg: ").unwrap_or(l))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

impl GpgBackend {
    pub fn new(program: impl AsRef<Path>, home: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            home,
            timeout,
            scratch_dir: None,
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.scratch_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn scratch(&self) -> CoreResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("takeout-gpg-");
        let dir = match &self.scratch_dir {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn run(
        &self,
        home: Option<&Path>,
        args: &[&OsStr],
        stdin: Option<Vec<u8>>,
    ) -> CoreResult<GpgOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--batch", "--yes", "--no-tty", "--status-fd", "2"]);
        if let Some(home) = home.or(self.home.as_deref()) {
            cmd.arg("--homedir").arg(home);
        }
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!(program = %self.program.display(), ?args, "Running gpg");
        let mut child = cmd.spawn().map_err(|e| {
            CoreError::Backend(format!("Failed to start {}: {e}", self.program.display()))
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                // gpg may exit before reading everything
                let _ = pipe.write_all(&input).await;
            });
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "gpg exceeded deadline, killed");
                CoreError::Timeout(self.timeout)
            })??;

        Ok(GpgOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn primary_fingerprints(&self, reference: &str, secret: bool) -> CoreResult<Vec<Fingerprint>> {
        let (list, tag) = if secret {
            ("--list-secret-keys", "sec")
        } else {
            ("--list-keys", "pub")
        };
        let output = self
            .run(
                None,
                &[
                    OsStr::new("--with-colons"),
                    OsStr::new(list),
                    OsStr::new("--"),
                    OsStr::new(reference),
                ],
                None,
            )
            .await?;
        if !output.success {
            return Ok(Vec::new());
        }
        Ok(parse_key_listing(&output.stdout_text(), tag)
            .into_iter()
            .filter_map(|k| k.fingerprint)
            .collect())
    }
}

fn passphrase_input(passphrase: Option<&str>, args: &mut Vec<&OsStr>) -> Option<Vec<u8>> {
    passphrase.map(|p| {
        args.extend([
            OsStr::new("--pinentry-mode"),
            OsStr::new("loopback"),
            OsStr::new("--passphrase-fd"),
            OsStr::new("0"),
        ]);
        let mut input = p.as_bytes().to_vec();
        input.push(b'\n');
        input
    })
}

fn exactly_one(mut fps: Vec<Fingerprint>, reference: &str) -> CoreResult<Fingerprint> {
    match fps.len() {
        1 => Ok(fps.remove(0)),
        0 => Err(CoreError::KeyNotFound(reference.to_string())),
        n => Err(CoreError::AmbiguousKey(format!("{reference} matches {n} keys"))),
    }
}

/// One primary key from a `--with-colons` listing
#[derive(Debug, Default, PartialEq)]
struct ListedKey {
    fingerprint: Option<Fingerprint>,
    user_id: Option<String>,
    created_at: i64,
    ownertrust: TrustLevel,
}

fn parse_key_listing(listing: &str, primary_tag: &str) -> Vec<ListedKey> {
    let mut keys: Vec<ListedKey> = Vec::new();
    let mut awaiting_primary_fpr = false;

    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        match field(0) {
            tag if tag == primary_tag => {
                keys.push(ListedKey {
                    created_at: field(5).parse().unwrap_or(0),
                    ownertrust: TrustLevel::from_gpg_letter(field(8)),
                    ..ListedKey::default()
                });
                awaiting_primary_fpr = true;
            }
            "fpr" if awaiting_primary_fpr => {
                if let Some(key) = keys.last_mut() {
                    key.fingerprint = Fingerprint::from_hex(field(9)).ok();
                }
                awaiting_primary_fpr = false;
            }
            "sub" | "ssb" => awaiting_primary_fpr = false,
            "uid" => {
                if let Some(key) = keys.last_mut() {
                    if key.user_id.is_none() {
                        key.user_id = Some(unescape_colon_field(field(9)));
                    }
                }
            }
            _ => {}
        }
    }
    keys
}

/// Undo gpg's `\xHH` escaping in colon listings
fn unescape_colon_field(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(b) = s
                .get(i + 2..i + 4)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Fields of interest from `gpg --verify` status output
#[derive(Debug, Default, PartialEq)]
struct VerifyStatus {
    good: bool,
    bad: bool,
    valid_sig: bool,
    signer: Option<Fingerprint>,
}

fn parse_verify_status<'a>(lines: impl Iterator<Item = &'a str>) -> VerifyStatus {
    let mut status = VerifyStatus::default();
    for line in lines {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("GOODSIG") => status.good = true,
            Some("BADSIG") | Some("ERRSIG") | Some("EXPKEYSIG") | Some("REVKEYSIG") => {
                status.bad = true
            }
            Some("VALIDSIG") => {
                let fields: Vec<&str> = parts.collect();
                status.valid_sig = true;
                // Prefer the primary key fingerprint over the signing subkey
                let fpr = fields.get(9).or_else(|| fields.first());
                status.signer = fpr.and_then(|f| Fingerprint::from_hex(f).ok());
            }
            _ => {}
        }
    }
    status
}

fn parse_import_fingerprint<'a>(mut lines: impl Iterator<Item = &'a str>) -> Option<Fingerprint> {
    lines.find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("IMPORT_OK"), Some(_reason), Some(fpr)) => Fingerprint::from_hex(fpr).ok(),
            _ => None,
        }
    })
}

fn parse_created_fingerprint<'a>(mut lines: impl Iterator<Item = &'a str>) -> Option<Fingerprint> {
    lines.find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("KEY_CREATED"), Some(_kind), Some(fpr)) => Fingerprint::from_hex(fpr).ok(),
            _ => None,
        }
    })
}

#[async_trait]
impl CryptoBackend for GpgBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpg
    }

    fn name(&self) -> &'static str {
        "GnuPG (OpenPGP)"
    }

    async fn resolve_key(&self, reference: &str) -> CoreResult<Fingerprint> {
        exactly_one(self.primary_fingerprints(reference, false).await?, reference)
    }

    async fn resolve_signing_key(
        &self,
        reference: &str,
        passphrase: Option<&str>,
    ) -> CoreResult<Fingerprint> {
        let fp = exactly_one(self.primary_fingerprints(reference, true).await?, reference)?;
        // A throwaway signature proves the agent can use the key
        self.detach_sign(KEY_CHECK_PAYLOAD, &fp, passphrase).await?;
        Ok(fp)
    }

    async fn export_public_key(&self, key: &Fingerprint) -> CoreResult<String> {
        let fpr = key.to_hex();
        let output = self
            .run(
                None,
                &[OsStr::new("--armor"), OsStr::new("--export"), OsStr::new(&fpr)],
                None,
            )
            .await?;
        if !output.success || output.stdout.is_empty() {
            return Err(CoreError::KeyNotFound(fpr));
        }
        Ok(output.stdout_text())
    }

    async fn detach_sign(
        &self,
        payload: &[u8],
        key: &Fingerprint,
        passphrase: Option<&str>,
    ) -> CoreResult<String> {
        let scratch = self.scratch()?;
        let payload_path = scratch.path().join("payload");
        tokio::fs::write(&payload_path, payload).await?;

        let fpr = key.to_hex();
        let mut args = vec![
            OsStr::new("--armor"),
            OsStr::new("--local-user"),
            OsStr::new(&fpr),
            OsStr::new("--output"),
            OsStr::new("-"),
        ];
        let input = passphrase_input(passphrase, &mut args);
        args.extend([OsStr::new("--detach-sign"), payload_path.as_os_str()]);

        let output = self.run(None, &args, input).await?;
        if !output.success || !output.has_status("SIG_CREATED") {
            let messages = output.messages();
            return Err(if messages.contains("passphrase") || output.has_status("BAD_PASSPHRASE") {
                CoreError::Passphrase(messages)
            } else {
                CoreError::Signing(messages)
            });
        }
        Ok(output.stdout_text())
    }

    async fn encrypt(&self, payload: &[u8], recipient: &Fingerprint) -> CoreResult<Vec<u8>> {
        let fpr = recipient.to_hex();
        let output = self
            .run(
                None,
                &[
                    OsStr::new("--armor"),
                    OsStr::new("--trust-model"),
                    OsStr::new("always"),
                    OsStr::new("--recipient"),
                    OsStr::new(&fpr),
                    OsStr::new("--output"),
                    OsStr::new("-"),
                    OsStr::new("--encrypt"),
                ],
                Some(payload.to_vec()),
            )
            .await?;
        if !output.success || output.stdout.is_empty() {
            return Err(CoreError::Encryption(output.messages()));
        }
        Ok(output.stdout)
    }

    async fn decrypt(&self, ciphertext: &[u8], passphrase: Option<&str>) -> CoreResult<Vec<u8>> {
        let scratch = self.scratch()?;
        let message_path = scratch.path().join("message.gpg");
        tokio::fs::write(&message_path, ciphertext).await?;

        let mut args = vec![OsStr::new("--output"), OsStr::new("-")];
        let input = passphrase_input(passphrase, &mut args);
        args.extend([OsStr::new("--decrypt"), message_path.as_os_str()]);

        let output = self.run(None, &args, input).await?;
        if !output.success || !output.has_status("DECRYPTION_OKAY") {
            return Err(CoreError::Decryption(output.messages()));
        }
        Ok(output.stdout)
    }

    async fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        public_key: Option<&str>,
    ) -> CoreResult<Verification> {
        let scratch = self.scratch()?;
        let payload_path = scratch.path().join("payload");
        let signature_path = scratch.path().join("payload.asc");
        tokio::fs::write(&payload_path, payload).await?;
        tokio::fs::write(&signature_path, signature).await?;

        // A supplied key is checked in isolation from the configured home
        let isolated_home = match public_key {
            Some(armored) => {
                let home = tempfile::Builder::new()
                    .prefix("home-")
                    .tempdir_in(scratch.path())?;
                let imported = self
                    .run(
                        Some(home.path()),
                        &[OsStr::new("--no-autostart"), OsStr::new("--import")],
                        Some(armored.as_bytes().to_vec()),
                    )
                    .await?;
                if parse_import_fingerprint(imported.status_lines()).is_none() {
                    return Err(CoreError::InvalidKey(format!(
                        "gpg could not import the public key: {}",
                        imported.messages()
                    )));
                }
                Some(home)
            }
            None => None,
        };

        let mut args = Vec::new();
        if isolated_home.is_some() {
            args.push(OsStr::new("--no-autostart"));
        }
        args.extend([
            OsStr::new("--verify"),
            signature_path.as_os_str(),
            payload_path.as_os_str(),
        ]);
        let output = self
            .run(isolated_home.as_ref().map(TempDir::path), &args, None)
            .await?;

        let status = parse_verify_status(output.status_lines());
        let valid = output.success && status.good && status.valid_sig && !status.bad;
        tracing::debug!(signer = ?status.signer, valid, "gpg checked detached signature");
        Ok(Verification {
            valid,
            signer: status.signer,
            diagnostics: output.messages(),
        })
    }

    async fn import_key(&self, armored: &str) -> CoreResult<Fingerprint> {
        let output = self
            .run(
                None,
                &[OsStr::new("--import")],
                Some(armored.as_bytes().to_vec()),
            )
            .await?;
        let fp = parse_import_fingerprint(output.status_lines())
            .ok_or_else(|| CoreError::InvalidKey(output.messages()))?;
        tracing::info!(fingerprint = %fp, "Imported key into gpg");
        Ok(fp)
    }

    async fn trust_key(&self, key: &Fingerprint, level: TrustLevel) -> CoreResult<()> {
        let line = format!("{}:{}:\n", key.to_hex(), level.gpg_ownertrust());
        let output = self
            .run(
                None,
                &[OsStr::new("--import-ownertrust")],
                Some(line.into_bytes()),
            )
            .await?;
        if !output.success {
            return Err(CoreError::Backend(output.messages()));
        }
        Ok(())
    }

    async fn generate_key(
        &self,
        user_id: &str,
        passphrase: Option<&str>,
    ) -> CoreResult<Fingerprint> {
        let mut args = vec![
            OsStr::new("--pinentry-mode"),
            OsStr::new("loopback"),
        ];
        let input = match passphrase {
            Some(p) => {
                args.extend([OsStr::new("--passphrase-fd"), OsStr::new("0")]);
                let mut input = p.as_bytes().to_vec();
                input.push(b'\n');
                Some(input)
            }
            None => {
                args.extend([OsStr::new("--passphrase"), OsStr::new("")]);
                None
            }
        };
        args.extend([
            OsStr::new("--quick-generate-key"),
            OsStr::new(user_id),
            OsStr::new("default"),
            OsStr::new("default"),
            OsStr::new("never"),
        ]);

        let output = self.run(None, &args, input).await?;
        parse_created_fingerprint(output.status_lines())
            .ok_or_else(|| CoreError::Backend(format!("Key generation failed: {}", output.messages())))
    }

    async fn list_keys(&self) -> CoreResult<Vec<KeyInfo>> {
        let public = self
            .run(
                None,
                &[OsStr::new("--with-colons"), OsStr::new("--list-keys")],
                None,
            )
            .await?;
        let secret = self
            .run(
                None,
                &[OsStr::new("--with-colons"), OsStr::new("--list-secret-keys")],
                None,
            )
            .await?;
        let secret_fps: Vec<Fingerprint> = parse_key_listing(&secret.stdout_text(), "sec")
            .into_iter()
            .filter_map(|k| k.fingerprint)
            .collect();

        Ok(parse_key_listing(&public.stdout_text(), "pub")
            .into_iter()
            .filter_map(|k| {
                let fingerprint = k.fingerprint?;
                Some(KeyInfo {
                    fingerprint,
                    user_id: k.user_id.unwrap_or_default(),
                    created_at: k.created_at,
                    has_secret: secret_fps.contains(&fingerprint),
                    trust: k.ownertrust,
                })
            })
            .collect())
    }
}
