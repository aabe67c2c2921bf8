//! Zip container for export bundles
//!
//! An export archive holds exactly two members:
//!
//! | Member                         | Content                           |
//! |--------------------------------|-----------------------------------|
//! | `{subject}_export.{ext}[.gpg]` | payload, `.gpg` when encrypted    |
//! | `{subject}_export.{ext}.asc`   | detached signature over plaintext |

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::dump::DumpFormat;
use crate::error::{ProtoError, ProtoResult};

const MAX_SUBJECT_LEN: usize = 64;
const FALLBACK_SUBJECT: &str = "account";
const SIGNATURE_SUFFIX: &str = ".asc";
const ENCRYPTED_SUFFIX: &str = ".gpg";
/// Largest member [`ExportArchive::read`] will inflate
pub const MAX_MEMBER_SIZE: u64 = 512 * 1024 * 1024;

/// Make a requester-supplied identity safe to use in file and member names
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, leading dots are removed
/// and the result is capped at 64 characters.
pub fn sanitize_subject(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let subject: String = replaced
        .trim_start_matches('.')
        .chars()
        .take(MAX_SUBJECT_LEN)
        .collect();

    if subject.chars().all(|c| c == '_') {
        FALLBACK_SUBJECT.to_string()
    } else {
        subject
    }
}

/// Deterministic names for the archive and its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberNames {
    pub payload: String,
    pub signature: String,
    pub archive: String,
}

impl MemberNames {
    /// `subject` must already be sanitized
    pub fn new(subject: &str, format: DumpFormat, encrypted: bool) -> Self {
        let base = format!("{subject}_export.{}", format.extension());
        let payload = if encrypted {
            format!("{base}{ENCRYPTED_SUFFIX}")
        } else {
            base.clone()
        };
        Self {
            payload,
            signature: format!("{base}{SIGNATURE_SUFFIX}"),
            archive: format!("{subject}_export.zip"),
        }
    }
}

/// Write members into a deflated zip with fixed timestamps
pub fn write_archive(members: &[(&str, &[u8])]) -> ProtoResult<Vec<u8>> {
    let options = || {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        for (name, data) in members {
            zip.start_file(*name, options())?;
            zip.write_all(data)?;
        }
        zip.finish()?;
    }

    Ok(buffer.into_inner())
}

/// A parsed export archive
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub payload_name: String,
    pub payload: Vec<u8>,
    pub signature_name: String,
    pub signature: Vec<u8>,
}

impl ExportArchive {
    /// Read an archive, requiring exactly one payload and one signature
    pub fn read(bytes: &[u8]) -> ProtoResult<Self> {
        Self::read_with_limit(bytes, MAX_MEMBER_SIZE)
    }

    /// Like [`ExportArchive::read`], failing on any member that inflates past `limit` bytes
    pub fn read_with_limit(bytes: &[u8], limit: u64) -> ProtoResult<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        let mut payload: Option<(String, Vec<u8>)> = None;
        let mut signature: Option<(String, Vec<u8>)> = None;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            if name.contains(['/', '\\']) || name.starts_with('.') {
                return Err(ProtoError::UnexpectedMember(name));
            }

            // Declared sizes are untrusted; count what actually inflates
            let mut data = Vec::new();
            (&mut file).take(limit.saturating_add(1)).read_to_end(&mut data)?;
            if data.len() as u64 > limit {
                return Err(ProtoError::MemberTooLarge { name, limit });
            }

            let slot = if name.ends_with(SIGNATURE_SUFFIX) {
                &mut signature
            } else {
                &mut payload
            };
            if slot.is_some() {
                return Err(ProtoError::UnexpectedMember(name));
            }
            *slot = Some((name, data));
        }

        let (signature_name, signature) = signature.ok_or(ProtoError::MissingMember("signature"))?;
        let (payload_name, payload) = payload.ok_or(ProtoError::MissingMember("payload"))?;

        Ok(Self {
            payload_name,
            payload,
            signature_name,
            signature,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.payload_name.ends_with(ENCRYPTED_SUFFIX)
    }

    /// Name of the payload once decrypted (`bob_export.sql.gpg` -> `bob_export.sql`)
    pub fn plaintext_name(&self) -> &str {
        self.payload_name
            .strip_suffix(ENCRYPTED_SUFFIX)
            .unwrap_or(&self.payload_name)
    }

    pub fn format(&self) -> Option<DumpFormat> {
        DumpFormat::from_member_name(&self.payload_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_safe_names() {
        assert_eq!(sanitize_subject("alice"), "alice");
        assert_eq!(sanitize_subject("Rider_Nine-2.0"), "Rider_Nine-2.0");
    }

    #[test]
    fn test_sanitize_blocks_traversal() {
        assert_eq!(sanitize_subject("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_subject("..\\evil"), "_evil");
        assert!(!sanitize_subject("a/b").contains('/'));
    }

    #[test]
    fn test_sanitize_header_injection() {
        let subject = sanitize_subject("bob\"\r\nSet-Cookie: x=1");
        assert!(!subject.contains(['"', '\r', '\n', ':', ' ']));
    }

    #[test]
    fn test_sanitize_fallback_and_cap() {
        assert_eq!(sanitize_subject(""), "account");
        assert_eq!(sanitize_subject("..."), "account");
        assert_eq!(sanitize_subject("///"), "account");
        assert_eq!(sanitize_subject(&"x".repeat(200)).len(), 64);
    }

    #[test]
    fn test_member_names() {
        let names = MemberNames::new("bob", DumpFormat::Sql, true);
        assert_eq!(names.payload, "bob_export.sql.gpg");
        assert_eq!(names.signature, "bob_export.sql.asc");
        assert_eq!(names.archive, "bob_export.zip");

        let names = MemberNames::new("bob", DumpFormat::Json, false);
        assert_eq!(names.payload, "bob_export.json");
        assert_eq!(names.signature, "bob_export.json.asc");
    }

    #[test]
    fn test_archive_roundtrip() {
        let bytes = write_archive(&[
            ("bob_export.sql.gpg", b"ciphertext"),
            ("bob_export.sql.asc", b"signature"),
        ])
        .unwrap();

        let archive = ExportArchive::read(&bytes).unwrap();
        assert!(archive.is_encrypted());
        assert_eq!(archive.plaintext_name(), "bob_export.sql");
        assert_eq!(archive.payload, b"ciphertext");
        assert_eq!(archive.signature, b"signature");
        assert_eq!(archive.format(), Some(DumpFormat::Sql));
    }

    #[test]
    fn test_archive_is_deterministic() {
        let members: [(&str, &[u8]); 2] = [("a.json", b"{}"), ("a.json.asc", b"sig")];
        assert_eq!(
            write_archive(&members).unwrap(),
            write_archive(&members).unwrap()
        );
    }

    #[test]
    fn test_archive_missing_signature() {
        let bytes = write_archive(&[("bob_export.json", b"{}")]).unwrap();
        let err = ExportArchive::read(&bytes).unwrap_err();
        assert!(matches!(err, ProtoError::MissingMember("signature")));
    }

    #[test]
    fn test_archive_missing_payload() {
        let bytes = write_archive(&[("bob_export.json.asc", b"sig")]).unwrap();
        let err = ExportArchive::read(&bytes).unwrap_err();
        assert!(matches!(err, ProtoError::MissingMember("payload")));
    }

    #[test]
    fn test_archive_rejects_extra_members() {
        let bytes = write_archive(&[
            ("bob_export.json", b"{}"),
            ("bob_export.json.asc", b"sig"),
            ("extra.txt", b"?"),
        ])
        .unwrap();
        assert!(matches!(
            ExportArchive::read(&bytes),
            Err(ProtoError::UnexpectedMember(_))
        ));
    }

    #[test]
    fn test_archive_member_size_is_capped() {
        let big = vec![0u8; 4096];
        let bytes = write_archive(&[
            ("bob_export.sql", big.as_slice()),
            ("bob_export.sql.asc", b"sig"),
        ])
        .unwrap();

        let err = ExportArchive::read_with_limit(&bytes, 1024).unwrap_err();
        assert!(matches!(
            err,
            ProtoError::MemberTooLarge { ref name, limit: 1024 } if name == "bob_export.sql"
        ));
        assert_eq!(ExportArchive::read_with_limit(&bytes, 4096).unwrap().payload, big);
    }

    #[test]
    fn test_archive_rejects_nested_paths() {
        let bytes = write_archive(&[
            ("../bob_export.json", b"{}"),
            ("bob_export.json.asc", b"sig"),
        ])
        .unwrap();
        assert!(matches!(
            ExportArchive::read(&bytes),
            Err(ProtoError::UnexpectedMember(_))
        ));
    }
}
