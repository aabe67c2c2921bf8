//! takeout-proto: Transfer formats for account exports
//!
//! Provides:
//! - The in-memory dump model (rows + inline diagnostics)
//! - SQL and JSON dump codecs, both re-parseable
//! - ASCII armor for keys, signatures and ciphertext
//! - The zip container with deterministic member names
//!
//! ## Format Selection
//!
//! | Format | Extension | Use Case                         |
//! |--------|-----------|----------------------------------|
//! | SQL    | `.sql`    | Human-readable insert statements |
//! | JSON   | `.json`   | Structured, machine consumption  |

pub mod archive;
pub mod armor;
pub mod dump;
pub mod error;
pub mod json;
pub mod sql;
pub mod value;

pub use archive::{ExportArchive, MemberNames, sanitize_subject, write_archive};
pub use armor::{ArmorBlock, ArmorType, armor_decode, armor_encode, detect_armor};
pub use dump::{Dump, DumpEntry, DumpFormat, DumpRecord};
pub use error::{ProtoError, ProtoResult};
pub use value::Value;
