//! takeout-storage: Identity-scoped record fetching
//!
//! The source database is an external collaborator; what belongs to an
//! account is described by an [`ExportManifest`] and confirmed against the
//! live schema by introspection.
//!
//! ## Scoping
//!
//! | Table kind     | Filter                                   |
//! |----------------|------------------------------------------|
//! | Principal      | name and credential, exactly one match   |
//! | Aggregate root | owner column equals the principal id     |
//! | Dependent      | aggregate key column, else principal key |
//!
//! Dependent tables with neither key column are skipped and logged.

mod error;
mod fetcher;
mod manifest;

pub use error::{StoreError, StoreResult};
pub use fetcher::RecordFetcher;
pub use manifest::{AggregateSpec, DEFAULT_TABLES, ExportManifest, PrincipalSpec, Scope, TableSpec};
