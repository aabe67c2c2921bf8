//! In-memory dump model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, ProtoResult};
use crate::value::Value;

/// One exported row, tagged with its originating table
#[derive(Debug, Clone, PartialEq)]
pub struct DumpRecord {
    pub table: String,
    /// Column names in the order the store returned them
    pub columns: Vec<String>,
    /// Values, index-aligned with `columns`
    pub values: Vec<Value>,
}

impl DumpRecord {
    pub fn new(table: impl Into<String>, columns: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            columns,
            values,
        }
    }

    /// Look up a value by column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DumpEntry {
    Row(DumpRecord),
    /// Inline diagnostic (skipped table, per-table failure)
    Comment(String),
}

/// Ordered sequence of rows and diagnostics for one export request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dump {
    pub entries: Vec<DumpEntry>,
}

impl Dump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_row(&mut self, record: DumpRecord) {
        self.entries.push(DumpEntry::Row(record));
    }

    pub fn push_comment(&mut self, comment: impl Into<String>) {
        self.entries.push(DumpEntry::Comment(comment.into()));
    }

    pub fn rows(&self) -> impl Iterator<Item = &DumpRecord> {
        self.entries.iter().filter_map(|e| match e {
            DumpEntry::Row(r) => Some(r),
            DumpEntry::Comment(_) => None,
        })
    }

    pub fn comments(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            DumpEntry::Comment(c) => Some(c.as_str()),
            DumpEntry::Row(_) => None,
        })
    }

    /// Rows belonging to one table
    pub fn rows_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a DumpRecord> + 'a {
        self.rows().filter(move |r| r.table == table)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize with the given format
    pub fn encode(&self, format: DumpFormat) -> ProtoResult<Vec<u8>> {
        match format {
            DumpFormat::Sql => Ok(crate::sql::to_sql(self).into_bytes()),
            DumpFormat::Json => crate::json::to_json(self),
        }
    }

    /// Parse bytes produced by [`Dump::encode`]
    pub fn decode(bytes: &[u8], format: DumpFormat) -> ProtoResult<Self> {
        match format {
            DumpFormat::Sql => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| ProtoError::InvalidFormat(e.to_string()))?;
                crate::sql::parse_sql(text)
            }
            DumpFormat::Json => crate::json::parse_json(bytes),
        }
    }
}

/// Payload serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    #[default]
    Sql,
    Json,
}

impl DumpFormat {
    /// File extension used for archive member names
    pub fn extension(&self) -> &'static str {
        match self {
            DumpFormat::Sql => "sql",
            DumpFormat::Json => "json",
        }
    }

    /// Guess the format from a member name such as `bob_export.sql.gpg`
    pub fn from_member_name(name: &str) -> Option<Self> {
        let stem = name
            .strip_suffix(".gpg")
            .or_else(|| name.strip_suffix(".asc"))
            .unwrap_or(name);
        if stem.ends_with(".sql") {
            Some(DumpFormat::Sql)
        } else if stem.ends_with(".json") {
            Some(DumpFormat::Json)
        } else {
            None
        }
    }
}

impl fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DumpFormat {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql" => Ok(DumpFormat::Sql),
            "json" => Ok(DumpFormat::Json),
            other => Err(ProtoError::InvalidFormat(format!(
                "Unknown dump format: {other}"
            ))),
        }
    }
}
