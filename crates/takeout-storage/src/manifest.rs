//! Export manifest: which tables belong to an account and how they are scoped

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Tables exported for every account unless the manifest overrides them
pub const DEFAULT_TABLES: &[&str] = &[
    "AchievementPoints",
    "AchievementTaskState",
    "Dragons",
    "GameData",
    "GameDataPairs",
    "GroupViking",
    "Groups",
    "Images",
    "InventoryItems",
    "MMORoles",
    "MissionStates",
    "Neighborhoods",
    "PairData",
    "Pairs",
    "Parties",
    "ProfileAnswers",
    "RatingRanks",
    "Ratings",
    "RoomItems",
    "Rooms",
    "SavedData",
    "SceneData",
    "Sessions",
    "TaskStatuses",
    "UserBadgesCompleted",
    "UserMissionData",
];

/// The account table looked up by the identity claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrincipalSpec {
    pub table: String,
    pub id_column: String,
    pub name_column: String,
    pub credential_column: String,
    /// Only these principal columns reach the export
    pub export_columns: Vec<String>,
}

impl Default for PrincipalSpec {
    fn default() -> Self {
        Self {
            table: "Users".into(),
            id_column: "Id".into(),
            name_column: "Username".into(),
            credential_column: "Email".into(),
            export_columns: vec!["Id".into(), "Username".into(), "Email".into()],
        }
    }
}

/// The one-to-one record owned by the principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateSpec {
    pub table: String,
    pub id_column: String,
    /// Column holding the principal's id
    pub owner_column: String,
}

impl Default for AggregateSpec {
    fn default() -> Self {
        Self {
            table: "Vikings".into(),
            id_column: "Id".into(),
            owner_column: "UserId".into(),
        }
    }
}

/// Which key a dependent table is filtered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    AggregateRoot,
    Principal,
}

/// A dependent table, optionally pinned to one scope
///
/// In TOML either a bare name or `{ name = "...", scope = "principal" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TableEntry")]
pub struct TableSpec {
    pub name: String,
    pub scope: Option<Scope>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    pub fn pinned(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TableEntry {
    Name(String),
    Spec { name: String, scope: Option<Scope> },
}

impl From<TableEntry> for TableSpec {
    fn from(entry: TableEntry) -> Self {
        match entry {
            TableEntry::Name(name) => TableSpec::new(name),
            TableEntry::Spec { name, scope } => TableSpec { name, scope },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportManifest {
    pub principal: PrincipalSpec,
    pub aggregate: AggregateSpec,
    /// Column in dependent tables referencing the aggregate root
    pub aggregate_key_column: String,
    /// Column in dependent tables referencing the principal
    pub principal_key_column: String,
    /// Dropped from every exported row, whatever the table
    pub excluded_columns: Vec<String>,
    pub tables: Vec<TableSpec>,
}

impl Default for ExportManifest {
    fn default() -> Self {
        Self {
            principal: PrincipalSpec::default(),
            aggregate: AggregateSpec::default(),
            aggregate_key_column: "VikingId".into(),
            principal_key_column: "UserId".into(),
            excluded_columns: vec!["Password".into()],
            tables: DEFAULT_TABLES.iter().map(|t| TableSpec::new(*t)).collect(),
        }
    }
}

impl ExportManifest {
    pub fn is_excluded(&self, column: &str) -> bool {
        self.excluded_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Key column for a scope
    pub fn key_column(&self, scope: Scope) -> &str {
        match scope {
            Scope::AggregateRoot => &self.aggregate_key_column,
            Scope::Principal => &self.principal_key_column,
        }
    }

    /// Pick the scope for a table given its introspected columns
    ///
    /// Aggregate-root scoping wins when both key columns are present.
    pub fn resolve_scope(&self, table: &TableSpec, columns: &[String]) -> Option<Scope> {
        let has = |col: &str| columns.iter().any(|c| c == col);
        match table.scope {
            Some(pinned) => has(self.key_column(pinned)).then_some(pinned),
            None if has(&self.aggregate_key_column) => Some(Scope::AggregateRoot),
            None if has(&self.principal_key_column) => Some(Scope::Principal),
            None => None,
        }
    }

    /// Reject manifests that could never produce a sensible export
    pub fn validate(&self) -> StoreResult<()> {
        let named = [
            ("principal.table", &self.principal.table),
            ("principal.id_column", &self.principal.id_column),
            ("principal.name_column", &self.principal.name_column),
            ("principal.credential_column", &self.principal.credential_column),
            ("aggregate.table", &self.aggregate.table),
            ("aggregate.id_column", &self.aggregate.id_column),
            ("aggregate.owner_column", &self.aggregate.owner_column),
            ("aggregate_key_column", &self.aggregate_key_column),
            ("principal_key_column", &self.principal_key_column),
        ];
        for (field, value) in named {
            if value.trim().is_empty() {
                return Err(StoreError::Manifest(format!("{field} must not be empty")));
            }
        }

        let keys = [
            ("aggregate_key_column", &self.aggregate_key_column),
            ("principal_key_column", &self.principal_key_column),
        ];
        for (field, column) in keys {
            if self.is_excluded(column) {
                return Err(StoreError::Manifest(format!(
                    "{field} {column} is also excluded"
                )));
            }
        }

        if let Some(col) = self
            .principal
            .export_columns
            .iter()
            .find(|c| self.is_excluded(c))
        {
            return Err(StoreError::Manifest(format!(
                "principal export column {col} is also excluded"
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(StoreError::Manifest("empty table name".into()));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(StoreError::Manifest(format!(
                    "table {} listed twice",
                    table.name
                )));
            }
        }
        Ok(())
    }
}
