//! Identity-scoped record fetching

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, params_from_iter};
use takeout_proto::sql::quote_ident;
use takeout_proto::{Dump, DumpRecord, Value};

use crate::error::{StoreError, StoreResult};
use crate::manifest::{ExportManifest, Scope};

/// Rows of one query, column names in store order
struct Rows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Rows {
    fn column(&self, row: &[Value], name: &str) -> Option<Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| row.get(i).cloned())
    }
}

/// Pulls one account's rows out of SQLite according to an [`ExportManifest`]
pub struct RecordFetcher {
    conn: Mutex<Connection>,
    manifest: ExportManifest,
}

impl RecordFetcher {
    /// Open an existing database read-only
    pub fn open(path: impl AsRef<Path>, manifest: ExportManifest) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn, manifest)
    }

    pub fn from_connection(conn: Connection, manifest: ExportManifest) -> StoreResult<Self> {
        manifest.validate()?;
        Ok(Self {
            conn: Mutex::new(conn),
            manifest,
        })
    }

    pub fn manifest(&self) -> &ExportManifest {
        &self.manifest
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Collect every row belonging to the principal matching `name` and `credential`
    ///
    /// Blocking; call from `spawn_blocking` in async contexts.
    pub fn fetch(&self, name: &str, credential: &str) -> StoreResult<Dump> {
        let conn = self.lock()?;
        let m = &self.manifest;
        let mut dump = Dump::new();

        // Principal
        let principal = query(
            &conn,
            &format!(
                "SELECT * FROM {} WHERE {} = ?1 AND {} = ?2 LIMIT 2",
                quote_ident(&m.principal.table),
                quote_ident(&m.principal.name_column),
                quote_ident(&m.principal.credential_column),
            ),
            &[SqlValue::Text(name.into()), SqlValue::Text(credential.into())],
        )?;
        let principal_row = match principal.rows.as_slice() {
            [row] => row,
            [] => {
                tracing::info!(table = %m.principal.table, "No principal matches identity claim");
                return Err(StoreError::IdentityNotFound);
            }
            _ => {
                tracing::warn!(table = %m.principal.table, "Identity claim matches several principals");
                return Err(StoreError::IdentityNotFound);
            }
        };
        let principal_id = principal
            .column(principal_row, &m.principal.id_column)
            .ok_or_else(|| {
                StoreError::Manifest(format!(
                    "{} has no column {}",
                    m.principal.table, m.principal.id_column
                ))
            })?;

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for col in &m.principal.export_columns {
            if let Some(value) = principal.column(principal_row, col) {
                columns.push(col.clone());
                values.push(value);
            }
        }

        // Aggregate root
        let aggregate = query(
            &conn,
            &format!(
                "SELECT * FROM {} WHERE {} = ?1 LIMIT 2",
                quote_ident(&m.aggregate.table),
                quote_ident(&m.aggregate.owner_column),
            ),
            &[to_sql(&principal_id)],
        )?;
        let aggregate_row = match aggregate.rows.as_slice() {
            [row] => row,
            rows => {
                tracing::warn!(
                    table = %m.aggregate.table,
                    found = rows.len(),
                    "Principal does not own exactly one aggregate root"
                );
                return Err(StoreError::IdentityNotFound);
            }
        };
        let aggregate_id = aggregate
            .column(aggregate_row, &m.aggregate.id_column)
            .ok_or_else(|| {
                StoreError::Manifest(format!(
                    "{} has no column {}",
                    m.aggregate.table, m.aggregate.id_column
                ))
            })?;
        tracing::debug!(
            principal_id = ?principal_id,
            aggregate_id = ?aggregate_id,
            "Resolved identity"
        );

        dump.push_row(DumpRecord::new(m.principal.table.clone(), columns, values));
        dump.push_row(self.record(&m.aggregate.table, &aggregate.columns, aggregate_row));

        // Dependent tables
        for table in &m.tables {
            let introspected = match query(
                &conn,
                &format!("SELECT * FROM {} LIMIT 0", quote_ident(&table.name)),
                &[],
            ) {
                Ok(rows) => rows.columns,
                Err(e) => {
                    tracing::error!(table = %table.name, error = %e, "Table export failed");
                    dump.push_comment(format!("Error exporting from {}: {e}", table.name));
                    continue;
                }
            };

            let Some(scope) = m.resolve_scope(table, &introspected) else {
                match table.scope {
                    Some(pinned) => tracing::warn!(
                        table = %table.name,
                        column = %m.key_column(pinned),
                        "Pinned scope column missing, skipping table"
                    ),
                    None => tracing::warn!(
                        table = %table.name,
                        "No {} or {} column, skipping table",
                        m.aggregate_key_column,
                        m.principal_key_column
                    ),
                }
                continue;
            };

            let (key_column, key) = match scope {
                Scope::AggregateRoot => (&m.aggregate_key_column, &aggregate_id),
                Scope::Principal => (&m.principal_key_column, &principal_id),
            };
            let sql = format!(
                "SELECT * FROM {} WHERE {} = ?1",
                quote_ident(&table.name),
                quote_ident(key_column)
            );
            match query(&conn, &sql, &[to_sql(key)]) {
                Ok(rows) => {
                    tracing::debug!(
                        table = %table.name,
                        scope = ?scope,
                        rows = rows.rows.len(),
                        "Exported table"
                    );
                    for row in &rows.rows {
                        dump.push_row(self.record(&table.name, &rows.columns, row));
                    }
                }
                Err(e) => {
                    tracing::error!(table = %table.name, error = %e, "Table export failed");
                    dump.push_comment(format!("Error exporting from {}: {e}", table.name));
                }
            }
        }

        Ok(dump)
    }

    /// A row with excluded columns dropped
    fn record(&self, table: &str, columns: &[String], row: &[Value]) -> DumpRecord {
        let (columns, values) = columns
            .iter()
            .zip(row)
            .filter(|(c, _)| !self.manifest.is_excluded(c))
            .map(|(c, v)| (c.clone(), v.clone()))
            .unzip();
        DumpRecord::new(table, columns, values)
    }
}

fn query(conn: &Connection, sql: &str, params: &[SqlValue]) -> rusqlite::Result<Rows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(from_sql))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Rows { columns, rows })
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        // TEXT that isn't UTF-8 keeps its exact bytes
        ValueRef::Text(t) => match std::str::from_utf8(t) {
            Ok(text) => Value::Text(text.to_owned()),
            Err(_) => Value::Blob(t.to_vec()),
        },
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(t) => SqlValue::Text(t.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::TableSpec;
    use takeout_proto::DumpFormat;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE "Users" ("Id" INTEGER PRIMARY KEY, "Username" TEXT, "Email" TEXT, "Password" TEXT);
            CREATE TABLE "Vikings" ("Id" INTEGER PRIMARY KEY, "UserId" INTEGER, "Uid" TEXT);
            CREATE TABLE "Dragons" ("Id" INTEGER, "VikingId" INTEGER, "Name" TEXT);
            CREATE TABLE "Sessions" ("Id" INTEGER, "UserId" INTEGER, "Token" TEXT);
            CREATE TABLE "Groups" ("Id" INTEGER, "Name" TEXT);

            INSERT INTO "Users" VALUES (1, 'bob', 'bob@example.com', 'hash-b');
            INSERT INTO "Users" VALUES (2, 'eve', 'eve@example.com', 'hash-e');
            INSERT INTO "Vikings" VALUES (10, 1, 'bob-viking');
            INSERT INTO "Vikings" VALUES (20, 2, 'eve-viking');
            INSERT INTO "Dragons" VALUES (1, 10, 'Toothless');
            INSERT INTO "Dragons" VALUES (2, 20, 'Stormfly');
            INSERT INTO "Dragons" VALUES (3, 10, NULL);
            INSERT INTO "Sessions" VALUES (5, 1, 'tok');
            INSERT INTO "Groups" VALUES (1, 'everyone');
            "#,
        )
        .unwrap();
        conn
    }

    fn manifest(tables: &[&str]) -> ExportManifest {
        ExportManifest {
            tables: tables.iter().map(|t| TableSpec::new(*t)).collect(),
            ..ExportManifest::default()
        }
    }

    #[test]
    fn test_fetch_scopes_rows() {
        let fetcher =
            RecordFetcher::from_connection(seeded(), manifest(&["Dragons", "Sessions", "Groups"]))
                .unwrap();
        let dump = fetcher.fetch("bob", "bob@example.com").unwrap();

        let tables: Vec<&str> = dump.rows().map(|r| r.table.as_str()).collect();
        assert_eq!(tables, ["Users", "Vikings", "Dragons", "Dragons", "Sessions"]);

        let user = dump.rows_for("Users").next().unwrap();
        assert_eq!(user.columns, ["Id", "Username", "Email"]);
        assert_eq!(user.get("Username"), Some(&Value::from("bob")));

        let dragons: Vec<_> = dump.rows_for("Dragons").collect();
        assert_eq!(dragons[1].get("Name"), Some(&Value::Null));
        assert!(dump.rows_for("Groups").next().is_none());
        assert_eq!(dump.comments().count(), 0);
    }

    #[test]
    fn test_identity_must_match_both_fields() {
        let fetcher = RecordFetcher::from_connection(seeded(), manifest(&[])).unwrap();
        assert!(matches!(
            fetcher.fetch("bob", "eve@example.com"),
            Err(StoreError::IdentityNotFound)
        ));
        assert!(matches!(
            fetcher.fetch("bob' OR '1'='1", "x"),
            Err(StoreError::IdentityNotFound)
        ));
    }

    #[test]
    fn test_ambiguous_identity_is_not_found() {
        let conn = seeded();
        conn.execute(
            r#"INSERT INTO "Users" VALUES (3, 'bob', 'bob@example.com', 'other')"#,
            [],
        )
        .unwrap();
        let fetcher = RecordFetcher::from_connection(conn, manifest(&[])).unwrap();
        assert!(matches!(
            fetcher.fetch("bob", "bob@example.com"),
            Err(StoreError::IdentityNotFound)
        ));
    }

    #[test]
    fn test_principal_without_aggregate_root_is_not_found() {
        let conn = seeded();
        conn.execute(r#"DELETE FROM "Vikings" WHERE "UserId" = 1"#, [])
            .unwrap();
        let fetcher = RecordFetcher::from_connection(conn, manifest(&[])).unwrap();
        assert!(matches!(
            fetcher.fetch("bob", "bob@example.com"),
            Err(StoreError::IdentityNotFound)
        ));
    }

    #[test]
    fn test_missing_table_becomes_comment() {
        let fetcher =
            RecordFetcher::from_connection(seeded(), manifest(&["Nope", "Sessions"])).unwrap();
        let dump = fetcher.fetch("bob", "bob@example.com").unwrap();

        let comments: Vec<&str> = dump.comments().collect();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].starts_with("Error exporting from Nope:"));
        assert_eq!(dump.rows_for("Sessions").count(), 1);
    }

    #[test]
    fn test_excluded_columns_dropped_everywhere() {
        let conn = seeded();
        conn.execute_batch(
            r#"CREATE TABLE "Pairs" ("Id" INTEGER, "UserId" INTEGER, "Password" TEXT);
               INSERT INTO "Pairs" VALUES (1, 1, 'leak');"#,
        )
        .unwrap();
        let fetcher = RecordFetcher::from_connection(conn, manifest(&["Pairs"])).unwrap();
        let dump = fetcher.fetch("bob", "bob@example.com").unwrap();

        for row in dump.rows() {
            assert!(!row.columns.iter().any(|c| c == "Password"), "{}", row.table);
        }
        assert_eq!(dump.rows_for("Pairs").count(), 1);
    }

    #[test]
    fn test_pinned_scope() {
        let conn = seeded();
        conn.execute_batch(
            r#"CREATE TABLE "Ratings" ("Id" INTEGER, "UserId" INTEGER, "VikingId" INTEGER);
               INSERT INTO "Ratings" VALUES (1, 1, 20);
               INSERT INTO "Ratings" VALUES (2, 2, 10);"#,
        )
        .unwrap();
        let mut m = manifest(&[]);
        m.tables = vec![TableSpec::pinned("Ratings", Scope::Principal)];
        let fetcher = RecordFetcher::from_connection(conn, m).unwrap();
        let dump = fetcher.fetch("bob", "bob@example.com").unwrap();

        let ratings: Vec<_> = dump.rows_for("Ratings").collect();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].get("Id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_invalid_utf8_text_keeps_bytes() {
        let conn = seeded();
        conn.execute_batch(
            r#"CREATE TABLE "Raw" ("UserId" INTEGER, "t" TEXT);
               INSERT INTO "Raw" VALUES (1, CAST(X'6162FF' AS TEXT));
               INSERT INTO "Raw" VALUES (1, 'plain');"#,
        )
        .unwrap();
        let fetcher = RecordFetcher::from_connection(conn, manifest(&["Raw"])).unwrap();
        let dump = fetcher.fetch("bob", "bob@example.com").unwrap();

        let raw: Vec<_> = dump.rows_for("Raw").collect();
        assert_eq!(raw[0].get("t"), Some(&Value::Blob(vec![0x61, 0x62, 0xff])));
        assert_eq!(raw[1].get("t"), Some(&Value::from("plain")));
    }

    #[test]
    fn test_row_without_exported_columns_survives_reparse() {
        let mut m = manifest(&["Groups"]);
        m.principal.export_columns = vec!["Nickname".into()];
        let fetcher = RecordFetcher::from_connection(seeded(), m).unwrap();
        let dump = fetcher.fetch("bob", "bob@example.com").unwrap();

        let user = dump.rows_for("Users").next().unwrap();
        assert!(user.columns.is_empty());
        for format in [DumpFormat::Sql, DumpFormat::Json] {
            let bytes = dump.encode(format).unwrap();
            assert_eq!(Dump::decode(&bytes, format).unwrap(), dump, "{format}");
        }
    }
}
