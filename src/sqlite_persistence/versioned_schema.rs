use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use tracing::info;

/// Offset added to every schema version stored in `PRAGMA user_version`, so a
/// database created by some other tool is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 7100;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }

    fn from_sql(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            _ => None,
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    SetNull,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub foreign_key: Option<&'static ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut def = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    def.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    def.push_str(&format!(" DEFAULT {}", default_value));
                }
                if let Some(fk) = column.foreign_key {
                    def.push_str(&format!(
                        " REFERENCES {}({}) ON DELETE {}",
                        fk.foreign_table,
                        fk.foreign_column,
                        fk.on_delete.as_sql()
                    ));
                }
                def
            })
            .collect();

        for unique in self.unique_constraints {
            parts.push(format!("UNIQUE ({})", unique.join(", ")));
        }

        format!("CREATE TABLE {} ({});", self.name, parts.join(", "))
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])
            .with_context(|| format!("Failed to create table {}", self.name))?;
        for (index_name, columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, columns),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        struct ActualColumn {
            name: String,
            sql_type: Option<&'static SqlType>,
            non_null: bool,
            is_primary_key: bool,
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<ActualColumn> = stmt
            .query_map(params![], |row| {
                Ok(ActualColumn {
                    name: row.get(1)?,
                    sql_type: SqlType::from_sql(&row.get::<_, String>(2)?),
                    non_null: row.get::<_, i32>(3)? == 1,
                    is_primary_key: row.get::<_, i32>(5)? > 0,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}",
                self.name,
                actual.len(),
                self.columns.len()
            );
        }

        for (found, expected) in actual.iter().zip(self.columns.iter()) {
            if found.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    found.name
                );
            }
            if found.sql_type != Some(expected.sql_type) {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type
                );
            }
            if found.non_null != expected.non_null || found.is_primary_key != expected.is_primary_key
            {
                bail!(
                    "Table {} column {} constraint mismatch",
                    self.name,
                    expected.name
                );
            }
        }

        for (index_name, _) in self.indices {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        if !self.unique_constraints.is_empty() {
            let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", self.name))?;
            let unique_indices: Vec<String> = stmt
                .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
                .filter_map(|r| r.ok())
                .filter(|(_, unique)| *unique == 1)
                .map(|(name, _)| name)
                .collect();

            let mut unique_column_sets: Vec<Vec<String>> = Vec::new();
            for index_name in &unique_indices {
                let mut idx_stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
                let mut cols: Vec<String> = idx_stmt
                    .query_map([], |row| row.get::<_, String>(2))?
                    .filter_map(|r| r.ok())
                    .collect();
                cols.sort();
                unique_column_sets.push(cols);
            }

            for expected in self.unique_constraints {
                let mut expected_sorted: Vec<&str> = expected.to_vec();
                expected_sorted.sort();
                let found = unique_column_sets
                    .iter()
                    .any(|cols| cols.iter().map(String::as_str).eq(expected_sorted.iter().copied()));
                if !found {
                    bail!(
                        "Table {} is missing unique constraint on ({})",
                        self.name,
                        expected.join(", ")
                    );
                }
            }
        }

        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Opens (or creates) a database file governed by `schemas`.
///
/// A new file gets the latest schema. An existing file is validated against
/// the schema matching its stored version and migrated forward.
pub fn open_versioned_db<P: AsRef<Path>>(
    db_path: P,
    schemas: &'static [VersionedSchema],
    label: &str,
) -> Result<Connection> {
    let latest = schemas.last().context("No schemas defined")?;
    let db_path = db_path.as_ref();

    let conn = if db_path.exists() {
        Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?
    } else {
        let conn = Connection::open(db_path)?;
        latest.create(&conn)?;
        info!("Created new {} database at {:?}", label, db_path);
        conn
    };
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    let stored_version = conn
        .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
        .context("Failed to read database version")?
        - BASE_DB_VERSION as i64;
    if stored_version < 0 {
        bail!(
            "{} database version {} is too old, does not contain base db version {}",
            label,
            stored_version,
            BASE_DB_VERSION
        );
    }
    let version = stored_version as usize;
    if version >= schemas.len() {
        bail!(
            "{} database version {} is too new (max supported: {})",
            label,
            version,
            schemas.len() - 1
        );
    }

    schemas[version].validate(&conn)?;

    if version < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            label, version, latest.version
        );
        for schema in schemas.iter().skip(version + 1) {
            if let Some(migration) = schema.migration {
                migration(&conn)?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
    }

    Ok(conn)
}

/// Creates an in-memory database with the latest schema.
pub fn open_in_memory_db(schemas: &'static [VersionedSchema]) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schemas.last().context("No schemas defined")?.create(&conn)?;
    Ok(conn)
}
