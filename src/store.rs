//! Relational Store Gateway - SQLite-backed persistence and ad-hoc execution
//!
//! Every operation opens its own short-lived connection to the database file,
//! so writes are durable as soon as the call returns and no transaction spans
//! two calls.
//!
//! Statements passed to [`StoreGateway::execute`] run exactly as given. There
//! is no allow-list of statement shapes or tables; a deployment that exposes
//! this gateway to anyone but the operator must add one in front of it.

use crate::error::{PipelineError, Result};
use crate::table::{quote_identifier, NormalizedTable, QueryResult, Value, WriteSummary};
use itertools::Itertools;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Batch, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of [`StoreGateway::execute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rows(QueryResult),
    Write(WriteSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub row_count: u64,
    pub columns: Vec<ColumnDescription>,
}

/// Snapshot of the tables currently in the store. Built on demand, never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableDescription>,
}

impl SchemaDescriptor {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescription> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database Schema:")?;
        if self.tables.is_empty() {
            return writeln!(f, "(no tables loaded)");
        }
        for table in &self.tables {
            writeln!(f)?;
            writeln!(f, "Table: {} ({} rows)", table.name, table.row_count)?;
            writeln!(
                f,
                "Columns: {}",
                table
                    .columns
                    .iter()
                    .map(|c| format!("{} ({})", c.name, c.declared_type))
                    .join(", ")
            )?;
        }
        Ok(())
    }
}

/// Gateway to the single embedded database file.
#[derive(Debug, Clone)]
pub struct StoreGateway {
    path: PathBuf,
}

impl StoreGateway {
    /// Point the gateway at a database file, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let gateway = Self {
            path: path.as_ref().to_path_buf(),
        };
        if let Some(parent) = gateway.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        gateway.connect()?;
        info!("Database initialized: {}", gateway.path.display());
        Ok(gateway)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(|e| {
            PipelineError::Store(format!(
                "Failed to open database {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Check that the database file can be opened and queried.
    pub fn ping(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| PipelineError::Store(format!("Connection test failed: {}", e)))?;
        Ok(())
    }

    /// Create `name` from `table`, dropping any previous table of that name.
    pub fn replace_table(&self, name: &str, table: &NormalizedTable) -> Result<()> {
        let store_err = |e: rusqlite::Error| {
            PipelineError::Store(format!("Failed to create table {}: {}", name, e))
        };

        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(store_err)?;

        let quoted = quote_identifier(name);
        let column_defs = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.kind.sql_type()))
            .join(", ");

        tx.execute(&format!("DROP TABLE IF EXISTS {}", quoted), [])
            .map_err(store_err)?;
        tx.execute(&format!("CREATE TABLE {} ({})", quoted, column_defs), [])
            .map_err(store_err)?;

        {
            let placeholders = (1..=table.columns().len()).map(|i| format!("?{}", i)).join(", ");
            let mut stmt = tx
                .prepare(&format!("INSERT INTO {} VALUES ({})", quoted, placeholders))
                .map_err(store_err)?;
            for row in table.rows() {
                stmt.execute(params_from_iter(row.into_iter().map(to_sql_value)))
                    .map_err(store_err)?;
            }
        }

        tx.commit().map_err(store_err)?;
        info!("Table '{}' created with {} rows", name, table.row_count());
        Ok(())
    }

    /// Run one statement. Statements that produce result columns return rows,
    /// everything else reports the number of affected rows.
    ///
    /// Text holding more than one statement is rejected before anything runs.
    /// Trailing semicolons, whitespace and comments are not statements.
    pub fn execute(&self, sql: &str) -> Result<ExecutionOutcome> {
        let exec_err = |e: rusqlite::Error| PipelineError::QueryExecution {
            sql: sql.to_string(),
            message: e.to_string(),
        };
        let rejected = |message: &str| PipelineError::QueryExecution {
            sql: sql.to_string(),
            message: message.to_string(),
        };

        let conn = self.connect()?;
        let mut batch = Batch::new(&conn, sql);
        let mut stmt = batch
            .next()
            .map_err(exec_err)?
            .ok_or_else(|| rejected("no statement to execute"))?;
        // Preparing the remainder runs nothing; any leftover statement fails the call
        if !matches!(batch.next(), Ok(None)) {
            return Err(rejected("You can only execute one statement at a time."));
        }

        if stmt.column_count() == 0 {
            let rows_affected = stmt.execute([]).map_err(exec_err)?;
            debug!("Statement affected {} rows", rows_affected);
            return Ok(ExecutionOutcome::Write(WriteSummary { rows_affected }));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt.query([]).map_err(exec_err)?;
        let mut data = Vec::new();
        while let Some(row) = rows.next().map_err(exec_err)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql_value(row.get_ref(i).map_err(exec_err)?));
            }
            data.push(values);
        }

        debug!("Query returned {} rows", data.len());
        Ok(ExecutionOutcome::Rows(QueryResult::new(columns, data)))
    }

    /// Run a statement that must return rows.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        match self.execute(sql)? {
            ExecutionOutcome::Rows(result) => Ok(result),
            ExecutionOutcome::Write(_) => Err(PipelineError::QueryExecution {
                sql: sql.to_string(),
                message: "statement does not return rows".to_string(),
            }),
        }
    }

    /// First `limit` rows of a stored table.
    pub fn sample_rows(&self, table: &str, limit: usize) -> Result<QueryResult> {
        self.query(&format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(table),
            limit
        ))
    }

    /// Describe every user table: columns, declared types, constraints and row counts.
    pub fn describe_schema(&self) -> Result<SchemaDescriptor> {
        let store_err =
            |e: rusqlite::Error| PipelineError::Store(format!("Failed to get table information: {}", e));

        let conn = self.connect()?;
        let names: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(store_err)?;
            let names = rows.collect::<std::result::Result<_, _>>().map_err(store_err)?;
            names
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let quoted = quote_identifier(&name);
            let columns = {
                let mut stmt = conn
                    .prepare(&format!("PRAGMA table_info({})", quoted))
                    .map_err(store_err)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(ColumnDescription {
                            name: row.get(1)?,
                            declared_type: row.get(2)?,
                            not_null: row.get::<_, i64>(3)? != 0,
                            primary_key: row.get::<_, i64>(5)? != 0,
                        })
                    })
                    .map_err(store_err)?;
                let columns = rows
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(store_err)?;
                columns
            };
            let row_count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", quoted), [], |row| row.get(0))
                .map_err(store_err)?;

            tables.push(TableDescription {
                name,
                row_count: row_count.max(0) as u64,
                columns,
            });
        }

        Ok(SchemaDescriptor { tables })
    }
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Boolean(b) => Sql::Integer(i64::from(*b)),
        Value::Integer(i) => Sql::Integer(*i),
        Value::Real(f) => Sql::Real(*f),
        Value::Text(s) => Sql::Text(s.clone()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(format!("<blob {} bytes>", bytes.len())),
    }
}
