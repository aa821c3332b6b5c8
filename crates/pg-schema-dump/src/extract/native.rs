//! In-process table DDL extraction from the PostgreSQL catalog.
//!
//! Covers columns (type, default, identity, generated expression, NOT NULL),
//! table constraints and the indexes that do not back a constraint. Triggers,
//! policies, comments and storage parameters are left out.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::fmt::Write as _;
use std::path::Path;
use tokio_postgres::Row;
use tracing::debug;

use super::SchemaExtractor;
use crate::error::{DumpError, Result};

const LOAD_COLUMNS: &str = r#"
    SELECT
        a.attname::text,
        pg_catalog.format_type(a.atttypid, a.atttypmod),
        a.attnotnull,
        pg_catalog.pg_get_expr(d.adbin, d.adrelid),
        a.attidentity::text,
        a.attgenerated::text
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE n.nspname = $1
      AND c.relname = $2
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const LOAD_CONSTRAINTS: &str = r#"
    SELECT con.conname::text, pg_catalog.pg_get_constraintdef(con.oid, true)
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relname = $2
      AND con.contype IN ('p', 'u', 'c', 'f', 'x')
    ORDER BY
        CASE con.contype WHEN 'p' THEN 0 WHEN 'u' THEN 1 WHEN 'x' THEN 2 WHEN 'c' THEN 3 ELSE 4 END,
        con.conname
"#;

const LOAD_INDEXES: &str = r#"
    SELECT pg_catalog.pg_get_indexdef(i.indexrelid)
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
    JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relname = $2
      AND NOT EXISTS (
          SELECT 1 FROM pg_catalog.pg_constraint con
          WHERE con.conindid = i.indexrelid AND con.contype IN ('p', 'u', 'x')
      )
    ORDER BY ic.relname
"#;

const TABLE_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p')
    )
"#;

/// A column as read from `pg_attribute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    /// Default expression, or the generation expression when `generated` is set.
    pub default: Option<String>,
    /// `a` (ALWAYS), `d` (BY DEFAULT) or empty.
    pub identity: String,
    /// `s` (STORED) or empty.
    pub generated: String,
}

/// Everything needed to render one table's DDL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDef {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// (constraint name, definition) pairs.
    pub constraints: Vec<(String, String)>,
    /// Complete `CREATE INDEX` statements.
    pub indexes: Vec<String>,
}

/// Extracts table DDL through catalog queries on a pooled connection.
pub struct NativeExtractor {
    pool: Pool,
}

impl NativeExtractor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn load_table(&self, schema: &str, table: &str) -> Result<TableDef> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DumpError::connection(e, "getting connection for load_table"))?;
        let query_err = |e: tokio_postgres::Error| DumpError::export(table, e);

        let exists: bool = client
            .query_one(TABLE_EXISTS, &[&schema, &table])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(query_err)?;
        if !exists {
            return Err(DumpError::export(
                table,
                format!("table not found in schema {}", schema),
            ));
        }

        let columns = client
            .query(LOAD_COLUMNS, &[&schema, &table])
            .await
            .map_err(query_err)?
            .iter()
            .map(decode_column)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(query_err)?;

        let constraints = client
            .query(LOAD_CONSTRAINTS, &[&schema, &table])
            .await
            .map_err(query_err)?
            .iter()
            .map(decode_constraint)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(query_err)?;

        let indexes = client
            .query(LOAD_INDEXES, &[&schema, &table])
            .await
            .map_err(query_err)?
            .iter()
            .map(|row| row.try_get(0))
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(query_err)?;

        debug!(
            "Loaded {} columns, {} constraints, {} indexes for {}.{}",
            columns.len(),
            constraints.len(),
            indexes.len(),
            schema,
            table
        );

        Ok(TableDef {
            schema: schema.to_string(),
            name: table.to_string(),
            columns,
            constraints,
            indexes,
        })
    }
}

#[async_trait]
impl SchemaExtractor for NativeExtractor {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn dump_table(&self, schema: &str, table: &str, destination: &Path) -> Result<()> {
        let def = self.load_table(schema, table).await?;
        let ddl = render_table_ddl(&def);
        tokio::fs::write(destination, ddl)
            .await
            .map_err(|e| DumpError::file_write(destination, e))
    }
}

fn decode_column(row: &Row) -> std::result::Result<ColumnDef, tokio_postgres::Error> {
    Ok(ColumnDef {
        name: row.try_get(0)?,
        data_type: row.try_get(1)?,
        not_null: row.try_get(2)?,
        default: row.try_get(3)?,
        identity: row.try_get(4)?,
        generated: row.try_get(5)?,
    })
}

fn decode_constraint(row: &Row) -> std::result::Result<(String, String), tokio_postgres::Error> {
    Ok((row.try_get(0)?, row.try_get(1)?))
}

/// Quote an identifier for PostgreSQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render `CREATE TABLE` plus index statements.
pub fn render_table_ddl(def: &TableDef) -> String {
    let qualified = format!("{}.{}", quote_ident(&def.schema), quote_ident(&def.name));
    let mut out = String::new();

    let _ = writeln!(out, "--");
    let _ = writeln!(out, "-- Name: {}; Type: TABLE; Schema: {}", def.name, def.schema);
    let _ = writeln!(out, "--");
    let _ = writeln!(out);
    let _ = writeln!(out, "CREATE TABLE {} (", qualified);

    let mut lines: Vec<String> = def.columns.iter().map(render_column).collect();
    lines.extend(
        def.constraints
            .iter()
            .map(|(name, body)| format!("CONSTRAINT {} {}", quote_ident(name), body)),
    );
    for (i, line) in lines.iter().enumerate() {
        let sep = if i + 1 < lines.len() { "," } else { "" };
        let _ = writeln!(out, "    {}{}", line, sep);
    }
    let _ = writeln!(out, ");");

    for index in &def.indexes {
        let _ = writeln!(out);
        let _ = writeln!(out, "{};", index);
    }

    out
}

fn render_column(col: &ColumnDef) -> String {
    let mut line = format!("{} {}", quote_ident(&col.name), col.data_type);

    match (col.generated.as_str(), col.identity.as_str(), &col.default) {
        ("s", _, Some(expr)) => {
            let _ = write!(line, " GENERATED ALWAYS AS ({}) STORED", expr);
        }
        (_, "a", _) => line.push_str(" GENERATED ALWAYS AS IDENTITY"),
        (_, "d", _) => line.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        (_, _, Some(expr)) => {
            let _ = write!(line, " DEFAULT {}", expr);
        }
        _ => {}
    }

    if col.not_null {
        line.push_str(" NOT NULL");
    }
    line
}
