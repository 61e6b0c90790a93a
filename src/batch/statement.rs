//! Statement classification: verb and target table of a DML statement.
//!
//! Uses `sqlparser` with the generic dialect, so `?` placeholders parse.

use std::fmt;

use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use super::error::{BatchError, BatchResult};

/// DML verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for DmlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmlKind::Insert => write!(f, "INSERT"),
            DmlKind::Update => write!(f, "UPDATE"),
            DmlKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Verb and normalized table name of a DML statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlStatement {
    pub kind: DmlKind,
    pub table: String,
}

impl DmlStatement {
    /// Classify `sql`. Returns `Ok(None)` for statements that are not
    /// INSERT, UPDATE or DELETE.
    pub fn parse(sql: &str) -> BatchResult<Option<Self>> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(BatchError::Parse("empty statement".into()));
        }

        let dialect = GenericDialect {};
        let statements = SqlParser::parse_sql(&dialect, sql)?;
        let stmt = match statements.as_slice() {
            [stmt] => stmt,
            [] => return Err(BatchError::Parse("empty statement".into())),
            _ => {
                return Err(BatchError::UnsupportedStatement(
                    "multiple statements not supported".into(),
                ))
            }
        };

        match stmt {
            sp::Statement::Insert(insert) => Ok(Some(Self {
                kind: DmlKind::Insert,
                table: Self::extract_table_from_object(&insert.table)?,
            })),
            sp::Statement::Update { table, .. } => Ok(Some(Self {
                kind: DmlKind::Update,
                table: Self::extract_from_table(table)?,
            })),
            sp::Statement::Delete(delete) => {
                let tables = match &delete.from {
                    sp::FromTable::WithFromKeyword(tables) => tables,
                    sp::FromTable::WithoutKeyword(tables) => tables,
                };
                match tables.as_slice() {
                    [table] => Ok(Some(Self {
                        kind: DmlKind::Delete,
                        table: Self::extract_from_table(table)?,
                    })),
                    _ => Err(BatchError::UnsupportedStatement(
                        "DELETE from multiple tables not supported".into(),
                    )),
                }
            }
            _ => Ok(None),
        }
    }

    fn extract_table_name(name: &sp::ObjectName) -> BatchResult<String> {
        if name.0.is_empty() {
            return Err(BatchError::Parse("empty table name".into()));
        }
        let joined = name
            .0
            .iter()
            .map(|p| p.as_ident().map(|id| id.value.clone()).unwrap_or_else(|| p.to_string()))
            .collect::<Vec<_>>()
            .join(".");
        Ok(normalize_table(&joined))
    }

    fn extract_table_from_object(table: &sp::TableObject) -> BatchResult<String> {
        match table {
            sp::TableObject::TableName(name) => Self::extract_table_name(name),
            sp::TableObject::TableFunction(_) => Err(BatchError::UnsupportedStatement(
                "table function not supported".into(),
            )),
        }
    }

    fn extract_from_table(from: &sp::TableWithJoins) -> BatchResult<String> {
        match &from.relation {
            sp::TableFactor::Table { name, .. } => Self::extract_table_name(name),
            other => Err(BatchError::UnsupportedStatement(format!(
                "unsupported target: {}",
                other
            ))),
        }
    }
}

/// Canonical form of a table name for dependency lookups.
pub(crate) fn normalize_table(name: &str) -> String {
    name.trim().to_lowercase()
}
