//! Source-side types

use crate::types::{PartitionType, SourceType};
use chrono::NaiveDateTime;

/// SQL flavour spoken by a source adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// DuckDB (also fronting attached postgres/mysql/sqlite databases)
    DuckDb,
    /// SQL Server
    TSql,
}

impl SqlDialect {
    /// Dialect used for a source type
    pub fn for_source(source_type: SourceType) -> Self {
        match source_type {
            SourceType::Mssql => SqlDialect::TSql,
            _ => SqlDialect::DuckDb,
        }
    }

    /// Quote a single identifier
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            SqlDialect::DuckDb => format!("\"{}\"", name.replace('"', "\"\"")),
            SqlDialect::TSql => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// Quote a dotted name part by part
    pub fn quote_qualified(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_ident(part.trim()))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Date-time literal the dialect parses unambiguously
    pub fn datetime_literal(&self, value: &NaiveDateTime) -> String {
        match self {
            SqlDialect::DuckDb => format!("'{}'", value.format("%Y-%m-%d %H:%M:%S")),
            SqlDialect::TSql => format!("'{}'", value.format("%Y-%m-%dT%H:%M:%S")),
        }
    }

    /// Expression yielding the partition key (`YYYY-MM` or `YYYY-MM-DD`)
    pub fn partition_key_expr(&self, column: &str, partition_type: PartitionType) -> String {
        let column = self.quote_ident(column);
        match (self, partition_type) {
            (SqlDialect::DuckDb, PartitionType::Monthly) => {
                format!("strftime(CAST({column} AS TIMESTAMP), '%Y-%m')")
            }
            (SqlDialect::DuckDb, PartitionType::Daily) => {
                format!("strftime(CAST({column} AS TIMESTAMP), '%Y-%m-%d')")
            }
            (SqlDialect::TSql, PartitionType::Monthly) => format!("FORMAT({column}, 'yyyy-MM')"),
            (SqlDialect::TSql, PartitionType::Daily) => format!("FORMAT({column}, 'yyyy-MM-dd')"),
        }
    }

    /// Cast an expression to text
    pub fn cast_text(&self, expr: &str) -> String {
        match self {
            SqlDialect::DuckDb => format!("CAST({expr} AS VARCHAR)"),
            SqlDialect::TSql => format!("CONVERT(VARCHAR(64), {expr}, 126)"),
        }
    }

    /// Assemble a `SELECT` with an optional row cap
    pub fn select(
        &self,
        projection: &str,
        relation: &str,
        predicates: &[String],
        order_by: Option<&str>,
        limit: Option<u64>,
    ) -> String {
        let mut sql = match (self, limit) {
            (SqlDialect::TSql, Some(n)) => format!("SELECT TOP ({n}) {projection} FROM {relation}"),
            _ => format!("SELECT {projection} FROM {relation}"),
        };
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(
                &predicates
                    .iter()
                    .map(|p| format!("({p})"))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            );
        }
        if let Some(order) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let (SqlDialect::DuckDb, Some(n)) = (self, limit) {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        sql
    }
}

/// Decrypted credentials, alive only as long as the source handle
#[derive(Clone, Default)]
pub struct ConnectionSecrets {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectionSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSecrets")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}
