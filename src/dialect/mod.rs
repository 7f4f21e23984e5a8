//! # SQL Dialects
//!
//! A dialect is a stateless strategy selected once per factory. The renderer hands
//! it assembled SQL text plus clause metadata and gets back dialect-correct text.
//! The extended-sql entry point is a pure function: it never mutates its input and
//! returns the rewritten statement together with any synthetic CTEs that have to be
//! merged into the enclosing WITH clause.

mod ansi;
mod mysql;
mod postgres;

pub use ansi::{AnsiDbmsDialect, AnsiLimitHandler};
pub use mysql::{MySqlDbmsDialect, MySqlLimitHandler};
pub use postgres::{resolve_returning_alias, PostgreSqlDbmsDialect, PostgreSqlLimitHandler};

use crate::error::{CriteriaError, Result};
use crate::query_builder::SetOperationType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbmsStatementType {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for DbmsStatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbmsStatementType::Select => "SELECT",
            DbmsStatementType::Insert => "INSERT",
            DbmsStatementType::Update => "UPDATE",
            DbmsStatementType::Delete => "DELETE",
        };
        write!(f, "{name}")
    }
}

/// Which state of a table modified within the same statement a FROM item sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DbmsModificationState {
    Old,
    New,
}

/// Input of [`DbmsDialect::append_extended_sql`].
#[derive(Debug, Clone, Default)]
pub struct ExtendedSql<'a> {
    pub statement_type: Option<DbmsStatementType>,
    pub is_subquery: bool,
    /// The statement is rendered as the body of a CTE.
    pub is_embedded: bool,
    /// Complete `WITH ... ` prefix including the trailing space.
    pub with_clause: Option<&'a str>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Table modified by a DML statement.
    pub affected_table: Option<&'a str>,
    pub returning_columns: Option<&'a [String]>,
    /// Columns identifying a row of the affected table. The NEW-state emulation
    /// matches modified rows on these; the returning columns are used without them.
    pub key_columns: Option<&'a [String]>,
    /// Requested modification states mapped to the CTE name that must expose them.
    pub modification_states: Option<&'a BTreeMap<DbmsModificationState, String>>,
    /// A NEW-state CTE for the same table produced earlier in the statement.
    pub previous_new_state: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticCte {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedSqlResult {
    pub sql: String,
    /// Ordered; earlier entries may be referenced by later ones.
    pub ctes: Vec<SyntheticCte>,
}

/// Renders LIMIT/OFFSET for a dialect.
pub trait DbmsLimitHandler: Send + Sync {
    fn apply_sql(&self, sql: &mut String, is_subquery: bool, limit: Option<u64>, offset: Option<u64>);
}

pub trait DbmsDialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn supports_with_clause(&self) -> bool {
        true
    }

    fn supports_recursive_ctes(&self) -> bool {
        true
    }

    fn supports_returning_columns(&self) -> bool {
        false
    }

    fn supports_modification_query_in_with_clause(&self) -> bool {
        false
    }

    fn supports_set_operation(&self, _set_type: SetOperationType) -> bool {
        true
    }

    /// Case-insensitive `ILIKE`; otherwise both sides are upper-cased.
    fn supports_ilike(&self) -> bool {
        false
    }

    /// `$1`-style placeholders that may be repeated for the same parameter.
    fn supports_numbered_parameters(&self) -> bool {
        false
    }

    fn parameter_placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn create_limit_handler(&self) -> Box<dyn DbmsLimitHandler>;

    fn set_operator_sql(&self, set_type: SetOperationType) -> &'static str {
        match set_type {
            SetOperationType::Union => "UNION",
            SetOperationType::UnionAll => "UNION ALL",
            SetOperationType::Intersect => "INTERSECT",
            SetOperationType::IntersectAll => "INTERSECT ALL",
            SetOperationType::Except => "EXCEPT",
            SetOperationType::ExceptAll => "EXCEPT ALL",
        }
    }

    /// Joins operands with the set operator. An operand is parenthesized when the
    /// chain carries its own ORDER BY/LIMIT, or when the operand has one itself.
    fn append_set_operands(
        &self,
        sql: &mut String,
        set_type: SetOperationType,
        operands: &[String],
        has_outer_clause: bool,
    ) {
        for (index, operand) in operands.iter().enumerate() {
            if index > 0 {
                sql.push(' ');
                sql.push_str(self.set_operator_sql(set_type));
                sql.push(' ');
            }
            let wrap = !operand.starts_with('(') && (has_outer_clause || has_own_clause(operand));
            if wrap {
                sql.push('(');
                sql.push_str(operand);
                sql.push(')');
            } else {
                sql.push_str(operand);
            }
        }
    }

    fn append_set(
        &self,
        set_type: SetOperationType,
        is_subquery: bool,
        operands: &[String],
        order_by: &[String],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<String> {
        if operands.len() > 1 && !self.supports_set_operation(set_type) {
            return Err(CriteriaError::IllegalState(format!(
                "The {} dialect does not support {}",
                self.name(),
                self.set_operator_sql(set_type)
            )));
        }
        let has_outer_clause = !order_by.is_empty() || limit.is_some() || offset.is_some();
        let mut sql = String::new();
        self.append_set_operands(&mut sql, set_type, operands, has_outer_clause);
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        if limit.is_some() || offset.is_some() {
            self.create_limit_handler()
                .apply_sql(&mut sql, is_subquery, limit, offset);
        }
        if is_subquery && !sql.starts_with('(') {
            sql.insert(0, '(');
            sql.push(')');
        }
        Ok(sql)
    }

    /// Ordinary rendering: WITH prefix, LIMIT/OFFSET, parenthesization. Dialects
    /// with RETURNING or modification-state support override this.
    fn append_extended_sql(&self, sql: &str, request: &ExtendedSql<'_>) -> Result<ExtendedSqlResult> {
        if request.returning_columns.is_some_and(|columns| !columns.is_empty()) {
            return Err(CriteriaError::IllegalState(format!(
                "The {} dialect does not support returning columns",
                self.name()
            )));
        }
        if request.modification_states.is_some_and(|states| !states.is_empty()) {
            return Err(CriteriaError::IllegalState(format!(
                "The {} dialect does not support modification states",
                self.name()
            )));
        }
        Ok(ExtendedSqlResult {
            sql: append_ordinary_sql(self, sql, request),
            ctes: Vec::new(),
        })
    }
}

/// WITH prefix and LIMIT/OFFSET without the parenthesization step.
fn append_with_and_limit<D: DbmsDialect + ?Sized>(
    dialect: &D,
    sql: &str,
    request: &ExtendedSql<'_>,
) -> String {
    let mut sql = sql.to_string();
    if let Some(with_clause) = request.with_clause.filter(|w| !w.is_empty()) {
        sql.insert_str(0, with_clause);
    }
    if request.limit.is_some() || request.offset.is_some() {
        dialect
            .create_limit_handler()
            .apply_sql(&mut sql, request.is_subquery, request.limit, request.offset);
    }
    sql
}

pub(crate) fn append_ordinary_sql<D: DbmsDialect + ?Sized>(
    dialect: &D,
    sql: &str,
    request: &ExtendedSql<'_>,
) -> String {
    let sql = append_with_and_limit(dialect, sql, request);
    parenthesize_subquery(sql, request.is_subquery)
}

pub(crate) fn parenthesize_subquery(sql: String, is_subquery: bool) -> String {
    if is_subquery && !sql.starts_with('(') {
        format!("({sql})")
    } else {
        sql
    }
}

/// Case-insensitive search for an ASCII keyword.
pub(crate) fn find_ignore_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    let haystack_bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    (from..=haystack_bytes.len().saturating_sub(needle_bytes.len()))
        .find(|&start| {
            haystack_bytes.len() >= start + needle_bytes.len()
                && haystack_bytes[start..start + needle_bytes.len()].eq_ignore_ascii_case(needle_bytes)
        })
}

fn has_own_clause(operand: &str) -> bool {
    [" ORDER BY ", " LIMIT ", " OFFSET ", " FETCH "]
        .iter()
        .any(|clause| find_ignore_case(operand, clause, 0).is_some())
}

/// Picks a dialect by configuration name.
pub fn dialect_for_name(name: &str) -> Result<Arc<dyn DbmsDialect>> {
    match name.to_ascii_lowercase().as_str() {
        "postgresql" | "postgres" => Ok(Arc::new(PostgreSqlDbmsDialect)),
        "mysql" => Ok(Arc::new(MySqlDbmsDialect)),
        "ansi" | "default" => Ok(Arc::new(AnsiDbmsDialect)),
        other => Err(CriteriaError::Configuration(format!(
            "Unknown dialect '{other}'"
        ))),
    }
}
