//! PostgreSQL dialect: RETURNING, DML inside WITH, and emulation of the NEW
//! modification state through synthetic CTEs.

use super::{
    append_with_and_limit, find_ignore_case, parenthesize_subquery, DbmsDialect,
    DbmsLimitHandler, DbmsModificationState, DbmsStatementType, ExtendedSql, ExtendedSqlResult,
    SyntheticCte,
};
use crate::constants::synthetic;
use crate::error::{CriteriaError, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSqlDbmsDialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSqlLimitHandler;

impl DbmsLimitHandler for PostgreSqlLimitHandler {
    fn apply_sql(&self, sql: &mut String, _is_subquery: bool, limit: Option<u64>, offset: Option<u64>) {
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset.filter(|o| *o > 0) {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }
}

impl DbmsDialect for PostgreSqlDbmsDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn supports_returning_columns(&self) -> bool {
        true
    }

    fn supports_modification_query_in_with_clause(&self) -> bool {
        true
    }

    fn supports_ilike(&self) -> bool {
        true
    }

    fn supports_numbered_parameters(&self) -> bool {
        true
    }

    fn parameter_placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn create_limit_handler(&self) -> Box<dyn DbmsLimitHandler> {
        Box::new(PostgreSqlLimitHandler)
    }

    fn append_extended_sql(&self, sql: &str, request: &ExtendedSql<'_>) -> Result<ExtendedSqlResult> {
        let new_state = request
            .modification_states
            .and_then(|states| states.get(&DbmsModificationState::New));

        if let Some(new_state) = new_state {
            let (sql, ctes) = self.emulate_new_state(sql, request, new_state)?;
            return Ok(ExtendedSqlResult {
                sql: parenthesize_subquery(sql, request.is_subquery),
                ctes,
            });
        }

        let mut rendered = append_with_and_limit(self, sql, request);
        if let Some(columns) = request.returning_columns.filter(|c| !c.is_empty()) {
            let statement_type = dml_statement_type(request)?;
            let table = affected_table(request)?;
            // resolved before the WITH prefix is in place, its FROMs would confuse the scan
            let alias = resolve_returning_alias(sql, statement_type, table);
            let returning = columns
                .iter()
                .map(|column| format!("{alias}.{column}"))
                .collect::<Vec<_>>()
                .join(", ");
            rendered.push_str(" RETURNING ");
            rendered.push_str(&returning);
        }

        Ok(ExtendedSqlResult {
            sql: parenthesize_subquery(rendered, request.is_subquery),
            ctes: Vec::new(),
        })
    }
}

impl PostgreSqlDbmsDialect {
    /// Rows changed by a DML CTE are invisible to the rest of the statement, so the
    /// NEW state is rebuilt from a `RETURNING *` CTE.
    fn emulate_new_state(
        &self,
        sql: &str,
        request: &ExtendedSql<'_>,
        new_state: &str,
    ) -> Result<(String, Vec<SyntheticCte>)> {
        let statement_type = dml_statement_type(request)?;
        let table = affected_table(request)?;
        let columns = request
            .returning_columns
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                CriteriaError::IllegalArgument(
                    "The NEW modification state requires returning columns".to_string(),
                )
            })?;
        let base = request.previous_new_state.unwrap_or(table);
        let select_columns = columns.join(", ");

        let suffix = match statement_type {
            DbmsStatementType::Delete => synthetic::DELETE_SUFFIX,
            DbmsStatementType::Insert => synthetic::INSERT_SUFFIX,
            DbmsStatementType::Update => synthetic::UPDATE_SUFFIX,
            DbmsStatementType::Select => unreachable_statement()?,
        };
        let returning_cte = format!("{new_state}{suffix}");
        let returning_sql = format!("{} RETURNING *", append_with_and_limit(self, sql, request));

        // RETURNING yields post-update values, only the key identifies the old row
        let keys = request.key_columns.filter(|k| !k.is_empty()).unwrap_or(columns);
        let anti_join = format!(
            "NOT EXISTS (SELECT 1 FROM {returning_cte} WHERE ({}) = ({}))",
            qualified(&returning_cte, keys),
            qualified(base, keys)
        );
        let new_state_sql = match statement_type {
            DbmsStatementType::Delete => format!("SELECT * FROM {base} WHERE {anti_join}"),
            DbmsStatementType::Update => format!(
                "SELECT * FROM {base} WHERE {anti_join} UNION SELECT * FROM {returning_cte}"
            ),
            _ => format!("SELECT * FROM {base} UNION SELECT * FROM {returning_cte}"),
        };

        debug!(
            statement = %statement_type,
            table = %table,
            new_state = %new_state,
            "emulating NEW modification state with synthetic CTEs"
        );

        Ok((
            format!("SELECT {select_columns} FROM {returning_cte}"),
            vec![
                SyntheticCte {
                    name: returning_cte,
                    sql: returning_sql,
                },
                SyntheticCte {
                    name: new_state.to_string(),
                    sql: new_state_sql,
                },
            ],
        ))
    }
}

fn unreachable_statement() -> Result<&'static str> {
    Err(CriteriaError::IllegalState(
        "Modification states require a DML statement".to_string(),
    ))
}

fn qualified(qualifier: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| format!("{qualifier}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dml_statement_type(request: &ExtendedSql<'_>) -> Result<DbmsStatementType> {
    match request.statement_type {
        Some(DbmsStatementType::Select) | None => Err(CriteriaError::IllegalState(format!(
            "Unsupported statement type {} for returning columns or modification states",
            request
                .statement_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "<none>".to_string())
        ))),
        Some(statement_type) => Ok(statement_type),
    }
}

fn affected_table<'a>(request: &ExtendedSql<'a>) -> Result<&'a str> {
    request.affected_table.ok_or_else(|| {
        CriteriaError::IllegalArgument("A DML statement requires the affected table".to_string())
    })
}

/// Finds the alias the affected table has in an assembled DML statement.
///
/// UPDATE takes the text between the table name and `SET`, INSERT the name after
/// `AS` up to the column list, DELETE the text between the table name and `WHERE`.
/// A DELETE with `USING` falls back to the table name. Without an alias the table
/// name is returned.
pub fn resolve_returning_alias(sql: &str, statement_type: DbmsStatementType, table: &str) -> String {
    let keyword = match statement_type {
        DbmsStatementType::Update => "UPDATE ",
        DbmsStatementType::Insert => "INTO ",
        _ => "FROM ",
    };
    let Some(table_end) = locate_table(sql, keyword, table) else {
        return table.to_string();
    };

    let candidate = match statement_type {
        DbmsStatementType::Update => {
            let set = find_ignore_case(sql, " SET ", table_end).unwrap_or(sql.len());
            sql[table_end..set].trim()
        }
        DbmsStatementType::Insert => {
            let rest = sql[table_end..].trim_start();
            if !starts_with_keyword(rest, "AS") {
                return table.to_string();
            }
            let after_as = rest[2..].trim_start();
            let end = after_as
                .find(|c: char| c == '(' || c.is_whitespace())
                .unwrap_or(after_as.len());
            &after_as[..end]
        }
        _ => {
            let end = find_ignore_case(sql, " WHERE ", table_end).unwrap_or(sql.len());
            let between = &sql[table_end..end];
            if contains_word(between, "USING") {
                return table.to_string();
            }
            strip_as(between.trim())
                .split_whitespace()
                .next()
                .unwrap_or("")
        }
    };

    let candidate = strip_as(candidate);
    if candidate.is_empty() {
        table.to_string()
    } else {
        candidate.to_string()
    }
}

/// Byte offset right after the table name following `keyword`.
fn locate_table(sql: &str, keyword: &str, table: &str) -> Option<usize> {
    let keyword_start = find_ignore_case(sql, keyword, 0)?;
    let rest = &sql[keyword_start + keyword.len()..];
    let skipped = rest.len() - rest.trim_start().len();
    let table_start = keyword_start + keyword.len() + skipped;
    let table_end = table_start + table.len();
    let matches = sql.len() >= table_end
        && sql.is_char_boundary(table_end)
        && sql[table_start..table_end].eq_ignore_ascii_case(table)
        && !sql[table_end..]
            .starts_with(|c: char| c.is_alphanumeric() || c == '_');
    matches.then_some(table_end)
}

fn strip_as(text: &str) -> &str {
    if starts_with_keyword(text, "AS") {
        text[2..].trim()
    } else {
        text
    }
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.len() > keyword.len()
        && text[..keyword.len()].eq_ignore_ascii_case(keyword)
        && text[keyword.len()..].starts_with(char::is_whitespace)
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split_whitespace().any(|token| token.eq_ignore_ascii_case(word))
}
