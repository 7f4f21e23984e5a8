//! Standard SQL dialect used when no vendor dialect is configured.

use super::{DbmsDialect, DbmsLimitHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDbmsDialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiLimitHandler;

impl DbmsLimitHandler for AnsiLimitHandler {
    fn apply_sql(&self, sql: &mut String, _is_subquery: bool, limit: Option<u64>, offset: Option<u64>) {
        if let Some(offset) = offset.filter(|o| *o > 0) {
            sql.push_str(&format!(" OFFSET {offset} ROWS"));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" FETCH FIRST {limit} ROWS ONLY"));
        }
    }
}

impl DbmsDialect for AnsiDbmsDialect {
    fn name(&self) -> &'static str {
        "ANSI"
    }

    fn create_limit_handler(&self) -> Box<dyn DbmsLimitHandler> {
        Box::new(AnsiLimitHandler)
    }
}
