//! MySQL dialect: `LIMIT offset, count`, no RETURNING, no DML inside WITH and no
//! INTERSECT/EXCEPT.

use super::{DbmsDialect, DbmsLimitHandler};
use crate::query_builder::SetOperationType;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDbmsDialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlLimitHandler;

impl DbmsLimitHandler for MySqlLimitHandler {
    fn apply_sql(&self, sql: &mut String, _is_subquery: bool, limit: Option<u64>, offset: Option<u64>) {
        match (limit, offset.filter(|o| *o > 0)) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {offset}, {limit}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            // MySQL has no OFFSET without LIMIT
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT {offset}, {}", u64::MAX)),
            (None, None) => {}
        }
    }
}

impl DbmsDialect for MySqlDbmsDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn supports_set_operation(&self, set_type: SetOperationType) -> bool {
        matches!(set_type, SetOperationType::Union | SetOperationType::UnionAll)
    }

    fn create_limit_handler(&self) -> Box<dyn DbmsLimitHandler> {
        Box::new(MySqlLimitHandler)
    }
}
