//! Finished query trees produced when builders end.
//!
//! These are plain owned values. Builders fold them into their parents and the
//! renderer turns them into SQL.

use super::joins::JoinManager;
use super::pagination::Pagination;
use crate::dialect::DbmsStatementType;
use crate::expression::{CompoundKind, CompoundPredicate, CopyContext, Expression};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOperationType {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

impl fmt::Display for SetOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetOperationType::Union => "UNION",
            SetOperationType::UnionAll => "UNION ALL",
            SetOperationType::Intersect => "INTERSECT",
            SetOperationType::IntersectAll => "INTERSECT ALL",
            SetOperationType::Except => "EXCEPT",
            SetOperationType::ExceptAll => "EXCEPT ALL",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expression: Expression,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expression: Expression,
    pub ascending: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub from: JoinManager,
    pub select: Vec<SelectItem>,
    pub distinct: bool,
    pub where_clause: CompoundPredicate,
    pub group_by: Vec<Expression>,
    pub having: CompoundPredicate,
    pub order_by: Vec<OrderByItem>,
    pub pagination: Pagination,
}

impl SelectQuery {
    pub fn new(from: JoinManager) -> Self {
        Self {
            from,
            select: Vec::new(),
            distinct: false,
            where_clause: CompoundPredicate::new(CompoundKind::And),
            group_by: Vec::new(),
            having: CompoundPredicate::new(CompoundKind::And),
            order_by: Vec::new(),
            pagination: Pagination::default(),
        }
    }

    /// No FROM root, no SELECT item and no restriction.
    pub fn is_empty(&self) -> bool {
        self.from.is_empty() && self.select.is_empty() && self.where_clause.is_empty()
    }

    /// Deep copy with join managers and path owners remapped.
    pub fn copy(&self, context: &CopyContext) -> SelectQuery {
        let mut copy = self.clone();
        context.remap_select_query(&mut copy);
        copy
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOperation {
    pub operator: SetOperationType,
    pub operands: Vec<QueryNode>,
    pub order_by: Vec<OrderByItem>,
    pub pagination: Pagination,
}

/// A query body: a plain SELECT or a set operation over further bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Select(SelectQuery),
    SetOperation(SetOperation),
}

impl QueryNode {
    pub fn as_select(&self) -> Option<&SelectQuery> {
        match self {
            QueryNode::Select(query) => Some(query),
            QueryNode::SetOperation(_) => None,
        }
    }

    /// The leftmost SELECT, whose select list names the result columns.
    pub fn first_select(&self) -> Option<&SelectQuery> {
        match self {
            QueryNode::Select(query) => Some(query),
            QueryNode::SetOperation(set) => set.operands.first().and_then(QueryNode::first_select),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub attribute: String,
    pub value: Expression,
}

/// Maps an attribute of the modified entity into the RETURNING list. In a CTE
/// context `cte_attribute` names the CTE attribute receiving the value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturningBinding {
    pub cte_attribute: Option<String>,
    pub attribute: String,
}

/// DELETE, UPDATE or INSERT ... SELECT.
///
/// For DELETE and UPDATE the first FROM root of `query` is the modified entity.
/// For INSERT `query` is the SELECT source and `assignments` bind the inserted
/// attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationQuery {
    pub statement_type: DbmsStatementType,
    pub entity: String,
    pub query: SelectQuery,
    pub assignments: Vec<Assignment>,
    pub returning: Vec<ReturningBinding>,
}
