//! FROM roots, joins, alias bookkeeping and the ON clause builder.

use super::conditions::{PredicateCollector, WhereAndBuilder, WhereOrBuilder};
use super::lifecycle::{BuilderId, JoinOnBuilderListener};
use super::main_query::{ClauseScope, ClauseType};
use super::restriction::RestrictionBuilder;
use super::subquery::SubqueryInitiator;
use crate::dialect::DbmsModificationState;
use crate::error::{CriteriaError, Result};
use crate::expression::{CompoundKind, CompoundPredicate};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Identity of the join manager of one query body; path owners point at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinManagerId(u64);

impl JoinManagerId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JoinManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jm{}", self.0)
    }
}

/// Represents different types of SQL JOINs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromRoot {
    pub entity: String,
    pub alias: String,
    /// `None` reads the table itself.
    pub modification_state: Option<DbmsModificationState>,
}

/// What a join node joins: an association of an already joined alias or an
/// unrelated entity.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinTarget {
    Attribute {
        parent_alias: String,
        attribute: String,
    },
    Entity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub join_type: JoinType,
    pub target: JoinTarget,
    pub alias: String,
    pub entity: String,
    pub fetch: bool,
    pub on: Option<CompoundPredicate>,
}

impl JoinNode {
    pub fn parent_alias(&self) -> Option<&str> {
        match &self.target {
            JoinTarget::Attribute { parent_alias, .. } => Some(parent_alias),
            JoinTarget::Entity => None,
        }
    }
}

/// FROM clause of one query body.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinManager {
    pub id: JoinManagerId,
    pub roots: Vec<FromRoot>,
    pub joins: Vec<JoinNode>,
}

impl JoinManager {
    pub fn new(id: JoinManagerId) -> Self {
        Self {
            id,
            roots: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty() && self.joins.is_empty()
    }

    /// Entity an alias of this FROM clause refers to.
    pub fn alias_entity(&self, alias: &str) -> Option<&str> {
        self.roots
            .iter()
            .find(|root| root.alias == alias)
            .map(|root| root.entity.as_str())
            .or_else(|| {
                self.joins
                    .iter()
                    .find(|join| join.alias == alias)
                    .map(|join| join.entity.as_str())
            })
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.alias_entity(alias).is_some()
    }

    pub fn join(&self, alias: &str) -> Option<&JoinNode> {
        self.joins.iter().find(|join| join.alias == alias)
    }

    pub(crate) fn join_mut(&mut self, alias: &str) -> Option<&mut JoinNode> {
        self.joins.iter_mut().find(|join| join.alias == alias)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasInfo {
    pub entity: String,
    pub join_manager: JoinManagerId,
}

/// Aliases of one query body. Subquery managers see their parents' aliases, and
/// an alias may not be reused anywhere along that chain.
#[derive(Debug, Clone, Default)]
pub struct AliasManager {
    aliases: Rc<RefCell<BTreeMap<String, AliasInfo>>>,
    parent: Option<Box<AliasManager>>,
}

impl AliasManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            aliases: Rc::new(RefCell::new(BTreeMap::new())),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn register(&self, alias: &str, info: AliasInfo) -> Result<()> {
        if self.lookup(alias).is_some() {
            return Err(CriteriaError::IllegalArgument(format!(
                "Alias '{alias}' is already in use"
            )));
        }
        self.aliases.borrow_mut().insert(alias.to_string(), info);
        Ok(())
    }

    pub fn lookup(&self, alias: &str) -> Option<AliasInfo> {
        self.aliases
            .borrow()
            .get(alias)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.lookup(alias)))
    }

    /// Aliases registered directly on this manager.
    pub fn local_aliases(&self) -> Vec<String> {
        self.aliases.borrow().keys().cloned().collect()
    }
}

struct JoinOnInner<T> {
    id: BuilderId,
    collector: PredicateCollector,
    listener: Box<JoinOnBuilderListener<T>>,
}

/// Builds the ON clause of a join. Restrictions are conjunctive; `on_or` opens
/// a disjunctive group.
pub struct JoinOnBuilder<T> {
    inner: Rc<JoinOnInner<T>>,
}

impl<T> Clone for JoinOnBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> JoinOnBuilder<T> {
    pub(crate) fn new(scope: &ClauseScope, listener: Box<JoinOnBuilderListener<T>>) -> Self {
        let scope = scope.with_clause(ClauseType::Join);
        Self {
            inner: Rc::new(JoinOnInner {
                id: scope.next_builder_id(),
                collector: PredicateCollector::new(scope, CompoundKind::And),
                listener,
            }),
        }
    }

    pub fn on(&self, expression: &str) -> Result<RestrictionBuilder<Self>> {
        self.inner.collector.restriction(self.clone(), expression)
    }

    pub fn on_expression(&self, expression: &str) -> Result<Self> {
        self.inner.collector.expression(self.clone(), expression)
    }

    pub fn on_or(&self) -> Result<WhereOrBuilder<Self>> {
        self.inner.collector.or_group(self.clone())
    }

    pub fn on_and(&self) -> Result<WhereAndBuilder<Self>> {
        self.inner.collector.and_group(self.clone())
    }

    pub fn on_exists(&self) -> Result<SubqueryInitiator<Self>> {
        self.inner.collector.exists(self.clone(), false)
    }

    pub fn on_not_exists(&self) -> Result<SubqueryInitiator<Self>> {
        self.inner.collector.exists(self.clone(), true)
    }

    pub fn end(&self) -> Result<T> {
        let predicate = self.inner.collector.end()?;
        self.inner.listener.on_builder_ended(self.inner.id, predicate)
    }
}
