//! Subquery initiators and builders.
//!
//! An initiator is handed out wherever a subquery may appear. Its `from` opens the
//! subquery body in a child alias scope, so the enclosing aliases stay visible for
//! correlation while the subquery's own aliases do not leak out.

use super::builder::{BaseQueryBuilder, QueryCore};
use super::conditions::{HavingBuilder, PredicateCollector, WhereBuilder};
use super::lifecycle::{
    listener, BuilderEndedListener, BuilderId, BuilderState, SubqueryBuilderListener,
};
use super::main_query::ClauseScope;
use super::model::QueryNode;
use crate::error::{
    builder_already_ended, builder_not_ended, previous_builder_not_ended, CriteriaError, Result,
};
use crate::expression::visitor::{PlaceholderCollector, PlaceholderReplacer};
use crate::expression::{Expression, Predicate, Visitor, VisitorMut};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

struct InitiatorInner<T> {
    scope: ClauseScope,
    id: BuilderId,
    listener: RefCell<Option<Box<SubqueryBuilderListener<T>>>>,
}

/// Starts a subquery; `from` may be called once.
pub struct SubqueryInitiator<T> {
    inner: Rc<InitiatorInner<T>>,
}

impl<T> Clone for SubqueryInitiator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> SubqueryInitiator<T> {
    pub(crate) fn new(scope: &ClauseScope, id: BuilderId, listener: Box<SubqueryBuilderListener<T>>) -> Self {
        Self {
            inner: Rc::new(InitiatorInner {
                scope: scope.clone(),
                id,
                listener: RefCell::new(Some(listener)),
            }),
        }
    }

    pub fn from(&self, entity: &str, alias: &str) -> Result<SubqueryBuilder<T>> {
        if self.inner.listener.borrow().is_none() {
            return Err(builder_already_ended("subquery initiator"));
        }
        let core = QueryCore::new(self.inner.scope.subquery_scope());
        core.add_root(entity, alias, None)?;
        let listener = self
            .inner
            .listener
            .borrow_mut()
            .take()
            .ok_or_else(|| builder_already_ended("subquery initiator"))?;
        trace!(builder = %self.inner.id, entity = %entity, alias = %alias, "opened subquery");
        Ok(SubqueryBuilder {
            inner: Rc::new(SubqueryInner {
                id: self.inner.id,
                core,
                listener,
            }),
        })
    }
}

struct SubqueryInner<T> {
    id: BuilderId,
    core: QueryCore,
    listener: Box<SubqueryBuilderListener<T>>,
}

/// Body of a subquery. Supports the full query surface except set operations.
pub struct SubqueryBuilder<T> {
    inner: Rc<SubqueryInner<T>>,
}

impl<T> Clone for SubqueryBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> SubqueryBuilder<T> {
    /// Ends the subquery and hands it to the enclosing builder.
    pub fn end(&self) -> Result<T> {
        let core = &self.inner.core;
        if core.is_ended() {
            return Err(builder_already_ended("subquery"));
        }
        core.verify_ended()?;
        core.prepare_and_check()?;
        core.mark_ended();
        let query = QueryNode::Select(core.snapshot()?);
        self.inner.listener.on_builder_ended(self.inner.id, query)
    }
}

impl<T: 'static> BaseQueryBuilder for SubqueryBuilder<T> {
    fn query_core(&self) -> &QueryCore {
        &self.inner.core
    }
}

impl<T: 'static> WhereBuilder for SubqueryBuilder<T> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.where_collector()
    }
}

impl<T: 'static> HavingBuilder for SubqueryBuilder<T> {
    fn having_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.having_collector()
    }
}

/// The tree a multiple-subquery initiator binds its subqueries into.
#[derive(Debug, Clone)]
pub(crate) enum SubqueryTarget {
    Expression(Expression),
    Predicate(Predicate),
}

impl SubqueryTarget {
    fn placeholders(&self) -> Vec<String> {
        let mut collector = PlaceholderCollector::default();
        match self {
            SubqueryTarget::Expression(expression) => collector.visit_expression(expression),
            SubqueryTarget::Predicate(predicate) => collector.visit_predicate(predicate),
        }
        collector.names
    }

    fn replace(&mut self, alias: &str, replacement: &Expression) -> usize {
        let mut replacer = PlaceholderReplacer {
            alias,
            replacement,
            replaced: 0,
        };
        match self {
            SubqueryTarget::Expression(expression) => replacer.visit_expression_mut(expression),
            SubqueryTarget::Predicate(predicate) => replacer.visit_predicate_mut(predicate),
        }
        replacer.replaced
    }
}

struct MultipleInner<T> {
    scope: ClauseScope,
    id: BuilderId,
    target: RefCell<SubqueryTarget>,
    pending: RefCell<Vec<String>>,
    open: Cell<Option<BuilderId>>,
    state: Cell<BuilderState>,
    listener: Box<dyn BuilderEndedListener<SubqueryTarget, T>>,
}

/// Binds a subquery to every placeholder alias of a parsed expression.
///
/// Placeholders are bare identifiers that are not aliases of the query. `end`
/// fails while any of them is still unbound.
pub struct MultipleSubqueryInitiator<T> {
    inner: Rc<MultipleInner<T>>,
}

impl<T> Clone for MultipleSubqueryInitiator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> MultipleSubqueryInitiator<T> {
    pub(crate) fn new(
        scope: &ClauseScope,
        id: BuilderId,
        target: SubqueryTarget,
        listener: Box<dyn BuilderEndedListener<SubqueryTarget, T>>,
    ) -> Self {
        let pending = target.placeholders();
        Self {
            inner: Rc::new(MultipleInner {
                scope: scope.clone(),
                id,
                target: RefCell::new(target),
                pending: RefCell::new(pending),
                open: Cell::new(None),
                state: Cell::new(BuilderState::Open),
                listener,
            }),
        }
    }

    /// Placeholders not bound yet.
    pub fn pending_aliases(&self) -> Vec<String> {
        self.inner.pending.borrow().clone()
    }

    /// Starts the subquery replacing `alias`.
    pub fn with(&self, alias: &str) -> Result<SubqueryInitiator<Self>> {
        if self.inner.state.get().is_terminal() {
            return Err(builder_already_ended("multiple subquery initiator"));
        }
        if self.inner.open.get().is_some() {
            return Err(previous_builder_not_ended());
        }
        if !self.inner.pending.borrow().iter().any(|pending| pending == alias) {
            return Err(CriteriaError::IllegalArgument(format!(
                "Subquery alias '{alias}' is not an unbound placeholder of the expression"
            )));
        }
        let id = self.inner.scope.next_builder_id();
        self.inner.open.set(Some(id));
        let initiator = self.clone();
        let alias = alias.to_string();
        Ok(SubqueryInitiator::new(
            &self.inner.scope,
            id,
            listener(move |id, query: QueryNode| {
                let inner = &initiator.inner;
                if inner.open.get() != Some(id) {
                    return Err(builder_not_ended());
                }
                inner.open.set(None);
                inner
                    .target
                    .borrow_mut()
                    .replace(&alias, &Expression::subquery(query));
                inner.pending.borrow_mut().retain(|pending| pending != &alias);
                Ok(initiator.clone())
            }),
        ))
    }

    pub fn end(&self) -> Result<T> {
        if self.inner.state.get().is_terminal() {
            return Err(builder_already_ended("multiple subquery initiator"));
        }
        if self.inner.open.get().is_some() || !self.inner.pending.borrow().is_empty() {
            return Err(builder_not_ended());
        }
        self.inner.state.set(BuilderState::Ended);
        let target = self.inner.target.borrow().clone();
        self.inner.listener.on_builder_ended(self.inner.id, target)
    }
}
