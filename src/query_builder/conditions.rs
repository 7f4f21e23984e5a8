//! WHERE, HAVING and ON predicate building.
//!
//! A [`PredicateCollector`] accumulates the predicates of one clause or group and
//! tracks the child builder currently open on it. The clause-level traits
//! [`WhereBuilder`] and [`HavingBuilder`] expose it with default methods so every
//! builder owning a WHERE or HAVING clause gets the same fluent surface.

use super::case_when::{CaseWhenStarterBuilder, SimpleCaseWhenBuilder};
use super::lifecycle::{
    listener, BuilderId, BuilderSlot, BuilderState, OpenBuilders, PredicateBuilderEndedListener,
};
use super::main_query::ClauseScope;
use super::model::QueryNode;
use super::restriction::RestrictionBuilder;
use super::subquery::{MultipleSubqueryInitiator, SubqueryInitiator, SubqueryTarget};
use crate::error::{builder_already_ended, previous_builder_not_ended, CriteriaError, Result};
use crate::expression::visitor::{PlaceholderCollector, PlaceholderReplacer};
use crate::expression::{
    BooleanPredicate, CompoundKind, CompoundPredicate, ExistsPredicate, Expression, Predicate,
    Visitor, VisitorMut,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct CollectorInner {
    scope: ClauseScope,
    compound: RefCell<CompoundPredicate>,
    open: RefCell<OpenBuilders>,
    state: Cell<BuilderState>,
}

/// Predicates of one clause or nested group plus its open-child slots.
#[doc(hidden)]
#[derive(Clone)]
pub struct PredicateCollector {
    inner: Rc<CollectorInner>,
}

impl PredicateCollector {
    pub(crate) fn new(scope: ClauseScope, kind: CompoundKind) -> Self {
        Self::with_predicate(scope, CompoundPredicate::new(kind))
    }

    pub(crate) fn with_predicate(scope: ClauseScope, compound: CompoundPredicate) -> Self {
        Self {
            inner: Rc::new(CollectorInner {
                scope,
                compound: RefCell::new(compound),
                open: RefCell::new(OpenBuilders::default()),
                state: Cell::new(BuilderState::Open),
            }),
        }
    }

    pub(crate) fn scope(&self) -> &ClauseScope {
        &self.inner.scope
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.state.get().is_terminal() {
            Err(builder_already_ended("predicate"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn has_open_child(&self) -> bool {
        self.inner.open.borrow().any_open()
    }

    pub(crate) fn verify_ended(&self) -> Result<()> {
        self.inner.open.borrow().verify_ended()
    }

    /// Ends the group and hands out its predicate.
    pub(crate) fn end(&self) -> Result<CompoundPredicate> {
        self.check_open()?;
        self.verify_ended()?;
        self.inner.state.set(BuilderState::Ended);
        Ok(self.inner.compound.borrow().clone())
    }

    pub(crate) fn snapshot(&self) -> CompoundPredicate {
        self.inner.compound.borrow().clone()
    }

    pub(crate) fn add(&self, predicate: Predicate) -> Result<()> {
        self.check_open()?;
        if self.has_open_child() {
            return Err(previous_builder_not_ended());
        }
        self.push(predicate);
        Ok(())
    }

    fn push(&self, predicate: Predicate) {
        let empty_group = matches!(&predicate, Predicate::Compound(group) if group.is_empty());
        if !empty_group {
            self.inner.compound.borrow_mut().add(predicate);
        }
    }

    fn open_child(&self, slot: BuilderSlot) -> Result<BuilderId> {
        self.check_open()?;
        let id = self.scope().next_builder_id();
        self.inner.open.borrow_mut().open(slot, id)?;
        Ok(id)
    }

    fn close_child(&self, slot: BuilderSlot, id: BuilderId) -> Result<()> {
        self.inner.open.borrow_mut().close(slot, id)
    }

    fn fold(&self, slot: BuilderSlot, id: BuilderId, predicate: Predicate) -> Result<()> {
        self.close_child(slot, id)?;
        self.push(predicate);
        Ok(())
    }

    pub(crate) fn restriction<B: 'static>(&self, owner: B, expression: &str) -> Result<RestrictionBuilder<B>> {
        self.check_open()?;
        let left = self.scope().parse_expression(expression)?;
        self.restriction_on(owner, left)
    }

    fn restriction_on<B: 'static>(&self, owner: B, left: Expression) -> Result<RestrictionBuilder<B>> {
        let id = self.open_child(BuilderSlot::Restriction)?;
        Ok(RestrictionBuilder::new(
            self.scope(),
            id,
            left,
            self.folding_listener(BuilderSlot::Restriction, owner),
        ))
    }

    fn folding_listener<B: 'static>(&self, slot: BuilderSlot, owner: B) -> Box<PredicateBuilderEndedListener<B>> {
        let collector = self.clone();
        listener(move |id, predicate| {
            collector.fold(slot, id, predicate)?;
            Ok(owner)
        })
    }

    pub(crate) fn expression<B>(&self, owner: B, expression: &str) -> Result<B> {
        self.check_open()?;
        let predicate = self.scope().parse_predicate(expression, false)?;
        self.add(predicate)?;
        Ok(owner)
    }

    pub(crate) fn exists<B: 'static>(&self, owner: B, negated: bool) -> Result<SubqueryInitiator<B>> {
        let id = self.open_child(BuilderSlot::RightSubquery)?;
        let collector = self.clone();
        Ok(SubqueryInitiator::new(
            self.scope(),
            id,
            listener(move |id, query: QueryNode| {
                let predicate = Predicate::Exists(ExistsPredicate {
                    subquery: Expression::subquery(query),
                    negated,
                });
                collector.fold(BuilderSlot::RightSubquery, id, predicate)?;
                Ok(owner)
            }),
        ))
    }

    /// The subquery becomes the left operand of a restriction.
    pub(crate) fn subquery<B: 'static>(&self, owner: B) -> Result<SubqueryInitiator<RestrictionBuilder<B>>> {
        let id = self.open_child(BuilderSlot::LeftSubquery)?;
        let collector = self.clone();
        Ok(SubqueryInitiator::new(
            self.scope(),
            id,
            listener(move |id, query: QueryNode| {
                collector.close_child(BuilderSlot::LeftSubquery, id)?;
                collector.restriction_on(owner, Expression::subquery(query))
            }),
        ))
    }

    /// The subquery replaces `alias` inside `expression`, which becomes the left
    /// operand of a restriction.
    pub(crate) fn subquery_with<B: 'static>(
        &self,
        owner: B,
        alias: &str,
        expression: &str,
    ) -> Result<SubqueryInitiator<RestrictionBuilder<B>>> {
        self.check_open()?;
        let super_expression = self.scope().parse_expression_with_placeholders(expression)?;
        let mut placeholders = PlaceholderCollector::default();
        placeholders.visit_expression(&super_expression);
        if !placeholders.names.iter().any(|name| name == alias) {
            return Err(CriteriaError::IllegalArgument(format!(
                "The expression '{expression}' does not contain the subquery alias '{alias}'"
            )));
        }
        let id = self.open_child(BuilderSlot::SuperExpressionSubquery)?;
        let collector = self.clone();
        let alias = alias.to_string();
        Ok(SubqueryInitiator::new(
            self.scope(),
            id,
            listener(move |id, query: QueryNode| {
                collector.close_child(BuilderSlot::SuperExpressionSubquery, id)?;
                let mut left = super_expression;
                let replacement = Expression::subquery(query);
                PlaceholderReplacer {
                    alias: &alias,
                    replacement: &replacement,
                    replaced: 0,
                }
                .visit_expression_mut(&mut left);
                collector.restriction_on(owner, left)
            }),
        ))
    }

    pub(crate) fn subqueries<B: 'static>(
        &self,
        owner: B,
        expression: &str,
    ) -> Result<MultipleSubqueryInitiator<RestrictionBuilder<B>>> {
        self.check_open()?;
        let template = self.scope().parse_expression_with_placeholders(expression)?;
        let id = self.open_child(BuilderSlot::MultipleSubquery)?;
        let collector = self.clone();
        Ok(MultipleSubqueryInitiator::new(
            self.scope(),
            id,
            SubqueryTarget::Expression(template),
            listener(move |id, target: SubqueryTarget| {
                collector.close_child(BuilderSlot::MultipleSubquery, id)?;
                match target {
                    SubqueryTarget::Expression(left) => collector.restriction_on(owner, left),
                    SubqueryTarget::Predicate(_) => Err(CriteriaError::IllegalState(
                        "Expected a scalar subquery expression".to_string(),
                    )),
                }
            }),
        ))
    }

    pub(crate) fn expression_subqueries<B: 'static>(
        &self,
        owner: B,
        expression: &str,
    ) -> Result<MultipleSubqueryInitiator<B>> {
        self.check_open()?;
        let template = self.scope().parse_predicate(expression, true)?;
        let id = self.open_child(BuilderSlot::MultipleSubquery)?;
        let collector = self.clone();
        Ok(MultipleSubqueryInitiator::new(
            self.scope(),
            id,
            SubqueryTarget::Predicate(template),
            listener(move |id, target: SubqueryTarget| {
                let predicate = match target {
                    SubqueryTarget::Predicate(predicate) => predicate,
                    SubqueryTarget::Expression(expression) => {
                        Predicate::Boolean(BooleanPredicate {
                            expression,
                            negated: false,
                        })
                    }
                };
                collector.fold(BuilderSlot::MultipleSubquery, id, predicate)?;
                Ok(owner)
            }),
        ))
    }

    pub(crate) fn case_when<B: 'static>(&self, owner: B) -> Result<CaseWhenStarterBuilder<RestrictionBuilder<B>>> {
        let id = self.open_child(BuilderSlot::CaseExpression)?;
        let collector = self.clone();
        Ok(CaseWhenStarterBuilder::new(
            self.scope(),
            id,
            None,
            listener(move |id, case: Expression| {
                collector.close_child(BuilderSlot::CaseExpression, id)?;
                collector.restriction_on(owner, case)
            }),
        ))
    }

    pub(crate) fn simple_case<B: 'static>(
        &self,
        owner: B,
        expression: &str,
    ) -> Result<SimpleCaseWhenBuilder<RestrictionBuilder<B>>> {
        self.check_open()?;
        let operand = self.scope().parse_expression(expression)?;
        let id = self.open_child(BuilderSlot::CaseExpression)?;
        let collector = self.clone();
        Ok(SimpleCaseWhenBuilder::new(
            self.scope(),
            id,
            operand,
            listener(move |id, case: Expression| {
                collector.close_child(BuilderSlot::CaseExpression, id)?;
                collector.restriction_on(owner, case)
            }),
        ))
    }

    pub(crate) fn or_group<B: 'static>(&self, owner: B) -> Result<WhereOrBuilder<B>> {
        let id = self.open_child(BuilderSlot::NestedPredicate)?;
        let listener = self.folding_listener(BuilderSlot::NestedPredicate, owner);
        Ok(WhereOrBuilder {
            inner: Rc::new(GroupInner::new(self.scope(), id, CompoundKind::Or, listener)),
        })
    }

    pub(crate) fn and_group<B: 'static>(&self, owner: B) -> Result<WhereAndBuilder<B>> {
        let id = self.open_child(BuilderSlot::NestedPredicate)?;
        let listener = self.folding_listener(BuilderSlot::NestedPredicate, owner);
        Ok(WhereAndBuilder {
            inner: Rc::new(GroupInner::new(self.scope(), id, CompoundKind::And, listener)),
        })
    }
}

struct GroupInner<T> {
    id: BuilderId,
    collector: PredicateCollector,
    listener: Box<PredicateBuilderEndedListener<T>>,
}

impl<T> GroupInner<T> {
    fn new(
        scope: &ClauseScope,
        id: BuilderId,
        kind: CompoundKind,
        listener: Box<PredicateBuilderEndedListener<T>>,
    ) -> Self {
        Self {
            id,
            collector: PredicateCollector::new(scope.clone(), kind),
            listener,
        }
    }

    fn end(&self) -> Result<T> {
        let group = self.collector.end()?;
        self.listener
            .on_builder_ended(self.id, Predicate::Compound(group))
    }
}

/// Disjunctive group: `(a OR b OR ...)`.
pub struct WhereOrBuilder<T> {
    inner: Rc<GroupInner<T>>,
}

/// Conjunctive group nested in a disjunction: `(a AND b AND ...)`.
pub struct WhereAndBuilder<T> {
    inner: Rc<GroupInner<T>>,
}

impl<T> Clone for WhereOrBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Clone for WhereAndBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> WhereOrBuilder<T> {
    pub fn end_or(&self) -> Result<T> {
        self.inner.end()
    }
}

impl<T: 'static> WhereAndBuilder<T> {
    pub fn end_and(&self) -> Result<T> {
        self.inner.end()
    }
}

impl<T: 'static> WhereBuilder for WhereOrBuilder<T> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        Ok(self.inner.collector.clone())
    }
}

impl<T: 'static> WhereBuilder for WhereAndBuilder<T> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        Ok(self.inner.collector.clone())
    }
}

/// Restriction methods of a builder owning a WHERE-like clause.
pub trait WhereBuilder: Clone + Sized + 'static {
    #[doc(hidden)]
    fn where_collector(&self) -> Result<PredicateCollector>;

    /// Starts a restriction on `expression`.
    fn where_(&self, expression: &str) -> Result<RestrictionBuilder<Self>> {
        self.where_collector()?.restriction(self.clone(), expression)
    }

    /// Adds a complete boolean expression such as `d.age > 18 OR d.name IS NULL`.
    fn where_expression(&self, expression: &str) -> Result<Self> {
        self.where_collector()?.expression(self.clone(), expression)
    }

    fn where_exists(&self) -> Result<SubqueryInitiator<Self>> {
        self.where_collector()?.exists(self.clone(), false)
    }

    fn where_not_exists(&self) -> Result<SubqueryInitiator<Self>> {
        self.where_collector()?.exists(self.clone(), true)
    }

    /// Starts a restriction whose left operand is a subquery.
    fn where_subquery(&self) -> Result<SubqueryInitiator<RestrictionBuilder<Self>>> {
        self.where_collector()?.subquery(self.clone())
    }

    /// Starts a restriction on `expression` in which `alias` stands for the subquery.
    fn where_subquery_with(
        &self,
        alias: &str,
        expression: &str,
    ) -> Result<SubqueryInitiator<RestrictionBuilder<Self>>> {
        self.where_collector()?
            .subquery_with(self.clone(), alias, expression)
    }

    /// Starts a restriction on an expression containing several subquery aliases.
    fn where_subqueries(&self, expression: &str) -> Result<MultipleSubqueryInitiator<RestrictionBuilder<Self>>> {
        self.where_collector()?.subqueries(self.clone(), expression)
    }

    /// Adds a boolean expression whose subquery aliases are bound afterwards.
    fn where_expression_subqueries(&self, expression: &str) -> Result<MultipleSubqueryInitiator<Self>> {
        self.where_collector()?
            .expression_subqueries(self.clone(), expression)
    }

    fn where_case(&self) -> Result<CaseWhenStarterBuilder<RestrictionBuilder<Self>>> {
        self.where_collector()?.case_when(self.clone())
    }

    fn where_simple_case(&self, expression: &str) -> Result<SimpleCaseWhenBuilder<RestrictionBuilder<Self>>> {
        self.where_collector()?.simple_case(self.clone(), expression)
    }

    fn where_or(&self) -> Result<WhereOrBuilder<Self>> {
        self.where_collector()?.or_group(self.clone())
    }

    fn where_and(&self) -> Result<WhereAndBuilder<Self>> {
        self.where_collector()?.and_group(self.clone())
    }
}

/// Restriction methods of a builder owning a HAVING clause. Nested groups use the
/// same [`WhereOrBuilder`]/[`WhereAndBuilder`] types as WHERE.
pub trait HavingBuilder: Clone + Sized + 'static {
    #[doc(hidden)]
    fn having_collector(&self) -> Result<PredicateCollector>;

    fn having(&self, expression: &str) -> Result<RestrictionBuilder<Self>> {
        self.having_collector()?.restriction(self.clone(), expression)
    }

    fn having_expression(&self, expression: &str) -> Result<Self> {
        self.having_collector()?.expression(self.clone(), expression)
    }

    fn having_exists(&self) -> Result<SubqueryInitiator<Self>> {
        self.having_collector()?.exists(self.clone(), false)
    }

    fn having_not_exists(&self) -> Result<SubqueryInitiator<Self>> {
        self.having_collector()?.exists(self.clone(), true)
    }

    fn having_subquery(&self) -> Result<SubqueryInitiator<RestrictionBuilder<Self>>> {
        self.having_collector()?.subquery(self.clone())
    }

    fn having_case(&self) -> Result<CaseWhenStarterBuilder<RestrictionBuilder<Self>>> {
        self.having_collector()?.case_when(self.clone())
    }

    fn having_or(&self) -> Result<WhereOrBuilder<Self>> {
        self.having_collector()?.or_group(self.clone())
    }

    fn having_and(&self) -> Result<WhereAndBuilder<Self>> {
        self.having_collector()?.and_group(self.clone())
    }
}
