//! Restriction builder: completes a predicate over a left operand.

use super::lifecycle::{
    listener, BuilderId, BuilderSlot, BuilderState, OpenBuilders, PredicateBuilderEndedListener,
};
use super::main_query::ClauseScope;
use super::model::QueryNode;
use super::parameters::Value;
use super::subquery::SubqueryInitiator;
use crate::error::{builder_already_ended, previous_builder_not_ended, Result};
use crate::expression::{
    BetweenPredicate, ComparisonOperator, ComparisonPredicate, Expression, InPredicate,
    IsNullPredicate, LikePredicate, Predicate, PredicateQuantifier,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct RestrictionInner<T> {
    id: BuilderId,
    scope: ClauseScope,
    left: Expression,
    listener: Box<PredicateBuilderEndedListener<T>>,
    state: Cell<BuilderState>,
    open: RefCell<OpenBuilders>,
}

/// Started by `where_`, `having`, `on` and friends. Every terminator folds the
/// finished predicate into the parent and returns the parent.
///
/// Inline values become generated parameters; `*_expression` variants parse
/// their argument as a scalar expression.
pub struct RestrictionBuilder<T> {
    inner: Rc<RestrictionInner<T>>,
}

impl<T> std::fmt::Debug for RestrictionBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestrictionBuilder").finish_non_exhaustive()
    }
}

impl<T> Clone for RestrictionBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> RestrictionBuilder<T> {
    pub(crate) fn new(
        scope: &ClauseScope,
        id: BuilderId,
        left: Expression,
        listener: Box<PredicateBuilderEndedListener<T>>,
    ) -> Self {
        Self {
            inner: Rc::new(RestrictionInner {
                id,
                scope: scope.clone(),
                left,
                listener,
                state: Cell::new(BuilderState::Open),
                open: RefCell::new(OpenBuilders::default()),
            }),
        }
    }

    pub fn left(&self) -> &Expression {
        &self.inner.left
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.state.get().is_terminal() {
            return Err(builder_already_ended("restriction"));
        }
        if self.inner.open.borrow().any_open() {
            return Err(previous_builder_not_ended());
        }
        Ok(())
    }

    fn finish(&self, predicate: Predicate) -> Result<T> {
        if self.inner.state.get().is_terminal() {
            return Err(builder_already_ended("restriction"));
        }
        self.inner.open.borrow().verify_ended()?;
        self.inner.state.set(BuilderState::Ended);
        self.inner.listener.on_builder_ended(self.inner.id, predicate)
    }

    fn value(&self, value: impl Into<Value>) -> Expression {
        self.inner.scope.value_expression(value.into())
    }

    fn parse(&self, expression: &str) -> Result<Expression> {
        self.inner.scope.parse_expression(expression)
    }

    pub fn compare(&self, operator: ComparisonOperator, value: impl Into<Value>) -> Result<T> {
        self.check_open()?;
        let right = self.value(value);
        self.finish(Predicate::comparison(operator, self.inner.left.clone(), right))
    }

    pub fn compare_expression(&self, operator: ComparisonOperator, expression: &str) -> Result<T> {
        self.check_open()?;
        let right = self.parse(expression)?;
        self.finish(Predicate::comparison(operator, self.inner.left.clone(), right))
    }

    /// Compares against a subquery, optionally quantified with ANY or ALL.
    pub fn compare_subquery(
        &self,
        operator: ComparisonOperator,
        quantifier: PredicateQuantifier,
    ) -> Result<SubqueryInitiator<T>> {
        let left = self.inner.left.clone();
        self.right_subquery(move |query| {
            Predicate::Comparison(ComparisonPredicate {
                operator,
                left,
                right: Expression::subquery(query),
                quantifier,
                negated: false,
            })
        })
    }

    fn right_subquery(
        &self,
        predicate: impl FnOnce(QueryNode) -> Predicate + 'static,
    ) -> Result<SubqueryInitiator<T>> {
        self.check_open()?;
        let id = self.inner.scope.next_builder_id();
        self.inner
            .open
            .borrow_mut()
            .open(BuilderSlot::RightSubquery, id)?;
        let builder = self.clone();
        Ok(SubqueryInitiator::new(
            &self.inner.scope,
            id,
            listener(move |id, query: QueryNode| {
                builder
                    .inner
                    .open
                    .borrow_mut()
                    .close(BuilderSlot::RightSubquery, id)?;
                builder.finish(predicate(query))
            }),
        ))
    }

    pub fn eq(&self, value: impl Into<Value>) -> Result<T> {
        self.compare(ComparisonOperator::Eq, value)
    }

    pub fn ne(&self, value: impl Into<Value>) -> Result<T> {
        self.compare(ComparisonOperator::Ne, value)
    }

    pub fn lt(&self, value: impl Into<Value>) -> Result<T> {
        self.compare(ComparisonOperator::Lt, value)
    }

    pub fn le(&self, value: impl Into<Value>) -> Result<T> {
        self.compare(ComparisonOperator::Le, value)
    }

    pub fn gt(&self, value: impl Into<Value>) -> Result<T> {
        self.compare(ComparisonOperator::Gt, value)
    }

    pub fn ge(&self, value: impl Into<Value>) -> Result<T> {
        self.compare(ComparisonOperator::Ge, value)
    }

    pub fn eq_expression(&self, expression: &str) -> Result<T> {
        self.compare_expression(ComparisonOperator::Eq, expression)
    }

    pub fn ne_expression(&self, expression: &str) -> Result<T> {
        self.compare_expression(ComparisonOperator::Ne, expression)
    }

    pub fn lt_expression(&self, expression: &str) -> Result<T> {
        self.compare_expression(ComparisonOperator::Lt, expression)
    }

    pub fn le_expression(&self, expression: &str) -> Result<T> {
        self.compare_expression(ComparisonOperator::Le, expression)
    }

    pub fn gt_expression(&self, expression: &str) -> Result<T> {
        self.compare_expression(ComparisonOperator::Gt, expression)
    }

    pub fn ge_expression(&self, expression: &str) -> Result<T> {
        self.compare_expression(ComparisonOperator::Ge, expression)
    }

    pub fn eq_subquery(&self) -> Result<SubqueryInitiator<T>> {
        self.compare_subquery(ComparisonOperator::Eq, PredicateQuantifier::One)
    }

    pub fn ne_subquery(&self) -> Result<SubqueryInitiator<T>> {
        self.compare_subquery(ComparisonOperator::Ne, PredicateQuantifier::One)
    }

    pub fn between(&self, start: impl Into<Value>, end: impl Into<Value>) -> Result<T> {
        self.check_open()?;
        let start = self.value(start);
        let end = self.value(end);
        self.finish(self.between_predicate(start, end, false))
    }

    pub fn not_between(&self, start: impl Into<Value>, end: impl Into<Value>) -> Result<T> {
        self.check_open()?;
        let start = self.value(start);
        let end = self.value(end);
        self.finish(self.between_predicate(start, end, true))
    }

    pub fn between_expression(&self, start: &str, end: &str) -> Result<T> {
        self.check_open()?;
        let start = self.parse(start)?;
        let end = self.parse(end)?;
        self.finish(self.between_predicate(start, end, false))
    }

    fn between_predicate(&self, start: Expression, end: Expression, negated: bool) -> Predicate {
        Predicate::Between(BetweenPredicate {
            left: self.inner.left.clone(),
            start,
            end,
            negated,
        })
    }

    pub fn like(&self, pattern: &str) -> Result<T> {
        self.like_predicate(pattern, true, None, false)
    }

    pub fn not_like(&self, pattern: &str) -> Result<T> {
        self.like_predicate(pattern, true, None, true)
    }

    /// Case-insensitive LIKE.
    pub fn ilike(&self, pattern: &str) -> Result<T> {
        self.like_predicate(pattern, false, None, false)
    }

    pub fn not_ilike(&self, pattern: &str) -> Result<T> {
        self.like_predicate(pattern, false, None, true)
    }

    pub fn like_escape(&self, pattern: &str, escape: char) -> Result<T> {
        self.like_predicate(pattern, true, Some(escape), false)
    }

    fn like_predicate(
        &self,
        pattern: &str,
        case_sensitive: bool,
        escape: Option<char>,
        negated: bool,
    ) -> Result<T> {
        self.check_open()?;
        let pattern = self.value(pattern);
        self.finish(Predicate::Like(LikePredicate {
            left: self.inner.left.clone(),
            pattern,
            case_sensitive,
            escape,
            negated,
        }))
    }

    pub fn in_values<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<T> {
        self.in_value_list(values, false)
    }

    pub fn not_in_values<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<T> {
        self.in_value_list(values, true)
    }

    fn in_value_list<V: Into<Value>>(
        &self,
        values: impl IntoIterator<Item = V>,
        negated: bool,
    ) -> Result<T> {
        self.check_open()?;
        let right = values.into_iter().map(|value| self.value(value)).collect();
        self.finish(self.in_predicate(right, negated))
    }

    pub fn in_expressions(&self, expressions: &[&str]) -> Result<T> {
        self.in_expression_list(expressions, false)
    }

    pub fn not_in_expressions(&self, expressions: &[&str]) -> Result<T> {
        self.in_expression_list(expressions, true)
    }

    fn in_expression_list(&self, expressions: &[&str], negated: bool) -> Result<T> {
        self.check_open()?;
        let right = expressions
            .iter()
            .map(|expression| self.parse(expression))
            .collect::<Result<Vec<_>>>()?;
        self.finish(self.in_predicate(right, negated))
    }

    pub fn in_subquery(&self) -> Result<SubqueryInitiator<T>> {
        let left = self.inner.left.clone();
        self.right_subquery(move |query| {
            Predicate::In(InPredicate {
                left,
                right: vec![Expression::subquery(query)],
                negated: false,
            })
        })
    }

    pub fn not_in_subquery(&self) -> Result<SubqueryInitiator<T>> {
        let left = self.inner.left.clone();
        self.right_subquery(move |query| {
            Predicate::In(InPredicate {
                left,
                right: vec![Expression::subquery(query)],
                negated: true,
            })
        })
    }

    fn in_predicate(&self, right: Vec<Expression>, negated: bool) -> Predicate {
        Predicate::In(InPredicate {
            left: self.inner.left.clone(),
            right,
            negated,
        })
    }

    pub fn is_null(&self) -> Result<T> {
        self.null_check(false)
    }

    pub fn is_not_null(&self) -> Result<T> {
        self.null_check(true)
    }

    fn null_check(&self, negated: bool) -> Result<T> {
        self.check_open()?;
        self.finish(Predicate::IsNull(IsNullPredicate {
            expression: self.inner.left.clone(),
            negated,
        }))
    }
}
