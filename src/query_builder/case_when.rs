//! CASE WHEN builders.
//!
//! A searched CASE goes through three stages: the starter accepts the first
//! `when`, the then-builder requires a `then`, and the case builder accepts
//! further `when`s or finishes with `otherwise`/`end`. All stages share one
//! state so the stage types only restrict which call may come next.

use super::lifecycle::{
    listener, BuilderId, BuilderSlot, BuilderState, ExpressionBuilderEndedListener, OpenBuilders,
};
use super::main_query::ClauseScope;
use super::parameters::Value;
use super::restriction::RestrictionBuilder;
use crate::error::{builder_already_ended, previous_builder_not_ended, CriteriaError, Result};
use crate::expression::{CaseExpression, Expression, Predicate, WhenClause, WhenCondition};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct CaseInner<T> {
    id: BuilderId,
    scope: ClauseScope,
    operand: Option<Expression>,
    when_clauses: RefCell<Vec<WhenClause>>,
    pending_condition: RefCell<Option<Predicate>>,
    open: RefCell<OpenBuilders>,
    state: Cell<BuilderState>,
    listener: Box<ExpressionBuilderEndedListener<T>>,
}

impl<T: 'static> CaseInner<T> {
    fn new(
        scope: &ClauseScope,
        id: BuilderId,
        operand: Option<Expression>,
        listener: Box<ExpressionBuilderEndedListener<T>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            id,
            scope: scope.clone(),
            operand,
            when_clauses: RefCell::new(Vec::new()),
            pending_condition: RefCell::new(None),
            open: RefCell::new(OpenBuilders::default()),
            state: Cell::new(BuilderState::Open),
            listener,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.state.get().is_terminal() {
            return Err(builder_already_ended("case when"));
        }
        if self.open.borrow().any_open() {
            return Err(previous_builder_not_ended());
        }
        Ok(())
    }

    fn when(self: &Rc<Self>, expression: &str) -> Result<RestrictionBuilder<CaseWhenThenBuilder<T>>> {
        self.check_open()?;
        let left = self.scope.parse_expression(expression)?;
        let id = self.scope.next_builder_id();
        self.open.borrow_mut().open(BuilderSlot::Restriction, id)?;
        let inner = Rc::clone(self);
        Ok(RestrictionBuilder::new(
            &self.scope,
            id,
            left,
            listener(move |id, condition: Predicate| {
                inner.open.borrow_mut().close(BuilderSlot::Restriction, id)?;
                *inner.pending_condition.borrow_mut() = Some(condition);
                Ok(CaseWhenThenBuilder { inner })
            }),
        ))
    }

    fn when_expression(self: &Rc<Self>, condition: &str) -> Result<CaseWhenThenBuilder<T>> {
        self.check_open()?;
        let condition = self.scope.parse_predicate(condition, false)?;
        *self.pending_condition.borrow_mut() = Some(condition);
        Ok(CaseWhenThenBuilder {
            inner: Rc::clone(self),
        })
    }

    fn push_when(&self, condition: WhenCondition, result: Expression) {
        self.when_clauses
            .borrow_mut()
            .push(WhenClause { condition, result });
    }

    fn finish(&self, default: Option<Expression>) -> Result<T> {
        self.check_open()?;
        let when_clauses = self.when_clauses.borrow().clone();
        if when_clauses.is_empty() {
            return Err(CriteriaError::IllegalState(
                "A CASE expression requires at least one WHEN clause".to_string(),
            ));
        }
        self.state.set(BuilderState::Ended);
        let case = Expression::Case(CaseExpression {
            operand: self.operand.clone().map(Box::new),
            when_clauses,
            default: default.map(Box::new),
        });
        self.listener.on_builder_ended(self.id, case)
    }
}

/// First stage of a searched CASE.
pub struct CaseWhenStarterBuilder<T> {
    inner: Rc<CaseInner<T>>,
}

/// Awaits the result of the WHEN clause just completed.
pub struct CaseWhenThenBuilder<T> {
    inner: Rc<CaseInner<T>>,
}

/// Accepts further WHEN clauses or ends the CASE.
pub struct CaseWhenBuilder<T> {
    inner: Rc<CaseInner<T>>,
}

impl<T: 'static> CaseWhenStarterBuilder<T> {
    pub(crate) fn new(
        scope: &ClauseScope,
        id: BuilderId,
        operand: Option<Expression>,
        listener: Box<ExpressionBuilderEndedListener<T>>,
    ) -> Self {
        Self {
            inner: CaseInner::new(scope, id, operand, listener),
        }
    }

    pub fn when(&self, expression: &str) -> Result<RestrictionBuilder<CaseWhenThenBuilder<T>>> {
        self.inner.when(expression)
    }

    pub fn when_expression(&self, condition: &str) -> Result<CaseWhenThenBuilder<T>> {
        self.inner.when_expression(condition)
    }
}

impl<T: 'static> CaseWhenThenBuilder<T> {
    pub fn then(&self, expression: &str) -> Result<CaseWhenBuilder<T>> {
        self.inner.check_open()?;
        let result = self.inner.scope.parse_expression(expression)?;
        self.then_result(result)
    }

    pub fn then_value(&self, value: impl Into<Value>) -> Result<CaseWhenBuilder<T>> {
        self.inner.check_open()?;
        let result = self.inner.scope.value_expression(value.into());
        self.then_result(result)
    }

    fn then_result(&self, result: Expression) -> Result<CaseWhenBuilder<T>> {
        let condition = self
            .inner
            .pending_condition
            .borrow_mut()
            .take()
            .ok_or_else(|| builder_already_ended("case when then"))?;
        self.inner
            .push_when(WhenCondition::Predicate(Box::new(condition)), result);
        Ok(CaseWhenBuilder {
            inner: Rc::clone(&self.inner),
        })
    }
}

impl<T: 'static> CaseWhenBuilder<T> {
    pub fn when(&self, expression: &str) -> Result<RestrictionBuilder<CaseWhenThenBuilder<T>>> {
        self.inner.when(expression)
    }

    pub fn when_expression(&self, condition: &str) -> Result<CaseWhenThenBuilder<T>> {
        self.inner.when_expression(condition)
    }

    pub fn otherwise(&self, expression: &str) -> Result<T> {
        self.inner.check_open()?;
        let default = self.inner.scope.parse_expression(expression)?;
        self.inner.finish(Some(default))
    }

    pub fn otherwise_value(&self, value: impl Into<Value>) -> Result<T> {
        self.inner.check_open()?;
        let default = self.inner.scope.value_expression(value.into());
        self.inner.finish(Some(default))
    }

    /// Ends the CASE without an ELSE branch.
    pub fn end(&self) -> Result<T> {
        self.inner.finish(None)
    }
}

/// Simple CASE over an operand: `CASE x WHEN v THEN r ... END`.
pub struct SimpleCaseWhenBuilder<T> {
    inner: Rc<CaseInner<T>>,
}

impl<T> Clone for SimpleCaseWhenBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> SimpleCaseWhenBuilder<T> {
    pub(crate) fn new(
        scope: &ClauseScope,
        id: BuilderId,
        operand: Expression,
        listener: Box<ExpressionBuilderEndedListener<T>>,
    ) -> Self {
        Self {
            inner: CaseInner::new(scope, id, Some(operand), listener),
        }
    }

    pub fn when(&self, value: &str, result: &str) -> Result<Self> {
        self.inner.check_open()?;
        let value = self.inner.scope.parse_expression(value)?;
        let result = self.inner.scope.parse_expression(result)?;
        self.inner.push_when(WhenCondition::Value(value), result);
        Ok(self.clone())
    }

    pub fn otherwise(&self, expression: &str) -> Result<T> {
        self.inner.check_open()?;
        let default = self.inner.scope.parse_expression(expression)?;
        self.inner.finish(Some(default))
    }

    pub fn end(&self) -> Result<T> {
        self.inner.finish(None)
    }
}
