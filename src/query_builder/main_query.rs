//! Services shared by a main query and every builder nested in it.

use super::cte::CteManager;
use super::joins::{AliasManager, JoinManagerId};
use super::lifecycle::BuilderId;
use super::parameters::{ParameterManager, Value};
use crate::dialect::DbmsDialect;
use crate::error::{CriteriaError, Result};
use crate::expression::visitor::ParameterCollector;
use crate::expression::{
    Expression, ExpressionFactory, MacroConfiguration, PathExpression, Predicate,
    SubqueryExpression, Visitor, VisitorMut,
};
use crate::metamodel::Metamodel;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// State owned by the top-level query: CTEs, parameters and id generation.
pub(crate) struct MainQuery {
    pub(crate) metamodel: Arc<Metamodel>,
    pub(crate) expression_factory: Arc<dyn ExpressionFactory>,
    pub(crate) macros: MacroConfiguration,
    pub(crate) dialect: Arc<dyn DbmsDialect>,
    pub(crate) inline_ctes: bool,
    pub(crate) log_rendered_sql: bool,
    pub(crate) ctes: RefCell<CteManager>,
    pub(crate) parameters: RefCell<ParameterManager>,
    /// Entities read through `from_new`.
    pub(crate) new_state_entities: RefCell<BTreeSet<String>>,
    next_id: Cell<u64>,
}

pub(crate) struct MainQuerySettings {
    pub(crate) metamodel: Arc<Metamodel>,
    pub(crate) expression_factory: Arc<dyn ExpressionFactory>,
    pub(crate) macros: MacroConfiguration,
    pub(crate) dialect: Arc<dyn DbmsDialect>,
    pub(crate) inline_ctes: bool,
    pub(crate) log_rendered_sql: bool,
}

impl MainQuery {
    pub(crate) fn new(settings: MainQuerySettings) -> Rc<Self> {
        Rc::new(Self {
            metamodel: settings.metamodel,
            expression_factory: settings.expression_factory,
            macros: settings.macros,
            dialect: settings.dialect,
            inline_ctes: settings.inline_ctes,
            log_rendered_sql: settings.log_rendered_sql,
            ctes: RefCell::new(CteManager::default()),
            parameters: RefCell::new(ParameterManager::new()),
            new_state_entities: RefCell::new(BTreeSet::new()),
            next_id: Cell::new(1),
        })
    }

    fn next(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub(crate) fn next_builder_id(&self) -> BuilderId {
        BuilderId::new(self.next())
    }

    pub(crate) fn next_join_manager_id(&self) -> JoinManagerId {
        JoinManagerId::new(self.next())
    }

    pub(crate) fn set_parameter(&self, name: &str, value: Value) -> Result<()> {
        self.parameters.borrow_mut().set(name, value)
    }
}

/// Clause an expression is parsed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClauseType {
    Select,
    Join,
    Where,
    GroupBy,
    Having,
    OrderBy,
    CteBind,
    Assignment,
}

/// Everything an expression needs to be parsed and resolved in place: the main
/// query services, the aliases in scope and the owning join manager.
#[derive(Clone)]
pub(crate) struct ClauseScope {
    pub(crate) main: Rc<MainQuery>,
    pub(crate) aliases: AliasManager,
    pub(crate) join_manager: JoinManagerId,
    pub(crate) clause: ClauseType,
    pub(crate) is_subquery: bool,
}

impl ClauseScope {
    pub(crate) fn new(main: Rc<MainQuery>, aliases: AliasManager, join_manager: JoinManagerId) -> Self {
        Self {
            main,
            aliases,
            join_manager,
            clause: ClauseType::Where,
            is_subquery: false,
        }
    }

    pub(crate) fn with_clause(&self, clause: ClauseType) -> Self {
        Self {
            clause,
            ..self.clone()
        }
    }

    /// Scope of a subquery opened from this scope; parent aliases stay visible.
    pub(crate) fn subquery_scope(&self) -> Self {
        Self {
            main: Rc::clone(&self.main),
            aliases: self.aliases.child(),
            join_manager: self.main.next_join_manager_id(),
            clause: ClauseType::Where,
            is_subquery: true,
        }
    }

    /// Scope of an independent query body (set operand, CTE) of the same main query.
    pub(crate) fn sibling_scope(&self) -> Self {
        Self {
            main: Rc::clone(&self.main),
            aliases: AliasManager::new(),
            join_manager: self.main.next_join_manager_id(),
            clause: ClauseType::Where,
            is_subquery: self.is_subquery,
        }
    }

    pub(crate) fn next_builder_id(&self) -> BuilderId {
        self.main.next_builder_id()
    }

    pub(crate) fn parse_expression(&self, text: &str) -> Result<Expression> {
        trace!(clause = ?self.clause, expression = %text, "parsing clause expression");
        let mut expression = self.main.expression_factory.create_simple_expression(
            text,
            self.is_subquery,
            &self.main.macros,
        )?;
        self.resolve_expression(&mut expression)?;
        Ok(expression)
    }

    /// Like [`Self::parse_expression`], but unknown bare names are kept as
    /// subquery placeholders.
    pub(crate) fn parse_expression_with_placeholders(&self, text: &str) -> Result<Expression> {
        trace!(clause = ?self.clause, expression = %text, "parsing clause expression with placeholders");
        let mut expression = self.main.expression_factory.create_simple_expression(
            text,
            self.is_subquery,
            &self.main.macros,
        )?;
        self.resolve(&mut expression, true)?;
        Ok(expression)
    }

    pub(crate) fn parse_predicate(&self, text: &str, allow_subqueries: bool) -> Result<Predicate> {
        trace!(clause = ?self.clause, expression = %text, "parsing clause predicate");
        let mut predicate = self.main.expression_factory.create_boolean_expression(
            text,
            allow_subqueries,
            &self.main.macros,
        )?;
        let mut resolver = OwnerResolver::new(self, allow_subqueries);
        resolver.visit_predicate_mut(&mut predicate);
        resolver.finish()?;
        self.register_predicate_parameters(&predicate);
        Ok(predicate)
    }

    /// Assigns owners to alias-rooted paths and registers referenced parameters.
    pub(crate) fn resolve_expression(&self, expression: &mut Expression) -> Result<()> {
        self.resolve(expression, false)
    }

    fn resolve(&self, expression: &mut Expression, allow_placeholders: bool) -> Result<()> {
        let mut resolver = OwnerResolver::new(self, allow_placeholders);
        resolver.visit_expression_mut(expression);
        resolver.finish()?;
        let mut collector = ParameterCollector::default();
        collector.visit_expression(expression);
        self.register_parameters(collector.names);
        Ok(())
    }

    pub(crate) fn register_predicate_parameters(&self, predicate: &Predicate) {
        let mut collector = ParameterCollector::default();
        collector.visit_predicate(predicate);
        self.register_parameters(collector.names);
    }

    fn register_parameters(&self, names: Vec<String>) {
        let mut parameters = self.main.parameters.borrow_mut();
        for name in names {
            parameters.register(&name);
        }
    }

    /// Turns an inline value into a generated parameter reference.
    pub(crate) fn value_expression(&self, value: Value) -> Expression {
        let name = self.main.parameters.borrow_mut().add_generated(value);
        Expression::parameter(name)
    }
}

/// Unknown bare names are subquery placeholders where those are allowed, result
/// column names in ORDER BY and errors everywhere else.
struct OwnerResolver<'a> {
    scope: &'a ClauseScope,
    allow_placeholders: bool,
    error: Option<CriteriaError>,
}

impl<'a> OwnerResolver<'a> {
    fn new(scope: &'a ClauseScope, allow_placeholders: bool) -> Self {
        Self {
            scope,
            allow_placeholders,
            error: None,
        }
    }

    fn finish(self) -> Result<()> {
        self.error.map_or(Ok(()), Err)
    }

    fn fail(&mut self, error: CriteriaError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl VisitorMut for OwnerResolver<'_> {
    fn visit_path_mut(&mut self, path: &mut PathExpression) {
        if path.owner.is_some() {
            return;
        }
        match self.scope.aliases.lookup(path.alias()) {
            Some(info) => {
                if let Some(attribute) = path.elements.get(1) {
                    if let Err(error) = self.scope.main.metamodel.attribute(&info.entity, attribute) {
                        self.fail(error);
                        return;
                    }
                }
                path.owner = Some(info.join_manager);
            }
            None if !path.is_single_element() => self.fail(CriteriaError::IllegalArgument(format!(
                "Unknown alias '{}' in path '{}'",
                path.alias(),
                path
            ))),
            None if self.allow_placeholders || self.scope.clause == ClauseType::OrderBy => {}
            None => self.fail(CriteriaError::IllegalArgument(format!(
                "Unknown alias '{}'",
                path.alias()
            ))),
        }
    }

    // bound subqueries were resolved in their own scope
    fn visit_subquery_mut(&mut self, _subquery: &mut SubqueryExpression) {}
}
