//! Query builders.
//!
//! [`QueryCore`] holds the mutable clause state of one query body: FROM roots and
//! joins, SELECT, GROUP BY, ORDER BY, pagination and the WHERE/HAVING collectors.
//! Every query-like builder (main query, subquery, set operand, CTE body) wraps a
//! core and exposes it through [`BaseQueryBuilder`], whose default methods form
//! the shared fluent surface.

use super::case_when::{CaseWhenStarterBuilder, SimpleCaseWhenBuilder};
use super::conditions::{HavingBuilder, PredicateCollector, WhereBuilder};
use super::correlation::{CorrelationBuilder, CorrelationProvider};
use super::cte::CteBuilder;
use super::joins::{
    AliasInfo, AliasManager, FromRoot, JoinManager, JoinManagerId, JoinNode, JoinOnBuilder,
    JoinTarget, JoinType,
};
use super::lifecycle::{
    listener, BuilderId, BuilderSlot, BuilderState, ExpressionBuilderEndedListener, OpenBuilders,
};
use super::main_query::{ClauseScope, ClauseType, MainQuery};
use super::model::{OrderByItem, QueryNode, SelectItem, SelectQuery};
use super::pagination::Pagination;
use super::parameters::Value;
use super::subquery::SubqueryInitiator;
use crate::dialect::DbmsModificationState;
use crate::error::{builder_already_ended, previous_builder_not_ended, CriteriaError, Result};
use crate::expression::{
    CompoundKind, CompoundPredicate, CopyContext, Expression, FunctionExpression, Predicate,
};
use crate::render::{self, RenderedQuery};
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use tracing::debug;

/// Clause state of one query body, excluding WHERE and HAVING.
#[derive(Debug, Clone)]
pub(crate) struct QueryState {
    pub(crate) from: JoinManager,
    pub(crate) select: Vec<SelectItem>,
    pub(crate) distinct: bool,
    pub(crate) group_by: Vec<Expression>,
    pub(crate) order_by: Vec<OrderByItem>,
    pub(crate) pagination: Pagination,
    /// CTE attribute binds, in bind order.
    pub(crate) binds: Vec<(String, Expression)>,
    /// Set when the body defines the rows of a CTE entity.
    pub(crate) cte_entity: Option<String>,
}

impl QueryState {
    fn new(id: JoinManagerId) -> Self {
        Self {
            from: JoinManager::new(id),
            select: Vec::new(),
            distinct: false,
            group_by: Vec::new(),
            order_by: Vec::new(),
            pagination: Pagination::default(),
            binds: Vec::new(),
            cte_entity: None,
        }
    }
}

struct CoreInner {
    scope: ClauseScope,
    state: RefCell<QueryState>,
    where_clause: PredicateCollector,
    having: PredicateCollector,
    open: RefCell<OpenBuilders>,
    builder_state: Cell<BuilderState>,
}

/// Shared handle to the clause state of one query body.
#[doc(hidden)]
#[derive(Clone)]
pub struct QueryCore {
    inner: Rc<CoreInner>,
}

impl QueryCore {
    pub(crate) fn new(scope: ClauseScope) -> Self {
        let state = QueryState::new(scope.join_manager);
        Self::from_parts(
            scope,
            state,
            CompoundPredicate::new(CompoundKind::And),
            CompoundPredicate::new(CompoundKind::And),
        )
    }

    fn from_parts(
        scope: ClauseScope,
        state: QueryState,
        where_clause: CompoundPredicate,
        having: CompoundPredicate,
    ) -> Self {
        Self {
            inner: Rc::new(CoreInner {
                where_clause: PredicateCollector::with_predicate(
                    scope.with_clause(ClauseType::Where),
                    where_clause,
                ),
                having: PredicateCollector::with_predicate(
                    scope.with_clause(ClauseType::Having),
                    having,
                ),
                scope,
                state: RefCell::new(state),
                open: RefCell::new(OpenBuilders::default()),
                builder_state: Cell::new(BuilderState::Open),
            }),
        }
    }

    /// Core of a CTE body defining `entity`.
    pub(crate) fn for_cte(scope: ClauseScope, entity: &str) -> Self {
        let core = Self::new(scope);
        core.inner.state.borrow_mut().cte_entity = Some(entity.to_string());
        core
    }

    pub(crate) fn scope(&self) -> &ClauseScope {
        &self.inner.scope
    }

    pub(crate) fn main(&self) -> &Rc<MainQuery> {
        &self.inner.scope.main
    }

    pub(crate) fn id(&self) -> JoinManagerId {
        self.inner.scope.join_manager
    }

    pub(crate) fn state(&self) -> Ref<'_, QueryState> {
        self.inner.state.borrow()
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.inner.builder_state.get().is_terminal()
    }

    pub(crate) fn mark_ended(&self) {
        self.inner.builder_state.set(BuilderState::Ended);
    }

    fn has_open_child(&self) -> bool {
        self.inner.open.borrow().any_open()
            || self.inner.where_clause.has_open_child()
            || self.inner.having.has_open_child()
    }

    /// Fails when the builder has ended or a child builder is open.
    pub(crate) fn check_mutable(&self) -> Result<()> {
        if self.is_ended() {
            return Err(builder_already_ended("query"));
        }
        if self.has_open_child() {
            return Err(previous_builder_not_ended());
        }
        Ok(())
    }

    /// Fails when any child builder of this body is still open.
    pub(crate) fn verify_ended(&self) -> Result<()> {
        self.inner.open.borrow().verify_ended()?;
        self.inner.where_clause.verify_ended()?;
        self.inner.having.verify_ended()
    }

    pub(crate) fn where_collector(&self) -> Result<PredicateCollector> {
        self.check_mutable()?;
        Ok(self.inner.where_clause.clone())
    }

    pub(crate) fn having_collector(&self) -> Result<PredicateCollector> {
        self.check_mutable()?;
        Ok(self.inner.having.clone())
    }

    /// Applies a change to the clause state after the lifecycle checks.
    pub(crate) fn update<R>(&self, change: impl FnOnce(&mut QueryState) -> R) -> Result<R> {
        self.check_mutable()?;
        Ok(change(&mut self.inner.state.borrow_mut()))
    }

    pub(crate) fn open_child(&self, slot: BuilderSlot) -> Result<BuilderId> {
        self.check_mutable()?;
        let id = self.scope().next_builder_id();
        self.inner.open.borrow_mut().open(slot, id)?;
        Ok(id)
    }

    pub(crate) fn close_child(&self, slot: BuilderSlot, id: BuilderId) -> Result<()> {
        self.inner.open.borrow_mut().close(slot, id)
    }

    pub(crate) fn parse(&self, clause: ClauseType, expression: &str) -> Result<Expression> {
        self.scope().with_clause(clause).parse_expression(expression)
    }

    pub(crate) fn add_root(
        &self,
        entity: &str,
        alias: &str,
        modification_state: Option<DbmsModificationState>,
    ) -> Result<()> {
        self.check_mutable()?;
        self.main().metamodel.entity(entity)?;
        self.register_alias(alias, entity)?;
        self.inner.state.borrow_mut().from.roots.push(FromRoot {
            entity: entity.to_string(),
            alias: alias.to_string(),
            modification_state,
        });
        Ok(())
    }

    fn register_alias(&self, alias: &str, entity: &str) -> Result<()> {
        self.scope().aliases.register(
            alias,
            AliasInfo {
                entity: entity.to_string(),
                join_manager: self.id(),
            },
        )
    }

    /// Joins the association `path` (`alias.attribute`) of an alias of this body.
    pub(crate) fn add_join(&self, path: &str, alias: &str, join_type: JoinType, fetch: bool) -> Result<()> {
        self.check_mutable()?;
        let (parent_alias, attribute) = path.split_once('.').ok_or_else(|| {
            CriteriaError::IllegalArgument(format!(
                "Join path '{path}' must have the form 'alias.attribute'"
            ))
        })?;
        if attribute.contains('.') {
            return Err(CriteriaError::IllegalArgument(format!(
                "Join path '{path}' must have the form 'alias.attribute'"
            )));
        }
        let parent_entity = self
            .state()
            .from
            .alias_entity(parent_alias)
            .map(str::to_string)
            .ok_or_else(|| {
                CriteriaError::IllegalArgument(format!(
                    "Join parent '{parent_alias}' is not an alias of this query"
                ))
            })?;
        let target = {
            let metamodel = &self.main().metamodel;
            let attribute = metamodel.attribute(&parent_entity, attribute)?;
            attribute.target().map(str::to_string).ok_or_else(|| {
                CriteriaError::IllegalArgument(format!(
                    "Attribute '{path}' is not an association and cannot be joined"
                ))
            })?
        };
        self.register_alias(alias, &target)?;
        self.inner.state.borrow_mut().from.joins.push(JoinNode {
            join_type,
            target: JoinTarget::Attribute {
                parent_alias: parent_alias.to_string(),
                attribute: attribute.to_string(),
            },
            alias: alias.to_string(),
            entity: target,
            fetch,
            on: None,
        });
        Ok(())
    }

    /// Joins an unrelated entity; the ON clause is added by a [`JoinOnBuilder`].
    pub(crate) fn add_entity_join(&self, entity: &str, alias: &str, join_type: JoinType) -> Result<()> {
        self.check_mutable()?;
        self.main().metamodel.entity(entity)?;
        self.register_alias(alias, entity)?;
        self.inner.state.borrow_mut().from.joins.push(JoinNode {
            join_type,
            target: JoinTarget::Entity,
            alias: alias.to_string(),
            entity: entity.to_string(),
            fetch: false,
            on: None,
        });
        Ok(())
    }

    /// Opens the ON clause builder of the join registered under `alias`.
    pub(crate) fn join_on_builder<B: 'static>(&self, owner: B, alias: &str) -> Result<JoinOnBuilder<B>> {
        let id = self.open_child(BuilderSlot::JoinOn)?;
        let core = self.clone();
        let alias = alias.to_string();
        Ok(JoinOnBuilder::new(
            self.scope(),
            listener(move |_, predicate: CompoundPredicate| {
                core.close_child(BuilderSlot::JoinOn, id)?;
                let mut state = core.inner.state.borrow_mut();
                let join = state.from.join_mut(&alias).ok_or_else(|| {
                    CriteriaError::IllegalState(format!("Join '{alias}' disappeared"))
                })?;
                join.on = (!predicate.is_empty()).then_some(predicate);
                drop(state);
                Ok(owner)
            }),
        ))
    }

    /// Adds a finished predicate to WHERE.
    pub(crate) fn add_where(&self, predicate: Predicate) -> Result<()> {
        self.inner.where_clause.add(predicate)
    }

    /// Binds a CTE attribute of a CTE body.
    pub(crate) fn bind(&self, attribute: &str, value: Expression) -> Result<()> {
        self.check_mutable()?;
        let entity = self.state().cte_entity.clone().ok_or_else(|| {
            CriteriaError::IllegalState("Attributes can only be bound in a CTE query".to_string())
        })?;
        self.main().metamodel.attribute(&entity, attribute)?;
        let mut state = self.inner.state.borrow_mut();
        if state.binds.iter().any(|(bound, _)| bound == attribute) {
            return Err(CriteriaError::IllegalArgument(format!(
                "The CTE attribute '{attribute}' of '{entity}' is already bound"
            )));
        }
        state.binds.push((attribute.to_string(), value));
        Ok(())
    }

    /// No FROM root, SELECT item or restriction.
    pub(crate) fn is_empty(&self) -> bool {
        let state = self.state();
        state.from.is_empty()
            && state.select.is_empty()
            && state.binds.is_empty()
            && self.inner.where_clause.snapshot().is_empty()
    }

    /// Structural checks run before a body is turned into SQL.
    pub(crate) fn prepare_and_check(&self) -> Result<()> {
        let state = self.state();
        for join in &state.from.joins {
            if join.target == JoinTarget::Entity && join.on.is_none() {
                return Err(CriteriaError::IllegalState(format!(
                    "The entity join '{}' requires an ON clause",
                    join.alias
                )));
            }
        }
        if state.select.is_empty() {
            return Ok(());
        }
        let mut missing: Vec<String> = Vec::new();
        for join in state.from.joins.iter().filter(|join| join.fetch) {
            let owner = fetch_owner(&state.from, &join.alias);
            let selected = state.select.iter().any(|item| {
                item.expression
                    .as_path()
                    .is_some_and(|path| path.is_single_element() && path.alias() == owner)
            });
            if !selected && !missing.iter().any(|m| m == owner) {
                missing.push(owner.to_string());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CriteriaError::IllegalState(format!(
                "Missing fetch owners: [{}]",
                missing.join(", ")
            )))
        }
    }

    /// The body as an owned tree. CTE bodies get their select list from the
    /// attribute binds, in CTE attribute order.
    pub(crate) fn snapshot(&self) -> Result<SelectQuery> {
        let state = self.state();
        let mut query = SelectQuery::new(state.from.clone());
        query.select = state.select.clone();
        query.distinct = state.distinct;
        query.where_clause = self.inner.where_clause.snapshot();
        query.group_by = state.group_by.clone();
        query.having = self.inner.having.snapshot();
        query.order_by = state.order_by.clone();
        query.pagination = state.pagination;
        if let Some(entity) = &state.cte_entity {
            query.select = self.bound_select(entity, &state.binds)?;
        }
        Ok(query)
    }

    fn bound_select(&self, entity: &str, binds: &[(String, Expression)]) -> Result<Vec<SelectItem>> {
        let attributes = self.main().metamodel.column_attributes(entity)?;
        let mut select = Vec::with_capacity(attributes.len());
        let mut missing = Vec::new();
        for attribute in attributes {
            match binds.iter().find(|(bound, _)| bound == &attribute.name) {
                Some((_, expression)) => select.push(SelectItem {
                    expression: expression.clone(),
                    alias: None,
                }),
                None => missing.push(attribute.name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(select)
        } else {
            Err(CriteriaError::IllegalState(format!(
                "The CTE '{entity}' has unbound attributes: [{}]",
                missing.join(", ")
            )))
        }
    }

    /// Deep copy into `scope`: aliases are re-registered under the new join
    /// manager and every path owner is remapped.
    pub(crate) fn copy_into(&self, scope: ClauseScope) -> Result<QueryCore> {
        self.verify_ended()?;
        let context = CopyContext::new().with_mapping(self.id(), scope.join_manager);
        let state = self.state();
        for root in &state.from.roots {
            scope.aliases.register(
                &root.alias,
                AliasInfo {
                    entity: root.entity.clone(),
                    join_manager: scope.join_manager,
                },
            )?;
        }
        for join in &state.from.joins {
            scope.aliases.register(
                &join.alias,
                AliasInfo {
                    entity: join.entity.clone(),
                    join_manager: scope.join_manager,
                },
            )?;
        }

        let mut copy = state.clone();
        copy.from.id = scope.join_manager;
        for join in &mut copy.from.joins {
            if let Some(on) = &mut join.on {
                context.remap_compound(on);
            }
        }
        for item in &mut copy.select {
            item.expression = item.expression.copy(&context);
        }
        copy.group_by = copy.group_by.iter().map(|e| e.copy(&context)).collect();
        for item in &mut copy.order_by {
            item.expression = item.expression.copy(&context);
        }
        for (_, expression) in &mut copy.binds {
            *expression = expression.copy(&context);
        }
        let where_clause = copy_compound(&self.inner.where_clause.snapshot(), &context);
        let having = copy_compound(&self.inner.having.snapshot(), &context);
        debug!(from = %self.id(), to = %scope.join_manager, "copied query body");
        Ok(Self::from_parts(scope, copy, where_clause, having))
    }
}

fn copy_compound(compound: &CompoundPredicate, context: &CopyContext) -> CompoundPredicate {
    let mut copy = compound.clone();
    context.remap_compound(&mut copy);
    copy
}

/// The FROM root a fetch join hangs off.
fn fetch_owner<'a>(from: &'a JoinManager, alias: &'a str) -> &'a str {
    let mut current = alias;
    while let Some(parent) = from.join(current).and_then(JoinNode::parent_alias) {
        current = parent;
    }
    current
}

/// The fluent surface shared by every query-like builder.
pub trait BaseQueryBuilder: Clone + Sized + 'static {
    #[doc(hidden)]
    fn query_core(&self) -> &QueryCore;

    fn from(&self, entity: &str, alias: &str) -> Result<Self> {
        self.query_core().add_root(entity, alias, None)?;
        Ok(self.clone())
    }

    /// Reads the state of `entity` before the DML statements of this query ran.
    fn from_old(&self, entity: &str, alias: &str) -> Result<Self> {
        self.query_core()
            .add_root(entity, alias, Some(DbmsModificationState::Old))?;
        Ok(self.clone())
    }

    /// Reads the state of `entity` after the DML statements of this query ran.
    fn from_new(&self, entity: &str, alias: &str) -> Result<Self> {
        let core = self.query_core();
        core.add_root(entity, alias, Some(DbmsModificationState::New))?;
        core.main()
            .new_state_entities
            .borrow_mut()
            .insert(entity.to_string());
        Ok(self.clone())
    }

    fn select(&self, expression: &str) -> Result<Self> {
        push_select(self.query_core(), expression, None)?;
        Ok(self.clone())
    }

    fn select_as(&self, expression: &str, alias: &str) -> Result<Self> {
        push_select(self.query_core(), expression, Some(alias))?;
        Ok(self.clone())
    }

    /// Starts a scalar subquery select item.
    fn select_subquery(&self, alias: &str) -> Result<SubqueryInitiator<Self>> {
        let core = self.query_core();
        let id = core.open_child(BuilderSlot::SelectSubquery)?;
        let owner = self.clone();
        let alias = alias.to_string();
        Ok(SubqueryInitiator::new(
            &core.scope().with_clause(ClauseType::Select),
            id,
            listener(move |_, query: QueryNode| {
                let core = owner.query_core();
                core.close_child(BuilderSlot::SelectSubquery, id)?;
                core.update(|state| {
                    state.select.push(SelectItem {
                        expression: Expression::subquery(query),
                        alias: Some(alias),
                    })
                })?;
                Ok(owner.clone())
            }),
        ))
    }

    /// Starts a searched CASE select item.
    fn select_case(&self, alias: &str) -> Result<CaseWhenStarterBuilder<Self>> {
        let core = self.query_core();
        let id = core.open_child(BuilderSlot::CaseExpression)?;
        Ok(CaseWhenStarterBuilder::new(
            &core.scope().with_clause(ClauseType::Select),
            id,
            None,
            case_select_listener(self, id, alias),
        ))
    }

    /// Starts a simple CASE select item over `expression`.
    fn select_simple_case(&self, expression: &str, alias: &str) -> Result<SimpleCaseWhenBuilder<Self>> {
        let core = self.query_core();
        core.check_mutable()?;
        let operand = core.parse(ClauseType::Select, expression)?;
        let id = core.open_child(BuilderSlot::CaseExpression)?;
        Ok(SimpleCaseWhenBuilder::new(
            &core.scope().with_clause(ClauseType::Select),
            id,
            operand,
            case_select_listener(self, id, alias),
        ))
    }

    fn distinct(&self) -> Result<Self> {
        self.query_core().update(|state| state.distinct = true)?;
        Ok(self.clone())
    }

    fn join(&self, path: &str, alias: &str, join_type: JoinType) -> Result<Self> {
        self.query_core().add_join(path, alias, join_type, false)?;
        Ok(self.clone())
    }

    fn inner_join(&self, path: &str, alias: &str) -> Result<Self> {
        self.join(path, alias, JoinType::Inner)
    }

    fn left_join(&self, path: &str, alias: &str) -> Result<Self> {
        self.join(path, alias, JoinType::Left)
    }

    fn right_join(&self, path: &str, alias: &str) -> Result<Self> {
        self.join(path, alias, JoinType::Right)
    }

    fn full_join(&self, path: &str, alias: &str) -> Result<Self> {
        self.join(path, alias, JoinType::Full)
    }

    /// Fetch joins also select the joined entity; their owner must be selected.
    fn join_fetch(&self, path: &str, alias: &str, join_type: JoinType) -> Result<Self> {
        self.query_core().add_join(path, alias, join_type, true)?;
        Ok(self.clone())
    }

    fn inner_join_fetch(&self, path: &str, alias: &str) -> Result<Self> {
        self.join_fetch(path, alias, JoinType::Inner)
    }

    fn left_join_fetch(&self, path: &str, alias: &str) -> Result<Self> {
        self.join_fetch(path, alias, JoinType::Left)
    }

    /// Association join with additional ON restrictions.
    fn join_on(&self, path: &str, alias: &str, join_type: JoinType) -> Result<JoinOnBuilder<Self>> {
        let core = self.query_core();
        core.add_join(path, alias, join_type, false)?;
        core.join_on_builder(self.clone(), alias)
    }

    /// Join of an unrelated entity; the ON clause is mandatory.
    fn join_entity_on(&self, entity: &str, alias: &str, join_type: JoinType) -> Result<JoinOnBuilder<Self>> {
        let core = self.query_core();
        core.add_entity_join(entity, alias, join_type)?;
        core.join_on_builder(self.clone(), alias)
    }

    fn group_by(&self, expression: &str) -> Result<Self> {
        let core = self.query_core();
        core.check_mutable()?;
        let expression = core.parse(ClauseType::GroupBy, expression)?;
        core.update(|state| state.group_by.push(expression))?;
        Ok(self.clone())
    }

    fn order_by(&self, expression: &str, ascending: bool, nulls_first: Option<bool>) -> Result<Self> {
        let core = self.query_core();
        core.check_mutable()?;
        let expression = core.parse(ClauseType::OrderBy, expression)?;
        core.update(|state| {
            state.order_by.push(OrderByItem {
                expression,
                ascending,
                nulls_first,
            })
        })?;
        Ok(self.clone())
    }

    fn order_by_asc(&self, expression: &str) -> Result<Self> {
        self.order_by(expression, true, None)
    }

    fn order_by_desc(&self, expression: &str) -> Result<Self> {
        self.order_by(expression, false, None)
    }

    fn set_first_result(&self, first_result: u64) -> Result<Self> {
        self.query_core()
            .update(|state| state.pagination.first_result = first_result)?;
        Ok(self.clone())
    }

    fn set_max_results(&self, max_results: u64) -> Result<Self> {
        self.query_core()
            .update(|state| state.pagination.max_results = Some(max_results))?;
        Ok(self.clone())
    }

    fn first_result(&self) -> u64 {
        self.query_core().state().pagination.first_result
    }

    fn max_results(&self) -> Option<u64> {
        self.query_core().state().pagination.max_results
    }

    /// Lets `provider` add correlated roots, joins and restrictions. The provider
    /// must leave first-result and max-results untouched.
    fn apply_correlation(&self, provider: &dyn CorrelationProvider, expression: &str) -> Result<Self> {
        let core = self.query_core();
        core.check_mutable()?;
        let before = core.state().pagination;
        let builder = CorrelationBuilder::new(core.clone());
        provider.apply_correlation(&builder, expression)?;
        core.verify_ended()?;
        if core.state().pagination != before {
            return Err(CriteriaError::IllegalArgument(format!(
                "The correlation provider '{}' changed the first result or max results of the query",
                provider.name()
            )));
        }
        debug!(provider = %provider.name(), expression = %expression, "applied correlation");
        Ok(self.clone())
    }
}

fn push_select(core: &QueryCore, expression: &str, alias: Option<&str>) -> Result<()> {
    core.check_mutable()?;
    let expression = core.parse(ClauseType::Select, expression)?;
    core.update(|state| {
        state.select.push(SelectItem {
            expression,
            alias: alias.map(str::to_string),
        })
    })
}

fn case_select_listener<B: BaseQueryBuilder>(
    owner: &B,
    id: BuilderId,
    alias: &str,
) -> Box<ExpressionBuilderEndedListener<B>> {
    let owner = owner.clone();
    let alias = alias.to_string();
    listener(move |_, case: Expression| {
        let core = owner.query_core();
        core.close_child(BuilderSlot::CaseExpression, id)?;
        core.update(|state| {
            state.select.push(SelectItem {
                expression: case,
                alias: Some(alias),
            })
        })?;
        Ok(owner.clone())
    })
}

/// Top-level SELECT query.
///
/// The builder is a cheap handle: clones share the same query. Fluent methods
/// return the handle so calls chain with `?`.
#[derive(Clone)]
pub struct CriteriaBuilder {
    core: QueryCore,
}

impl std::fmt::Debug for CriteriaBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriteriaBuilder").finish_non_exhaustive()
    }
}

impl CriteriaBuilder {
    pub(crate) fn new(main: Rc<MainQuery>) -> Self {
        let join_manager = main.next_join_manager_id();
        let scope = ClauseScope::new(main, AliasManager::new(), join_manager);
        Self {
            core: QueryCore::new(scope),
        }
    }

    pub(crate) fn from_core(core: QueryCore) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &QueryCore {
        &self.core
    }

    pub fn set_parameter(&self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.core.main().set_parameter(name, value.into())?;
        Ok(self.clone())
    }

    /// Names of every parameter of the query, in registration order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.core.main().parameters.borrow().names().to_vec()
    }

    /// Independent copy of the query body. CTEs and parameters stay shared with
    /// the original; the copy gets its own join manager.
    pub fn copy(&self) -> Result<CriteriaBuilder> {
        let main = Rc::clone(self.core.main());
        let join_manager = main.next_join_manager_id();
        let scope = ClauseScope::new(main, AliasManager::new(), join_manager);
        Ok(Self {
            core: self.core.copy_into(scope)?,
        })
    }

    /// The current query body as a tree.
    pub fn query(&self) -> Result<SelectQuery> {
        self.core.verify_ended()?;
        self.core.snapshot()
    }

    pub fn query_string(&self) -> Result<String> {
        Ok(self.render()?.sql)
    }

    /// Renders the query and requires every parameter to be bound.
    pub fn build(&self) -> Result<RenderedQuery> {
        let rendered = self.render()?;
        rendered.ensure_bound()?;
        Ok(rendered)
    }

    fn render(&self) -> Result<RenderedQuery> {
        self.core.verify_ended()?;
        self.core.prepare_and_check()?;
        let query = QueryNode::Select(self.core.snapshot()?);
        render::render_query(self.core.main(), &query)
    }

    /// Counts the rows the query returns: `COUNT(*)` without joins, otherwise
    /// `COUNT(DISTINCT root)`. Ordering and pagination are dropped.
    pub fn count_query_string(&self) -> Result<String> {
        let copy = self.copy()?;
        let core = copy.core();
        let root_alias = core
            .state()
            .from
            .roots
            .first()
            .map(|root| root.alias.clone())
            .ok_or_else(|| {
                CriteriaError::IllegalState("A count query requires a FROM root".to_string())
            })?;
        let has_joins = !core.state().from.joins.is_empty();
        let argument = if has_joins {
            core.parse(ClauseType::Select, &root_alias)?
        } else {
            Expression::path("*")
        };
        core.update(|state| {
            state.select = vec![SelectItem {
                expression: Expression::Function(FunctionExpression {
                    name: "COUNT".to_string(),
                    arguments: vec![argument],
                    distinct: has_joins,
                }),
                alias: None,
            }];
            state.distinct = false;
            state.order_by.clear();
            state.pagination = Pagination::default();
            for join in &mut state.from.joins {
                join.fetch = false;
            }
        })?;
        copy.query_string()
    }
}

impl BaseQueryBuilder for CriteriaBuilder {
    fn query_core(&self) -> &QueryCore {
        &self.core
    }
}

impl WhereBuilder for CriteriaBuilder {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.core.where_collector()
    }
}

impl HavingBuilder for CriteriaBuilder {
    fn having_collector(&self) -> Result<PredicateCollector> {
        self.core.having_collector()
    }
}

impl CteBuilder for CriteriaBuilder {
    fn cte_core(&self) -> Result<QueryCore> {
        self.core.check_mutable()?;
        Ok(self.core.clone())
    }
}
