//! UNION / INTERSECT / EXCEPT chains.
//!
//! A chain collects operands joined by one operator. Switching to a different
//! operator folds the operands collected so far into a nested chain, which makes
//! `a UNION b INTERSECT c` evaluate as `(a UNION b) INTERSECT c`. `start_*`
//! methods open an explicitly nested chain whose `end_set` returns to the outer
//! one.
//!
//! Operands left completely empty are dropped when the chain is rendered, and a
//! chain reduced to a single operand without ORDER BY or LIMIT renders as that
//! operand.

use super::builder::{BaseQueryBuilder, CriteriaBuilder, QueryCore};
use super::conditions::{HavingBuilder, PredicateCollector, WhereBuilder};
use super::joins::AliasManager;
use super::lifecycle::{listener, BuilderEndedListener, BuilderId, SetOperationState, SubqueryBuilderListener};
use super::main_query::{ClauseScope, ClauseType, MainQuery};
use super::model::{OrderByItem, QueryNode, SetOperation, SetOperationType};
use super::pagination::Pagination;
use super::parameters::Value;
use crate::error::{builder_already_ended, CriteriaError, Result};
use crate::render::{self, RenderedQuery};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

pub(crate) enum Operand {
    Query(QueryCore),
    Nested(Rc<ChainData>),
}

pub(crate) struct ChainData {
    id: BuilderId,
    scope: ClauseScope,
    cte_entity: Option<String>,
    operator: Cell<Option<SetOperationType>>,
    operands: RefCell<Vec<Operand>>,
    order_by: RefCell<Vec<OrderByItem>>,
    pagination: Cell<Pagination>,
    state: Cell<SetOperationState>,
}

impl ChainData {
    pub(crate) fn new(scope: &ClauseScope, cte_entity: Option<String>) -> Rc<Self> {
        Rc::new(Self {
            id: scope.next_builder_id(),
            scope: scope.clone(),
            cte_entity,
            operator: Cell::new(None),
            operands: RefCell::new(Vec::new()),
            order_by: RefCell::new(Vec::new()),
            pagination: Cell::new(Pagination::default()),
            state: Cell::new(SetOperationState::Open),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.state.get().is_terminal() {
            Err(builder_already_ended("set operation"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn push_first(&self, operand: Operand) {
        self.operands.borrow_mut().push(operand);
    }

    /// A changed operator folds everything so far into one nested operand, so
    /// operators apply left to right without SQL precedence.
    fn push(&self, operator: SetOperationType, operand: Operand) -> Result<()> {
        self.check_open()?;
        match self.operator.get() {
            None => self.operator.set(Some(operator)),
            Some(current) if current == operator => {}
            Some(current) => {
                let folded = Rc::new(Self {
                    id: self.scope.next_builder_id(),
                    scope: self.scope.clone(),
                    cte_entity: self.cte_entity.clone(),
                    operator: Cell::new(Some(current)),
                    operands: RefCell::new(self.operands.take()),
                    order_by: RefCell::new(Vec::new()),
                    pagination: Cell::new(Pagination::default()),
                    state: Cell::new(SetOperationState::SetOperationEnded),
                });
                self.operands.borrow_mut().push(Operand::Nested(folded));
                self.operator.set(Some(operator));
            }
        }
        self.operands.borrow_mut().push(operand);
        Ok(())
    }

    /// Core of a new operand; CTE chains bind the CTE attributes per operand.
    pub(crate) fn new_operand_core(&self) -> QueryCore {
        let scope = self.scope.sibling_scope();
        match &self.cte_entity {
            Some(entity) => QueryCore::for_cte(scope, entity),
            None => QueryCore::new(scope),
        }
    }

    fn end(&self) -> Result<()> {
        self.check_open()?;
        self.state.set(SetOperationState::SetOperationEnded);
        Ok(())
    }

    fn add_order_by(&self, expression: &str, ascending: bool, nulls_first: Option<bool>) -> Result<()> {
        // operand aliases are out of scope here, bare names refer to result columns
        let expression = self
            .scope
            .sibling_scope()
            .with_clause(ClauseType::OrderBy)
            .parse_expression(expression)?;
        self.order_by.borrow_mut().push(OrderByItem {
            expression,
            ascending,
            nulls_first,
        });
        Ok(())
    }

    fn update_pagination(&self, change: impl FnOnce(&mut Pagination)) {
        let mut pagination = self.pagination.get();
        change(&mut pagination);
        self.pagination.set(pagination);
    }

    /// The chain as a query tree, or `None` when every operand is empty.
    pub(crate) fn to_node(&self) -> Result<Option<QueryNode>> {
        let mut nodes = Vec::new();
        for operand in self.operands.borrow().iter() {
            match operand {
                Operand::Query(core) if core.is_empty() => {
                    trace!(operand = %core.id(), "pruned empty set operand");
                }
                Operand::Query(core) => nodes.push(QueryNode::Select(core.snapshot()?)),
                Operand::Nested(chain) => nodes.extend(chain.to_node()?),
            }
        }
        let order_by = self.order_by.borrow().clone();
        let pagination = self.pagination.get();
        if nodes.len() <= 1 && order_by.is_empty() && pagination.is_empty() {
            return Ok(nodes.pop());
        }
        if nodes.is_empty() {
            return Ok(None);
        }
        Ok(Some(QueryNode::SetOperation(SetOperation {
            operator: self.operator.get().unwrap_or(SetOperationType::Union),
            operands: nodes,
            order_by,
            pagination,
        })))
    }

    fn require_node(&self) -> Result<QueryNode> {
        self.to_node()?.ok_or_else(|| {
            CriteriaError::IllegalState(
                "A set operation requires at least one non-empty operand".to_string(),
            )
        })
    }
}

type ChainListener<Z> = Rc<Box<dyn BuilderEndedListener<Rc<ChainData>, Z>>>;

fn chain_listener<Z: 'static>(finish: impl FnOnce(Rc<ChainData>) -> Result<Z> + 'static) -> ChainListener<Z> {
    Rc::new(listener(move |_, chain: Rc<ChainData>| finish(chain)))
}

/// Ends an operand: no open child, structurally valid unless empty.
fn end_operand(core: &QueryCore) -> Result<()> {
    if core.is_ended() {
        return Err(builder_already_ended("set operand"));
    }
    core.verify_ended()?;
    if !core.is_empty() {
        core.prepare_and_check()?;
    }
    core.mark_ended();
    Ok(())
}

fn leaf_operand<Z: 'static>(
    chain: &Rc<ChainData>,
    operator: SetOperationType,
    finish: &ChainListener<Z>,
) -> Result<LeafSetOperationBuilder<Z>> {
    let core = chain.new_operand_core();
    chain.push(operator, Operand::Query(core.clone()))?;
    Ok(LeafSetOperationBuilder::new(core, Rc::clone(chain), Rc::clone(finish)))
}

/// Opens a nested chain as the next operand of `outer`; `None` makes it the first.
fn nested_operand<Z: 'static>(
    outer: &Rc<ChainData>,
    operator: Option<SetOperationType>,
    finish: &ChainListener<Z>,
) -> Result<StartSetOperationBuilder<OngoingSetOperationBuilder<Z>>> {
    let nested = ChainData::new(&outer.scope, outer.cte_entity.clone());
    let core = nested.new_operand_core();
    nested.push_first(Operand::Query(core.clone()));
    match operator {
        Some(operator) => outer.push(operator, Operand::Nested(Rc::clone(&nested)))?,
        None => outer.push_first(Operand::Nested(Rc::clone(&nested))),
    }
    let outer = Rc::clone(outer);
    let finish = Rc::clone(finish);
    let back_to_outer = chain_listener(move |_| Ok(OngoingSetOperationBuilder { chain: outer, finish }));
    Ok(LeafSetOperationBuilder::new(core, nested, back_to_outer))
}

/// Set operations on a builder. `Leaf` continues the current chain with a new
/// operand, `Start` opens a nested chain as the next operand.
///
/// Operators are applied strictly left to right. When the operator changes, the
/// operands before it are grouped: `a`, `union`, `b`, `intersect`, `c` renders
/// as `(a UNION b) INTERSECT c` even though SQL binds INTERSECT tighter. Use the
/// `start_*` variants to group differently, e.g. `a UNION (b INTERSECT c)`.
pub trait SetOperationBuilder: Sized {
    type Leaf;
    type Start;

    fn set_operation(&self, operator: SetOperationType) -> Result<Self::Leaf>;

    fn start_set_operation(&self, operator: SetOperationType) -> Result<Self::Start>;

    fn union(&self) -> Result<Self::Leaf> {
        self.set_operation(SetOperationType::Union)
    }

    fn union_all(&self) -> Result<Self::Leaf> {
        self.set_operation(SetOperationType::UnionAll)
    }

    fn intersect(&self) -> Result<Self::Leaf> {
        self.set_operation(SetOperationType::Intersect)
    }

    fn intersect_all(&self) -> Result<Self::Leaf> {
        self.set_operation(SetOperationType::IntersectAll)
    }

    fn except(&self) -> Result<Self::Leaf> {
        self.set_operation(SetOperationType::Except)
    }

    fn except_all(&self) -> Result<Self::Leaf> {
        self.set_operation(SetOperationType::ExceptAll)
    }

    fn start_union(&self) -> Result<Self::Start> {
        self.start_set_operation(SetOperationType::Union)
    }

    fn start_union_all(&self) -> Result<Self::Start> {
        self.start_set_operation(SetOperationType::UnionAll)
    }

    fn start_intersect(&self) -> Result<Self::Start> {
        self.start_set_operation(SetOperationType::Intersect)
    }

    fn start_except(&self) -> Result<Self::Start> {
        self.start_set_operation(SetOperationType::Except)
    }
}

struct LeafInner<Z> {
    core: QueryCore,
    chain: Rc<ChainData>,
    finish: ChainListener<Z>,
}

/// An operand of a set-operation chain. `end_set` closes the chain and returns
/// `Z`.
pub struct LeafSetOperationBuilder<Z> {
    inner: Rc<LeafInner<Z>>,
}

/// The first operand of a nested chain.
pub type StartSetOperationBuilder<Z> = LeafSetOperationBuilder<Z>;

impl<Z> Clone for LeafSetOperationBuilder<Z> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<Z: 'static> LeafSetOperationBuilder<Z> {
    fn new(core: QueryCore, chain: Rc<ChainData>, finish: ChainListener<Z>) -> Self {
        Self {
            inner: Rc::new(LeafInner {
                core,
                chain,
                finish,
            }),
        }
    }

    /// Binds a CTE attribute; only operands of a CTE chain have attributes.
    pub fn bind(&self, attribute: &str, expression: &str) -> Result<Self> {
        let core = &self.inner.core;
        core.check_mutable()?;
        let value = core.parse(ClauseType::CteBind, expression)?;
        core.bind(attribute, value)?;
        Ok(self.clone())
    }

    pub fn bind_value(&self, attribute: &str, value: impl Into<Value>) -> Result<Self> {
        let core = &self.inner.core;
        core.check_mutable()?;
        let value = core.scope().value_expression(value.into());
        core.bind(attribute, value)?;
        Ok(self.clone())
    }

    pub fn end_set(&self) -> Result<Z> {
        end_operand(&self.inner.core)?;
        let chain = Rc::clone(&self.inner.chain);
        chain.end()?;
        self.inner.finish.on_builder_ended(chain.id, Rc::clone(&chain))
    }

    /// Ends the operand and continues with ORDER BY/LIMIT for the whole chain.
    pub fn end_set_with(&self) -> Result<OngoingFinalSetOperationBuilder<Z>> {
        end_operand(&self.inner.core)?;
        self.inner.chain.check_open()?;
        Ok(OngoingFinalSetOperationBuilder {
            chain: Rc::clone(&self.inner.chain),
            finish: Rc::clone(&self.inner.finish),
        })
    }
}

impl<Z: 'static> BaseQueryBuilder for LeafSetOperationBuilder<Z> {
    fn query_core(&self) -> &QueryCore {
        &self.inner.core
    }
}

impl<Z: 'static> WhereBuilder for LeafSetOperationBuilder<Z> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.where_collector()
    }
}

impl<Z: 'static> HavingBuilder for LeafSetOperationBuilder<Z> {
    fn having_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.having_collector()
    }
}

impl<Z: 'static> SetOperationBuilder for LeafSetOperationBuilder<Z> {
    type Leaf = LeafSetOperationBuilder<Z>;
    type Start = StartSetOperationBuilder<OngoingSetOperationBuilder<Z>>;

    fn set_operation(&self, operator: SetOperationType) -> Result<Self::Leaf> {
        self.inner.chain.check_open()?;
        end_operand(&self.inner.core)?;
        leaf_operand(&self.inner.chain, operator, &self.inner.finish)
    }

    fn start_set_operation(&self, operator: SetOperationType) -> Result<Self::Start> {
        self.inner.chain.check_open()?;
        end_operand(&self.inner.core)?;
        nested_operand(&self.inner.chain, Some(operator), &self.inner.finish)
    }
}

/// A chain whose last operand was a nested chain that has just ended.
pub struct OngoingSetOperationBuilder<Z> {
    chain: Rc<ChainData>,
    finish: ChainListener<Z>,
}

impl<Z> Clone for OngoingSetOperationBuilder<Z> {
    fn clone(&self) -> Self {
        Self {
            chain: Rc::clone(&self.chain),
            finish: Rc::clone(&self.finish),
        }
    }
}

impl<Z: 'static> OngoingSetOperationBuilder<Z> {
    pub fn end_set(&self) -> Result<Z> {
        self.chain.end()?;
        self.finish
            .on_builder_ended(self.chain.id, Rc::clone(&self.chain))
    }

    pub fn end_set_with(&self) -> Result<OngoingFinalSetOperationBuilder<Z>> {
        self.chain.check_open()?;
        Ok(OngoingFinalSetOperationBuilder {
            chain: Rc::clone(&self.chain),
            finish: Rc::clone(&self.finish),
        })
    }
}

impl<Z: 'static> SetOperationBuilder for OngoingSetOperationBuilder<Z> {
    type Leaf = LeafSetOperationBuilder<Z>;
    type Start = StartSetOperationBuilder<OngoingSetOperationBuilder<Z>>;

    fn set_operation(&self, operator: SetOperationType) -> Result<Self::Leaf> {
        leaf_operand(&self.chain, operator, &self.finish)
    }

    fn start_set_operation(&self, operator: SetOperationType) -> Result<Self::Start> {
        nested_operand(&self.chain, Some(operator), &self.finish)
    }
}

/// ORDER BY and LIMIT of a whole chain, before it returns to `Z`.
pub struct OngoingFinalSetOperationBuilder<Z> {
    chain: Rc<ChainData>,
    finish: ChainListener<Z>,
}

impl<Z> Clone for OngoingFinalSetOperationBuilder<Z> {
    fn clone(&self) -> Self {
        Self {
            chain: Rc::clone(&self.chain),
            finish: Rc::clone(&self.finish),
        }
    }
}

impl<Z: 'static> OngoingFinalSetOperationBuilder<Z> {
    pub fn order_by(&self, expression: &str, ascending: bool, nulls_first: Option<bool>) -> Result<Self> {
        self.chain.check_open()?;
        self.chain.add_order_by(expression, ascending, nulls_first)?;
        Ok(self.clone())
    }

    pub fn order_by_asc(&self, expression: &str) -> Result<Self> {
        self.order_by(expression, true, None)
    }

    pub fn order_by_desc(&self, expression: &str) -> Result<Self> {
        self.order_by(expression, false, None)
    }

    pub fn set_first_result(&self, first_result: u64) -> Result<Self> {
        self.chain.check_open()?;
        self.chain
            .update_pagination(|pagination| pagination.first_result = first_result);
        Ok(self.clone())
    }

    pub fn set_max_results(&self, max_results: u64) -> Result<Self> {
        self.chain.check_open()?;
        self.chain
            .update_pagination(|pagination| pagination.max_results = Some(max_results));
        Ok(self.clone())
    }

    pub fn end(&self) -> Result<Z> {
        self.chain.end()?;
        self.finish
            .on_builder_ended(self.chain.id, Rc::clone(&self.chain))
    }
}

/// A finished top-level set operation.
#[derive(Clone)]
pub struct FinalSetOperationCriteriaBuilder {
    main: Rc<MainQuery>,
    chain: Rc<ChainData>,
}

impl std::fmt::Debug for FinalSetOperationCriteriaBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalSetOperationCriteriaBuilder").finish_non_exhaustive()
    }
}

impl FinalSetOperationCriteriaBuilder {
    fn listener(main: Rc<MainQuery>) -> ChainListener<Self> {
        chain_listener(move |chain| Ok(Self { main, chain }))
    }

    pub fn order_by(&self, expression: &str, ascending: bool, nulls_first: Option<bool>) -> Result<Self> {
        self.chain.add_order_by(expression, ascending, nulls_first)?;
        Ok(self.clone())
    }

    pub fn order_by_asc(&self, expression: &str) -> Result<Self> {
        self.order_by(expression, true, None)
    }

    pub fn order_by_desc(&self, expression: &str) -> Result<Self> {
        self.order_by(expression, false, None)
    }

    pub fn set_first_result(&self, first_result: u64) -> Result<Self> {
        self.chain
            .update_pagination(|pagination| pagination.first_result = first_result);
        Ok(self.clone())
    }

    pub fn set_max_results(&self, max_results: u64) -> Result<Self> {
        self.chain
            .update_pagination(|pagination| pagination.max_results = Some(max_results));
        Ok(self.clone())
    }

    pub fn set_parameter(&self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.main.set_parameter(name, value.into())?;
        Ok(self.clone())
    }

    /// The chain as a tree, with empty operands pruned.
    pub fn query(&self) -> Result<QueryNode> {
        self.chain.require_node()
    }

    pub fn query_string(&self) -> Result<String> {
        Ok(self.render()?.sql)
    }

    pub fn build(&self) -> Result<RenderedQuery> {
        let rendered = self.render()?;
        rendered.ensure_bound()?;
        Ok(rendered)
    }

    fn render(&self) -> Result<RenderedQuery> {
        let node = self.chain.require_node()?;
        render::render_query(&self.main, &node)
    }
}

/// Ends the defining query of `cb` and starts a chain with it as first operand.
fn start_chain(cb: &CriteriaBuilder) -> Result<(Rc<ChainData>, ChainListener<FinalSetOperationCriteriaBuilder>)> {
    let core = cb.core();
    end_operand(core)?;
    let chain = ChainData::new(core.scope(), None);
    chain.push_first(Operand::Query(core.clone()));
    let finish = FinalSetOperationCriteriaBuilder::listener(Rc::clone(core.main()));
    Ok((chain, finish))
}

impl SetOperationBuilder for CriteriaBuilder {
    type Leaf = LeafSetOperationBuilder<FinalSetOperationCriteriaBuilder>;
    type Start = StartSetOperationBuilder<OngoingSetOperationBuilder<FinalSetOperationCriteriaBuilder>>;

    fn set_operation(&self, operator: SetOperationType) -> Result<Self::Leaf> {
        let (chain, finish) = start_chain(self)?;
        leaf_operand(&chain, operator, &finish)
    }

    fn start_set_operation(&self, operator: SetOperationType) -> Result<Self::Start> {
        let (chain, finish) = start_chain(self)?;
        nested_operand(&chain, Some(operator), &finish)
    }
}

/// A top-level chain whose first operand is itself a nested chain.
pub(crate) fn start_set(
    main: Rc<MainQuery>,
) -> Result<StartSetOperationBuilder<OngoingSetOperationBuilder<FinalSetOperationCriteriaBuilder>>> {
    let join_manager = main.next_join_manager_id();
    let scope = ClauseScope::new(Rc::clone(&main), AliasManager::new(), join_manager);
    let chain = ChainData::new(&scope, None);
    let finish = FinalSetOperationCriteriaBuilder::listener(main);
    nested_operand(&chain, None, &finish)
}

/// Chain pieces for a CTE defined by a set operation.
pub(crate) fn start_cte_chain<T: 'static>(
    scope: &ClauseScope,
    entity: &str,
    listener: Box<SubqueryBuilderListener<T>>,
) -> (Rc<ChainData>, ChainListener<FinalSetOperationCteBuilder<T>>) {
    let chain = ChainData::new(scope, Some(entity.to_string()));
    let listener = Rc::new(listener);
    let finish = chain_listener(move |chain| Ok(FinalSetOperationCteBuilder { chain, listener }));
    (chain, finish)
}

/// Continues a CTE body `core` as the first operand of a chain. The CTE listener
/// is taken only once the body has ended, so a failed attempt leaves the CTE open.
pub(crate) fn continue_cte_chain<T: 'static>(
    core: &QueryCore,
    entity: &str,
    operator: SetOperationType,
    listener: impl FnOnce() -> Result<Box<SubqueryBuilderListener<T>>>,
) -> Result<LeafSetOperationBuilder<FinalSetOperationCteBuilder<T>>> {
    end_operand(core)?;
    let (chain, finish) = start_cte_chain(core.scope(), entity, listener()?);
    chain.push_first(Operand::Query(core.clone()));
    leaf_operand(&chain, operator, &finish)
}

/// Like [`continue_cte_chain`] with a nested chain as the next operand.
pub(crate) fn continue_cte_chain_nested<T: 'static>(
    core: &QueryCore,
    entity: &str,
    operator: SetOperationType,
    listener: impl FnOnce() -> Result<Box<SubqueryBuilderListener<T>>>,
) -> Result<StartSetOperationBuilder<OngoingSetOperationBuilder<FinalSetOperationCteBuilder<T>>>> {
    end_operand(core)?;
    let (chain, finish) = start_cte_chain(core.scope(), entity, listener()?);
    chain.push_first(Operand::Query(core.clone()));
    nested_operand(&chain, Some(operator), &finish)
}

/// A CTE chain that starts with a nested chain.
pub(crate) fn start_cte_set<T: 'static>(
    scope: &ClauseScope,
    entity: &str,
    listener: Box<SubqueryBuilderListener<T>>,
) -> Result<StartSetOperationBuilder<OngoingSetOperationBuilder<FinalSetOperationCteBuilder<T>>>> {
    let (chain, finish) = start_cte_chain(scope, entity, listener);
    nested_operand(&chain, None, &finish)
}

/// A finished set operation defining a CTE; `end` registers it.
pub struct FinalSetOperationCteBuilder<T> {
    chain: Rc<ChainData>,
    listener: Rc<Box<SubqueryBuilderListener<T>>>,
}

impl<T> Clone for FinalSetOperationCteBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            chain: Rc::clone(&self.chain),
            listener: Rc::clone(&self.listener),
        }
    }
}

impl<T: 'static> FinalSetOperationCteBuilder<T> {
    pub fn order_by(&self, expression: &str, ascending: bool, nulls_first: Option<bool>) -> Result<Self> {
        self.chain.add_order_by(expression, ascending, nulls_first)?;
        Ok(self.clone())
    }

    pub fn set_max_results(&self, max_results: u64) -> Result<Self> {
        self.chain
            .update_pagination(|pagination| pagination.max_results = Some(max_results));
        Ok(self.clone())
    }

    pub fn end(&self) -> Result<T> {
        let node = self.chain.require_node()?;
        self.listener.on_builder_ended(self.chain.id, node)
    }
}
