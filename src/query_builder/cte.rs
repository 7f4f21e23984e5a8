//! Common table expressions.
//!
//! A CTE builder is a child of the query that declares it: the declaring core
//! keeps its `Cte` slot open until the CTE ends, and ending registers the
//! definition with the main query. CTE bodies are independent query bodies with
//! their own alias scope. Their select list comes from attribute binds, so every
//! attribute of the CTE entity has to be bound.

use super::builder::{BaseQueryBuilder, QueryCore};
use super::conditions::{HavingBuilder, PredicateCollector, WhereBuilder};
use super::lifecycle::{
    listener, BuilderId, BuilderSlot, CteBuilderListener, SubqueryBuilderListener,
};
use super::main_query::{ClauseScope, ClauseType};
use super::model::{ModificationQuery, QueryNode, SelectQuery, SetOperationType};
use super::modification::ModificationCriteriaBuilder;
use super::parameters::Value;
use super::set_operation::{
    continue_cte_chain, continue_cte_chain_nested, start_cte_set, FinalSetOperationCteBuilder,
    LeafSetOperationBuilder, OngoingSetOperationBuilder, SetOperationBuilder,
    StartSetOperationBuilder,
};
use crate::dialect::DbmsStatementType;
use crate::error::{builder_already_ended, CriteriaError, Result};
use crate::metamodel::Metamodel;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Body of a registered CTE.
#[derive(Debug, Clone, PartialEq)]
pub enum CteBody {
    Query(QueryNode),
    /// `base <operator> recursive`, rendered with `WITH RECURSIVE`.
    Recursive {
        base: SelectQuery,
        operator: SetOperationType,
        recursive: SelectQuery,
    },
    /// DML statement whose RETURNING list fills the CTE.
    Modification(ModificationQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CteDefinition {
    /// The CTE entity; its table name is the CTE name.
    pub entity: String,
    /// Column names in CTE attribute order.
    pub columns: Vec<String>,
    pub body: CteBody,
}

impl CteDefinition {
    pub fn is_recursive(&self) -> bool {
        matches!(self.body, CteBody::Recursive { .. })
    }

    pub fn is_modification(&self) -> bool {
        matches!(self.body, CteBody::Modification(_))
    }
}

/// CTEs of one main query in declaration order.
#[derive(Debug, Clone, Default)]
pub struct CteManager {
    ctes: Vec<CteDefinition>,
}

impl CteManager {
    pub fn register(&mut self, definition: CteDefinition) -> Result<()> {
        if self.get(&definition.entity).is_some() {
            return Err(CriteriaError::IllegalArgument(format!(
                "CTE '{}' is already defined",
                definition.entity
            )));
        }
        debug!(
            cte = %definition.entity,
            recursive = definition.is_recursive(),
            modification = definition.is_modification(),
            "registered CTE"
        );
        self.ctes.push(definition);
        Ok(())
    }

    pub fn get(&self, entity: &str) -> Option<&CteDefinition> {
        self.ctes.iter().find(|cte| cte.entity == entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CteDefinition> {
        self.ctes.iter()
    }

    pub fn has_recursive(&self) -> bool {
        self.ctes.iter().any(CteDefinition::is_recursive)
    }

    pub fn is_empty(&self) -> bool {
        self.ctes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ctes.len()
    }
}

pub(crate) fn cte_columns(metamodel: &Metamodel, entity: &str) -> Result<Vec<String>> {
    Ok(metamodel
        .column_attributes(entity)?
        .into_iter()
        .filter_map(|attribute| attribute.column().map(str::to_string))
        .collect())
}

/// Opens the `Cte` slot of the declaring core for a new CTE on `entity`.
fn open_cte<B: 'static>(owner: B, parent: QueryCore, entity: &str) -> Result<(ClauseScope, BuilderId, Box<CteBuilderListener<B>>)> {
    let main = parent.main();
    if !main.metamodel.is_cte(entity) {
        return Err(CriteriaError::IllegalArgument(format!(
            "Entity '{entity}' is not a CTE entity"
        )));
    }
    if main.ctes.borrow().get(entity).is_some() {
        return Err(CriteriaError::IllegalArgument(format!(
            "CTE '{entity}' is already defined"
        )));
    }
    let id = parent.open_child(BuilderSlot::Cte)?;
    let scope = parent.scope().sibling_scope();
    let on_end = listener(move |_, definition: CteDefinition| {
        parent.close_child(BuilderSlot::Cte, id)?;
        parent.main().ctes.borrow_mut().register(definition)?;
        Ok(owner)
    });
    Ok((scope, id, on_end))
}

/// Adapts a CTE listener to one receiving the finished body of a set operation.
fn query_listener<T: 'static>(
    metamodel: &Metamodel,
    entity: &str,
    cte_listener: Box<CteBuilderListener<T>>,
) -> Result<Box<SubqueryBuilderListener<T>>> {
    let columns = cte_columns(metamodel, entity)?;
    let entity = entity.to_string();
    Ok(listener(move |id, query: QueryNode| {
        cte_listener.on_builder_ended(
            id,
            CteDefinition {
                entity,
                columns,
                body: CteBody::Query(query),
            },
        )
    }))
}

/// Builders that may declare CTEs.
pub trait CteBuilder: Clone + Sized + 'static {
    #[doc(hidden)]
    fn cte_core(&self) -> Result<QueryCore>;

    /// Declares a CTE defined by a single query.
    fn with(&self, entity: &str) -> Result<FullSelectCteBuilder<Self>> {
        let parent = self.cte_core()?;
        let (scope, id, on_end) = open_cte(self.clone(), parent, entity)?;
        Ok(FullSelectCteBuilder {
            inner: CteInner::new(id, QueryCore::for_cte(scope, entity), entity, on_end),
        })
    }

    /// Declares a recursive CTE: a base query, then `union`/`union_all` and the
    /// recursive part.
    fn with_recursive(&self, entity: &str) -> Result<SelectRecursiveCteBuilder<Self>> {
        let parent = self.cte_core()?;
        let (scope, id, on_end) = open_cte(self.clone(), parent, entity)?;
        Ok(SelectRecursiveCteBuilder {
            inner: CteInner::new(id, QueryCore::for_cte(scope, entity), entity, on_end),
        })
    }

    /// Declares a CTE whose body starts with a nested set operation.
    fn with_start_set(
        &self,
        entity: &str,
    ) -> Result<StartSetOperationBuilder<OngoingSetOperationBuilder<FinalSetOperationCteBuilder<Self>>>> {
        let parent = self.cte_core()?;
        let metamodel = Arc::clone(&parent.main().metamodel);
        let (scope, _, on_end) = open_cte(self.clone(), parent, entity)?;
        start_cte_set(&scope, entity, query_listener(&metamodel, entity, on_end)?)
    }

    /// Declares a CTE filled by the RETURNING list of a DML statement.
    fn with_returning(&self, entity: &str) -> Result<ReturningModificationInitiator<Self>> {
        let parent = self.cte_core()?;
        let (scope, _, on_end) = open_cte(self.clone(), parent, entity)?;
        Ok(ReturningModificationInitiator {
            inner: Rc::new(InitiatorInner {
                scope,
                entity: entity.to_string(),
                listener: RefCell::new(Some(on_end)),
            }),
        })
    }
}

struct CteInner<T> {
    id: BuilderId,
    core: QueryCore,
    entity: String,
    listener: RefCell<Option<Box<CteBuilderListener<T>>>>,
}

impl<T: 'static> CteInner<T> {
    fn new(id: BuilderId, core: QueryCore, entity: &str, listener: Box<CteBuilderListener<T>>) -> Rc<Self> {
        Rc::new(Self {
            id,
            core,
            entity: entity.to_string(),
            listener: RefCell::new(Some(listener)),
        })
    }

    fn take_listener(&self) -> Result<Box<CteBuilderListener<T>>> {
        self.listener
            .borrow_mut()
            .take()
            .ok_or_else(|| builder_already_ended("CTE"))
    }

    fn bind(&self, attribute: &str, expression: &str) -> Result<()> {
        self.core.check_mutable()?;
        let value = self.core.parse(ClauseType::CteBind, expression)?;
        self.core.bind(attribute, value)
    }

    fn bind_value(&self, attribute: &str, value: Value) -> Result<()> {
        self.core.check_mutable()?;
        let value = self.core.scope().value_expression(value);
        self.core.bind(attribute, value)
    }

    fn end_body(core: &QueryCore) -> Result<SelectQuery> {
        if core.is_ended() {
            return Err(builder_already_ended("CTE"));
        }
        core.verify_ended()?;
        core.prepare_and_check()?;
        let query = core.snapshot()?;
        core.mark_ended();
        Ok(query)
    }

    fn finish(&self, body: CteBody) -> Result<T> {
        let columns = cte_columns(&self.core.main().metamodel, &self.entity)?;
        let listener = self.take_listener()?;
        listener.on_builder_ended(
            self.id,
            CteDefinition {
                entity: self.entity.clone(),
                columns,
                body,
            },
        )
    }

    fn set_listener(&self) -> Result<Box<SubqueryBuilderListener<T>>> {
        let listener = self.take_listener()?;
        query_listener(&self.core.main().metamodel, &self.entity, listener)
    }
}

/// Body of a CTE defined by a query; may continue into a set operation.
pub struct FullSelectCteBuilder<T> {
    inner: Rc<CteInner<T>>,
}

impl<T> Clone for FullSelectCteBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> FullSelectCteBuilder<T> {
    pub fn bind(&self, attribute: &str, expression: &str) -> Result<Self> {
        self.inner.bind(attribute, expression)?;
        Ok(self.clone())
    }

    pub fn bind_value(&self, attribute: &str, value: impl Into<Value>) -> Result<Self> {
        self.inner.bind_value(attribute, value.into())?;
        Ok(self.clone())
    }

    pub fn end(&self) -> Result<T> {
        let query = CteInner::<T>::end_body(&self.inner.core)?;
        self.inner.finish(CteBody::Query(QueryNode::Select(query)))
    }
}

impl<T: 'static> BaseQueryBuilder for FullSelectCteBuilder<T> {
    fn query_core(&self) -> &QueryCore {
        &self.inner.core
    }
}

impl<T: 'static> WhereBuilder for FullSelectCteBuilder<T> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.where_collector()
    }
}

impl<T: 'static> HavingBuilder for FullSelectCteBuilder<T> {
    fn having_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.having_collector()
    }
}

impl<T: 'static> SetOperationBuilder for FullSelectCteBuilder<T> {
    type Leaf = LeafSetOperationBuilder<FinalSetOperationCteBuilder<T>>;
    type Start = StartSetOperationBuilder<OngoingSetOperationBuilder<FinalSetOperationCteBuilder<T>>>;

    fn set_operation(&self, operator: SetOperationType) -> Result<Self::Leaf> {
        continue_cte_chain(&self.inner.core, &self.inner.entity, operator, || {
            self.inner.set_listener()
        })
    }

    fn start_set_operation(&self, operator: SetOperationType) -> Result<Self::Start> {
        continue_cte_chain_nested(&self.inner.core, &self.inner.entity, operator, || {
            self.inner.set_listener()
        })
    }
}

/// Base part of a recursive CTE.
pub struct SelectRecursiveCteBuilder<T> {
    inner: Rc<CteInner<T>>,
}

impl<T> Clone for SelectRecursiveCteBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> SelectRecursiveCteBuilder<T> {
    pub fn bind(&self, attribute: &str, expression: &str) -> Result<Self> {
        self.inner.bind(attribute, expression)?;
        Ok(self.clone())
    }

    pub fn bind_value(&self, attribute: &str, value: impl Into<Value>) -> Result<Self> {
        self.inner.bind_value(attribute, value.into())?;
        Ok(self.clone())
    }

    pub fn union(&self) -> Result<SelectCteBuilder<T>> {
        self.recursive_part(SetOperationType::Union)
    }

    pub fn union_all(&self) -> Result<SelectCteBuilder<T>> {
        self.recursive_part(SetOperationType::UnionAll)
    }

    fn recursive_part(&self, operator: SetOperationType) -> Result<SelectCteBuilder<T>> {
        let base = CteInner::<T>::end_body(&self.inner.core)?;
        let listener = self.inner.take_listener()?;
        let scope = self.inner.core.scope().sibling_scope();
        Ok(SelectCteBuilder {
            inner: CteInner::new(
                self.inner.id,
                QueryCore::for_cte(scope, &self.inner.entity),
                &self.inner.entity,
                listener,
            ),
            base: Rc::new((base, operator)),
        })
    }
}

impl<T: 'static> BaseQueryBuilder for SelectRecursiveCteBuilder<T> {
    fn query_core(&self) -> &QueryCore {
        &self.inner.core
    }
}

impl<T: 'static> WhereBuilder for SelectRecursiveCteBuilder<T> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.where_collector()
    }
}

impl<T: 'static> HavingBuilder for SelectRecursiveCteBuilder<T> {
    fn having_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.having_collector()
    }
}

/// Recursive part of a recursive CTE.
pub struct SelectCteBuilder<T> {
    inner: Rc<CteInner<T>>,
    base: Rc<(SelectQuery, SetOperationType)>,
}

impl<T> Clone for SelectCteBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            base: Rc::clone(&self.base),
        }
    }
}

impl<T: 'static> SelectCteBuilder<T> {
    pub fn bind(&self, attribute: &str, expression: &str) -> Result<Self> {
        self.inner.bind(attribute, expression)?;
        Ok(self.clone())
    }

    pub fn bind_value(&self, attribute: &str, value: impl Into<Value>) -> Result<Self> {
        self.inner.bind_value(attribute, value.into())?;
        Ok(self.clone())
    }

    pub fn end(&self) -> Result<T> {
        let recursive = CteInner::<T>::end_body(&self.inner.core)?;
        let (base, operator) = self.base.as_ref().clone();
        self.inner.finish(CteBody::Recursive {
            base,
            operator,
            recursive,
        })
    }
}

impl<T: 'static> BaseQueryBuilder for SelectCteBuilder<T> {
    fn query_core(&self) -> &QueryCore {
        &self.inner.core
    }
}

impl<T: 'static> WhereBuilder for SelectCteBuilder<T> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.where_collector()
    }
}

impl<T: 'static> HavingBuilder for SelectCteBuilder<T> {
    fn having_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.having_collector()
    }
}

struct InitiatorInner<T> {
    scope: ClauseScope,
    entity: String,
    listener: RefCell<Option<Box<CteBuilderListener<T>>>>,
}

/// Picks the DML statement of a returning CTE; usable once.
pub struct ReturningModificationInitiator<T> {
    inner: Rc<InitiatorInner<T>>,
}

impl<T> Clone for ReturningModificationInitiator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> ReturningModificationInitiator<T> {
    pub fn delete(&self, entity: &str, alias: &str) -> Result<ModificationCriteriaBuilder<T>> {
        self.start(DbmsStatementType::Delete, entity, Some(alias))
    }

    pub fn update(&self, entity: &str, alias: &str) -> Result<ModificationCriteriaBuilder<T>> {
        self.start(DbmsStatementType::Update, entity, Some(alias))
    }

    pub fn insert(&self, entity: &str) -> Result<ModificationCriteriaBuilder<T>> {
        self.start(DbmsStatementType::Insert, entity, None)
    }

    fn start(
        &self,
        statement_type: DbmsStatementType,
        entity: &str,
        alias: Option<&str>,
    ) -> Result<ModificationCriteriaBuilder<T>> {
        let cte_listener = self
            .inner
            .listener
            .borrow_mut()
            .take()
            .ok_or_else(|| builder_already_ended("returning CTE initiator"))?;
        let cte_entity = self.inner.entity.clone();
        let columns = cte_columns(&self.inner.scope.main.metamodel, &cte_entity)?;
        let definition_entity = cte_entity.clone();
        let on_end = listener(move |id, query: ModificationQuery| {
            cte_listener.on_builder_ended(
                id,
                CteDefinition {
                    entity: definition_entity,
                    columns,
                    body: CteBody::Modification(query),
                },
            )
        });
        ModificationCriteriaBuilder::new(
            self.inner.scope.clone(),
            statement_type,
            entity,
            alias,
            Some(cte_entity),
            on_end,
        )
    }
}
