//! DELETE, UPDATE and INSERT ... SELECT builders.
//!
//! The same builder serves standalone statements, where ending renders the
//! statement, and returning CTEs, where ending hands the statement to the
//! declaring query. In a CTE every CTE attribute must be filled from the
//! RETURNING list.

use super::builder::QueryCore;
use super::conditions::{PredicateCollector, WhereBuilder};
use super::cte::CteBuilder;
use super::joins::AliasManager;
use super::lifecycle::{listener, BuilderEndedListener, BuilderId};
use super::main_query::{ClauseScope, ClauseType, MainQuery};
use super::model::{Assignment, ModificationQuery, ReturningBinding};
use super::parameters::Value;
use crate::dialect::DbmsStatementType;
use crate::error::{builder_already_ended, CriteriaError, Result};
use crate::expression::Expression;
use crate::render::{self, RenderedQuery};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

type ModificationListener<T> = dyn BuilderEndedListener<ModificationQuery, T>;

struct ModificationInner<T> {
    id: BuilderId,
    core: QueryCore,
    statement_type: DbmsStatementType,
    entity: String,
    cte_entity: Option<String>,
    assignments: RefCell<Vec<Assignment>>,
    returning: RefCell<Vec<ReturningBinding>>,
    listener: RefCell<Option<Box<ModificationListener<T>>>>,
}

/// Builder of one DML statement.
pub struct ModificationCriteriaBuilder<T> {
    inner: Rc<ModificationInner<T>>,
}

pub type DeleteCriteriaBuilder = ModificationCriteriaBuilder<RenderedQuery>;
pub type UpdateCriteriaBuilder = ModificationCriteriaBuilder<RenderedQuery>;
pub type InsertCriteriaBuilder = ModificationCriteriaBuilder<RenderedQuery>;

impl<T> Clone for ModificationCriteriaBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl ModificationCriteriaBuilder<RenderedQuery> {
    /// A top-level statement; `end` renders it like `build`.
    pub(crate) fn standalone(
        main: Rc<MainQuery>,
        statement_type: DbmsStatementType,
        entity: &str,
        alias: Option<&str>,
    ) -> Result<Self> {
        let join_manager = main.next_join_manager_id();
        let scope = ClauseScope::new(Rc::clone(&main), AliasManager::new(), join_manager);
        let on_end = listener(move |_, query: ModificationQuery| {
            let rendered = render::render_modification(&main, &query)?;
            rendered.ensure_bound()?;
            Ok(rendered)
        });
        Self::new(scope, statement_type, entity, alias, None, on_end)
    }
}

impl<T: 'static> ModificationCriteriaBuilder<T> {
    pub(crate) fn new(
        scope: ClauseScope,
        statement_type: DbmsStatementType,
        entity: &str,
        alias: Option<&str>,
        cte_entity: Option<String>,
        listener: Box<ModificationListener<T>>,
    ) -> Result<Self> {
        let id = scope.next_builder_id();
        let core = QueryCore::new(scope);
        match (statement_type, alias) {
            (DbmsStatementType::Delete | DbmsStatementType::Update, Some(alias)) => {
                core.add_root(entity, alias, None)?
            }
            (DbmsStatementType::Insert, None) => {
                core.main().metamodel.entity(entity)?;
            }
            _ => {
                return Err(CriteriaError::IllegalArgument(format!(
                    "Unsupported modification statement {statement_type} on '{entity}'"
                )))
            }
        }
        debug!(statement = %statement_type, entity = %entity, cte = ?cte_entity, "started modification query");
        Ok(Self {
            inner: Rc::new(ModificationInner {
                id,
                core,
                statement_type,
                entity: entity.to_string(),
                cte_entity,
                assignments: RefCell::new(Vec::new()),
                returning: RefCell::new(Vec::new()),
                listener: RefCell::new(Some(listener)),
            }),
        })
    }

    pub fn statement_type(&self) -> DbmsStatementType {
        self.inner.statement_type
    }

    fn require(&self, statement_type: DbmsStatementType, operation: &str) -> Result<()> {
        if self.inner.statement_type == statement_type {
            Ok(())
        } else {
            Err(CriteriaError::IllegalState(format!(
                "'{operation}' is only supported by {statement_type} statements, not {}",
                self.inner.statement_type
            )))
        }
    }

    fn assign(&self, attribute: &str, value: Expression) -> Result<()> {
        let metamodel = &self.inner.core.main().metamodel;
        let target = metamodel.attribute(&self.inner.entity, attribute)?;
        if target.column().is_none() {
            return Err(CriteriaError::IllegalArgument(format!(
                "Attribute '{attribute}' of '{}' has no column to assign",
                self.inner.entity
            )));
        }
        let mut assignments = self.inner.assignments.borrow_mut();
        if assignments.iter().any(|a| a.attribute == attribute) {
            return Err(CriteriaError::IllegalArgument(format!(
                "Attribute '{attribute}' is already assigned"
            )));
        }
        assignments.push(Assignment {
            attribute: attribute.to_string(),
            value,
        });
        Ok(())
    }

    /// `SET attribute = expression` of an UPDATE.
    pub fn set(&self, attribute: &str, expression: &str) -> Result<Self> {
        self.require(DbmsStatementType::Update, "set")?;
        self.inner.core.check_mutable()?;
        let value = self.inner.core.parse(ClauseType::Assignment, expression)?;
        self.assign(attribute, value)?;
        Ok(self.clone())
    }

    pub fn set_value(&self, attribute: &str, value: impl Into<Value>) -> Result<Self> {
        self.require(DbmsStatementType::Update, "set")?;
        self.inner.core.check_mutable()?;
        let value = self.inner.core.scope().value_expression(value.into());
        self.assign(attribute, value)?;
        Ok(self.clone())
    }

    /// Value of an inserted attribute, selected from the INSERT source.
    pub fn bind(&self, attribute: &str, expression: &str) -> Result<Self> {
        self.require(DbmsStatementType::Insert, "bind")?;
        self.inner.core.check_mutable()?;
        let value = self.inner.core.parse(ClauseType::Assignment, expression)?;
        self.assign(attribute, value)?;
        Ok(self.clone())
    }

    pub fn bind_value(&self, attribute: &str, value: impl Into<Value>) -> Result<Self> {
        self.require(DbmsStatementType::Insert, "bind")?;
        self.inner.core.check_mutable()?;
        let value = self.inner.core.scope().value_expression(value.into());
        self.assign(attribute, value)?;
        Ok(self.clone())
    }

    /// Adds a FROM root: the source of an INSERT, the USING list of a DELETE
    /// or the FROM list of an UPDATE.
    pub fn from(&self, entity: &str, alias: &str) -> Result<Self> {
        self.inner.core.add_root(entity, alias, None)?;
        Ok(self.clone())
    }

    fn check_returned(&self, attribute: &str) -> Result<()> {
        let target = self
            .inner
            .core
            .main()
            .metamodel
            .attribute(&self.inner.entity, attribute)?;
        if target.column().is_none() {
            return Err(CriteriaError::IllegalArgument(format!(
                "Attribute '{attribute}' of '{}' cannot be returned",
                self.inner.entity
            )));
        }
        Ok(())
    }

    /// Fills `cte_attribute` of the returning CTE with `attribute` of the
    /// modified entity.
    pub fn returning(&self, cte_attribute: &str, attribute: &str) -> Result<Self> {
        self.inner.core.check_mutable()?;
        let cte_entity = self.inner.cte_entity.as_deref().ok_or_else(|| {
            CriteriaError::IllegalState(
                "Returning bindings to CTE attributes require a returning CTE".to_string(),
            )
        })?;
        self.inner
            .core
            .main()
            .metamodel
            .attribute(cte_entity, cte_attribute)?;
        self.check_returned(attribute)?;
        let mut returning = self.inner.returning.borrow_mut();
        if returning
            .iter()
            .any(|binding| binding.cte_attribute.as_deref() == Some(cte_attribute))
        {
            return Err(CriteriaError::IllegalArgument(format!(
                "The CTE attribute '{cte_attribute}' of '{cte_entity}' is already bound"
            )));
        }
        returning.push(ReturningBinding {
            cte_attribute: Some(cte_attribute.to_string()),
            attribute: attribute.to_string(),
        });
        Ok(self.clone())
    }

    /// RETURNING list of a standalone statement.
    pub fn returning_attributes(&self, attributes: &[&str]) -> Result<Self> {
        self.inner.core.check_mutable()?;
        if self.inner.cte_entity.is_some() {
            return Err(CriteriaError::IllegalState(
                "A returning CTE binds its attributes with 'returning'".to_string(),
            ));
        }
        for attribute in attributes {
            self.check_returned(attribute)?;
        }
        self.inner
            .returning
            .borrow_mut()
            .extend(attributes.iter().map(|attribute| ReturningBinding {
                cte_attribute: None,
                attribute: attribute.to_string(),
            }));
        Ok(self.clone())
    }

    pub fn set_parameter(&self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.inner.core.main().set_parameter(name, value.into())?;
        Ok(self.clone())
    }

    /// The statement as a tree after the structural checks.
    pub fn query(&self) -> Result<ModificationQuery> {
        let core = &self.inner.core;
        core.verify_ended()?;
        core.prepare_and_check()?;
        let assignments = self.inner.assignments.borrow().clone();
        match self.inner.statement_type {
            DbmsStatementType::Update if assignments.is_empty() => {
                return Err(CriteriaError::IllegalState(
                    "An UPDATE requires at least one SET assignment".to_string(),
                ))
            }
            DbmsStatementType::Insert if assignments.is_empty() => {
                return Err(CriteriaError::IllegalState(
                    "An INSERT requires at least one bound attribute".to_string(),
                ))
            }
            _ => {}
        }
        let returning = self.inner.returning.borrow().clone();
        if let Some(cte_entity) = &self.inner.cte_entity {
            let missing: Vec<String> = core
                .main()
                .metamodel
                .column_attributes(cte_entity)?
                .into_iter()
                .filter(|attribute| {
                    !returning
                        .iter()
                        .any(|binding| binding.cte_attribute.as_deref() == Some(&attribute.name))
                })
                .map(|attribute| attribute.name.clone())
                .collect();
            if !missing.is_empty() {
                return Err(CriteriaError::IllegalState(format!(
                    "The CTE '{cte_entity}' has unbound attributes: [{}]",
                    missing.join(", ")
                )));
            }
        }
        Ok(ModificationQuery {
            statement_type: self.inner.statement_type,
            entity: self.inner.entity.clone(),
            query: core.snapshot()?,
            assignments,
            returning,
        })
    }

    pub fn query_string(&self) -> Result<String> {
        Ok(render::render_modification(self.inner.core.main(), &self.query()?)?.sql)
    }

    /// Renders the statement and requires every parameter to be bound.
    pub fn build(&self) -> Result<RenderedQuery> {
        let rendered = render::render_modification(self.inner.core.main(), &self.query()?)?;
        rendered.ensure_bound()?;
        Ok(rendered)
    }

    pub fn end(&self) -> Result<T> {
        if self.inner.core.is_ended() {
            return Err(builder_already_ended("modification"));
        }
        let query = self.query()?;
        let listener = self
            .inner
            .listener
            .borrow_mut()
            .take()
            .ok_or_else(|| builder_already_ended("modification"))?;
        self.inner.core.mark_ended();
        listener.on_builder_ended(self.inner.id, query)
    }
}

impl<T: 'static> WhereBuilder for ModificationCriteriaBuilder<T> {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.inner.core.where_collector()
    }
}

impl<T: 'static> CteBuilder for ModificationCriteriaBuilder<T> {
    fn cte_core(&self) -> Result<QueryCore> {
        self.inner.core.check_mutable()?;
        Ok(self.inner.core.clone())
    }
}
