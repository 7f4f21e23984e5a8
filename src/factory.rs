//! # Criteria Builder Factory
//!
//! Entry point of the library. A factory is built once per persistence unit and
//! is shared freely: it holds the metamodel, the dialect and the (optionally
//! caching) expression factory. Every `create`/`delete`/`update`/`insert`/
//! `start_set` call starts an independent query with its own parameters and CTEs.

use crate::config::CriteriaConfig;
use crate::dialect::{dialect_for_name, DbmsDialect, DbmsStatementType};
use crate::error::Result;
use crate::expression::{CachingExpressionFactory, ExpressionFactory, MacroConfiguration, SimpleExpressionFactory};
use crate::metamodel::Metamodel;
use crate::query_builder::main_query::{MainQuery, MainQuerySettings};
use crate::query_builder::modification::{
    DeleteCriteriaBuilder, InsertCriteriaBuilder, ModificationCriteriaBuilder, UpdateCriteriaBuilder,
};
use crate::query_builder::set_operation::{
    self, FinalSetOperationCriteriaBuilder, OngoingSetOperationBuilder, StartSetOperationBuilder,
};
use crate::query_builder::CriteriaBuilder;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct CriteriaBuilderFactory {
    metamodel: Arc<Metamodel>,
    expression_factory: Arc<dyn ExpressionFactory>,
    macros: MacroConfiguration,
    dialect: Arc<dyn DbmsDialect>,
    config: CriteriaConfig,
}

impl CriteriaBuilderFactory {
    pub fn new(config: &CriteriaConfig, metamodel: Arc<Metamodel>, macros: MacroConfiguration) -> Result<Self> {
        config.validate()?;
        let dialect = dialect_for_name(&config.dialect)?;
        let parser: Arc<dyn ExpressionFactory> = Arc::new(SimpleExpressionFactory);
        let expression_factory: Arc<dyn ExpressionFactory> = if config.expression_cache.enabled {
            Arc::new(CachingExpressionFactory::from_config(parser, &config.expression_cache))
        } else {
            parser
        };
        info!(
            dialect = %dialect.name(),
            expression_cache = config.expression_cache.enabled,
            inline_ctes = config.inline_ctes,
            "criteria builder factory created"
        );
        Ok(Self {
            metamodel,
            expression_factory,
            macros,
            dialect,
            config: config.clone(),
        })
    }

    /// Factory for the environment profile, see [`CriteriaConfig::from_environment`].
    pub fn from_environment(metamodel: Arc<Metamodel>) -> Result<Self> {
        let config = CriteriaConfig::from_environment();
        config.log_configuration();
        Self::new(&config, metamodel, MacroConfiguration::new())
    }

    /// Replaces the expression factory, e.g. with a caching decorator around a
    /// custom parser.
    pub fn with_expression_factory(mut self, expression_factory: Arc<dyn ExpressionFactory>) -> Self {
        self.expression_factory = expression_factory;
        self
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    pub fn dialect(&self) -> &Arc<dyn DbmsDialect> {
        &self.dialect
    }

    pub fn config(&self) -> &CriteriaConfig {
        &self.config
    }

    fn main_query(&self) -> Rc<MainQuery> {
        MainQuery::new(MainQuerySettings {
            metamodel: Arc::clone(&self.metamodel),
            expression_factory: Arc::clone(&self.expression_factory),
            macros: self.macros.clone(),
            dialect: Arc::clone(&self.dialect),
            inline_ctes: self.config.inline_ctes,
            log_rendered_sql: self.config.log_rendered_sql,
        })
    }

    /// A new top-level SELECT query.
    pub fn create(&self) -> CriteriaBuilder {
        debug!("creating criteria builder");
        CriteriaBuilder::new(self.main_query())
    }

    pub fn delete(&self, entity: &str, alias: &str) -> Result<DeleteCriteriaBuilder> {
        ModificationCriteriaBuilder::standalone(self.main_query(), DbmsStatementType::Delete, entity, Some(alias))
    }

    pub fn update(&self, entity: &str, alias: &str) -> Result<UpdateCriteriaBuilder> {
        ModificationCriteriaBuilder::standalone(self.main_query(), DbmsStatementType::Update, entity, Some(alias))
    }

    /// INSERT ... SELECT into `entity`; values come from `bind`.
    pub fn insert(&self, entity: &str) -> Result<InsertCriteriaBuilder> {
        ModificationCriteriaBuilder::standalone(self.main_query(), DbmsStatementType::Insert, entity, None)
    }

    /// A set operation whose first operand is a nested group.
    pub fn start_set(
        &self,
    ) -> Result<StartSetOperationBuilder<OngoingSetOperationBuilder<FinalSetOperationCriteriaBuilder>>> {
        set_operation::start_set(self.main_query())
    }
}

impl std::fmt::Debug for CriteriaBuilderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriteriaBuilderFactory")
            .field("dialect", &self.dialect.name())
            .field("config", &self.config)
            .field("macros", &self.macros)
            .finish()
    }
}
