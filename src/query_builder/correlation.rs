//! Correlation providers: extension points that add correlated roots, joins and
//! restrictions to a query body.

use super::builder::QueryCore;
use super::conditions::{PredicateCollector, WhereBuilder};
use super::joins::{JoinOnBuilder, JoinType};
use super::lifecycle::{listener, BuilderSlot};
use crate::error::Result;
use crate::expression::{CompoundPredicate, Predicate};

/// Adds the correlation of `correlation_expression` to a query body.
pub trait CorrelationProvider {
    /// Used in error messages.
    fn name(&self) -> &str;

    fn apply_correlation(&self, builder: &CorrelationBuilder, correlation_expression: &str) -> Result<()>;
}

/// The restricted view of a query body handed to a [`CorrelationProvider`].
#[derive(Clone)]
pub struct CorrelationBuilder {
    core: QueryCore,
}

impl CorrelationBuilder {
    pub(crate) fn new(core: QueryCore) -> Self {
        Self { core }
    }

    /// Correlates `entity` under `alias`. The first correlated entity of a body
    /// without roots becomes its root and the ON predicate goes to WHERE; later
    /// ones are entity joins.
    pub fn correlate(&self, entity: &str, alias: &str) -> Result<JoinOnBuilder<CorrelationBuilder>> {
        let core = &self.core;
        if !core.state().from.roots.is_empty() {
            core.add_entity_join(entity, alias, JoinType::Inner)?;
            return core.join_on_builder(self.clone(), alias);
        }
        core.add_root(entity, alias, None)?;
        let id = core.open_child(BuilderSlot::JoinOn)?;
        let owner = self.clone();
        Ok(JoinOnBuilder::new(
            core.scope(),
            listener(move |_, predicate: CompoundPredicate| {
                owner.core.close_child(BuilderSlot::JoinOn, id)?;
                owner.core.add_where(Predicate::Compound(predicate))?;
                Ok(owner.clone())
            }),
        ))
    }

    pub fn set_first_result(&self, first_result: u64) -> Result<Self> {
        self.core
            .update(|state| state.pagination.first_result = first_result)?;
        Ok(self.clone())
    }

    pub fn set_max_results(&self, max_results: u64) -> Result<Self> {
        self.core
            .update(|state| state.pagination.max_results = Some(max_results))?;
        Ok(self.clone())
    }
}

impl WhereBuilder for CorrelationBuilder {
    fn where_collector(&self) -> Result<PredicateCollector> {
        self.core.where_collector()
    }
}
