//! # Query Builder System
//!
//! Fluent builders for SELECT queries, subqueries, set operations, CTEs and DML
//! statements.
//!
//! ## Key Components
//!
//! - [`builder`] - Query bodies and the shared fluent surface ([`BaseQueryBuilder`])
//! - [`conditions`] - WHERE/HAVING collectors and AND/OR groups
//! - [`restriction`] - Comparison terminators for a left-hand expression
//! - [`subquery`] - Subquery initiators, including multi-placeholder expressions
//! - [`case_when`] - Searched and simple CASE builders
//! - [`joins`] - FROM roots, joins, alias scopes and ON clause builders
//! - [`set_operation`] - UNION/INTERSECT/EXCEPT chains and nesting
//! - [`cte`] - Plain, recursive, set-operation and returning CTEs
//! - [`modification`] - DELETE, UPDATE and INSERT ... SELECT
//! - [`lifecycle`] - Builder-ended listeners and open-child slots
//!
//! ## Lifecycle
//!
//! Every method that opens a nested builder records it in a slot of its parent.
//! The nested builder's `end*` method folds its result into the parent through a
//! listener and returns the parent, so a chain reads top to bottom:
//!
//! ```rust,ignore
//! let sql = factory
//!     .create()
//!     .from("Document", "d")?
//!     .where_("d.age")?
//!     .gt(18)?
//!     .where_exists()?
//!     .from("Version", "v")?
//!     .where_("v.document")?
//!     .eq_expression("d")?
//!     .end()?
//!     .query_string()?;
//! ```
//!
//! Ending a parent while a child is open fails with
//! [`CriteriaError::BuilderChaining`](crate::error::CriteriaError::BuilderChaining).

pub mod builder;
pub mod case_when;
pub mod conditions;
pub mod correlation;
pub mod cte;
pub mod joins;
pub mod lifecycle;
pub(crate) mod main_query;
pub mod model;
pub mod modification;
pub mod pagination;
pub mod parameters;
pub mod restriction;
pub mod set_operation;
pub mod subquery;

pub use builder::{BaseQueryBuilder, CriteriaBuilder};
pub use case_when::{CaseWhenBuilder, CaseWhenStarterBuilder, CaseWhenThenBuilder, SimpleCaseWhenBuilder};
pub use conditions::{HavingBuilder, WhereAndBuilder, WhereBuilder, WhereOrBuilder};
pub use correlation::{CorrelationBuilder, CorrelationProvider};
pub use cte::{
    CteBody, CteBuilder, CteDefinition, CteManager, FullSelectCteBuilder,
    ReturningModificationInitiator, SelectCteBuilder, SelectRecursiveCteBuilder,
};
pub use joins::{JoinManager, JoinManagerId, JoinOnBuilder, JoinType};
pub use lifecycle::{BuilderEndedListener, BuilderId, BuilderSlot, BuilderState, SetOperationState};
pub use model::{
    Assignment, ModificationQuery, OrderByItem, QueryNode, ReturningBinding, SelectItem,
    SelectQuery, SetOperation, SetOperationType,
};
pub use modification::{
    DeleteCriteriaBuilder, InsertCriteriaBuilder, ModificationCriteriaBuilder,
    UpdateCriteriaBuilder,
};
pub use pagination::Pagination;
pub use parameters::Value;
pub use restriction::RestrictionBuilder;
pub use set_operation::{
    FinalSetOperationCriteriaBuilder, FinalSetOperationCteBuilder, LeafSetOperationBuilder,
    OngoingFinalSetOperationBuilder, OngoingSetOperationBuilder, SetOperationBuilder,
    StartSetOperationBuilder,
};
pub use subquery::{MultipleSubqueryInitiator, SubqueryBuilder, SubqueryInitiator};
