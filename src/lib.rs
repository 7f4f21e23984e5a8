#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RETURNING in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fluent Criteria
//!
//! A fluent, type-checked builder for SQL queries over an entity metamodel.
//!
//! ## Overview
//!
//! Queries are assembled through chained builder calls instead of string
//! concatenation. Nested constructs (subqueries, CASE expressions, AND/OR groups,
//! join ON clauses, set-operation operands, CTE bodies) are opened from their
//! parent and folded back into it when they end, so the finished chain always
//! describes one well-formed statement.
//!
//! ## Key Features
//!
//! - **Predicates**: comparisons with ANY/ALL quantifiers, BETWEEN, LIKE, IN,
//!   IS NULL, EXISTS and nested AND/OR groups in WHERE and HAVING
//! - **Subqueries**: scalar, correlated and multi-placeholder subquery expressions
//! - **Set operations**: UNION/INTERSECT/EXCEPT with nesting, ordering and limits
//! - **CTEs**: plain, recursive, set-operation and DML-returning CTEs
//! - **DML**: DELETE, UPDATE and INSERT ... SELECT with RETURNING
//! - **Dialects**: PostgreSQL (including NEW-state emulation), MySQL and ANSI
//!
//! ## Module Organization
//!
//! - [`factory`] - Entry point creating builders for one persistence unit
//! - [`query_builder`] - The fluent builders and the query tree they produce
//! - [`expression`] - Expression trees, the parser and its cache
//! - [`metamodel`] - Entities, attributes and CTE entities
//! - [`dialect`] - Backend-specific SQL rendering strategies
//! - [`render`] - Query tree to SQL text
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fluent_criteria::prelude::*;
//! use std::sync::Arc;
//!
//! # fn example() -> fluent_criteria::Result<()> {
//! let metamodel = Metamodel::builder()
//!     .entity(EntityType::new("Document", "document").id("id", "id").column("age", "age"))
//!     .build()?;
//! let factory = CriteriaBuilderFactory::new(
//!     &CriteriaConfig::default(),
//!     Arc::new(metamodel),
//!     MacroConfiguration::new(),
//! )?;
//!
//! let query = factory
//!     .create()
//!     .from("Document", "d")?
//!     .where_("d.age")?
//!     .gt(18)?
//!     .build()?;
//! println!("{} with {:?}", query.sql, query.parameters);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod config;
pub mod constants;
pub mod dialect;
pub mod error;
pub mod expression;
pub mod factory;
pub mod logging;
pub mod metamodel;
pub mod query_builder;
pub mod render;

pub use config::{CriteriaConfig, ExpressionCacheConfig};
pub use dialect::{dialect_for_name, DbmsDialect, DbmsModificationState, DbmsStatementType};
pub use error::{CriteriaError, Result};
pub use factory::CriteriaBuilderFactory;
pub use metamodel::{Attribute, AttributeKind, EntityType, Metamodel};
pub use render::{QueryParameter, RenderedQuery};

/// Builders, traits and types needed to write queries.
pub mod prelude {
    pub use crate::config::CriteriaConfig;
    pub use crate::error::{CriteriaError, Result};
    pub use crate::expression::MacroConfiguration;
    pub use crate::factory::CriteriaBuilderFactory;
    pub use crate::metamodel::{EntityType, Metamodel};
    pub use crate::query_builder::{
        BaseQueryBuilder, CorrelationProvider, CriteriaBuilder, CteBuilder, HavingBuilder,
        SetOperationBuilder, SetOperationType, Value, WhereBuilder,
    };
    pub use crate::render::RenderedQuery;
}
