//! Expression factory contract, the parsing implementation and macro support.

use super::parser::Parser;
use super::{Expression, Predicate};
use crate::error::{CriteriaError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Turns clause text into expression trees.
///
/// Implementations are shared across threads; every call returns a tree the caller
/// owns outright.
pub trait ExpressionFactory: Send + Sync {
    /// Parses a scalar expression. `allow_outer` permits `OUTER(path)` references
    /// to the enclosing query.
    fn create_simple_expression(
        &self,
        expression: &str,
        allow_outer: bool,
        macros: &MacroConfiguration,
    ) -> Result<Expression>;

    /// Parses a boolean expression. `allow_subqueries` permits `EXISTS alias`
    /// placeholders that are bound to subqueries afterwards.
    fn create_boolean_expression(
        &self,
        expression: &str,
        allow_subqueries: bool,
        macros: &MacroConfiguration,
    ) -> Result<Predicate>;
}

/// A function-call shaped macro expanded at parse time, e.g. `VIEW_ROOT()`.
pub trait MacroFunction: Send + Sync {
    fn apply(&self, arguments: &[Expression]) -> Result<Expression>;

    /// Whether expansions may be served from an expression cache.
    fn supports_caching(&self) -> bool {
        true
    }
}

impl<F> MacroFunction for F
where
    F: Fn(&[Expression]) -> Result<Expression> + Send + Sync,
{
    fn apply(&self, arguments: &[Expression]) -> Result<Expression> {
        self(arguments)
    }
}

/// Macros available to a parse, keyed by upper-cased function name.
#[derive(Clone, Default)]
pub struct MacroConfiguration {
    macros: BTreeMap<String, Arc<dyn MacroFunction>>,
}

impl MacroConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_macro(mut self, name: &str, function: impl MacroFunction + 'static) -> Self {
        self.macros
            .insert(name.to_ascii_uppercase(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn MacroFunction>> {
        self.macros.get(&name.to_ascii_uppercase())
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }

    /// Identity of the macro set for cache keys. Configurations share a key only
    /// when they register the same functions under the same names.
    pub fn cache_key(&self) -> String {
        self.macros
            .iter()
            .map(|(name, function)| format!("{name}@{:p}", Arc::as_ptr(function)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether a parse of `text` may be cached: it names no macro that opts out
    /// of caching.
    pub fn supports_caching(&self, text: &str) -> bool {
        self.macros
            .iter()
            .filter(|(_, function)| !function.supports_caching())
            .all(|(name, _)| !names_identifier(text, name))
    }
}

fn names_identifier(text: &str, name: &str) -> bool {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|token| token.eq_ignore_ascii_case(name))
}

impl fmt::Debug for MacroConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroConfiguration")
            .field("macros", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Parses every request from scratch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleExpressionFactory;

impl SimpleExpressionFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionFactory for SimpleExpressionFactory {
    fn create_simple_expression(
        &self,
        expression: &str,
        allow_outer: bool,
        macros: &MacroConfiguration,
    ) -> Result<Expression> {
        if expression.trim().is_empty() {
            return Err(CriteriaError::syntax(0, "empty expression"));
        }
        Parser::new(expression, macros, allow_outer, false)?.parse_expression()
    }

    fn create_boolean_expression(
        &self,
        expression: &str,
        allow_subqueries: bool,
        macros: &MacroConfiguration,
    ) -> Result<Predicate> {
        if expression.trim().is_empty() {
            return Err(CriteriaError::syntax(0, "empty expression"));
        }
        Parser::new(expression, macros, true, allow_subqueries)?.parse_predicate()
    }
}
