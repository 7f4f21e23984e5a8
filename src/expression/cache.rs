//! Thread-safe caching decorator for expression factories.

use super::factory::{ExpressionFactory, MacroConfiguration};
use super::{Expression, Predicate};
use crate::config::ExpressionCacheConfig;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ParseKind {
    Simple,
    Boolean,
}

/// Exact text plus every flag that influences the parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpressionCacheKey {
    text: String,
    kind: ParseKind,
    flag: bool,
    macros: String,
}

#[derive(Debug, Clone)]
enum CachedTree {
    Expression(Expression),
    Predicate(Predicate),
}

/// Serves parses from a shared cache and hands every caller its own copy.
///
/// Lookups and inserts are safe under concurrent use. Cached trees are never
/// handed out; each hit returns a structural clone, so callers mutating their tree
/// cannot affect later lookups. A parse whose text names a macro that opts out of
/// caching bypasses the cache; other parses with the same configuration are cached.
pub struct CachingExpressionFactory {
    delegate: Arc<dyn ExpressionFactory>,
    cache: Arc<DashMap<ExpressionCacheKey, CachedTree>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingExpressionFactory {
    pub fn new(delegate: Arc<dyn ExpressionFactory>, max_entries: usize) -> Self {
        Self {
            delegate,
            cache: Arc::new(DashMap::new()),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(delegate: Arc<dyn ExpressionFactory>, config: &ExpressionCacheConfig) -> Self {
        Self::new(delegate, config.max_entries)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    fn key(text: &str, kind: ParseKind, flag: bool, macros: &MacroConfiguration) -> ExpressionCacheKey {
        ExpressionCacheKey {
            text: text.to_string(),
            kind,
            flag,
            macros: macros.cache_key(),
        }
    }

    fn lookup(&self, key: &ExpressionCacheKey) -> Option<CachedTree> {
        // clone while the shard guard is held, then release it
        let cached = self.cache.get(key).map(|entry| entry.value().clone());
        if cached.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(expression = %key.text, "expression cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(expression = %key.text, "expression cache miss");
        }
        cached
    }

    fn store(&self, key: ExpressionCacheKey, tree: CachedTree) {
        if self.cache.len() >= self.max_entries {
            debug!(
                cache_size = self.cache.len(),
                max_entries = self.max_entries,
                "expression cache full, clearing"
            );
            self.cache.clear();
        }
        self.cache.insert(key, tree);
    }
}

impl ExpressionFactory for CachingExpressionFactory {
    fn create_simple_expression(
        &self,
        expression: &str,
        allow_outer: bool,
        macros: &MacroConfiguration,
    ) -> Result<Expression> {
        if !macros.supports_caching(expression) {
            return self
                .delegate
                .create_simple_expression(expression, allow_outer, macros);
        }
        let key = Self::key(expression, ParseKind::Simple, allow_outer, macros);
        if let Some(CachedTree::Expression(cached)) = self.lookup(&key) {
            return Ok(cached);
        }
        let parsed = self
            .delegate
            .create_simple_expression(expression, allow_outer, macros)?;
        self.store(key, CachedTree::Expression(parsed.clone()));
        Ok(parsed)
    }

    fn create_boolean_expression(
        &self,
        expression: &str,
        allow_subqueries: bool,
        macros: &MacroConfiguration,
    ) -> Result<Predicate> {
        if !macros.supports_caching(expression) {
            return self
                .delegate
                .create_boolean_expression(expression, allow_subqueries, macros);
        }
        let key = Self::key(expression, ParseKind::Boolean, allow_subqueries, macros);
        if let Some(CachedTree::Predicate(cached)) = self.lookup(&key) {
            return Ok(cached);
        }
        let parsed = self
            .delegate
            .create_boolean_expression(expression, allow_subqueries, macros)?;
        self.store(key, CachedTree::Predicate(parsed.clone()));
        Ok(parsed)
    }
}

impl std::fmt::Debug for CachingExpressionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingExpressionFactory")
            .field("delegate", &"ExpressionFactory")
            .field("entries", &self.cache.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
