//! # Configuration
//!
//! Settings of a [`CriteriaBuilderFactory`](crate::factory::CriteriaBuilderFactory).
//!
//! Profiles are picked from `CRITERIA_ENV` (falling back to `APP_ENV`), individual
//! `CRITERIA_*` variables override single settings, and [`CriteriaConfig::load`]
//! layers a configuration file under `CRITERIA__*` variables with the `config` crate.

use crate::constants::{env as env_vars, DEFAULT_DIALECT, DEFAULT_EXPRESSION_CACHE_ENTRIES, SUPPORTED_DIALECTS};
use crate::error::{CriteriaError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::{debug, info, warn};

/// Settings of the parsed-expression cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionCacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for ExpressionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_EXPRESSION_CACHE_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaConfig {
    /// One of [`SUPPORTED_DIALECTS`].
    pub dialect: String,
    /// Inline CTEs whose entity does not state a preference.
    pub inline_ctes: bool,
    pub expression_cache: ExpressionCacheConfig,
    /// Log every rendered statement as a `QUERY_OPERATION` event.
    pub log_rendered_sql: bool,
}

impl Default for CriteriaConfig {
    /// Production defaults
    fn default() -> Self {
        Self {
            dialect: DEFAULT_DIALECT.to_string(),
            inline_ctes: false,
            expression_cache: ExpressionCacheConfig::default(),
            log_rendered_sql: false,
        }
    }
}

impl CriteriaConfig {
    /// Small cache and SQL logging for test runs
    pub fn for_test() -> Self {
        Self {
            expression_cache: ExpressionCacheConfig {
                enabled: true,
                max_entries: 64,
            },
            log_rendered_sql: true,
            ..Self::default()
        }
    }

    pub fn for_development() -> Self {
        Self {
            expression_cache: ExpressionCacheConfig {
                enabled: true,
                max_entries: 1024,
            },
            log_rendered_sql: true,
            ..Self::default()
        }
    }

    /// Profile for the current environment with variable overrides applied.
    pub fn from_environment() -> Self {
        let environment = current_environment();
        let config = match environment.as_str() {
            "test" => {
                info!("Loading test criteria configuration");
                Self::for_test()
            }
            "development" => {
                info!("Loading development criteria configuration");
                Self::for_development()
            }
            _ => {
                info!("Loading production criteria configuration");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    /// Applies the single-setting `CRITERIA_*` variables; unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dialect) = env::var(env_vars::DIALECT) {
            self.dialect = dialect.to_lowercase();
            info!("Dialect override: {}", self.dialect);
        }

        if let Ok(inline) = env::var(env_vars::INLINE_CTES) {
            self.inline_ctes = inline.parse().unwrap_or(self.inline_ctes);
            info!("Inline CTEs override: {}", self.inline_ctes);
        }

        if let Ok(enabled) = env::var(env_vars::EXPRESSION_CACHE_ENABLED) {
            self.expression_cache.enabled = enabled.parse().unwrap_or(self.expression_cache.enabled);
            info!("Expression cache enabled override: {}", self.expression_cache.enabled);
        }

        if let Ok(max) = env::var(env_vars::EXPRESSION_CACHE_MAX_ENTRIES) {
            if let Ok(entries) = max.parse::<usize>() {
                self.expression_cache.max_entries = entries;
                info!("Expression cache max entries override: {}", entries);
            }
        }

        if let Ok(log_sql) = env::var(env_vars::LOG_RENDERED_SQL) {
            self.log_rendered_sql = log_sql.parse().unwrap_or(self.log_rendered_sql);
            info!("Rendered SQL logging override: {}", self.log_rendered_sql);
        }

        self
    }

    /// Layers `path` (format chosen by extension) and `CRITERIA__*` variables over
    /// the defaults, then validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading criteria configuration from: {}", path.display());
        let loaded: CriteriaConfig = config::Config::builder()
            .add_source(config::Config::try_from(&CriteriaConfig::default())?)
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(env_vars::CONFIG_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string(&loaded).unwrap_or_else(|_| "[serialization error]".to_string())
        );
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_DIALECTS.contains(&self.dialect.as_str()) {
            return Err(CriteriaError::Configuration(format!(
                "Unknown dialect '{}', expected one of: {}",
                self.dialect,
                SUPPORTED_DIALECTS.join(", ")
            )));
        }

        if self.expression_cache.enabled && self.expression_cache.max_entries == 0 {
            return Err(CriteriaError::Configuration(
                "Expression cache max entries must be greater than 0 when the cache is enabled"
                    .to_string(),
            ));
        }

        if !self.expression_cache.enabled {
            warn!("Expression cache disabled - every expression is parsed on use");
        }

        Ok(())
    }

    /// Log current configuration for debugging
    pub fn log_configuration(&self) {
        info!("Criteria Configuration:");
        info!("  Dialect: {}", self.dialect);
        info!("  Inline CTEs: {}", self.inline_ctes);
        info!(
            "  Expression Cache: enabled={}, {} max entries",
            self.expression_cache.enabled, self.expression_cache.max_entries
        );
        info!("  Log Rendered SQL: {}", self.log_rendered_sql);
    }
}

/// `CRITERIA_ENV`, then `APP_ENV`, defaulting to production.
pub(crate) fn current_environment() -> String {
    env::var(env_vars::ENVIRONMENT)
        .or_else(|_| env::var(env_vars::FALLBACK_ENVIRONMENT))
        .unwrap_or_else(|_| "production".to_string())
}
