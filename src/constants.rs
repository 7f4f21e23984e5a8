//! # Constants
//!
//! Names and defaults shared by the builders, the renderer and the dialects.

/// Prefix of parameters generated for inline values passed to restriction builders.
pub const GENERATED_PARAMETER_PREFIX: &str = "param_";

/// Synthetic CTE name suffixes used when emulating the NEW modification state.
pub mod synthetic {
    pub const NEW_STATE_SUFFIX: &str = "_new";
    pub const DELETE_SUFFIX: &str = "_del";
    pub const INSERT_SUFFIX: &str = "_ins";
    pub const UPDATE_SUFFIX: &str = "_upd";
}

/// Environment variables consulted by configuration and logging.
pub mod env {
    pub const ENVIRONMENT: &str = "CRITERIA_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const LOG_FORMAT: &str = "CRITERIA_LOG_FORMAT";
    pub const DIALECT: &str = "CRITERIA_DIALECT";
    pub const INLINE_CTES: &str = "CRITERIA_INLINE_CTES";
    pub const EXPRESSION_CACHE_ENABLED: &str = "CRITERIA_EXPRESSION_CACHE_ENABLED";
    pub const EXPRESSION_CACHE_MAX_ENTRIES: &str = "CRITERIA_EXPRESSION_CACHE_MAX_ENTRIES";
    pub const LOG_RENDERED_SQL: &str = "CRITERIA_LOG_RENDERED_SQL";
    /// Prefix for layered configuration through the `config` crate (`CRITERIA__DIALECT`).
    pub const CONFIG_PREFIX: &str = "CRITERIA";
}

pub const DEFAULT_DIALECT: &str = "postgresql";
pub const DEFAULT_EXPRESSION_CACHE_ENTRIES: usize = 4096;

/// Dialect names accepted by configuration.
pub const SUPPORTED_DIALECTS: &[&str] = &["postgresql", "mysql", "ansi"];
