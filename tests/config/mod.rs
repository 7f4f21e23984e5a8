//! Configuration profiles, validation and file loading.

use crate::common;
use fluent_criteria::logging;
use fluent_criteria::prelude::*;
use fluent_criteria::ExpressionCacheConfig;
use std::io::Write;
use tempfile::NamedTempFile;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temporary file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_profiles() {
    let production = CriteriaConfig::default();
    assert_eq!(production.dialect, "postgresql");
    assert_eq!(production.expression_cache.max_entries, 4096);
    assert!(!production.log_rendered_sql);
    assert!(!production.inline_ctes);

    let test = CriteriaConfig::for_test();
    assert_eq!(test.expression_cache.max_entries, 64);
    assert!(test.log_rendered_sql);

    assert_eq!(CriteriaConfig::for_development().expression_cache.max_entries, 1024);
}

#[test]
fn test_validation() {
    let unknown = CriteriaConfig {
        dialect: "db2".to_string(),
        ..CriteriaConfig::default()
    };
    let error = unknown.validate().unwrap_err();
    assert!(matches!(error, CriteriaError::Configuration(_)));
    assert!(error.to_string().starts_with("Configuration error: Unknown dialect 'db2'"));

    let empty_cache = CriteriaConfig {
        expression_cache: ExpressionCacheConfig {
            enabled: true,
            max_entries: 0,
        },
        ..CriteriaConfig::default()
    };
    assert!(empty_cache.validate().is_err());
}

#[test]
fn test_factory_rejects_invalid_configuration() {
    let config = CriteriaConfig {
        dialect: "sqlite".to_string(),
        ..CriteriaConfig::for_test()
    };

    let result = CriteriaBuilderFactory::new(&config, common::metamodel(), MacroConfiguration::new());
    assert!(matches!(result, Err(CriteriaError::Configuration(_))));
}

#[test]
fn test_factory_without_expression_cache() -> Result<()> {
    let config = CriteriaConfig {
        expression_cache: ExpressionCacheConfig {
            enabled: false,
            max_entries: 0,
        },
        ..CriteriaConfig::for_test()
    };
    let factory = CriteriaBuilderFactory::new(&config, common::metamodel(), MacroConfiguration::new())?;

    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.name")?
        .query_string()?;
    assert_eq!(sql, "SELECT d.name FROM document d");
    assert!(!factory.config().expression_cache.enabled);
    Ok(())
}

#[test]
fn test_load_from_file() -> Result<()> {
    let file = config_file(
        r#"
dialect = "mysql"
inline_ctes = true

[expression_cache]
max_entries = 128
"#,
    );

    let config = CriteriaConfig::load(file.path())?;
    assert_eq!(config.dialect, "mysql");
    assert!(config.inline_ctes);
    assert_eq!(config.expression_cache.max_entries, 128);
    assert!(config.expression_cache.enabled);
    Ok(())
}

#[test]
fn test_load_validates() {
    let file = config_file("dialect = \"informix\"\n");

    assert!(matches!(
        CriteriaConfig::load(file.path()),
        Err(CriteriaError::Configuration(_))
    ));
}

#[test]
fn test_load_missing_file() {
    let result = CriteriaConfig::load("/nonexistent/criteria.toml");
    assert!(matches!(result, Err(CriteriaError::Configuration(_))));
}

#[test]
fn test_logging_initializes_once() {
    logging::init_structured_logging();
    logging::init_structured_logging();
    logging::log_query_operation("render", "SELECT 1", "PostgreSQL", "ok", None);
}
