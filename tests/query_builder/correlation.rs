//! Correlation providers.

use crate::common;
use fluent_criteria::prelude::*;
use fluent_criteria::query_builder::CorrelationBuilder;

/// Correlates the versions of the document alias given as expression.
struct DocumentVersions;

impl CorrelationProvider for DocumentVersions {
    fn name(&self) -> &str {
        "document_versions"
    }

    fn apply_correlation(&self, builder: &CorrelationBuilder, correlation_expression: &str) -> Result<()> {
        builder
            .correlate("Version", "v")?
            .on("v.document")?
            .eq_expression(correlation_expression)?
            .end()?;
        Ok(())
    }
}

/// Misbehaves by limiting the correlated query.
struct LimitingProvider;

impl CorrelationProvider for LimitingProvider {
    fn name(&self) -> &str {
        "limiting"
    }

    fn apply_correlation(&self, builder: &CorrelationBuilder, _correlation_expression: &str) -> Result<()> {
        builder.set_max_results(1)?;
        Ok(())
    }
}

#[test]
fn test_correlation_in_subquery_adds_entity_join() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .where_exists()?
        .from("Person", "p")?
        .apply_correlation(&DocumentVersions, "d")?
        .where_("v.name")?
        .eq("draft")?
        .end()?
        .query_string()?;

    assert!(sql.contains(
        "EXISTS (SELECT 1 FROM person p JOIN version v ON v.document_id = d.id WHERE v.name = $1)"
    ));
    Ok(())
}

#[test]
fn test_correlation_without_root_becomes_root() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .apply_correlation(&DocumentVersions, "42")?
        .select("v.name")?
        .query_string()?;

    assert_eq!(sql, "SELECT v.name FROM version v WHERE v.document_id = 42");
    Ok(())
}

#[test]
fn test_correlation_may_not_change_pagination() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;

    let error = cb.apply_correlation(&LimitingProvider, "d").unwrap_err();
    assert!(matches!(error, CriteriaError::IllegalArgument(_)));
    assert!(error.to_string().contains("limiting"));
    Ok(())
}
