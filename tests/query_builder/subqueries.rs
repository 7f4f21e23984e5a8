//! Subqueries in SELECT, WHERE and expressions.

use crate::common;
use fluent_criteria::expression::{ComparisonOperator, PredicateQuantifier};
use fluent_criteria::prelude::*;

fn document_ids(factory: &CriteriaBuilderFactory) -> Result<CriteriaBuilder> {
    factory.create().from("Document", "d")?.select("d.id")
}

#[test]
fn test_correlated_exists() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_exists()?
        .from("Version", "v")?
        .where_("v.document")?
        .eq_expression("d")?
        .end()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.id FROM document d WHERE EXISTS (SELECT 1 FROM version v WHERE v.document_id = d.id)"
    );
    Ok(())
}

#[test]
fn test_not_exists() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_not_exists()?
        .from("Version", "v")?
        .where_("v.document")?
        .eq_expression("d")?
        .end()?
        .query_string()?;

    assert!(sql.contains("WHERE NOT EXISTS (SELECT 1 FROM version v"));
    Ok(())
}

#[test]
fn test_select_subquery_with_alias() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.name")?
        .select_subquery("versionCount")?
        .from("Version", "v")?
        .select("COUNT(v.id)")?
        .where_("v.document")?
        .eq_expression("d")?
        .end()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.name, (SELECT COUNT(v.id) FROM version v WHERE v.document_id = d.id) AS versionCount FROM document d"
    );
    Ok(())
}

#[test]
fn test_subquery_as_left_operand() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_subquery()?
        .from("Version", "v")?
        .select("COUNT(v.id)")?
        .where_("v.document")?
        .eq_expression("d")?
        .end()?
        .gt(2)?
        .query_string()?;

    assert!(sql.ends_with(
        "WHERE (SELECT COUNT(v.id) FROM version v WHERE v.document_id = d.id) > $1"
    ));
    Ok(())
}

#[test]
fn test_subquery_inside_expression() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_subquery_with("sq", "sq * 2")?
        .from("Version", "v")?
        .select("COUNT(v.id)")?
        .end()?
        .lt(10)?
        .query_string()?;

    assert!(sql.ends_with("WHERE (SELECT COUNT(v.id) FROM version v) * 2 < $1"));

    let missing_alias = document_ids(&factory)?.where_subquery_with("sq", "other * 2");
    assert!(matches!(missing_alias, Err(CriteriaError::IllegalArgument(_))));
    Ok(())
}

#[test]
fn test_in_subquery() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.id")?
        .in_subquery()?
        .from("Version", "v")?
        .select("v.document")?
        .end()?
        .where_("d.owner")?
        .not_in_subquery()?
        .from("Person", "p")?
        .select("p.id")?
        .where_("p.age")?
        .lt(18)?
        .end()?
        .query_string()?;

    assert!(sql.contains("d.id IN (SELECT v.document_id FROM version v)"));
    assert!(sql.contains("d.owner_id NOT IN (SELECT p.id FROM person p WHERE p.age < $1)"));
    Ok(())
}

#[test]
fn test_quantified_subquery_comparison() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.age")?
        .compare_subquery(ComparisonOperator::Ge, PredicateQuantifier::All)?
        .from("Person", "p")?
        .select("p.age")?
        .end()?
        .where_("d.age")?
        .eq_subquery()?
        .from("Person", "q")?
        .select("MAX(q.age)")?
        .end()?
        .query_string()?;

    assert!(sql.contains("d.age >= ALL (SELECT p.age FROM person p)"));
    assert!(sql.contains("d.age = (SELECT MAX(q.age) FROM person q)"));
    Ok(())
}

#[test]
fn test_multiple_subqueries_in_one_expression() -> Result<()> {
    let factory = common::postgresql();
    let initiator = document_ids(&factory)?.where_subqueries("versions + people")?;
    assert_eq!(
        initiator.pending_aliases(),
        vec!["versions".to_string(), "people".to_string()]
    );

    let initiator = initiator
        .with("versions")?
        .from("Version", "v")?
        .select("COUNT(v.id)")?
        .where_("v.document")?
        .eq_expression("d")?
        .end()?;
    assert_eq!(initiator.pending_aliases(), vec!["people".to_string()]);

    let error = initiator.end().err().map(|error| error.is_builder_chaining());
    assert_eq!(error, Some(true));

    let sql = initiator
        .with("people")?
        .from("Person", "p")?
        .select("COUNT(p.id)")?
        .end()?
        .end()?
        .gt(0)?
        .query_string()?;

    assert!(sql.ends_with(
        "WHERE (SELECT COUNT(v.id) FROM version v WHERE v.document_id = d.id) + (SELECT COUNT(p.id) FROM person p) > $1"
    ));
    Ok(())
}

#[test]
fn test_multiple_subqueries_reject_unknown_alias() -> Result<()> {
    let factory = common::postgresql();
    let initiator = document_ids(&factory)?.where_subqueries("a + b")?;

    let error = initiator.with("c").err();
    assert!(matches!(error, Some(CriteriaError::IllegalArgument(_))));
    Ok(())
}

#[test]
fn test_boolean_expression_with_subqueries() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_expression_subqueries("EXISTS sq AND d.age > 1")?
        .with("sq")?
        .from("Version", "v")?
        .where_("v.document")?
        .eq_expression("d")?
        .end()?
        .end()?
        .query_string()?;

    assert!(sql.contains("EXISTS (SELECT 1 FROM version v WHERE v.document_id = d.id) AND d.age > 1"));
    Ok(())
}

#[test]
fn test_outer_inside_subquery() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_exists()?
        .from("Version", "v")?
        .where_("v.document")?
        .eq_expression("OUTER(d)")?
        .end()?
        .query_string()?;

    assert!(sql.contains("WHERE v.document_id = d.id)"));
    Ok(())
}

#[test]
fn test_subquery_aliases_do_not_leak() -> Result<()> {
    let factory = common::postgresql();
    let cb = document_ids(&factory)?
        .where_exists()?
        .from("Version", "v")?
        .end()?;

    assert!(cb.select("v.name").is_err());
    Ok(())
}
