//! Searched and simple CASE expressions.

use crate::common;
use fluent_criteria::prelude::*;

#[test]
fn test_searched_case_in_select() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .select_case("category")?
        .when("d.age")?
        .lt(18)?
        .then("'minor'")?
        .when_expression("d.age >= 65")?
        .then("'senior'")?
        .otherwise("'adult'")?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.id, CASE WHEN d.age < $1 THEN 'minor' WHEN d.age >= 65 THEN 'senior' ELSE 'adult' END AS category FROM document d"
    );
    Ok(())
}

#[test]
fn test_simple_case_in_select() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select_simple_case("d.age", "label")?
        .when("1", "'one'")?
        .when("2", "'two'")?
        .otherwise("'many'")?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT CASE d.age WHEN 1 THEN 'one' WHEN 2 THEN 'two' ELSE 'many' END AS label FROM document d"
    );
    Ok(())
}

#[test]
fn test_case_as_restriction_operand() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .where_case()?
        .when("d.name")?
        .is_null()?
        .then_value(0)?
        .end()?
        .eq(1)?
        .query_string()?;

    assert!(sql.ends_with("WHERE CASE WHEN d.name IS NULL THEN $1 END = $2"));
    Ok(())
}

#[test]
fn test_simple_case_as_restriction_operand() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .where_simple_case("d.name")?
        .when("'a'", "1")?
        .otherwise("2")?
        .gt(1)?
        .query_string()?;

    assert!(sql.ends_with("WHERE CASE d.name WHEN 'a' THEN 1 ELSE 2 END > $1"));
    Ok(())
}

#[test]
fn test_case_requires_a_when_clause() -> Result<()> {
    let factory = common::postgresql();
    let case = factory
        .create()
        .from("Document", "d")?
        .select_simple_case("d.age", "label")?;

    let error = case.end().err();
    assert!(matches!(error, Some(CriteriaError::IllegalState(_))));
    Ok(())
}

#[test]
fn test_open_case_blocks_the_query() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let _case = cb.select_case("category")?;

    let error = cb.select("d.name").unwrap_err();
    assert!(error.is_builder_chaining());
    assert!(cb.query_string().is_err());
    Ok(())
}
