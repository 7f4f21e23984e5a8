//! WHERE and HAVING restrictions, including nested OR/AND groups.

use crate::common;
use fluent_criteria::prelude::*;

fn document_ids(factory: &CriteriaBuilderFactory) -> Result<CriteriaBuilder> {
    factory.create().from("Document", "d")?.select("d.id")
}

#[test]
fn test_restrictions_are_anded_in_insertion_order() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.age")?
        .ge(18)?
        .where_("d.name")?
        .ne("draft")?
        .where_("d.owner")?
        .is_not_null()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.id FROM document d WHERE d.age >= $1 AND d.name <> $2 AND d.owner_id IS NOT NULL"
    );
    Ok(())
}

#[test]
fn test_nested_or_and_groups() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.age")?
        .ge(18)?
        .where_or()?
        .where_("d.name")?
        .eq("a")?
        .where_and()?
        .where_("d.name")?
        .eq("b")?
        .where_("d.age")?
        .lt(30)?
        .end_and()?
        .end_or()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.id FROM document d WHERE d.age >= $1 AND (d.name = $2 OR (d.name = $3 AND d.age < $4))"
    );
    Ok(())
}

#[test]
fn test_empty_groups_render_nothing() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_or()?
        .end_or()?
        .query_string()?;

    assert_eq!(sql, "SELECT d.id FROM document d");
    Ok(())
}

#[test]
fn test_between_variants() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.age")?
        .between(18, 65)?
        .where_("d.age")?
        .not_between(30, 40)?
        .where_("d.age")?
        .between_expression("1", "99")?
        .query_string()?;

    assert!(sql.contains("d.age BETWEEN $1 AND $2"));
    assert!(sql.contains("d.age NOT BETWEEN $3 AND $4"));
    assert!(sql.contains("d.age BETWEEN 1 AND 99"));
    Ok(())
}

#[test]
fn test_like_variants_on_postgresql() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.name")?
        .like("A%")?
        .where_("d.name")?
        .not_ilike("b%")?
        .where_("d.name")?
        .like_escape("100!%", '!')?
        .query_string()?;

    assert!(sql.contains("d.name LIKE $1"));
    assert!(sql.contains("d.name NOT ILIKE $2"));
    assert!(sql.contains("d.name LIKE $3 ESCAPE '!'"));
    Ok(())
}

#[test]
fn test_like_escape_quote_is_doubled() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.name")?
        .like_escape("100'%", '\'')?
        .query_string()?;

    assert!(sql.ends_with("d.name LIKE $1 ESCAPE ''''"));
    Ok(())
}

#[test]
fn test_case_insensitive_like_without_ilike() -> Result<()> {
    let factory = common::mysql();
    let sql = document_ids(&factory)?
        .where_("d.name")?
        .ilike("a%")?
        .query_string()?;

    assert!(sql.ends_with("WHERE UPPER(d.name) LIKE UPPER(?)"));
    Ok(())
}

#[test]
fn test_in_values_and_empty_lists() -> Result<()> {
    let factory = common::postgresql();
    let rendered = document_ids(&factory)?
        .where_("d.age")?
        .in_values(vec![1, 2, 3])?
        .build()?;
    assert!(rendered.sql.ends_with("WHERE d.age IN ($1, $2, $3)"));
    assert_eq!(rendered.parameters.len(), 3);

    let empty = document_ids(&factory)?
        .where_("d.age")?
        .in_values(Vec::<i64>::new())?
        .query_string()?;
    assert!(empty.ends_with("WHERE 1 = 0"));

    let empty_not_in = document_ids(&factory)?
        .where_("d.age")?
        .not_in_values(Vec::<i64>::new())?
        .query_string()?;
    assert!(empty_not_in.ends_with("WHERE 1 = 1"));
    Ok(())
}

#[test]
fn test_in_expressions() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_("d.age")?
        .not_in_expressions(&["1", "2"])?
        .query_string()?;

    assert!(sql.ends_with("WHERE d.age NOT IN (1, 2)"));
    Ok(())
}

#[test]
fn test_expression_comparisons() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .left_join("d.owner", "o")?
        .select("d.id")?
        .where_("d.age")?
        .le_expression("o.age + 1")?
        .where_("UPPER(d.name)")?
        .eq_expression("UPPER(o.name)")?
        .query_string()?;

    assert!(sql.contains("WHERE d.age <= o.age + 1 AND UPPER(d.name) = UPPER(o.name)"));
    Ok(())
}

#[test]
fn test_where_expression_predicate() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_ids(&factory)?
        .where_expression("d.age > 18 AND d.name IS NOT NULL")?
        .query_string()?;

    assert!(sql.contains("d.age > 18 AND d.name IS NOT NULL"));
    Ok(())
}

#[test]
fn test_having_group() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.owner")?
        .group_by("d.owner")?
        .having_or()?
        .having("COUNT(d.id)")?
        .gt(5)?
        .having("MAX(d.age)")?
        .lt(18)?
        .end_or()?
        .query_string()?;

    assert!(sql.ends_with("GROUP BY d.owner_id HAVING (COUNT(d.id) > $1 OR MAX(d.age) < $2)"));
    Ok(())
}

#[test]
fn test_restriction_exposes_left_operand() -> Result<()> {
    let factory = common::postgresql();
    let restriction = document_ids(&factory)?.where_("d.age")?;

    assert!(restriction.left().as_path().is_some());
    restriction.eq(1)?;
    Ok(())
}

#[test]
fn test_unknown_bare_name_is_rejected() -> Result<()> {
    let factory = common::postgresql();
    let cb = document_ids(&factory)?;

    assert_eq!(
        cb.where_("foo").err(),
        Some(CriteriaError::IllegalArgument("Unknown alias 'foo'".to_string()))
    );
    assert!(matches!(
        cb.where_expression("foo = 1"),
        Err(CriteriaError::IllegalArgument(_))
    ));
    assert!(cb.where_("d").is_ok());
    Ok(())
}
