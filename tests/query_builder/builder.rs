//! SELECT rendering, parameters and copies of the main query builder.

use crate::common;
use fluent_criteria::prelude::*;

#[test]
fn test_default_select_expands_root_columns() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory.create().from("Document", "d")?.query_string()?;

    assert_eq!(sql, "SELECT d.id, d.name, d.age, d.owner_id FROM document d");
    Ok(())
}

#[test]
fn test_restriction_value_becomes_generated_parameter() -> Result<()> {
    let factory = common::postgresql();
    let rendered = factory
        .create()
        .from("Document", "d")?
        .select("d.name")?
        .where_("d.age")?
        .gt(18)?
        .build()?;

    assert_eq!(rendered.sql, "SELECT d.name FROM document d WHERE d.age > $1");
    assert_eq!(rendered.parameter_names(), vec!["param_0"]);
    assert_eq!(rendered.values(), vec![Some(&Value::Int(18))]);
    Ok(())
}

#[test]
fn test_named_parameter_must_be_bound_before_build() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .where_expression("d.age > :minAge OR d.age = :minAge")?;

    assert_eq!(cb.parameter_names(), vec!["minAge".to_string()]);
    let sql = cb.query_string()?;
    assert!(sql.contains("d.age > $1 OR d.age = $1"));

    let error = cb.build().unwrap_err();
    assert!(matches!(error, CriteriaError::IllegalState(_)));
    assert!(error.to_string().contains("Parameter 'minAge' is not bound"));

    let rendered = cb.set_parameter("minAge", 21)?.build()?;
    assert_eq!(rendered.parameters.len(), 1);
    assert_eq!(rendered.values(), vec![Some(&Value::Int(21))]);
    Ok(())
}

#[test]
fn test_positional_dialect_repeats_reused_parameter() -> Result<()> {
    let factory = common::mysql();
    let rendered = factory
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .where_expression("d.age > :minAge OR d.age = :minAge")?
        .set_parameter("minAge", 21)?
        .build()?;

    assert!(rendered.sql.contains("d.age > ? OR d.age = ?"));
    assert_eq!(rendered.parameter_names(), vec!["minAge", "minAge"]);
    Ok(())
}

#[test]
fn test_set_unknown_parameter_fails() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;

    let error = cb.set_parameter("missing", 1).unwrap_err();
    assert!(matches!(error, CriteriaError::IllegalArgument(_)));
    assert!(error
        .to_string()
        .contains("Parameter 'missing' does not exist in the query"));
    Ok(())
}

#[test]
fn test_order_by_and_pagination() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory
        .create()
        .from("Document", "d")?
        .select("d.name")?
        .order_by_desc("d.age")?
        .order_by("d.name", true, Some(false))?
        .set_first_result(20)?
        .set_max_results(10)?;

    assert_eq!(cb.first_result(), 20);
    assert_eq!(cb.max_results(), Some(10));
    assert_eq!(
        cb.query_string()?,
        "SELECT d.name FROM document d ORDER BY d.age DESC, d.name ASC NULLS LAST LIMIT 10 OFFSET 20"
    );
    Ok(())
}

#[test]
fn test_zero_offset_is_omitted() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.name")?
        .set_max_results(5)?
        .query_string()?;

    assert_eq!(sql, "SELECT d.name FROM document d LIMIT 5");
    Ok(())
}

#[test]
fn test_group_by_and_having() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.owner")?
        .select_as("COUNT(d.id)", "cnt")?
        .group_by("d.owner")?
        .having("COUNT(d.id)")?
        .gt(1)?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.owner_id, COUNT(d.id) AS cnt FROM document d GROUP BY d.owner_id HAVING COUNT(d.id) > $1"
    );
    Ok(())
}

#[test]
fn test_distinct_select() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.name")?
        .distinct()?
        .query_string()?;

    assert_eq!(sql, "SELECT DISTINCT d.name FROM document d");
    Ok(())
}

#[test]
fn test_count_query_without_joins() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory
        .create()
        .from("Document", "d")?
        .where_("d.age")?
        .gt(18)?
        .order_by_asc("d.name")?
        .set_max_results(10)?;

    assert_eq!(
        cb.count_query_string()?,
        "SELECT COUNT(*) FROM document d WHERE d.age > $1"
    );
    // The count query works on a copy.
    assert!(cb.query_string()?.ends_with("LIMIT 10"));
    Ok(())
}

#[test]
fn test_count_query_with_joins_counts_distinct_roots() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from("Document", "d")?
        .left_join("d.owner", "o")?
        .count_query_string()?;

    assert_eq!(
        sql,
        "SELECT COUNT(DISTINCT d.id) FROM document d LEFT JOIN person o ON o.id = d.owner_id"
    );
    Ok(())
}

#[test]
fn test_copy_is_independent() -> Result<()> {
    let factory = common::postgresql();
    let original = factory.create().from("Document", "d")?.select("d.id")?;
    let copy = original.copy()?;
    copy.where_("d.name")?.eq("draft")?;

    assert_eq!(original.query_string()?, "SELECT d.id FROM document d");
    assert_eq!(
        copy.query_string()?,
        "SELECT d.id FROM document d WHERE d.name = $1"
    );
    Ok(())
}

#[test]
fn test_cloned_handle_shares_the_query() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let handle = cb.clone();
    handle.select("d.name")?;

    assert_eq!(cb.query_string()?, "SELECT d.name FROM document d");
    Ok(())
}

#[test]
fn test_duplicate_alias_is_rejected() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;

    assert!(cb.from("Person", "d").is_err());
    Ok(())
}

#[test]
fn test_unknown_entity_and_attribute_are_rejected() -> Result<()> {
    let factory = common::postgresql();
    assert!(factory.create().from("Ghost", "g").is_err());

    let cb = factory.create().from("Document", "d")?;
    assert!(cb.select("d.missing").is_err());
    Ok(())
}

#[test]
fn test_outer_outside_subquery_is_syntax_error() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;

    let error = cb.select("OUTER(d.name)").unwrap_err();
    assert!(matches!(error, CriteriaError::Syntax { .. }));
    assert!(error
        .to_string()
        .contains("OUTER is only allowed inside subqueries"));
    Ok(())
}
