//! UNION / INTERSECT / EXCEPT chains.

use crate::common;
use fluent_criteria::prelude::*;
use fluent_criteria::query_builder::QueryNode;

fn document_names(factory: &CriteriaBuilderFactory) -> Result<CriteriaBuilder> {
    factory.create().from("Document", "d")?.select("d.name")
}

#[test]
fn test_simple_union() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_names(&factory)?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .end_set()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.name FROM document d UNION SELECT p.name FROM person p"
    );
    Ok(())
}

#[test]
fn test_same_operator_extends_the_chain() -> Result<()> {
    let factory = common::postgresql();
    let final_builder = document_names(&factory)?
        .union_all()?
        .from("Person", "p")?
        .select("p.name")?
        .union_all()?
        .from("Version", "v")?
        .select("v.name")?
        .end_set()?;

    assert_eq!(
        final_builder.query_string()?,
        "SELECT d.name FROM document d UNION ALL SELECT p.name FROM person p UNION ALL SELECT v.name FROM version v"
    );
    match final_builder.query()? {
        QueryNode::SetOperation(set) => {
            assert_eq!(set.operator, SetOperationType::UnionAll);
            assert_eq!(set.operands.len(), 3);
        }
        other => panic!("expected a set operation, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_operator_change_folds_previous_operands() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_names(&factory)?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .intersect()?
        .from("Version", "v")?
        .select("v.name")?
        .end_set()?
        .query_string()?;

    assert_eq!(
        sql,
        "(SELECT d.name FROM document d UNION SELECT p.name FROM person p) INTERSECT SELECT v.name FROM version v"
    );
    Ok(())
}

#[test]
fn test_chain_order_and_limit_wrap_operands() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_names(&factory)?
        .union_all()?
        .from("Person", "p")?
        .select("p.name")?
        .end_set_with()?
        .order_by_asc("name")?
        .set_max_results(5)?
        .end()?
        .query_string()?;

    assert_eq!(
        sql,
        "(SELECT d.name FROM document d) UNION ALL (SELECT p.name FROM person p) ORDER BY name ASC LIMIT 5"
    );
    Ok(())
}

#[test]
fn test_order_and_pagination_on_final_builder() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_names(&factory)?
        .except()?
        .from("Person", "p")?
        .select("p.name")?
        .end_set()?
        .order_by_desc("name")?
        .set_first_result(2)?
        .set_max_results(3)?
        .query_string()?;

    assert!(sql.ends_with("ORDER BY name DESC LIMIT 3 OFFSET 2"));
    assert!(sql.starts_with("(SELECT d.name FROM document d) EXCEPT ("));
    Ok(())
}

#[test]
fn test_operand_with_own_limit_is_wrapped() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_names(&factory)?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .order_by_asc("p.name")?
        .set_max_results(1)?
        .end_set()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.name FROM document d UNION (SELECT p.name FROM person p ORDER BY p.name ASC LIMIT 1)"
    );
    Ok(())
}

#[test]
fn test_empty_operand_is_pruned() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_names(&factory)?
        .union()?
        .end_set()?
        .query_string()?;

    assert_eq!(sql, "SELECT d.name FROM document d");
    Ok(())
}

#[test]
fn test_nested_start_operand() -> Result<()> {
    let factory = common::postgresql();
    let sql = document_names(&factory)?
        .start_union()?
        .from("Person", "p")?
        .select("p.name")?
        .intersect()?
        .from("Version", "v")?
        .select("v.name")?
        .end_set()?
        .end_set()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.name FROM document d UNION (SELECT p.name FROM person p INTERSECT SELECT v.name FROM version v)"
    );
    Ok(())
}

#[test]
fn test_factory_start_set_opens_nested_first_operand() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .start_set()?
        .from("Document", "d")?
        .select("d.name")?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .end_set()?
        .except()?
        .from("Version", "v")?
        .select("v.name")?
        .end_set()?
        .query_string()?;

    assert_eq!(
        sql,
        "(SELECT d.name FROM document d UNION SELECT p.name FROM person p) EXCEPT SELECT v.name FROM version v"
    );
    Ok(())
}

#[test]
fn test_parameters_are_numbered_across_operands() -> Result<()> {
    let factory = common::postgresql();
    let rendered = document_names(&factory)?
        .where_("d.age")?
        .gt(1)?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .where_("p.age")?
        .lt(2)?
        .end_set()?
        .build()?;

    assert_eq!(
        rendered.sql,
        "SELECT d.name FROM document d WHERE d.age > $1 UNION SELECT p.name FROM person p WHERE p.age < $2"
    );
    assert_eq!(rendered.values(), vec![Some(&Value::Int(1)), Some(&Value::Int(2))]);
    Ok(())
}

#[test]
fn test_named_parameter_bound_on_final_builder() -> Result<()> {
    let factory = common::postgresql();
    let final_builder = document_names(&factory)?
        .where_expression("d.age > :age")?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .where_expression("p.age > :age")?
        .end_set()?;

    assert!(final_builder.build().is_err());
    let rendered = final_builder.set_parameter("age", 30)?.build()?;
    assert_eq!(rendered.parameters.len(), 1);
    assert!(rendered.sql.contains("d.age > $1"));
    assert!(rendered.sql.contains("p.age > $1"));
    Ok(())
}

#[test]
fn test_mysql_rejects_intersect() -> Result<()> {
    let factory = common::mysql();
    let final_builder = document_names(&factory)?
        .intersect()?
        .from("Person", "p")?
        .select("p.name")?
        .end_set()?;

    let error = final_builder.query_string().unwrap_err();
    assert!(matches!(error, CriteriaError::IllegalState(_)));
    assert!(error
        .to_string()
        .contains("The MySQL dialect does not support INTERSECT"));
    Ok(())
}

#[test]
fn test_mysql_union() -> Result<()> {
    let factory = common::mysql();
    let sql = document_names(&factory)?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .end_set()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.name FROM document d UNION SELECT p.name FROM person p"
    );
    Ok(())
}

#[test]
fn test_ansi_chain_pagination() -> Result<()> {
    let factory = common::ansi();
    let sql = document_names(&factory)?
        .union()?
        .from("Person", "p")?
        .select("p.name")?
        .end_set()?
        .set_first_result(10)?
        .set_max_results(5)?
        .query_string()?;

    assert!(sql.ends_with("OFFSET 10 ROWS FETCH FIRST 5 ROWS ONLY"));
    Ok(())
}

#[test]
fn test_ended_leaf_cannot_end_again() -> Result<()> {
    let factory = common::postgresql();
    let leaf = document_names(&factory)?
        .union()?
        .from("Person", "p")?
        .select("p.name")?;
    leaf.end_set()?;

    assert!(leaf.end_set().unwrap_err().is_builder_chaining());
    Ok(())
}

#[test]
fn test_set_operators_display_as_sql() {
    assert_eq!(SetOperationType::Union.to_string(), "UNION");
    assert_eq!(SetOperationType::IntersectAll.to_string(), "INTERSECT ALL");
    assert_eq!(SetOperationType::ExceptAll.to_string(), "EXCEPT ALL");
}
