//! WITH clauses: materialized, inlined, recursive and set-operation CTEs.

use crate::common;
use fluent_criteria::prelude::*;

/// `DocumentCte` filled from the documents older than `min_age`.
fn with_document_cte(factory: &CriteriaBuilderFactory, min_age: i64) -> Result<CriteriaBuilder> {
    factory
        .create()
        .with("DocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?
        .bind("name", "d.name")?
        .where_("d.age")?
        .gt(min_age)?
        .end()
}

#[test]
fn test_materialized_cte() -> Result<()> {
    let factory = common::postgresql();
    let sql = with_document_cte(&factory, 18)?
        .from("DocumentCte", "c")?
        .select("c.name")?
        .query_string()?;

    assert_eq!(
        sql,
        "WITH document_cte(id, name) AS (SELECT d.id, d.name FROM document d WHERE d.age > $1) \
         SELECT c.name FROM document_cte c"
    );
    Ok(())
}

#[test]
fn test_cte_default_select_uses_cte_columns() -> Result<()> {
    let factory = common::postgresql();
    let sql = with_document_cte(&factory, 18)?
        .from("DocumentCte", "c")?
        .query_string()?;

    assert!(sql.ends_with("SELECT c.id, c.name FROM document_cte c"));
    Ok(())
}

#[test]
fn test_entity_preference_inlines_cte() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with("InlineDocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?
        .bind("name", "d.name")?
        .where_("d.age")?
        .gt(1)?
        .end()?
        .from("InlineDocumentCte", "i")?
        .select("i.name")?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT i.name FROM (SELECT d.id, d.name FROM document d WHERE d.age > $1) i(id, name)"
    );
    Ok(())
}

#[test]
fn test_factory_setting_inlines_ctes_without_preference() -> Result<()> {
    let factory = common::postgresql_inlining();
    let sql = with_document_cte(&factory, 18)?
        .from("DocumentCte", "c")?
        .select("c.name")?
        .query_string()?;

    assert!(!sql.starts_with("WITH"));
    assert!(sql.contains("FROM (SELECT d.id, d.name FROM document d WHERE d.age > $1) c(id, name)"));
    Ok(())
}

#[test]
fn test_recursive_cte() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_recursive("PersonCte")?
        .from("Person", "p")?
        .bind("id", "p.id")?
        .bind("name", "p.name")?
        .bind("manager", "p.manager")?
        .where_("p.manager")?
        .is_null()?
        .union_all()?
        .from("Person", "e")?
        .from("PersonCte", "c")?
        .bind("id", "e.id")?
        .bind("name", "e.name")?
        .bind("manager", "e.manager")?
        .where_("e.manager")?
        .eq_expression("c.id")?
        .end()?
        .from("PersonCte", "h")?
        .select("h.name")?
        .query_string()?;

    assert_eq!(
        sql,
        "WITH RECURSIVE person_cte(id, name, manager_id) AS (\
         SELECT p.id, p.name, p.manager_id FROM person p WHERE p.manager_id IS NULL \
         UNION ALL \
         SELECT e.id, e.name, e.manager_id FROM person e, person_cte c WHERE e.manager_id = c.id) \
         SELECT h.name FROM person_cte h"
    );
    Ok(())
}

#[test]
fn test_cte_defined_by_set_operation() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with("DocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?
        .bind("name", "d.name")?
        .union()?
        .from("Person", "p")?
        .bind("id", "p.id")?
        .bind("name", "p.name")?
        .end_set()?
        .order_by("name", true, None)?
        .set_max_results(10)?
        .end()?
        .from("DocumentCte", "c")?
        .select("c.name")?
        .query_string()?;

    assert_eq!(
        sql,
        "WITH document_cte(id, name) AS (\
         (SELECT d.id, d.name FROM document d) UNION (SELECT p.id, p.name FROM person p) ORDER BY name ASC LIMIT 10) \
         SELECT c.name FROM document_cte c"
    );
    Ok(())
}

#[test]
fn test_cte_starting_with_nested_set() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_start_set("DocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?
        .bind("name", "d.name")?
        .union()?
        .from("Person", "p")?
        .bind("id", "p.id")?
        .bind("name", "p.name")?
        .end_set()?
        .end_set()?
        .end()?
        .from("DocumentCte", "c")?
        .select("c.name")?
        .query_string()?;

    assert!(sql.starts_with(
        "WITH document_cte(id, name) AS (SELECT d.id, d.name FROM document d UNION SELECT p.id, p.name FROM person p)"
    ));
    Ok(())
}

#[test]
fn test_cte_bind_value_becomes_parameter() -> Result<()> {
    let factory = common::postgresql();
    let rendered = factory
        .create()
        .with("DocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?
        .bind_value("name", "constant")?
        .end()?
        .from("DocumentCte", "c")?
        .select("c.name")?
        .build()?;

    assert!(rendered.sql.starts_with("WITH document_cte(id, name) AS (SELECT d.id, $1 FROM document d)"));
    assert_eq!(rendered.values(), vec![Some(&Value::Text("constant".to_string()))]);
    Ok(())
}

#[test]
fn test_unbound_cte_attribute_is_rejected() -> Result<()> {
    let factory = common::postgresql();
    let cte = factory
        .create()
        .with("DocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?;

    let error = cte.end().err();
    let message = error.as_ref().map(ToString::to_string).unwrap_or_default();
    assert!(matches!(error, Some(CriteriaError::IllegalState(_))));
    assert!(message.contains("The CTE 'DocumentCte' has unbound attributes: [name]"));
    Ok(())
}

#[test]
fn test_attribute_cannot_be_bound_twice() -> Result<()> {
    let factory = common::postgresql();
    let cte = factory
        .create()
        .with("DocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?;

    let error = cte.bind("id", "d.age").err();
    assert!(matches!(error, Some(CriteriaError::IllegalArgument(ref message)) if message.contains("already bound")));
    assert!(cte.bind("missing", "d.age").is_err());
    Ok(())
}

#[test]
fn test_with_requires_cte_entity() {
    let factory = common::postgresql();
    let error = factory.create().with("Document").err();

    assert!(matches!(
        error,
        Some(CriteriaError::IllegalArgument(ref message)) if message.contains("Entity 'Document' is not a CTE entity")
    ));
}

#[test]
fn test_cte_cannot_be_defined_twice() -> Result<()> {
    let factory = common::postgresql();
    let cb = with_document_cte(&factory, 1)?;

    let error = cb.with("DocumentCte").err();
    assert!(matches!(
        error,
        Some(CriteriaError::IllegalArgument(ref message)) if message.contains("CTE 'DocumentCte' is already defined")
    ));
    Ok(())
}

#[test]
fn test_open_cte_blocks_declaring_query() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create();
    let cte = cb.with("DocumentCte")?;

    assert!(cb.from("Document", "d").unwrap_err().is_builder_chaining());
    cte.from("Document", "d")?
        .bind("id", "d.id")?
        .bind("name", "d.name")?
        .end()?;
    assert!(cb.from("DocumentCte", "c").is_ok());
    Ok(())
}

#[test]
fn test_cte_aliases_are_independent() -> Result<()> {
    let factory = common::postgresql();
    let sql = with_document_cte(&factory, 18)?
        .from("Document", "d")?
        .select("d.name")?
        .query_string()?;

    assert!(sql.ends_with("SELECT d.name FROM document d"));
    Ok(())
}

#[test]
fn test_cte_ends_after_rejected_set_operation() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create();
    let cte = cb
        .with("DocumentCte")?
        .from("Document", "d")?
        .bind("id", "d.id")?
        .bind("name", "d.name")?;
    let restriction = cte.where_("d.age")?;

    assert_eq!(
        cte.union().err().map(|error| error.to_string()),
        Some("Builder chaining error: A builder was not ended properly.".to_string())
    );
    restriction.gt(1)?;
    let sql = cte.end()?.from("DocumentCte", "c")?.select("c.name")?.query_string()?;

    assert_eq!(
        sql,
        "WITH document_cte(id, name) AS (SELECT d.id, d.name FROM document d WHERE d.age > $1) \
         SELECT c.name FROM document_cte c"
    );
    Ok(())
}
