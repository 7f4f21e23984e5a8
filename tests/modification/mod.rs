//! DELETE, UPDATE and INSERT statements, standalone and as returning CTEs.

use crate::common;
use fluent_criteria::prelude::*;

#[test]
fn test_standalone_delete() -> Result<()> {
    let factory = common::postgresql();
    let rendered = factory
        .delete("Document", "d")?
        .where_("d.age")?
        .lt(18)?
        .end()?;

    assert_eq!(rendered.sql, "DELETE FROM document d WHERE d.age < $1");
    assert_eq!(rendered.values(), vec![Some(&Value::Int(18))]);
    Ok(())
}

#[test]
fn test_delete_with_returning_columns() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .delete("Document", "d")?
        .where_("d.age")?
        .lt(18)?
        .returning_attributes(&["id", "name"])?
        .query_string()?;

    assert_eq!(
        sql,
        "DELETE FROM document d WHERE d.age < $1 RETURNING d.id, d.name"
    );
    Ok(())
}

#[test]
fn test_delete_using_other_roots() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .delete("Document", "d")?
        .from("Person", "p")?
        .where_("d.owner")?
        .eq_expression("p")?
        .where_("p.age")?
        .gt(90)?
        .query_string()?;

    assert_eq!(
        sql,
        "DELETE FROM document d USING person p WHERE d.owner_id = p.id AND p.age > $1"
    );
    Ok(())
}

#[test]
fn test_update_assignments() -> Result<()> {
    let factory = common::postgresql();
    let rendered = factory
        .update("Document", "d")?
        .set_value("name", "archived")?
        .set("age", "d.age + 1")?
        .where_("d.id")?
        .eq(5)?
        .build()?;

    assert_eq!(
        rendered.sql,
        "UPDATE document d SET name = $1, age = d.age + 1 WHERE d.id = $2"
    );
    assert_eq!(
        rendered.values(),
        vec![Some(&Value::Text("archived".to_string())), Some(&Value::Int(5))]
    );
    Ok(())
}

#[test]
fn test_update_from_other_roots() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .update("Document", "d")?
        .from("Person", "p")?
        .set("name", "p.name")?
        .where_("d.owner")?
        .eq_expression("p")?
        .query_string()?;

    assert_eq!(
        sql,
        "UPDATE document d SET name = p.name FROM person p WHERE d.owner_id = p.id"
    );
    Ok(())
}

#[test]
fn test_insert_select() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .insert("Document")?
        .from("Person", "p")?
        .bind_value("name", "copy")?
        .bind("age", "p.age")?
        .where_("p.age")?
        .gt(30)?
        .query_string()?;

    assert_eq!(
        sql,
        "INSERT INTO document(name, age) SELECT $1, p.age FROM person p WHERE p.age > $2"
    );
    Ok(())
}

#[test]
fn test_update_requires_assignment() -> Result<()> {
    let factory = common::postgresql();
    let update = factory.update("Document", "d")?;

    assert!(matches!(update.query_string(), Err(CriteriaError::IllegalState(_))));
    Ok(())
}

#[test]
fn test_insert_requires_bound_attribute() -> Result<()> {
    let factory = common::postgresql();
    let insert = factory.insert("Document")?;

    assert!(matches!(insert.end(), Err(CriteriaError::IllegalState(_))));
    Ok(())
}

#[test]
fn test_statement_specific_operations() -> Result<()> {
    let factory = common::postgresql();

    let delete = factory.delete("Document", "d")?;
    assert!(matches!(delete.set("name", "'x'"), Err(CriteriaError::IllegalState(_))));

    let update = factory.update("Document", "d")?;
    assert!(matches!(update.bind("name", "'x'"), Err(CriteriaError::IllegalState(_))));
    assert!(matches!(
        update.bind_value("name", "x"),
        Err(CriteriaError::IllegalState(_))
    ));

    let insert = factory.insert("Document")?;
    assert!(matches!(
        insert.set_value("name", "x"),
        Err(CriteriaError::IllegalState(_))
    ));
    Ok(())
}

#[test]
fn test_attribute_cannot_be_assigned_twice() -> Result<()> {
    let factory = common::postgresql();
    let update = factory.update("Document", "d")?.set_value("name", "a")?;

    assert!(matches!(
        update.set_value("name", "b"),
        Err(CriteriaError::IllegalArgument(_))
    ));
    assert!(update.set_value("versions", 1).is_err());
    Ok(())
}

#[test]
fn test_standalone_end_checks_parameters_and_ends_once() -> Result<()> {
    let factory = common::postgresql();
    let delete = factory
        .delete("Document", "d")?
        .where_expression("d.age > :maxAge")?;

    let error = delete.build().unwrap_err();
    assert!(error.to_string().contains("Parameter 'maxAge' is not bound"));

    let rendered = delete.set_parameter("maxAge", 99)?.end()?;
    assert_eq!(rendered.sql, "DELETE FROM document d WHERE d.age > $1");
    assert!(delete.end().unwrap_err().is_builder_chaining());
    Ok(())
}

#[test]
fn test_modification_declares_ctes() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .delete("Document", "d")?
        .with("DocumentCte")?
        .from("Document", "x")?
        .bind("id", "x.id")?
        .bind("name", "x.name")?
        .where_("x.age")?
        .gt(80)?
        .end()?
        .where_("d.id")?
        .in_subquery()?
        .from("DocumentCte", "c")?
        .select("c.id")?
        .end()?
        .query_string()?;

    assert_eq!(
        sql,
        "WITH document_cte(id, name) AS (SELECT x.id, x.name FROM document x WHERE x.age > $1) \
         DELETE FROM document d WHERE d.id IN (SELECT c.id FROM document_cte c)"
    );
    Ok(())
}

#[test]
fn test_returning_cte() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_returning("DocumentCte")?
        .delete("Document", "d")?
        .where_("d.age")?
        .gt(100)?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .from("DocumentCte", "c")?
        .select("c.name")?
        .query_string()?;

    assert_eq!(
        sql,
        "WITH document_cte(id, name) AS (DELETE FROM document d WHERE d.age > $1 RETURNING d.id, d.name) \
         SELECT c.name FROM document_cte c"
    );
    Ok(())
}

#[test]
fn test_returning_cte_from_update() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_returning("DocumentCte")?
        .update("Document", "d")?
        .set_value("name", "renamed")?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .from("DocumentCte", "c")?
        .select("c.id")?
        .query_string()?;

    assert!(sql.starts_with(
        "WITH document_cte(id, name) AS (UPDATE document d SET name = $1 RETURNING d.id, d.name)"
    ));
    Ok(())
}

#[test]
fn test_returning_cte_requires_every_attribute() -> Result<()> {
    let factory = common::postgresql();
    let delete = factory
        .create()
        .with_returning("DocumentCte")?
        .delete("Document", "d")?
        .returning("id", "id")?;

    let error = delete.end().err();
    assert!(matches!(
        error,
        Some(CriteriaError::IllegalState(ref message)) if message.contains("has unbound attributes: [name]")
    ));
    Ok(())
}

#[test]
fn test_returning_binding_kinds_are_not_interchangeable() -> Result<()> {
    let factory = common::postgresql();

    let standalone = factory.delete("Document", "d")?;
    assert!(matches!(
        standalone.returning("id", "id"),
        Err(CriteriaError::IllegalState(_))
    ));

    let in_cte = factory
        .create()
        .with_returning("DocumentCte")?
        .delete("Document", "d")?;
    assert!(matches!(
        in_cte.returning_attributes(&["id"]),
        Err(CriteriaError::IllegalState(_))
    ));
    Ok(())
}

#[test]
fn test_new_state_delete_emulation() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_returning("DocumentCte")?
        .delete("Document", "d")?
        .where_("d.age")?
        .gt(100)?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .from_new("Document", "x")?
        .select("x.name")?
        .query_string()?;

    assert_eq!(
        sql,
        "WITH document_new_del AS (DELETE FROM document d WHERE d.age > $1 RETURNING *), \
         document_new AS (SELECT * FROM document WHERE NOT EXISTS (SELECT 1 FROM document_new_del \
         WHERE (document_new_del.id) = (document.id))), \
         document_cte(id, name) AS (SELECT id, name FROM document_new_del) \
         SELECT x.name FROM document_new x"
    );
    Ok(())
}

#[test]
fn test_new_state_update_replaces_rows_by_id() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_returning("DocumentCte")?
        .update("Document", "d")?
        .set_value("name", "renamed")?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .from_new("Document", "x")?
        .select("x.name")?
        .query_string()?;

    // updated rows leave the old table by id and come back with their new values
    assert_eq!(
        sql,
        "WITH document_new_upd AS (UPDATE document d SET name = $1 RETURNING *), \
         document_new AS (SELECT * FROM document WHERE NOT EXISTS (SELECT 1 FROM document_new_upd \
         WHERE (document_new_upd.id) = (document.id)) UNION SELECT * FROM document_new_upd), \
         document_cte(id, name) AS (SELECT id, name FROM document_new_upd) \
         SELECT x.name FROM document_new x"
    );
    Ok(())
}

#[test]
fn test_new_state_insert_emulation() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_returning("DocumentCte")?
        .insert("Document")?
        .from("Person", "p")?
        .bind("name", "p.name")?
        .bind("age", "p.age")?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .from_new("Document", "x")?
        .select("x.name")?
        .query_string()?;

    assert_eq!(
        sql,
        "WITH document_new_ins AS (INSERT INTO document(name, age) SELECT p.name, p.age FROM person p RETURNING *), \
         document_new AS (SELECT * FROM document UNION SELECT * FROM document_new_ins), \
         document_cte(id, name) AS (SELECT id, name FROM document_new_ins) \
         SELECT x.name FROM document_new x"
    );
    Ok(())
}

#[test]
fn test_new_state_chains_modifications_of_one_table() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .with_returning("DocumentCte")?
        .delete("Document", "d")?
        .where_("d.age")?
        .gt(100)?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .with_returning("ArchivedDocumentCte")?
        .update("Document", "u")?
        .set_value("name", "archived")?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .from_new("Document", "x")?
        .select("x.name")?
        .query_string()?;

    assert!(sql.contains(
        "document_new AS (SELECT * FROM document WHERE NOT EXISTS (SELECT 1 FROM document_new_del \
         WHERE (document_new_del.id) = (document.id)))"
    ));
    // the second state builds on the first instead of the table
    assert!(sql.contains(
        "document_new_1 AS (SELECT * FROM document_new WHERE NOT EXISTS (SELECT 1 FROM document_new_1_upd \
         WHERE (document_new_1_upd.id) = (document_new.id)) UNION SELECT * FROM document_new_1_upd)"
    ));
    assert!(sql.contains("archived_document_cte(id, name) AS (SELECT id, name FROM document_new_1_upd)"));
    assert!(sql.ends_with("SELECT x.name FROM document_new_1 x"));
    Ok(())
}

#[test]
fn test_old_state_reads_the_table() -> Result<()> {
    let factory = common::postgresql();
    let sql = factory
        .create()
        .from_old("Document", "x")?
        .select("x.name")?
        .query_string()?;

    assert_eq!(sql, "SELECT x.name FROM document x");
    Ok(())
}

#[test]
fn test_mysql_rejects_returning() -> Result<()> {
    let factory = common::mysql();

    let standalone = factory
        .delete("Document", "d")?
        .returning_attributes(&["id"])?;
    let error = standalone.query_string().unwrap_err();
    assert!(error.to_string().contains("does not support returning columns"));

    let cte = factory
        .create()
        .with_returning("DocumentCte")?
        .delete("Document", "d")?
        .returning("id", "id")?
        .returning("name", "name")?
        .end()?
        .from("DocumentCte", "c")?;
    let error = cte.query_string().unwrap_err();
    assert!(error
        .to_string()
        .contains("The MySQL dialect does not support modification queries in the WITH clause"));
    Ok(())
}

#[test]
fn test_mysql_standalone_delete() -> Result<()> {
    let factory = common::mysql();
    let sql = factory
        .delete("Document", "d")?
        .where_("d.name")?
        .eq("x")?
        .query_string()?;

    assert_eq!(sql, "DELETE FROM document d WHERE d.name = ?");
    Ok(())
}
