//! Vendor differences: placeholders, pagination, ILIKE and feature support.

use crate::common;
use fluent_criteria::prelude::*;
#[allow(unused_imports)]
use fluent_criteria::{dialect_for_name, DbmsDialect, DbmsStatementType};

fn paged_names(factory: &CriteriaBuilderFactory, offset: u64, limit: u64) -> Result<String> {
    factory
        .create()
        .from("Document", "d")?
        .select("d.name")?
        .order_by_asc("d.id")?
        .set_first_result(offset)?
        .set_max_results(limit)?
        .query_string()
}

#[test]
fn test_pagination_per_dialect() -> Result<()> {
    assert_eq!(
        paged_names(&common::postgresql(), 20, 10)?,
        "SELECT d.name FROM document d ORDER BY d.id ASC LIMIT 10 OFFSET 20"
    );
    assert_eq!(
        paged_names(&common::mysql(), 20, 10)?,
        "SELECT d.name FROM document d ORDER BY d.id ASC LIMIT 20, 10"
    );
    assert_eq!(
        paged_names(&common::ansi(), 20, 10)?,
        "SELECT d.name FROM document d ORDER BY d.id ASC OFFSET 20 ROWS FETCH FIRST 10 ROWS ONLY"
    );
    Ok(())
}

#[test]
fn test_first_page_omits_offset() -> Result<()> {
    assert!(paged_names(&common::mysql(), 0, 5)?.ends_with(" LIMIT 5"));
    assert!(paged_names(&common::ansi(), 0, 5)?.ends_with("ORDER BY d.id ASC FETCH FIRST 5 ROWS ONLY"));
    Ok(())
}

#[test]
fn test_placeholders() -> Result<()> {
    let restrict = |factory: CriteriaBuilderFactory| -> Result<String> {
        factory
            .create()
            .from("Document", "d")?
            .select("d.id")?
            .where_("d.age")?
            .gt(1)?
            .where_("d.name")?
            .eq("x")?
            .query_string()
    };

    assert!(restrict(common::postgresql())?.ends_with("WHERE d.age > $1 AND d.name = $2"));
    assert!(restrict(common::mysql())?.ends_with("WHERE d.age > ? AND d.name = ?"));
    assert!(restrict(common::ansi())?.ends_with("WHERE d.age > ? AND d.name = ?"));
    Ok(())
}

#[test]
fn test_ilike_falls_back_to_upper() -> Result<()> {
    let sql = common::ansi()
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .where_("d.name")?
        .not_ilike("a%")?
        .query_string()?;

    assert!(sql.ends_with("WHERE UPPER(d.name) NOT LIKE UPPER(?)"));
    Ok(())
}

#[test]
fn test_ansi_rejects_returning_columns() -> Result<()> {
    let delete = common::ansi()
        .delete("Document", "d")?
        .returning_attributes(&["id"])?;

    let error = delete.query_string().unwrap_err();
    assert_eq!(
        error.to_string(),
        "Illegal state: The ANSI dialect does not support returning columns"
    );
    Ok(())
}

#[test]
fn test_ansi_keeps_intersect() -> Result<()> {
    let sql = common::ansi()
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .intersect()?
        .from("Person", "p")?
        .select("p.id")?
        .end_set()?
        .query_string()?;

    assert_eq!(
        sql,
        "SELECT d.id FROM document d INTERSECT SELECT p.id FROM person p"
    );
    Ok(())
}

#[test]
fn test_dialect_names_and_features() -> Result<()> {
    let postgres = dialect_for_name("postgres")?;
    assert_eq!(postgres.name(), "PostgreSQL");
    assert!(postgres.supports_returning_columns());
    assert!(postgres.supports_modification_query_in_with_clause());
    assert_eq!(postgres.parameter_placeholder(3), "$3");

    let mysql = dialect_for_name("MySQL")?;
    assert_eq!(mysql.name(), "MySQL");
    assert!(!mysql.supports_returning_columns());
    assert!(!mysql.supports_set_operation(SetOperationType::Except));
    assert!(mysql.supports_set_operation(SetOperationType::UnionAll));

    assert_eq!(dialect_for_name("default")?.name(), "ANSI");
    assert!(matches!(
        dialect_for_name("oracle"),
        Err(CriteriaError::Configuration(_))
    ));
    assert_eq!(DbmsStatementType::Update.to_string(), "UPDATE");
    Ok(())
}

#[test]
fn test_factory_exposes_dialect() {
    assert_eq!(common::mysql().dialect().name(), "MySQL");
    assert_eq!(common::postgresql().dialect().name(), "PostgreSQL");
}
