//! Builder chaining rules: one open child at a time, and ended builders stay ended.

use crate::common;
use fluent_criteria::prelude::*;

#[test]
fn test_open_restriction_blocks_parent() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let restriction = cb.where_("d.age")?;

    let error = cb.select("d.name").unwrap_err();
    assert!(error.is_builder_chaining());
    assert_eq!(
        error.to_string(),
        "Builder chaining error: There was an attempt to start a builder but a previous builder was not ended."
    );

    let error = cb.query_string().unwrap_err();
    assert_eq!(
        error.to_string(),
        "Builder chaining error: A builder was not ended properly."
    );

    restriction.eq(1)?;
    assert!(cb.select("d.name").is_ok());
    Ok(())
}

#[test]
fn test_restriction_cannot_end_twice() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let restriction = cb.where_("d.age")?;
    restriction.eq(1)?;

    let error = restriction.eq(2).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Builder chaining error: The restriction builder has already been ended."
    );
    Ok(())
}

#[test]
fn test_only_one_child_at_a_time() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let _or = cb.where_or()?;

    assert!(cb.where_("d.age").is_err());
    assert!(cb.having("d.age").is_err());
    assert!(cb.left_join("d.owner", "o").is_err());
    Ok(())
}

#[test]
fn test_open_subquery_blocks_parent() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let subquery = cb.where_exists()?.from("Version", "v")?;

    assert!(cb.where_("d.age").unwrap_err().is_builder_chaining());
    subquery.end()?;
    assert!(subquery.end().unwrap_err().is_builder_chaining());
    assert!(cb.where_("d.age").is_ok());
    Ok(())
}

#[test]
fn test_subquery_initiator_is_single_use() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let initiator = cb.where_exists()?;
    initiator.from("Version", "v")?;

    assert!(initiator.from("Person", "p").is_err());
    Ok(())
}

#[test]
fn test_set_operation_ends_the_defining_query() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?.select("d.name")?;
    let _leaf = cb.union()?;

    let error = cb.select("d.age").unwrap_err();
    assert_eq!(
        error.to_string(),
        "Builder chaining error: The query builder has already been ended."
    );
    Ok(())
}

#[test]
fn test_open_join_on_blocks_query() -> Result<()> {
    let factory = common::postgresql();
    let cb = factory.create().from("Document", "d")?;
    let on = cb.join_entity_on("Person", "p", fluent_criteria::query_builder::JoinType::Inner)?;

    assert!(cb.select("p.name").unwrap_err().is_builder_chaining());
    on.on("p.id")?.eq_expression("d.owner.id")?.end()?;
    assert!(cb.select("p.name").is_ok());
    Ok(())
}
