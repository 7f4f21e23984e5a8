//! Shared metamodel and factories.
//!
//! `Document` owns a to-one `owner` (Person) and a to-many `versions`
//! (Version). `DocumentCte`, `ArchivedDocumentCte` and `PersonCte` are
//! materialized CTE entities, `InlineDocumentCte` prefers to be inlined.

use fluent_criteria::prelude::*;
use std::sync::Arc;

pub fn metamodel() -> Arc<Metamodel> {
    let metamodel = Metamodel::builder()
        .entity(
            EntityType::new("Document", "document")
                .attribute("name")
                .attribute("age")
                .to_one("owner", "Person", "owner_id")
                .to_many("versions", "Version", "document_id"),
        )
        .entity(
            EntityType::new("Person", "person")
                .attribute("name")
                .attribute("age")
                .to_one("manager", "Person", "manager_id"),
        )
        .entity(
            EntityType::new("Version", "version")
                .attribute("name")
                .column("index", "version_idx")
                .to_one("document", "Document", "document_id"),
        )
        .entity(EntityType::new("DocumentCte", "document_cte").attribute("name").cte())
        .entity(
            EntityType::new("ArchivedDocumentCte", "archived_document_cte")
                .attribute("name")
                .cte(),
        )
        .entity(
            EntityType::new("InlineDocumentCte", "inline_document_cte")
                .attribute("name")
                .inline_cte(true),
        )
        .entity(
            EntityType::new("PersonCte", "person_cte")
                .attribute("name")
                .to_one("manager", "Person", "manager_id")
                .cte(),
        )
        .build()
        .expect("fixture metamodel is valid");
    Arc::new(metamodel)
}

pub fn factory_for(dialect: &str) -> CriteriaBuilderFactory {
    let config = CriteriaConfig {
        dialect: dialect.to_string(),
        ..CriteriaConfig::for_test()
    };
    CriteriaBuilderFactory::new(&config, metamodel(), MacroConfiguration::new())
        .expect("fixture factory is valid")
}

pub fn postgresql() -> CriteriaBuilderFactory {
    factory_for("postgresql")
}

pub fn mysql() -> CriteriaBuilderFactory {
    factory_for("mysql")
}

pub fn ansi() -> CriteriaBuilderFactory {
    factory_for("ansi")
}

/// A factory inlining every CTE whose entity states no preference.
pub fn postgresql_inlining() -> CriteriaBuilderFactory {
    let config = CriteriaConfig {
        inline_ctes: true,
        ..CriteriaConfig::for_test()
    };
    CriteriaBuilderFactory::new(&config, metamodel(), MacroConfiguration::new())
        .expect("fixture factory is valid")
}
