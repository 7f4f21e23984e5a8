//! Expression parsing, macros and the shared expression cache.

use fluent_criteria::expression::{
    ArithmeticOperator, CachingExpressionFactory, ComparisonOperator, Expression, ExpressionFactory,
    MacroConfiguration, Predicate, SimpleExpressionFactory,
};
use fluent_criteria::prelude::*;
use std::sync::Arc;
use std::thread;

fn answer(_arguments: &[Expression]) -> Result<Expression> {
    Ok(Expression::integer(42))
}

fn caching(max_entries: usize) -> CachingExpressionFactory {
    CachingExpressionFactory::new(Arc::new(SimpleExpressionFactory::new()), max_entries)
}

#[test]
fn test_simple_expression_precedence() -> Result<()> {
    let parsed = SimpleExpressionFactory::new().create_simple_expression(
        "d.age + 2 * 3",
        false,
        &MacroConfiguration::new(),
    )?;

    let Expression::Arithmetic(sum) = parsed else {
        panic!("expected arithmetic");
    };
    assert_eq!(sum.operator, ArithmeticOperator::Add);
    assert_eq!(*sum.left, Expression::path("d.age"));
    assert!(matches!(*sum.right, Expression::Arithmetic(ref product) if product.operator == ArithmeticOperator::Multiply));
    Ok(())
}

#[test]
fn test_boolean_expression() -> Result<()> {
    let parsed = SimpleExpressionFactory::new().create_boolean_expression(
        "d.age >= :minAge",
        false,
        &MacroConfiguration::new(),
    )?;

    let Predicate::Comparison(comparison) = parsed else {
        panic!("expected comparison");
    };
    assert_eq!(comparison.operator, ComparisonOperator::Ge);
    assert_eq!(comparison.right, Expression::parameter("minAge"));
    Ok(())
}

#[test]
fn test_permissions_are_enforced() {
    let factory = SimpleExpressionFactory::new();
    let macros = MacroConfiguration::new();

    assert!(matches!(
        factory.create_simple_expression("OUTER(d.id)", false, &macros),
        Err(CriteriaError::Syntax { .. })
    ));
    assert!(factory.create_simple_expression("OUTER(d.id)", true, &macros).is_ok());
    assert!(factory.create_boolean_expression("EXISTS sq", false, &macros).is_err());
    assert!(factory.create_boolean_expression("EXISTS sq", true, &macros).is_ok());
    assert!(factory.create_simple_expression("  ", false, &macros).is_err());
}

#[test]
fn test_syntax_error_display() {
    let error = SimpleExpressionFactory::new()
        .create_simple_expression("d.age +", false, &MacroConfiguration::new())
        .unwrap_err();

    assert!(error.to_string().starts_with("Syntax error at position 7:"));
}

#[test]
fn test_macros_expand_during_parse() -> Result<()> {
    let macros = MacroConfiguration::new().with_macro("answer", answer);
    let parsed = SimpleExpressionFactory::new().create_simple_expression("ANSWER() + 1", false, &macros)?;

    let Expression::Arithmetic(sum) = parsed else {
        panic!("expected arithmetic");
    };
    assert_eq!(*sum.left, Expression::integer(42));
    assert!(macros.get("Answer").is_some());
    Ok(())
}

#[test]
fn test_macros_in_queries() -> Result<()> {
    let config = CriteriaConfig::for_test();
    let macros = MacroConfiguration::new().with_macro("ANSWER", answer);
    let factory = CriteriaBuilderFactory::new(&config, crate::common::metamodel(), macros)?;

    let sql = factory
        .create()
        .from("Document", "d")?
        .select("d.id")?
        .where_("d.age")?
        .eq_expression("ANSWER()")?
        .query_string()?;

    assert_eq!(sql, "SELECT d.id FROM document d WHERE d.age = 42");
    Ok(())
}

#[test]
fn test_cache_counts_hits_and_misses() -> Result<()> {
    let cache = caching(16);
    let macros = MacroConfiguration::new();

    let first = cache.create_simple_expression("d.name", false, &macros)?;
    let second = cache.create_simple_expression("d.name", false, &macros)?;
    assert_eq!(first, second);
    assert_eq!((cache.hits(), cache.misses()), (1, 1));

    // the permission flag is part of the key
    cache.create_simple_expression("d.name", true, &macros)?;
    assert_eq!(cache.misses(), 2);
    assert_eq!(cache.len(), 2);

    cache.clear();
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn test_cache_clears_when_full() -> Result<()> {
    let cache = caching(2);
    let macros = MacroConfiguration::new();

    cache.create_simple_expression("d.a", false, &macros)?;
    cache.create_simple_expression("d.b", false, &macros)?;
    assert_eq!(cache.len(), 2);

    cache.create_simple_expression("d.c", false, &macros)?;
    assert_eq!(cache.len(), 1);
    Ok(())
}

#[test]
fn test_failed_parses_are_not_cached() {
    let cache = caching(8);
    let macros = MacroConfiguration::new();

    assert!(cache.create_boolean_expression("d.age >", false, &macros).is_err());
    assert!(cache.is_empty());
}

#[test]
fn test_cache_is_shared_across_threads() {
    let cache = Arc::new(caching(64));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let macros = MacroConfiguration::new();
                for _ in 0..10 {
                    cache
                        .create_boolean_expression("d.age > 18", false, &macros)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.hits() + cache.misses(), 40);
    assert_eq!(cache.len(), 1);
}
