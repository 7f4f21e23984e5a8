pub mod builder;
pub mod case_when;
pub mod conditions;
pub mod correlation;
pub mod lifecycle;
pub mod subqueries;
