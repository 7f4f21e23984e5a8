//! # Expression Trees
//!
//! Parsed clause text is represented by two node families: [`Expression`] for
//! scalar values and [`Predicate`] for boolean conditions. Builders own the trees
//! they fold together; the only mutation after construction is appending children
//! to a [`CompoundPredicate`] and retargeting path owners during [`Expression::copy`].
//!
//! Trees are produced by an [`ExpressionFactory`]. The [`CachingExpressionFactory`]
//! shares parsed trees across threads and hands out structural copies.

mod cache;
mod factory;
mod parser;
pub mod visitor;

pub use cache::{CachingExpressionFactory, ExpressionCacheKey};
pub use factory::{ExpressionFactory, MacroConfiguration, MacroFunction, SimpleExpressionFactory};
pub use visitor::{CopyContext, Visitor, VisitorMut};

use crate::query_builder::{JoinManagerId, QueryNode};
use std::fmt;

/// Scalar expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Path(PathExpression),
    Literal(Literal),
    Parameter(ParameterExpression),
    Function(FunctionExpression),
    Arithmetic(ArithmeticExpression),
    Negation(Box<Expression>),
    Case(CaseExpression),
    Subquery(SubqueryExpression),
}

/// A dotted reference such as `d.owner.name`.
///
/// `owner` names the join manager whose alias the first element refers to. It is
/// `None` for bare identifiers that are not aliases (select aliases, column names,
/// subquery placeholders).
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    pub elements: Vec<String>,
    pub owner: Option<JoinManagerId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    /// Kept textual so the tree stays `Eq`-comparable.
    Decimal(String),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterExpression {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpression {
    pub name: String,
    pub arguments: Vec<Expression>,
    pub distinct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticExpression {
    pub operator: ArithmeticOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

/// Searched (`operand == None`) or simple CASE expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpression {
    pub operand: Option<Box<Expression>>,
    pub when_clauses: Vec<WhenClause>,
    pub default: Option<Box<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub condition: WhenCondition,
    pub result: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhenCondition {
    Predicate(Box<Predicate>),
    Value(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpression {
    pub query: Box<QueryNode>,
}

/// Boolean condition node.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compound(CompoundPredicate),
    Comparison(ComparisonPredicate),
    Between(BetweenPredicate),
    Like(LikePredicate),
    In(InPredicate),
    IsNull(IsNullPredicate),
    Exists(ExistsPredicate),
    Boolean(BooleanPredicate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundKind {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundPredicate {
    pub kind: CompoundKind,
    pub children: Vec<Predicate>,
    pub negated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Quantifier applied when the right-hand side is a subquery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PredicateQuantifier {
    #[default]
    One,
    Any,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonPredicate {
    pub operator: ComparisonOperator,
    pub left: Expression,
    pub right: Expression,
    pub quantifier: PredicateQuantifier,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetweenPredicate {
    pub left: Expression,
    pub start: Expression,
    pub end: Expression,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LikePredicate {
    pub left: Expression,
    pub pattern: Expression,
    pub case_sensitive: bool,
    pub escape: Option<char>,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InPredicate {
    pub left: Expression,
    pub right: Vec<Expression>,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsNullPredicate {
    pub expression: Expression,
    pub negated: bool,
}

/// `subquery` is a subquery expression once bound; a bare path placeholder before.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsPredicate {
    pub subquery: Expression,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanPredicate {
    pub expression: Expression,
    pub negated: bool,
}

impl Expression {
    pub fn path(path: &str) -> Self {
        Expression::Path(PathExpression::new(
            path.split('.').map(str::to_string).collect(),
        ))
    }

    pub fn integer(value: i64) -> Self {
        Expression::Literal(Literal::Integer(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal(Literal::String(value.into()))
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Expression::Parameter(ParameterExpression { name: name.into() })
    }

    pub fn subquery(query: QueryNode) -> Self {
        Expression::Subquery(SubqueryExpression {
            query: Box::new(query),
        })
    }

    pub fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Expression::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Deep clone with path owners remapped through `context`.
    pub fn copy(&self, context: &CopyContext) -> Expression {
        let mut copy = self.clone();
        context.remap_expression(&mut copy);
        copy
    }
}

impl PathExpression {
    pub fn new(elements: Vec<String>) -> Self {
        Self {
            elements,
            owner: None,
        }
    }

    /// The first element, which names an alias when `owner` is set.
    pub fn alias(&self) -> &str {
        self.elements.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_single_element(&self) -> bool {
        self.elements.len() == 1
    }

    pub fn path(&self) -> String {
        self.elements.join(".")
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl ComparisonOperator {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Ne => "<>",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Le => "<=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Ge => ">=",
        }
    }
}

impl ArithmeticOperator {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
            ArithmeticOperator::Modulo => "%",
            ArithmeticOperator::Concat => "||",
        }
    }
}

impl CompoundKind {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CompoundKind::And => "AND",
            CompoundKind::Or => "OR",
        }
    }
}

impl CompoundPredicate {
    pub fn new(kind: CompoundKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            negated: false,
        }
    }

    pub fn with_children(kind: CompoundKind, children: Vec<Predicate>) -> Self {
        Self {
            kind,
            children,
            negated: false,
        }
    }

    pub fn add(&mut self, predicate: Predicate) {
        self.children.push(predicate);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Predicate {
    pub fn comparison(operator: ComparisonOperator, left: Expression, right: Expression) -> Self {
        Predicate::Comparison(ComparisonPredicate {
            operator,
            left,
            right,
            quantifier: PredicateQuantifier::One,
            negated: false,
        })
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::comparison(ComparisonOperator::Eq, left, right)
    }

    pub fn and(children: Vec<Predicate>) -> Self {
        Predicate::Compound(CompoundPredicate::with_children(CompoundKind::And, children))
    }

    pub fn or(children: Vec<Predicate>) -> Self {
        Predicate::Compound(CompoundPredicate::with_children(CompoundKind::Or, children))
    }

    /// Flips the negation flag of the node.
    pub fn negate(mut self) -> Self {
        match &mut self {
            Predicate::Compound(p) => p.negated = !p.negated,
            Predicate::Comparison(p) => p.negated = !p.negated,
            Predicate::Between(p) => p.negated = !p.negated,
            Predicate::Like(p) => p.negated = !p.negated,
            Predicate::In(p) => p.negated = !p.negated,
            Predicate::IsNull(p) => p.negated = !p.negated,
            Predicate::Exists(p) => p.negated = !p.negated,
            Predicate::Boolean(p) => p.negated = !p.negated,
        }
        self
    }

    pub fn copy(&self, context: &CopyContext) -> Predicate {
        let mut copy = self.clone();
        context.remap_predicate(&mut copy);
        copy
    }
}
