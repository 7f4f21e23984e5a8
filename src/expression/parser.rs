//! Recursive-descent parser for clause text.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! predicate  := or
//! or         := and ("OR" and)*
//! and        := not ("AND" not)*
//! not        := "NOT" not | "EXISTS" placeholder | "(" predicate ")" | comparison
//! comparison := additive [cmp [quantifier] additive | ["NOT"] BETWEEN additive AND additive
//!               | ["NOT"] (LIKE | ILIKE) additive [ESCAPE string]
//!               | ["NOT"] IN "(" additive ("," additive)* ")" | ["NOT"] IN additive
//!               | IS ["NOT"] NULL]
//! additive   := multiplicative (("+" | "-" | "||") multiplicative)*
//! multiplicative := unary (("*" | "/" | "%") unary)*
//! unary      := "-" unary | primary
//! primary    := literal | ":" name | CASE ... END | "(" additive ")" | name "(" args ")" | path
//! ```

use super::factory::MacroConfiguration;
use super::{
    ArithmeticExpression, ArithmeticOperator, BetweenPredicate, BooleanPredicate, CaseExpression,
    ComparisonOperator, ComparisonPredicate, CompoundKind, CompoundPredicate, ExistsPredicate,
    Expression, FunctionExpression, InPredicate, IsNullPredicate, LikePredicate, Literal,
    ParameterExpression, PathExpression, Predicate, PredicateQuantifier, WhenClause,
    WhenCondition,
};
use crate::error::{CriteriaError, Result};

const RESERVED: &[&str] = &[
    "AND", "OR", "NOT", "BETWEEN", "LIKE", "ILIKE", "IN", "IS", "WHEN", "THEN", "ELSE", "END",
    "ESCAPE", "EXISTS",
];

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Identifier(String),
    Integer(i64),
    Decimal(String),
    Str(String),
    Parameter(String),
    LeftParen,
    RightParen,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    End,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let kind = match c {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => TokenKind::Eq,
            '|' if chars.get(i + 1) == Some(&'|') => {
                i += 1;
                TokenKind::Concat
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                i += 1;
                TokenKind::Ne
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    i += 1;
                    TokenKind::Le
                }
                Some('>') => {
                    i += 1;
                    TokenKind::Ne
                }
                _ => TokenKind::Lt,
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 1;
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(CriteriaError::syntax(start, "unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => break,
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                TokenKind::Str(value)
            }
            ':' => {
                let mut name = String::new();
                while let Some(ch) = chars.get(i + 1) {
                    if ch.is_alphanumeric() || *ch == '_' {
                        name.push(*ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(CriteriaError::syntax(start, "parameter name expected after ':'"));
                }
                TokenKind::Parameter(name)
            }
            c if c.is_ascii_digit() => {
                let mut literal = String::new();
                literal.push(c);
                let mut decimal = false;
                while let Some(ch) = chars.get(i + 1) {
                    if ch.is_ascii_digit() {
                        literal.push(*ch);
                    } else if *ch == '.'
                        && !decimal
                        && chars.get(i + 2).is_some_and(|d| d.is_ascii_digit())
                    {
                        decimal = true;
                        literal.push('.');
                    } else {
                        break;
                    }
                    i += 1;
                }
                if decimal {
                    TokenKind::Decimal(literal)
                } else {
                    let value = literal.parse::<i64>().map_err(|_| {
                        CriteriaError::syntax(start, format!("integer literal out of range: {literal}"))
                    })?;
                    TokenKind::Integer(value)
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut identifier = String::new();
                identifier.push(c);
                while let Some(ch) = chars.get(i + 1) {
                    if ch.is_alphanumeric() || *ch == '_' || *ch == '$' {
                        identifier.push(*ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                TokenKind::Identifier(identifier)
            }
            other => {
                return Err(CriteriaError::syntax(
                    start,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        tokens.push(Token {
            kind,
            position: start,
        });
        i += 1;
    }

    tokens.push(Token {
        kind: TokenKind::End,
        position: chars.len(),
    });
    Ok(tokens)
}

pub(crate) struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    macros: &'a MacroConfiguration,
    allow_outer: bool,
    allow_subqueries: bool,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(
        text: &str,
        macros: &'a MacroConfiguration,
        allow_outer: bool,
        allow_subqueries: bool,
    ) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(text)?,
            position: 0,
            macros,
            allow_outer,
            allow_subqueries,
        })
    }

    pub(crate) fn parse_expression(mut self) -> Result<Expression> {
        let expression = self.additive()?;
        self.expect_end()?;
        Ok(expression)
    }

    pub(crate) fn parse_predicate(mut self) -> Result<Predicate> {
        let predicate = self.or()?;
        self.expect_end()?;
        Ok(predicate)
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.position.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.position + offset).min(self.tokens.len() - 1)].kind
    }

    fn current_position(&self) -> usize {
        self.tokens[self.position.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        kind
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(CriteriaError::syntax(self.current_position(), message))
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Identifier(id) if id.eq_ignore_ascii_case(keyword))
    }

    fn is_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.peek_at(offset), TokenKind::Identifier(id) if id.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.error(format!("expected {keyword}"))
        }
    }

    fn expect(&mut self, expected: TokenKind, description: &str) -> Result<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            self.error(format!("expected {description}"))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            TokenKind::End => Ok(()),
            other => self.error(format!("unexpected trailing input {other:?}")),
        }
    }

    fn or(&mut self) -> Result<Predicate> {
        let first = self.and()?;
        if !self.is_keyword("OR") {
            return Ok(first);
        }
        let mut children = vec![first];
        while self.eat_keyword("OR") {
            children.push(self.and()?);
        }
        Ok(Predicate::Compound(CompoundPredicate::with_children(
            CompoundKind::Or,
            children,
        )))
    }

    fn and(&mut self) -> Result<Predicate> {
        let first = self.not()?;
        if !self.is_keyword("AND") {
            return Ok(first);
        }
        let mut children = vec![first];
        while self.eat_keyword("AND") {
            children.push(self.not()?);
        }
        Ok(Predicate::Compound(CompoundPredicate::with_children(
            CompoundKind::And,
            children,
        )))
    }

    fn not(&mut self) -> Result<Predicate> {
        if self.eat_keyword("NOT") {
            return Ok(self.not()?.negate());
        }
        if self.eat_keyword("EXISTS") {
            if !self.allow_subqueries {
                return self.error("EXISTS is not allowed in this context");
            }
            let parenthesized = *self.peek() == TokenKind::LeftParen;
            if parenthesized {
                self.advance();
            }
            let placeholder = match self.advance() {
                TokenKind::Identifier(name) => name,
                _ => return self.error("subquery alias expected after EXISTS"),
            };
            if parenthesized {
                self.expect(TokenKind::RightParen, "')'")?;
            }
            return Ok(Predicate::Exists(ExistsPredicate {
                subquery: Expression::Path(PathExpression::new(vec![placeholder])),
                negated: false,
            }));
        }
        if *self.peek() == TokenKind::LeftParen {
            let saved = self.position;
            self.advance();
            if let Ok(predicate) = self.or() {
                if *self.peek() == TokenKind::RightParen {
                    self.advance();
                    if !self.continues_scalar() {
                        return Ok(predicate);
                    }
                }
            }
            self.position = saved;
        }
        self.comparison()
    }

    /// Whether the next token continues a scalar expression, meaning a preceding
    /// parenthesized group was arithmetic rather than boolean.
    fn continues_scalar(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::Concat
                | TokenKind::Eq
                | TokenKind::Ne
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
        ) || ["BETWEEN", "LIKE", "ILIKE", "IN", "IS"]
            .iter()
            .any(|keyword| self.is_keyword(keyword))
            || (self.is_keyword("NOT")
                && ["BETWEEN", "LIKE", "ILIKE", "IN"]
                    .iter()
                    .any(|keyword| self.is_keyword_at(1, keyword)))
    }

    fn comparison(&mut self) -> Result<Predicate> {
        let left = self.additive()?;

        let operator = match self.peek() {
            TokenKind::Eq => Some(ComparisonOperator::Eq),
            TokenKind::Ne => Some(ComparisonOperator::Ne),
            TokenKind::Lt => Some(ComparisonOperator::Lt),
            TokenKind::Le => Some(ComparisonOperator::Le),
            TokenKind::Gt => Some(ComparisonOperator::Gt),
            TokenKind::Ge => Some(ComparisonOperator::Ge),
            _ => None,
        };
        if let Some(operator) = operator {
            self.advance();
            let quantifier = if self.eat_keyword("ANY") || self.eat_keyword("SOME") {
                PredicateQuantifier::Any
            } else if self.eat_keyword("ALL") {
                PredicateQuantifier::All
            } else {
                PredicateQuantifier::One
            };
            let right = self.additive()?;
            return Ok(Predicate::Comparison(ComparisonPredicate {
                operator,
                left,
                right,
                quantifier,
                negated: false,
            }));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Predicate::IsNull(IsNullPredicate {
                expression: left,
                negated,
            }));
        }

        let negated = if self.is_keyword("NOT")
            && ["BETWEEN", "LIKE", "ILIKE", "IN"]
                .iter()
                .any(|keyword| self.is_keyword_at(1, keyword))
        {
            self.advance();
            true
        } else {
            false
        };

        if self.eat_keyword("BETWEEN") {
            let start = self.additive()?;
            self.expect_keyword("AND")?;
            let end = self.additive()?;
            return Ok(Predicate::Between(BetweenPredicate {
                left,
                start,
                end,
                negated,
            }));
        }

        let case_insensitive = self.is_keyword("ILIKE");
        if self.eat_keyword("LIKE") || self.eat_keyword("ILIKE") {
            let pattern = self.additive()?;
            let escape = if self.eat_keyword("ESCAPE") {
                match self.advance() {
                    TokenKind::Str(value) if value.chars().count() == 1 => value.chars().next(),
                    _ => return self.error("single character escape literal expected"),
                }
            } else {
                None
            };
            return Ok(Predicate::Like(LikePredicate {
                left,
                pattern,
                case_sensitive: !case_insensitive,
                escape,
                negated,
            }));
        }

        if self.eat_keyword("IN") {
            let right = if *self.peek() == TokenKind::LeftParen {
                self.advance();
                let mut items = vec![self.additive()?];
                while *self.peek() == TokenKind::Comma {
                    self.advance();
                    items.push(self.additive()?);
                }
                self.expect(TokenKind::RightParen, "')'")?;
                items
            } else {
                vec![self.additive()?]
            };
            return Ok(Predicate::In(InPredicate {
                left,
                right,
                negated,
            }));
        }

        if negated {
            return self.error("BETWEEN, LIKE or IN expected after NOT");
        }

        Ok(Predicate::Boolean(BooleanPredicate {
            expression: left,
            negated: false,
        }))
    }

    fn additive(&mut self) -> Result<Expression> {
        let mut left = self.multiplicative()?;
        loop {
            let operator = match self.peek() {
                TokenKind::Plus => ArithmeticOperator::Add,
                TokenKind::Minus => ArithmeticOperator::Subtract,
                TokenKind::Concat => ArithmeticOperator::Concat,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = arithmetic(operator, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.unary()?;
        loop {
            let operator = match self.peek() {
                TokenKind::Star => ArithmeticOperator::Multiply,
                TokenKind::Slash => ArithmeticOperator::Divide,
                TokenKind::Percent => ArithmeticOperator::Modulo,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = arithmetic(operator, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expression> {
        match self.peek() {
            TokenKind::Minus => {
                self.advance();
                Ok(match self.unary()? {
                    Expression::Literal(Literal::Integer(value)) => {
                        Expression::Literal(Literal::Integer(-value))
                    }
                    Expression::Literal(Literal::Decimal(value)) => {
                        Expression::Literal(Literal::Decimal(format!("-{value}")))
                    }
                    other => Expression::Negation(Box::new(other)),
                })
            }
            TokenKind::Plus => {
                self.advance();
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expression> {
        let token = self.peek().clone();
        let expression = match token {
            TokenKind::Integer(value) => Expression::Literal(Literal::Integer(value)),
            TokenKind::Decimal(value) => Expression::Literal(Literal::Decimal(value)),
            TokenKind::Str(value) => Expression::Literal(Literal::String(value)),
            TokenKind::Parameter(name) => Expression::Parameter(ParameterExpression { name }),
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.additive()?;
                self.expect(TokenKind::RightParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::Identifier(identifier) => return self.identifier(identifier),
            TokenKind::End => return self.error("unexpected end of expression"),
            other => return self.error(format!("unexpected token {other:?}")),
        };
        self.advance();
        Ok(expression)
    }

    /// Called with the identifier token still current.
    fn identifier(&mut self, identifier: String) -> Result<Expression> {
        let upper = identifier.to_ascii_uppercase();
        if RESERVED.contains(&upper.as_str()) {
            return self.error(format!("unexpected keyword {identifier}"));
        }
        self.advance();
        match upper.as_str() {
            "TRUE" => return Ok(Expression::Literal(Literal::Boolean(true))),
            "FALSE" => return Ok(Expression::Literal(Literal::Boolean(false))),
            "NULL" => return Ok(Expression::Literal(Literal::Null)),
            "CASE" => return self.case(),
            _ => {}
        }

        if *self.peek() == TokenKind::LeftParen {
            return self.function(identifier, upper);
        }

        let mut elements = vec![identifier];
        while *self.peek() == TokenKind::Dot {
            self.advance();
            match self.advance() {
                TokenKind::Identifier(element) => elements.push(element),
                _ => return self.error("path element expected after '.'"),
            }
        }
        Ok(Expression::Path(PathExpression::new(elements)))
    }

    fn function(&mut self, name: String, upper: String) -> Result<Expression> {
        let start = self.current_position();
        self.expect(TokenKind::LeftParen, "'('")?;
        let distinct = self.eat_keyword("DISTINCT");
        let mut arguments = Vec::new();
        if *self.peek() == TokenKind::Star {
            self.advance();
            arguments.push(Expression::Path(PathExpression::new(vec!["*".to_string()])));
        } else if *self.peek() != TokenKind::RightParen {
            arguments.push(self.additive()?);
            while *self.peek() == TokenKind::Comma {
                self.advance();
                arguments.push(self.additive()?);
            }
        }
        self.expect(TokenKind::RightParen, "')'")?;

        if upper == "OUTER" {
            if !self.allow_outer {
                return Err(CriteriaError::syntax(
                    start,
                    "OUTER is only allowed inside subqueries",
                ));
            }
            if arguments.len() != 1 || arguments[0].as_path().is_none() {
                return Err(CriteriaError::syntax(start, "OUTER expects a single path argument"));
            }
        }

        if let Some(function) = self.macros.get(&upper) {
            return function.apply(&arguments).map_err(|err| match err {
                CriteriaError::Syntax { .. } => err,
                other => CriteriaError::syntax(start, other.to_string()),
            });
        }

        Ok(Expression::Function(FunctionExpression {
            name,
            arguments,
            distinct,
        }))
    }

    fn case(&mut self) -> Result<Expression> {
        let operand = if self.is_keyword("WHEN") {
            None
        } else {
            Some(Box::new(self.additive()?))
        };

        let mut when_clauses = Vec::new();
        while self.eat_keyword("WHEN") {
            let condition = if operand.is_some() {
                WhenCondition::Value(self.additive()?)
            } else {
                WhenCondition::Predicate(Box::new(self.or()?))
            };
            self.expect_keyword("THEN")?;
            let result = self.additive()?;
            when_clauses.push(WhenClause { condition, result });
        }
        if when_clauses.is_empty() {
            return self.error("CASE requires at least one WHEN clause");
        }

        let default = if self.eat_keyword("ELSE") {
            Some(Box::new(self.additive()?))
        } else {
            None
        };
        self.expect_keyword("END")?;

        Ok(Expression::Case(CaseExpression {
            operand,
            when_clauses,
            default,
        }))
    }
}

fn arithmetic(operator: ArithmeticOperator, left: Expression, right: Expression) -> Expression {
    Expression::Arithmetic(ArithmeticExpression {
        operator,
        left: Box::new(left),
        right: Box::new(right),
    })
}
