//! Read-only and mutating traversal over expression trees.
//!
//! Both traits visit every node by default through the `walk_*` functions;
//! implementors override the hooks they care about and call back into the
//! matching `walk_*` function to keep descending.

use super::{
    CaseExpression, CompoundPredicate, Expression, PathExpression, Predicate, SubqueryExpression,
    WhenCondition,
};
use crate::query_builder::{JoinManagerId, QueryNode, SelectQuery};
use std::collections::HashMap;

pub trait Visitor {
    fn visit_expression(&mut self, expression: &Expression) {
        walk_expression(self, expression);
    }

    fn visit_predicate(&mut self, predicate: &Predicate) {
        walk_predicate(self, predicate);
    }

    fn visit_path(&mut self, _path: &PathExpression) {}

    fn visit_parameter(&mut self, _name: &str) {}

    fn visit_subquery(&mut self, subquery: &SubqueryExpression) {
        walk_query_node(self, &subquery.query);
    }
}

pub fn walk_expression<V: Visitor + ?Sized>(visitor: &mut V, expression: &Expression) {
    match expression {
        Expression::Path(path) => visitor.visit_path(path),
        Expression::Literal(_) => {}
        Expression::Parameter(parameter) => visitor.visit_parameter(&parameter.name),
        Expression::Function(function) => {
            for argument in &function.arguments {
                visitor.visit_expression(argument);
            }
        }
        Expression::Arithmetic(arithmetic) => {
            visitor.visit_expression(&arithmetic.left);
            visitor.visit_expression(&arithmetic.right);
        }
        Expression::Negation(inner) => visitor.visit_expression(inner),
        Expression::Case(case) => walk_case(visitor, case),
        Expression::Subquery(subquery) => visitor.visit_subquery(subquery),
    }
}

fn walk_case<V: Visitor + ?Sized>(visitor: &mut V, case: &CaseExpression) {
    if let Some(operand) = &case.operand {
        visitor.visit_expression(operand);
    }
    for when in &case.when_clauses {
        match &when.condition {
            WhenCondition::Predicate(predicate) => visitor.visit_predicate(predicate),
            WhenCondition::Value(value) => visitor.visit_expression(value),
        }
        visitor.visit_expression(&when.result);
    }
    if let Some(default) = &case.default {
        visitor.visit_expression(default);
    }
}

pub fn walk_predicate<V: Visitor + ?Sized>(visitor: &mut V, predicate: &Predicate) {
    match predicate {
        Predicate::Compound(compound) => {
            for child in &compound.children {
                visitor.visit_predicate(child);
            }
        }
        Predicate::Comparison(p) => {
            visitor.visit_expression(&p.left);
            visitor.visit_expression(&p.right);
        }
        Predicate::Between(p) => {
            visitor.visit_expression(&p.left);
            visitor.visit_expression(&p.start);
            visitor.visit_expression(&p.end);
        }
        Predicate::Like(p) => {
            visitor.visit_expression(&p.left);
            visitor.visit_expression(&p.pattern);
        }
        Predicate::In(p) => {
            visitor.visit_expression(&p.left);
            for item in &p.right {
                visitor.visit_expression(item);
            }
        }
        Predicate::IsNull(p) => visitor.visit_expression(&p.expression),
        Predicate::Exists(p) => visitor.visit_expression(&p.subquery),
        Predicate::Boolean(p) => visitor.visit_expression(&p.expression),
    }
}

pub fn walk_query_node<V: Visitor + ?Sized>(visitor: &mut V, node: &QueryNode) {
    match node {
        QueryNode::Select(query) => walk_select_query(visitor, query),
        QueryNode::SetOperation(set) => {
            for operand in &set.operands {
                walk_query_node(visitor, operand);
            }
            for item in &set.order_by {
                visitor.visit_expression(&item.expression);
            }
        }
    }
}

pub fn walk_select_query<V: Visitor + ?Sized>(visitor: &mut V, query: &SelectQuery) {
    for item in &query.select {
        visitor.visit_expression(&item.expression);
    }
    for join in &query.from.joins {
        if let Some(on) = &join.on {
            for child in &on.children {
                visitor.visit_predicate(child);
            }
        }
    }
    for child in &query.where_clause.children {
        visitor.visit_predicate(child);
    }
    for expression in &query.group_by {
        visitor.visit_expression(expression);
    }
    for child in &query.having.children {
        visitor.visit_predicate(child);
    }
    for item in &query.order_by {
        visitor.visit_expression(&item.expression);
    }
}

pub trait VisitorMut {
    fn visit_expression_mut(&mut self, expression: &mut Expression) {
        walk_expression_mut(self, expression);
    }

    fn visit_predicate_mut(&mut self, predicate: &mut Predicate) {
        walk_predicate_mut(self, predicate);
    }

    fn visit_path_mut(&mut self, _path: &mut PathExpression) {}

    fn visit_select_query_mut(&mut self, query: &mut SelectQuery) {
        walk_select_query_mut(self, query);
    }

    fn visit_subquery_mut(&mut self, subquery: &mut SubqueryExpression) {
        walk_query_node_mut(self, &mut subquery.query);
    }
}

pub fn walk_expression_mut<V: VisitorMut + ?Sized>(visitor: &mut V, expression: &mut Expression) {
    match expression {
        Expression::Path(path) => visitor.visit_path_mut(path),
        Expression::Literal(_) | Expression::Parameter(_) => {}
        Expression::Function(function) => {
            for argument in &mut function.arguments {
                visitor.visit_expression_mut(argument);
            }
        }
        Expression::Arithmetic(arithmetic) => {
            visitor.visit_expression_mut(&mut arithmetic.left);
            visitor.visit_expression_mut(&mut arithmetic.right);
        }
        Expression::Negation(inner) => visitor.visit_expression_mut(inner),
        Expression::Case(case) => {
            if let Some(operand) = &mut case.operand {
                visitor.visit_expression_mut(operand);
            }
            for when in &mut case.when_clauses {
                match &mut when.condition {
                    WhenCondition::Predicate(predicate) => visitor.visit_predicate_mut(predicate),
                    WhenCondition::Value(value) => visitor.visit_expression_mut(value),
                }
                visitor.visit_expression_mut(&mut when.result);
            }
            if let Some(default) = &mut case.default {
                visitor.visit_expression_mut(default);
            }
        }
        Expression::Subquery(subquery) => visitor.visit_subquery_mut(subquery),
    }
}

pub fn walk_predicate_mut<V: VisitorMut + ?Sized>(visitor: &mut V, predicate: &mut Predicate) {
    match predicate {
        Predicate::Compound(compound) => {
            for child in &mut compound.children {
                visitor.visit_predicate_mut(child);
            }
        }
        Predicate::Comparison(p) => {
            visitor.visit_expression_mut(&mut p.left);
            visitor.visit_expression_mut(&mut p.right);
        }
        Predicate::Between(p) => {
            visitor.visit_expression_mut(&mut p.left);
            visitor.visit_expression_mut(&mut p.start);
            visitor.visit_expression_mut(&mut p.end);
        }
        Predicate::Like(p) => {
            visitor.visit_expression_mut(&mut p.left);
            visitor.visit_expression_mut(&mut p.pattern);
        }
        Predicate::In(p) => {
            visitor.visit_expression_mut(&mut p.left);
            for item in &mut p.right {
                visitor.visit_expression_mut(item);
            }
        }
        Predicate::IsNull(p) => visitor.visit_expression_mut(&mut p.expression),
        Predicate::Exists(p) => visitor.visit_expression_mut(&mut p.subquery),
        Predicate::Boolean(p) => visitor.visit_expression_mut(&mut p.expression),
    }
}

pub fn walk_query_node_mut<V: VisitorMut + ?Sized>(visitor: &mut V, node: &mut QueryNode) {
    match node {
        QueryNode::Select(query) => visitor.visit_select_query_mut(query),
        QueryNode::SetOperation(set) => {
            for operand in &mut set.operands {
                walk_query_node_mut(visitor, operand);
            }
            for item in &mut set.order_by {
                visitor.visit_expression_mut(&mut item.expression);
            }
        }
    }
}

pub fn walk_select_query_mut<V: VisitorMut + ?Sized>(visitor: &mut V, query: &mut SelectQuery) {
    for item in &mut query.select {
        visitor.visit_expression_mut(&mut item.expression);
    }
    for join in &mut query.from.joins {
        if let Some(on) = &mut join.on {
            for child in &mut on.children {
                visitor.visit_predicate_mut(child);
            }
        }
    }
    for child in &mut query.where_clause.children {
        visitor.visit_predicate_mut(child);
    }
    for expression in &mut query.group_by {
        visitor.visit_expression_mut(expression);
    }
    for child in &mut query.having.children {
        visitor.visit_predicate_mut(child);
    }
    for item in &mut query.order_by {
        visitor.visit_expression_mut(&mut item.expression);
    }
}

/// Remapping table threaded through a deep copy.
///
/// Paths owned by a join manager present in the table are retargeted to the
/// replacement; nested subqueries whose join manager is in the table get the new id.
#[derive(Debug, Clone, Default)]
pub struct CopyContext {
    join_manager_mapping: HashMap<JoinManagerId, JoinManagerId>,
}

impl CopyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mut self, from: JoinManagerId, to: JoinManagerId) -> Self {
        self.join_manager_mapping.insert(from, to);
        self
    }

    pub fn add_mapping(&mut self, from: JoinManagerId, to: JoinManagerId) {
        self.join_manager_mapping.insert(from, to);
    }

    pub fn mapped(&self, id: JoinManagerId) -> JoinManagerId {
        self.join_manager_mapping.get(&id).copied().unwrap_or(id)
    }

    pub fn is_empty(&self) -> bool {
        self.join_manager_mapping.is_empty()
    }

    pub fn remap_expression(&self, expression: &mut Expression) {
        Remapper { context: self }.visit_expression_mut(expression);
    }

    pub fn remap_predicate(&self, predicate: &mut Predicate) {
        Remapper { context: self }.visit_predicate_mut(predicate);
    }

    pub fn remap_compound(&self, compound: &mut CompoundPredicate) {
        for child in &mut compound.children {
            self.remap_predicate(child);
        }
    }

    pub fn remap_select_query(&self, query: &mut SelectQuery) {
        Remapper { context: self }.visit_select_query_mut(query);
    }
}

struct Remapper<'a> {
    context: &'a CopyContext,
}

impl VisitorMut for Remapper<'_> {
    fn visit_path_mut(&mut self, path: &mut PathExpression) {
        if let Some(owner) = path.owner {
            path.owner = Some(self.context.mapped(owner));
        }
    }

    fn visit_select_query_mut(&mut self, query: &mut SelectQuery) {
        query.from.id = self.context.mapped(query.from.id);
        walk_select_query_mut(self, query);
    }
}

/// Collects every parameter name referenced by a tree.
#[derive(Debug, Default)]
pub(crate) struct ParameterCollector {
    pub names: Vec<String>,
}

impl Visitor for ParameterCollector {
    fn visit_parameter(&mut self, name: &str) {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }
}

/// Collects bare single-element paths without an owner, which act as subquery
/// placeholders. Does not descend into bound subqueries.
#[derive(Debug, Default)]
pub(crate) struct PlaceholderCollector {
    pub names: Vec<String>,
}

impl Visitor for PlaceholderCollector {
    fn visit_path(&mut self, path: &PathExpression) {
        if path.owner.is_none() && path.is_single_element() {
            let name = path.alias().to_string();
            if !self.names.contains(&name) {
                self.names.push(name);
            }
        }
    }

    fn visit_subquery(&mut self, _subquery: &SubqueryExpression) {}
}

/// Replaces every placeholder path named `alias` with `replacement`.
pub(crate) struct PlaceholderReplacer<'a> {
    pub alias: &'a str,
    pub replacement: &'a Expression,
    pub replaced: usize,
}

impl VisitorMut for PlaceholderReplacer<'_> {
    fn visit_expression_mut(&mut self, expression: &mut Expression) {
        let matches = matches!(
            expression,
            Expression::Path(path)
                if path.owner.is_none() && path.is_single_element() && path.alias() == self.alias
        );
        if matches {
            *expression = self.replacement.clone();
            self.replaced += 1;
        } else {
            walk_expression_mut(self, expression);
        }
    }

    fn visit_subquery_mut(&mut self, _subquery: &mut SubqueryExpression) {}
}
