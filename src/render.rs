//! # SQL Rendering
//!
//! Turns the query trees produced by the builders into SQL text for the
//! configured dialect.
//!
//! Paths are resolved against the FROM clause that owns them, so a correlated
//! subquery renders the outer alias unchanged. Parameters are collected in
//! rendering order; dialects with numbered placeholders reuse the position of a
//! name that occurs more than once.

use crate::constants::synthetic;
use crate::dialect::{DbmsDialect, DbmsModificationState, DbmsStatementType, ExtendedSql, ExtendedSqlResult};
use crate::error::{CriteriaError, Result};
use crate::expression::{
    ArithmeticExpression, ArithmeticOperator, CaseExpression, CompoundPredicate, Expression,
    Literal, PathExpression, Predicate, PredicateQuantifier, WhenCondition,
};
use crate::logging::log_query_operation;
use crate::metamodel::{AttributeKind, Metamodel};
use crate::query_builder::cte::{CteBody, CteDefinition};
use crate::query_builder::joins::{JoinManager, JoinManagerId, JoinNode, JoinTarget};
use crate::query_builder::main_query::MainQuery;
use crate::query_builder::model::{ModificationQuery, OrderByItem, QueryNode, SelectItem, SelectQuery, SetOperation};
use crate::query_builder::parameters::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

/// A parameter of a rendered statement, in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    /// `None` while the parameter is unbound.
    pub value: Option<Value>,
}

/// SQL text plus the parameters its placeholders stand for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedQuery {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
}

impl RenderedQuery {
    /// Fails on the first parameter without a value.
    pub fn ensure_bound(&self) -> Result<()> {
        match self.parameters.iter().find(|parameter| parameter.value.is_none()) {
            Some(parameter) => Err(CriteriaError::IllegalState(format!(
                "Parameter '{}' is not bound",
                parameter.name
            ))),
            None => Ok(()),
        }
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn values(&self) -> Vec<Option<&Value>> {
        self.parameters.iter().map(|p| p.value.as_ref()).collect()
    }
}

/// Renders a SELECT or set operation together with the CTEs of its query.
pub(crate) fn render_query(main: &Rc<MainQuery>, node: &QueryNode) -> Result<RenderedQuery> {
    let ctes: Vec<CteDefinition> = main.ctes.borrow().iter().cloned().collect();
    let mut renderer = Renderer::new(main, &ctes);
    let with_clause = renderer.with_clause()?;
    let body = renderer.render_node(node, false, true)?;
    Ok(renderer.finish(format!("{with_clause}{body}"), DbmsStatementType::Select))
}

/// Renders a standalone DELETE, UPDATE or INSERT together with its CTEs.
pub(crate) fn render_modification(main: &Rc<MainQuery>, query: &ModificationQuery) -> Result<RenderedQuery> {
    let ctes: Vec<CteDefinition> = main.ctes.borrow().iter().cloned().collect();
    let mut renderer = Renderer::new(main, &ctes);
    let with_clause = renderer.with_clause()?;
    let body = renderer.render_modification_body(query)?;
    let table = renderer.metamodel.table_name(&query.entity)?;
    let returning_columns = query
        .returning
        .iter()
        .map(|binding| renderer.entity_column(&query.entity, &binding.attribute))
        .collect::<Result<Vec<_>>>()?;
    let request = ExtendedSql {
        statement_type: Some(query.statement_type),
        with_clause: Some(&with_clause),
        affected_table: Some(table),
        returning_columns: (!returning_columns.is_empty()).then_some(returning_columns.as_slice()),
        ..Default::default()
    };
    let sql = renderer.dialect.append_extended_sql(&body, &request)?.sql;
    Ok(renderer.finish(sql, query.statement_type))
}

struct Renderer<'a> {
    main: &'a MainQuery,
    metamodel: &'a Metamodel,
    dialect: &'a dyn DbmsDialect,
    ctes: &'a [CteDefinition],
    /// FROM clauses of the enclosing query bodies, innermost last.
    scopes: Vec<&'a JoinManager>,
    parameters: Vec<String>,
    /// Latest NEW-state CTE per modified entity.
    new_states: BTreeMap<String, String>,
    new_state_counts: BTreeMap<String, usize>,
}

impl<'a> Renderer<'a> {
    fn new(main: &'a MainQuery, ctes: &'a [CteDefinition]) -> Self {
        Self {
            main,
            metamodel: &main.metamodel,
            dialect: main.dialect.as_ref(),
            ctes,
            scopes: Vec::new(),
            parameters: Vec::new(),
            new_states: BTreeMap::new(),
            new_state_counts: BTreeMap::new(),
        }
    }

    fn finish(self, sql: String, statement_type: DbmsStatementType) -> RenderedQuery {
        let bound = self.main.parameters.borrow();
        let parameters = self
            .parameters
            .iter()
            .map(|name| QueryParameter {
                name: name.clone(),
                value: bound.value(name).cloned(),
            })
            .collect();
        if self.main.log_rendered_sql {
            log_query_operation("render", &statement_type.to_string(), self.dialect.name(), "ok", Some(&sql));
        }
        RenderedQuery { sql, parameters }
    }

    fn unsupported(&self, feature: &str) -> CriteriaError {
        CriteriaError::IllegalState(format!(
            "The {} dialect does not support {feature}",
            self.dialect.name()
        ))
    }

    // ----- WITH clause -----

    fn is_inlined(&self, cte: &CteDefinition) -> Result<bool> {
        if !matches!(cte.body, CteBody::Query(_)) {
            return Ok(false);
        }
        let preference = self
            .metamodel
            .entity(&cte.entity)?
            .cte
            .as_ref()
            .and_then(|metadata| metadata.inline);
        Ok(preference.unwrap_or(self.main.inline_ctes))
    }

    fn inlined_cte(&self, entity: &str) -> Result<Option<&'a CteDefinition>> {
        let ctes = self.ctes;
        for cte in ctes {
            if cte.entity == entity && self.is_inlined(cte)? {
                return Ok(Some(cte));
            }
        }
        Ok(None)
    }

    fn with_clause(&mut self) -> Result<String> {
        let ctes = self.ctes;
        let metamodel = self.metamodel;
        let mut entries = Vec::new();
        let mut recursive = false;
        for cte in ctes {
            if self.is_inlined(cte)? {
                continue;
            }
            if !self.dialect.supports_with_clause() {
                return Err(self.unsupported("the WITH clause"));
            }
            let header = format!(
                "{}({})",
                metamodel.table_name(&cte.entity)?,
                cte.columns.join(", ")
            );
            match &cte.body {
                CteBody::Query(node) => {
                    let sql = self.render_node(node, false, false)?;
                    entries.push(format!("{header} AS ({sql})"));
                }
                CteBody::Recursive {
                    base,
                    operator,
                    recursive: recursive_part,
                } => {
                    if !self.dialect.supports_recursive_ctes() {
                        return Err(self.unsupported("recursive CTEs"));
                    }
                    recursive = true;
                    let base_sql = self.render_select_statement(base, false, false)?;
                    let recursive_sql = self.render_select_statement(recursive_part, false, false)?;
                    entries.push(format!(
                        "{header} AS ({base_sql} {} {recursive_sql})",
                        self.dialect.set_operator_sql(*operator)
                    ));
                }
                CteBody::Modification(query) => {
                    if !self.dialect.supports_modification_query_in_with_clause() {
                        return Err(self.unsupported("modification queries in the WITH clause"));
                    }
                    let result = self.render_modification_cte(cte, query)?;
                    for synthetic in result.ctes {
                        entries.push(format!("{} AS ({})", synthetic.name, synthetic.sql));
                    }
                    entries.push(format!("{header} AS ({})", result.sql));
                }
            }
        }
        if entries.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "WITH {}{} ",
            if recursive { "RECURSIVE " } else { "" },
            entries.join(", ")
        ))
    }

    fn render_modification_cte(
        &mut self,
        cte: &'a CteDefinition,
        query: &'a ModificationQuery,
    ) -> Result<ExtendedSqlResult> {
        let metamodel = self.metamodel;
        let body = self.render_modification_body(query)?;
        let table = metamodel.table_name(&query.entity)?;

        let mut returning_columns = Vec::new();
        for attribute in metamodel.column_attributes(&cte.entity)? {
            let binding = query
                .returning
                .iter()
                .find(|binding| binding.cte_attribute.as_deref() == Some(attribute.name.as_str()))
                .ok_or_else(|| {
                    CriteriaError::IllegalState(format!(
                        "The CTE '{}' has unbound attributes: [{}]",
                        cte.entity, attribute.name
                    ))
                })?;
            returning_columns.push(self.entity_column(&query.entity, &binding.attribute)?);
        }

        let key_columns = vec![metamodel.id_column(&query.entity)?.to_string()];
        let previous = self.new_states.get(&query.entity).cloned();
        let mut states = BTreeMap::new();
        if self.main.new_state_entities.borrow().contains(&query.entity) {
            let count = self.new_state_counts.entry(query.entity.clone()).or_insert(0);
            let name = if *count == 0 {
                format!("{table}{}", synthetic::NEW_STATE_SUFFIX)
            } else {
                format!("{table}{}_{count}", synthetic::NEW_STATE_SUFFIX)
            };
            *count += 1;
            states.insert(DbmsModificationState::New, name.clone());
            self.new_states.insert(query.entity.clone(), name);
        }

        let request = ExtendedSql {
            statement_type: Some(query.statement_type),
            is_embedded: true,
            affected_table: Some(table),
            returning_columns: Some(returning_columns.as_slice()),
            key_columns: Some(key_columns.as_slice()),
            modification_states: (!states.is_empty()).then_some(&states),
            previous_new_state: previous.as_deref(),
            ..Default::default()
        };
        self.dialect.append_extended_sql(&body, &request)
    }

    // ----- statements -----

    fn render_node(&mut self, node: &'a QueryNode, is_subquery: bool, expand: bool) -> Result<String> {
        match node {
            QueryNode::Select(query) => self.render_select_statement(query, is_subquery, expand),
            QueryNode::SetOperation(set) => self.render_set_operation(set, is_subquery, expand),
        }
    }

    fn render_select_statement(
        &mut self,
        query: &'a SelectQuery,
        is_subquery: bool,
        expand: bool,
    ) -> Result<String> {
        let body = self.render_select(query, expand)?;
        let request = ExtendedSql {
            statement_type: Some(DbmsStatementType::Select),
            is_subquery,
            limit: query.pagination.limit(),
            offset: query.pagination.offset(),
            ..Default::default()
        };
        Ok(self.dialect.append_extended_sql(&body, &request)?.sql)
    }

    fn render_set_operation(
        &mut self,
        set: &'a SetOperation,
        is_subquery: bool,
        expand: bool,
    ) -> Result<String> {
        let mut operands = Vec::with_capacity(set.operands.len());
        for operand in &set.operands {
            let nested = matches!(operand, QueryNode::SetOperation(_));
            operands.push(self.render_node(operand, nested, expand)?);
        }
        let mut order_by = Vec::with_capacity(set.order_by.len());
        for item in &set.order_by {
            order_by.push(self.render_order_item(item)?);
        }
        self.dialect.append_set(
            set.operator,
            is_subquery,
            &operands,
            &order_by,
            set.pagination.limit(),
            set.pagination.offset(),
        )
    }

    /// `expand` replaces unaliased entity selections by their columns.
    fn render_select(&mut self, query: &'a SelectQuery, expand: bool) -> Result<String> {
        self.scopes.push(&query.from);
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }
        let items = if query.select.is_empty() {
            if expand {
                self.default_select(&query.from)?
            } else {
                "1".to_string()
            }
        } else {
            self.render_select_items(&query.select, expand)?
        };
        sql.push_str(&items);
        if !query.from.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&self.render_from(&query.from)?);
        }
        self.push_predicate(&mut sql, " WHERE ", &query.where_clause)?;
        if !query.group_by.is_empty() {
            let mut group_by = Vec::with_capacity(query.group_by.len());
            for expression in &query.group_by {
                group_by.push(self.render_expression(expression)?);
            }
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        self.push_predicate(&mut sql, " HAVING ", &query.having)?;
        if !query.order_by.is_empty() {
            let mut order_by = Vec::with_capacity(query.order_by.len());
            for item in &query.order_by {
                order_by.push(self.render_order_item(item)?);
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        self.scopes.pop();
        Ok(sql)
    }

    fn render_modification_body(&mut self, query: &'a ModificationQuery) -> Result<String> {
        let metamodel = self.metamodel;
        let from = &query.query.from;
        self.scopes.push(from);
        let table = metamodel.table_name(&query.entity)?;
        let sql = match query.statement_type {
            DbmsStatementType::Delete => {
                let mut sql = format!("DELETE FROM {table} {}", modified_alias(query)?);
                let others = self.secondary_roots(from)?;
                if !others.is_empty() {
                    sql.push_str(" USING ");
                    sql.push_str(&others);
                }
                self.push_predicate(&mut sql, " WHERE ", &query.query.where_clause)?;
                sql
            }
            DbmsStatementType::Update => {
                let mut assignments = Vec::with_capacity(query.assignments.len());
                for assignment in &query.assignments {
                    let column = self.entity_column(&query.entity, &assignment.attribute)?;
                    let value = self.render_expression(&assignment.value)?;
                    assignments.push(format!("{column} = {value}"));
                }
                let mut sql = format!(
                    "UPDATE {table} {} SET {}",
                    modified_alias(query)?,
                    assignments.join(", ")
                );
                let others = self.secondary_roots(from)?;
                if !others.is_empty() {
                    sql.push_str(" FROM ");
                    sql.push_str(&others);
                }
                self.push_predicate(&mut sql, " WHERE ", &query.query.where_clause)?;
                sql
            }
            DbmsStatementType::Insert => {
                let mut columns = Vec::with_capacity(query.assignments.len());
                let mut values = Vec::with_capacity(query.assignments.len());
                for assignment in &query.assignments {
                    columns.push(self.entity_column(&query.entity, &assignment.attribute)?);
                    values.push(self.render_expression(&assignment.value)?);
                }
                let mut sql = format!(
                    "INSERT INTO {table}({}) SELECT {}",
                    columns.join(", "),
                    values.join(", ")
                );
                if !from.is_empty() {
                    sql.push_str(" FROM ");
                    sql.push_str(&self.render_from(from)?);
                }
                self.push_predicate(&mut sql, " WHERE ", &query.query.where_clause)?;
                sql
            }
            DbmsStatementType::Select => {
                return Err(CriteriaError::IllegalState(
                    "A SELECT is not a modification statement".to_string(),
                ))
            }
        };
        self.scopes.pop();
        Ok(sql)
    }

    /// Roots after the modified one, rendered for USING/FROM.
    fn secondary_roots(&mut self, from: &'a JoinManager) -> Result<String> {
        let mut parts = Vec::new();
        for root in from.roots.iter().skip(1) {
            parts.push(self.table_reference(&root.entity, &root.alias, root.modification_state)?);
        }
        let mut sql = parts.join(", ");
        for join in &from.joins {
            sql.push(' ');
            sql.push_str(&self.render_join(from, join)?);
        }
        Ok(sql.trim_start().to_string())
    }

    // ----- SELECT parts -----

    fn expand_alias(&self, entity: &str, alias: &str) -> Result<Vec<String>> {
        Ok(self
            .metamodel
            .column_attributes(entity)?
            .into_iter()
            .filter_map(|attribute| attribute.column())
            .map(|column| format!("{alias}.{column}"))
            .collect())
    }

    fn default_select(&self, from: &JoinManager) -> Result<String> {
        let mut columns = Vec::new();
        for root in &from.roots {
            columns.extend(self.expand_alias(&root.entity, &root.alias)?);
        }
        for join in from.joins.iter().filter(|join| join.fetch) {
            columns.extend(self.expand_alias(&join.entity, &join.alias)?);
        }
        if columns.is_empty() {
            return Ok("1".to_string());
        }
        Ok(columns.join(", "))
    }

    fn render_select_items(&mut self, items: &'a [SelectItem], expand: bool) -> Result<String> {
        let mut rendered = Vec::with_capacity(items.len());
        for item in items {
            if expand && item.alias.is_none() {
                if let Some(columns) = self.selected_entity(&item.expression)? {
                    rendered.extend(columns);
                    continue;
                }
            }
            let expression = self.render_expression(&item.expression)?;
            match &item.alias {
                Some(alias) => rendered.push(format!("{expression} AS {alias}")),
                None => rendered.push(expression),
            }
        }
        Ok(rendered.join(", "))
    }

    /// Columns of a selected alias, or `None` for any other expression.
    fn selected_entity(&self, expression: &Expression) -> Result<Option<Vec<String>>> {
        let Expression::Path(path) = expression else {
            return Ok(None);
        };
        let (Some(owner), true) = (path.owner, path.is_single_element()) else {
            return Ok(None);
        };
        let from = self.join_manager(owner)?;
        match from.alias_entity(path.alias()) {
            Some(entity) => Ok(Some(self.expand_alias(entity, path.alias())?)),
            None => Ok(None),
        }
    }

    fn render_order_item(&mut self, item: &'a OrderByItem) -> Result<String> {
        let mut sql = self.render_expression(&item.expression)?;
        sql.push_str(if item.ascending { " ASC" } else { " DESC" });
        match item.nulls_first {
            Some(true) => sql.push_str(" NULLS FIRST"),
            Some(false) => sql.push_str(" NULLS LAST"),
            None => {}
        }
        Ok(sql)
    }

    fn push_predicate(&mut self, sql: &mut String, keyword: &str, predicate: &'a CompoundPredicate) -> Result<()> {
        if predicate.is_empty() {
            return Ok(());
        }
        sql.push_str(keyword);
        sql.push_str(&self.render_compound(predicate)?);
        Ok(())
    }

    // ----- FROM -----

    fn table_reference(
        &mut self,
        entity: &str,
        alias: &str,
        modification_state: Option<DbmsModificationState>,
    ) -> Result<String> {
        if modification_state == Some(DbmsModificationState::New) {
            if let Some(name) = self.new_states.get(entity) {
                return Ok(format!("{name} {alias}"));
            }
        }
        if let Some(cte) = self.inlined_cte(entity)? {
            if let CteBody::Query(node) = &cte.body {
                let sql = self.render_node(node, false, false)?;
                return Ok(format!("({sql}) {alias}({})", cte.columns.join(", ")));
            }
        }
        Ok(format!("{} {alias}", self.metamodel.table_name(entity)?))
    }

    fn render_from(&mut self, from: &'a JoinManager) -> Result<String> {
        let mut roots = Vec::with_capacity(from.roots.len());
        for root in &from.roots {
            roots.push(self.table_reference(&root.entity, &root.alias, root.modification_state)?);
        }
        let mut sql = roots.join(", ");
        for join in &from.joins {
            sql.push(' ');
            sql.push_str(&self.render_join(from, join)?);
        }
        Ok(sql)
    }

    fn render_join(&mut self, from: &'a JoinManager, join: &'a JoinNode) -> Result<String> {
        let metamodel = self.metamodel;
        let target = self.table_reference(&join.entity, &join.alias, None)?;
        let condition = match &join.target {
            JoinTarget::Attribute {
                parent_alias,
                attribute,
            } => {
                let parent_entity = from.alias_entity(parent_alias).ok_or_else(|| {
                    CriteriaError::IllegalState(format!(
                        "Join parent '{parent_alias}' is not part of {}",
                        from.id
                    ))
                })?;
                match &metamodel.attribute(parent_entity, attribute)?.kind {
                    AttributeKind::ToOne { join_column, .. } => format!(
                        "{}.{} = {parent_alias}.{join_column}",
                        join.alias,
                        metamodel.id_column(&join.entity)?
                    ),
                    AttributeKind::ToMany { foreign_key, .. } => format!(
                        "{}.{foreign_key} = {parent_alias}.{}",
                        join.alias,
                        metamodel.id_column(parent_entity)?
                    ),
                    AttributeKind::Basic { .. } => {
                        return Err(CriteriaError::IllegalArgument(format!(
                            "'{parent_alias}.{attribute}' is not an association"
                        )))
                    }
                }
            }
            JoinTarget::Entity => {
                let on = join.on.as_ref().ok_or_else(|| {
                    CriteriaError::IllegalState(format!(
                        "Entity join '{}' has no ON clause",
                        join.alias
                    ))
                })?;
                let sql = self.render_compound(on)?;
                return Ok(format!("{} {target} ON {sql}", join.join_type.to_sql()));
            }
        };
        let mut sql = format!("{} {target} ON {condition}", join.join_type.to_sql());
        if let Some(on) = join.on.as_ref().filter(|on| !on.is_empty()) {
            sql.push_str(" AND (");
            sql.push_str(&self.render_compound(on)?);
            sql.push(')');
        }
        Ok(sql)
    }

    fn join_manager(&self, owner: JoinManagerId) -> Result<&'a JoinManager> {
        self.scopes
            .iter()
            .rev()
            .find(|from| from.id == owner)
            .copied()
            .ok_or_else(|| {
                CriteriaError::IllegalState(format!(
                    "Path owner {owner} is not an enclosing query body"
                ))
            })
    }

    fn entity_column(&self, entity: &str, attribute: &str) -> Result<String> {
        self.metamodel
            .attribute(entity, attribute)?
            .column()
            .map(str::to_string)
            .ok_or_else(|| {
                CriteriaError::IllegalArgument(format!(
                    "Attribute '{attribute}' of '{entity}' has no column"
                ))
            })
    }

    // ----- predicates -----

    fn render_compound(&mut self, compound: &'a CompoundPredicate) -> Result<String> {
        if compound.children.is_empty() {
            let constant = if compound.negated { "1 = 0" } else { "1 = 1" };
            return Ok(constant.to_string());
        }
        let mut parts = Vec::with_capacity(compound.children.len());
        for child in &compound.children {
            let rendered = self.render_predicate(child)?;
            let grouped = matches!(
                child,
                Predicate::Compound(inner) if !inner.negated && inner.children.len() > 1
            );
            parts.push(if grouped { format!("({rendered})") } else { rendered });
        }
        let separator = format!(" {} ", compound.kind.to_sql());
        let joined = parts.join(separator.as_str());
        Ok(negate(joined, compound.negated))
    }

    fn render_predicate(&mut self, predicate: &'a Predicate) -> Result<String> {
        match predicate {
            Predicate::Compound(compound) => self.render_compound(compound),
            Predicate::Comparison(comparison) => {
                let left = self.render_expression(&comparison.left)?;
                let right = self.render_expression(&comparison.right)?;
                let quantifier = match comparison.quantifier {
                    PredicateQuantifier::One => "",
                    PredicateQuantifier::Any => "ANY ",
                    PredicateQuantifier::All => "ALL ",
                };
                let sql = format!("{left} {} {quantifier}{right}", comparison.operator.to_sql());
                Ok(negate(sql, comparison.negated))
            }
            Predicate::Between(between) => {
                let left = self.render_expression(&between.left)?;
                let start = self.render_expression(&between.start)?;
                let end = self.render_expression(&between.end)?;
                Ok(format!("{left} {}BETWEEN {start} AND {end}", not(between.negated)))
            }
            Predicate::Like(like) => {
                let left = self.render_expression(&like.left)?;
                let pattern = self.render_expression(&like.pattern)?;
                let not = not(like.negated);
                let mut sql = if like.case_sensitive {
                    format!("{left} {not}LIKE {pattern}")
                } else if self.dialect.supports_ilike() {
                    format!("{left} {not}ILIKE {pattern}")
                } else {
                    format!("UPPER({left}) {not}LIKE UPPER({pattern})")
                };
                if let Some(escape) = like.escape {
                    let escape = escape.to_string().replace('\'', "''");
                    sql.push_str(&format!(" ESCAPE '{escape}'"));
                }
                Ok(sql)
            }
            Predicate::In(in_predicate) => {
                if in_predicate.right.is_empty() {
                    let constant = if in_predicate.negated { "1 = 1" } else { "1 = 0" };
                    return Ok(constant.to_string());
                }
                let left = self.render_expression(&in_predicate.left)?;
                let not = not(in_predicate.negated);
                if let [subquery @ Expression::Subquery(_)] = in_predicate.right.as_slice() {
                    let subquery = self.render_expression(subquery)?;
                    return Ok(format!("{left} {not}IN {subquery}"));
                }
                let mut items = Vec::with_capacity(in_predicate.right.len());
                for item in &in_predicate.right {
                    items.push(self.render_expression(item)?);
                }
                Ok(format!("{left} {not}IN ({})", items.join(", ")))
            }
            Predicate::IsNull(is_null) => {
                let expression = self.render_expression(&is_null.expression)?;
                Ok(format!("{expression} IS {}NULL", not(is_null.negated)))
            }
            Predicate::Exists(exists) => match &exists.subquery {
                Expression::Subquery(_) => {
                    let subquery = self.render_expression(&exists.subquery)?;
                    Ok(format!("{}EXISTS {subquery}", not(exists.negated)))
                }
                other => Err(CriteriaError::IllegalState(format!(
                    "EXISTS has no subquery bound for {other:?}"
                ))),
            },
            Predicate::Boolean(boolean) => {
                let expression = self.render_expression(&boolean.expression)?;
                Ok(if boolean.negated {
                    format!("NOT {expression}")
                } else {
                    expression
                })
            }
        }
    }

    // ----- expressions -----

    fn render_expression(&mut self, expression: &'a Expression) -> Result<String> {
        match expression {
            Expression::Path(path) => self.render_path(path),
            Expression::Literal(literal) => Ok(render_literal(literal)),
            Expression::Parameter(parameter) => Ok(self.placeholder(&parameter.name)),
            Expression::Function(function) => {
                if let ("OUTER", [argument]) = (
                    function.name.to_ascii_uppercase().as_str(),
                    function.arguments.as_slice(),
                ) {
                    return self.render_expression(argument);
                }
                let mut arguments = Vec::with_capacity(function.arguments.len());
                for argument in &function.arguments {
                    arguments.push(self.render_expression(argument)?);
                }
                Ok(format!(
                    "{}({}{})",
                    function.name,
                    if function.distinct { "DISTINCT " } else { "" },
                    arguments.join(", ")
                ))
            }
            Expression::Arithmetic(arithmetic) => self.render_arithmetic(arithmetic),
            Expression::Negation(inner) => {
                let rendered = self.render_expression(inner)?;
                Ok(match inner.as_ref() {
                    Expression::Arithmetic(_) => format!("-({rendered})"),
                    _ => format!("-{rendered}"),
                })
            }
            Expression::Case(case) => self.render_case(case),
            Expression::Subquery(subquery) => self.render_node(&subquery.query, true, false),
        }
    }

    fn placeholder(&mut self, name: &str) -> String {
        if self.dialect.supports_numbered_parameters() {
            let position = match self.parameters.iter().position(|existing| existing == name) {
                Some(index) => index + 1,
                None => {
                    self.parameters.push(name.to_string());
                    self.parameters.len()
                }
            };
            return self.dialect.parameter_placeholder(position);
        }
        self.parameters.push(name.to_string());
        self.dialect.parameter_placeholder(self.parameters.len())
    }

    fn render_path(&self, path: &PathExpression) -> Result<String> {
        let Some(owner) = path.owner else {
            return Ok(path.path());
        };
        let metamodel = self.metamodel;
        let from = self.join_manager(owner)?;
        let alias = path.alias();
        let entity = from.alias_entity(alias).ok_or_else(|| {
            CriteriaError::IllegalState(format!("Alias '{alias}' is not part of {owner}"))
        })?;
        match path.elements.as_slice() {
            [_] => Ok(format!("{alias}.{}", metamodel.id_column(entity)?)),
            [_, attribute] => match metamodel.attribute(entity, attribute)?.column() {
                Some(column) => Ok(format!("{alias}.{column}")),
                None => Err(CriteriaError::IllegalArgument(format!(
                    "Path '{path}' refers to the collection '{attribute}' which must be joined"
                ))),
            },
            [_, attribute, nested] => {
                if let AttributeKind::ToOne {
                    target,
                    join_column,
                } = &metamodel.attribute(entity, attribute)?.kind
                {
                    if metamodel.id_attribute(target)?.name == *nested {
                        return Ok(format!("{alias}.{join_column}"));
                    }
                }
                Err(CriteriaError::IllegalArgument(format!(
                    "Path '{path}' requires a join of '{alias}.{attribute}'"
                )))
            }
            _ => Err(CriteriaError::IllegalArgument(format!(
                "Path '{path}' is too deep; join its intermediate associations"
            ))),
        }
    }

    fn render_arithmetic(&mut self, arithmetic: &'a ArithmeticExpression) -> Result<String> {
        let precedence = precedence(arithmetic.operator);
        let left = self.render_operand(&arithmetic.left, precedence, None)?;
        let right = self.render_operand(&arithmetic.right, precedence, Some(arithmetic.operator))?;
        Ok(format!("{left} {} {right}", arithmetic.operator.to_sql()))
    }

    /// `right_of` is the parent operator when the operand is its right side.
    fn render_operand(
        &mut self,
        operand: &'a Expression,
        parent_precedence: u8,
        right_of: Option<ArithmeticOperator>,
    ) -> Result<String> {
        let rendered = self.render_expression(operand)?;
        let grouped = match operand {
            Expression::Arithmetic(child) => {
                let child_precedence = precedence(child.operator);
                child_precedence < parent_precedence
                    || (child_precedence == parent_precedence
                        && right_of.is_some_and(|operator| !is_associative(operator)))
            }
            _ => false,
        };
        Ok(if grouped { format!("({rendered})") } else { rendered })
    }

    fn render_case(&mut self, case: &'a CaseExpression) -> Result<String> {
        let mut sql = String::from("CASE");
        if let Some(operand) = &case.operand {
            sql.push(' ');
            sql.push_str(&self.render_expression(operand)?);
        }
        for when in &case.when_clauses {
            let condition = match &when.condition {
                WhenCondition::Predicate(predicate) => self.render_predicate(predicate)?,
                WhenCondition::Value(value) => self.render_expression(value)?,
            };
            let result = self.render_expression(&when.result)?;
            sql.push_str(&format!(" WHEN {condition} THEN {result}"));
        }
        if let Some(default) = &case.default {
            sql.push_str(" ELSE ");
            sql.push_str(&self.render_expression(default)?);
        }
        sql.push_str(" END");
        Ok(sql)
    }
}

fn modified_alias(query: &ModificationQuery) -> Result<&str> {
    query
        .query
        .from
        .roots
        .first()
        .map(|root| root.alias.as_str())
        .ok_or_else(|| {
            CriteriaError::IllegalState(format!(
                "{} of '{}' has no alias",
                query.statement_type, query.entity
            ))
        })
}

fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::Integer(value) => value.to_string(),
        Literal::Decimal(value) => value.clone(),
        Literal::String(value) => format!("'{}'", value.replace('\'', "''")),
        Literal::Boolean(true) => "TRUE".to_string(),
        Literal::Boolean(false) => "FALSE".to_string(),
        Literal::Null => "NULL".to_string(),
    }
}

fn precedence(operator: ArithmeticOperator) -> u8 {
    match operator {
        ArithmeticOperator::Concat => 1,
        ArithmeticOperator::Add | ArithmeticOperator::Subtract => 2,
        ArithmeticOperator::Multiply | ArithmeticOperator::Divide | ArithmeticOperator::Modulo => 3,
    }
}

fn is_associative(operator: ArithmeticOperator) -> bool {
    matches!(
        operator,
        ArithmeticOperator::Add | ArithmeticOperator::Multiply | ArithmeticOperator::Concat
    )
}

fn not(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}

fn negate(sql: String, negated: bool) -> String {
    if negated {
        format!("NOT ({sql})")
    } else {
        sql
    }
}
