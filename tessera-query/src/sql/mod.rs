//! SQL rendering.
//!
//! [`Renderer`] turns a [`QueryExpression`] into statement text for one
//! [`Dialect`]. Clause order is fixed: SELECT, FROM and joins, WHERE,
//! GROUP BY, HAVING, ORDER BY, row limiting, lock. Rendered text keeps named
//! parameters; [`params::bind_named`] converts them to placeholders last.
//!
//! Selected entity columns are always exposed under `{alias}_{column}` so
//! rows can be hydrated without knowing the statement.

pub mod params;
pub(crate) mod properties;

use std::collections::HashSet;

use crate::alias::{Alias, AliasKind};
use crate::dialect::{CountDistinctStyle, Dialect, LimitStyle, LockClause};
use crate::error::{QueryError, QueryResult};
use crate::expression::{JoinDirection, PredicateKind, QueryExpression, QueryType, SetValue};
use crate::metadata::{EntityMetadata, Schema};
use crate::resolver::{parent_table_join, render_join};
use crate::types::{NullsOrder, OrderSpec, SortOrder};

use properties::{Substitution, parent_alias, resolve_property};

/// Name of the column holding `COUNT` results.
pub const COUNT_ALIAS: &str = "cnt";

/// Read the count column of a row; some drivers return big integers as strings.
pub(crate) fn read_count(row: &crate::value::Row) -> Option<u64> {
    match row.get(COUNT_ALIAS)? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Column alias of a selected entity column.
pub fn column_alias(alias: &str, column: &str) -> String {
    format!("{}_{}", alias, column)
}

/// Options altering a SELECT rendering.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectOptions {
    /// Skip ORDER BY (inner statement of the distinct-id page query).
    pub without_order: bool,
    /// Skip row limiting; entity paging is handled by the caller.
    pub without_limits: bool,
    /// Conditions ANDed to the user WHERE clause as a whole.
    pub extra_conditions: Vec<String>,
}

/// Renders expressions for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct Renderer<'a> {
    expr: &'a QueryExpression,
    schema: &'a Schema,
    dialect: &'a Dialect,
    escaping: bool,
}

impl<'a> Renderer<'a> {
    /// Create a renderer.
    ///
    /// Identifiers are escaped unless either the expression or `escaping`
    /// turns it off.
    pub fn new(
        expr: &'a QueryExpression,
        schema: &'a Schema,
        dialect: &'a Dialect,
        escaping: bool,
    ) -> Self {
        Self {
            expr,
            schema,
            dialect,
            escaping: escaping && expr.flags.escaping,
        }
    }

    pub(crate) fn subst(&self) -> Substitution<'a> {
        Substitution {
            aliases: &self.expr.aliases,
            dialect: self.dialect,
            escaping: self.escaping,
            alias_prefixing: self.expr.query_type == QueryType::Select,
            parent_joins: !self.expr.flags.ignore_parent_tables_joins,
        }
    }

    /// Escape an identifier if escaping is on.
    pub fn escape(&self, name: &str) -> String {
        self.subst().escape(name)
    }

    /// Render the statement with named parameters intact.
    pub fn render(&self) -> QueryResult<String> {
        match self.expr.query_type {
            QueryType::Select => self.render_select(&SelectOptions::default()),
            QueryType::Update => self.render_update(),
            QueryType::Delete => self.render_delete(),
        }
    }

    // ============== SELECT ==============

    pub(crate) fn render_select(&self, options: &SelectOptions) -> QueryResult<String> {
        let main = self.expr.aliases.main()?;
        let mut sql = format!("SELECT {}", self.select_list()?.join(", "));
        sql.push_str(&self.from_and_joins(main)?);
        sql.push_str(&self.where_clause(&options.extra_conditions)?);
        sql.push_str(&self.group_by_clause()?);
        sql.push_str(&self.having_clause()?);

        let order = if options.without_order {
            String::new()
        } else {
            self.order_by_clause(&self.effective_orders(main))?
        };
        sql.push_str(&order);

        if !options.without_limits {
            let (limit, offset) = self.effective_limits();
            sql = self.apply_limits(sql, !order.is_empty(), limit, offset);
        }
        sql.push_str(&self.lock_suffix()?);

        if self.expr.flags.subquery {
            sql = format!("({})", sql);
        }
        Ok(sql)
    }

    /// `SELECT COUNT(DISTINCT pk)` over the same FROM, joins and WHERE.
    pub(crate) fn render_count(&self) -> QueryResult<String> {
        let main = self.expr.aliases.main()?;
        let count = match main.metadata.as_deref() {
            Some(meta) => self.count_expression(&main.name, meta),
            None => "COUNT(*)".to_string(),
        };
        let mut sql = format!("SELECT {} AS {}", count, self.escape(COUNT_ALIAS));
        sql.push_str(&self.from_and_joins(main)?);
        sql.push_str(&self.where_clause(&[])?);
        Ok(sql)
    }

    fn count_expression(&self, alias: &str, meta: &EntityMetadata) -> String {
        let subst = self.subst();
        let columns: Vec<String> = meta
            .primary_columns()
            .map(|c| subst.column(alias, &c.database_name))
            .collect();
        if columns.len() == 1 {
            return format!("COUNT(DISTINCT({}))", columns[0]);
        }
        match self.dialect.count_distinct {
            CountDistinctStyle::Tuple => format!("COUNT(DISTINCT({}))", columns.join(", ")),
            CountDistinctStyle::MultiArg => format!("COUNT(DISTINCT {})", columns.join(", ")),
            CountDistinctStyle::PipeConcat => {
                format!("COUNT(DISTINCT({}))", columns.join(" || '|;|' || "))
            }
            CountDistinctStyle::ConcatFn => {
                format!("COUNT(DISTINCT(CONCAT({})))", columns.join(", '|;|', "))
            }
        }
    }

    /// The SELECT list.
    pub(crate) fn select_list(&self) -> QueryResult<Vec<String>> {
        let subst = self.subst();
        let mut out = Vec::new();
        let mut handled: HashSet<usize> = HashSet::new();

        for alias in self.expr.aliases.iter() {
            if alias.kind == AliasKind::Junction {
                continue;
            }
            let Some(meta) = alias.metadata.as_deref() else {
                continue;
            };
            if self.expr.is_alias_selected(&alias.name) {
                for (i, select) in self.expr.selects.iter().enumerate() {
                    if select.selection == alias.name {
                        handled.insert(i);
                    }
                }
                out.extend(self.entity_columns(alias, meta, None));
                continue;
            }
            // partial selection of `alias.property` entries
            let mut properties = Vec::new();
            for (i, select) in self.expr.selects.iter().enumerate() {
                if let Some((a, property)) = select.selection.split_once('.') {
                    if a == alias.name && resolve_property(meta, property).is_some() {
                        handled.insert(i);
                        properties.push(property.to_string());
                    }
                }
            }
            if !properties.is_empty() {
                out.extend(self.entity_columns(alias, meta, Some(&properties)));
            }
        }

        for (i, select) in self.expr.selects.iter().enumerate() {
            if handled.contains(&i) {
                continue;
            }
            let mut item = subst.replace(&select.selection)?;
            if let Some(name) = &select.alias_name {
                item.push_str(&format!(" AS {}", subst.escape(name)));
            }
            out.push(item);
        }

        if out.is_empty() {
            out.push("*".to_string());
        }
        Ok(out)
    }

    /// Columns of an entity alias, all of them or the listed properties plus
    /// the primary key.
    fn entity_columns(
        &self,
        alias: &Alias,
        meta: &EntityMetadata,
        properties: Option<&[String]>,
    ) -> Vec<String> {
        let subst = self.subst();
        let parent_joins = subst.parent_joins;
        let parent = parent_alias(&alias.name);
        meta.select_columns(parent_joins)
            .into_iter()
            .filter(|column| match properties {
                None => true,
                Some(properties) => {
                    let primary = column
                        .property_path
                        .as_deref()
                        .and_then(|p| meta.column_by_property(p))
                        .is_some_and(|c| c.primary);
                    primary
                        || properties.iter().any(|p| {
                            resolve_property(meta, p)
                                .is_some_and(|(name, _)| name == column.database_name)
                        })
                }
            })
            .map(|column| {
                let source = if column.inherited && parent_joins {
                    parent.as_str()
                } else {
                    alias.name.as_str()
                };
                format!(
                    "{} AS {}",
                    subst.column(source, &column.database_name),
                    subst.escape(&column_alias(&alias.name, &column.database_name))
                )
            })
            .collect()
    }

    fn from_and_joins(&self, main: &Alias) -> QueryResult<String> {
        let subst = self.subst();
        let mut sql = String::from(" FROM ");
        match (&main.subquery, main.table_name()) {
            (Some(subquery), _) => sql.push_str(subquery),
            (None, Some(table)) => sql.push_str(&subst.escape(table)),
            (None, None) => return Err(QueryError::alias_not_set()),
        }
        sql.push(' ');
        sql.push_str(&subst.escape(&main.name));

        if let Some(LockClause::TableHint(hint)) = self.lock_clause()? {
            sql.push(' ');
            sql.push_str(hint);
        }

        if let Some(meta) = main.metadata.as_deref() {
            if let Some(join) = parent_table_join(meta, &main.name, JoinDirection::Inner, &subst) {
                sql.push(' ');
                sql.push_str(&join);
            }
        }

        let mut junctions = HashSet::new();
        for join in &self.expr.joins {
            for clause in render_join(join, &subst, self.schema, &mut junctions)? {
                sql.push(' ');
                sql.push_str(&clause);
            }
        }
        Ok(sql)
    }

    fn predicates(&self, predicates: &[crate::expression::Predicate]) -> QueryResult<String> {
        let subst = self.subst();
        let mut out = String::new();
        for (i, predicate) in predicates.iter().enumerate() {
            if i > 0 {
                out.push_str(match predicate.kind {
                    PredicateKind::Or => " OR ",
                    PredicateKind::And | PredicateKind::Simple => " AND ",
                });
            }
            out.push_str(&subst.replace(&predicate.text)?);
        }
        Ok(out)
    }

    fn where_clause(&self, extra: &[String]) -> QueryResult<String> {
        let user = self.predicates(&self.expr.wheres)?;
        Ok(match (user.is_empty(), extra.is_empty()) {
            (true, true) => String::new(),
            (false, true) => format!(" WHERE {}", user),
            (true, false) => format!(" WHERE {}", extra.join(" AND ")),
            (false, false) => format!(" WHERE ({}) AND {}", user, extra.join(" AND ")),
        })
    }

    fn group_by_clause(&self) -> QueryResult<String> {
        if self.expr.group_bys.is_empty() {
            return Ok(String::new());
        }
        let subst = self.subst();
        let items = self
            .expr
            .group_bys
            .iter()
            .map(|g| subst.replace(g))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(format!(" GROUP BY {}", items.join(", ")))
    }

    fn having_clause(&self) -> QueryResult<String> {
        let having = self.predicates(&self.expr.havings)?;
        Ok(if having.is_empty() {
            String::new()
        } else {
            format!(" HAVING {}", having)
        })
    }

    /// User orders, or the main entity's default order.
    pub(crate) fn effective_orders(&self, main: &Alias) -> Vec<(String, OrderSpec)> {
        if !self.expr.orders.is_empty() {
            return self
                .expr
                .orders
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
        }
        match main.metadata.as_deref() {
            Some(meta) if self.expr.query_type == QueryType::Select => meta
                .default_order
                .iter()
                .map(|(property, order)| (format!("{}.{}", main.name, property), (*order).into()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Render an ORDER BY clause, emulating null placement where needed.
    pub(crate) fn order_by_clause(&self, orders: &[(String, OrderSpec)]) -> QueryResult<String> {
        if orders.is_empty() {
            return Ok(String::new());
        }
        let subst = self.subst();
        let items = orders
            .iter()
            .map(|(key, spec)| Ok(self.order_item(&subst.replace(key)?, spec)))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(format!(" ORDER BY {}", items.join(", ")))
    }

    pub(crate) fn order_item(&self, column: &str, spec: &OrderSpec) -> String {
        match spec.nulls {
            None => format!("{} {}", column, spec.order.as_sql()),
            Some(nulls) if self.dialect.supports_nulls_ordering => {
                format!("{} {} {}", column, spec.order.as_sql(), nulls.as_sql())
            }
            Some(nulls) => {
                let (null_rank, other_rank) = match nulls {
                    NullsOrder::First => (0, 1),
                    NullsOrder::Last => (1, 0),
                };
                format!(
                    "CASE WHEN {} IS NULL THEN {} ELSE {} END {}, {} {}",
                    column,
                    null_rank,
                    other_rank,
                    SortOrder::Asc.as_sql(),
                    column,
                    spec.order.as_sql()
                )
            }
        }
    }

    /// Limit and offset applied to the statement itself.
    ///
    /// Entity paging (`skip`/`take`) is used directly when no join multiplies
    /// rows; otherwise the pagination engine applies it.
    pub(crate) fn effective_limits(&self) -> (Option<u64>, Option<u64>) {
        if self.expr.has_page() && !self.expr.has_fan_out_joins() {
            (self.expr.take, self.expr.skip)
        } else {
            (self.expr.limit, self.expr.offset)
        }
    }

    /// Apply row limiting in the dialect's syntax.
    pub(crate) fn apply_limits(
        &self,
        mut sql: String,
        ordered: bool,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        if limit.is_none() && offset.is_none() {
            return sql;
        }
        match self.dialect.limit_style {
            LimitStyle::LimitOffset => {
                match (limit, offset, self.dialect.unbounded_limit) {
                    (Some(limit), Some(offset), _) => {
                        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
                    }
                    (Some(limit), None, _) => sql.push_str(&format!(" LIMIT {}", limit)),
                    (None, Some(offset), Some(unbounded)) => {
                        sql.push_str(&format!(" LIMIT {} OFFSET {}", unbounded, offset))
                    }
                    (None, Some(offset), None) => sql.push_str(&format!(" OFFSET {}", offset)),
                    (None, None, _) => {}
                }
                sql
            }
            LimitStyle::OffsetFetch => {
                if !ordered {
                    sql.push_str(" ORDER BY (SELECT NULL)");
                }
                sql.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                sql
            }
            LimitStyle::RowNum => {
                let inner = self.escape("rn_inner");
                let rn = self.escape("rn");
                let offset = offset.unwrap_or(0);
                let bounded = match limit {
                    Some(limit) => format!(" WHERE ROWNUM <= {}", offset + limit),
                    None => String::new(),
                };
                format!(
                    "SELECT * FROM (SELECT {inner}.*, ROWNUM {rn} FROM ({sql}) {inner}{bounded}) WHERE {rn} > {offset}"
                )
            }
        }
    }

    fn lock_clause(&self) -> QueryResult<Option<LockClause>> {
        match &self.expr.lock {
            Some(mode) => self.dialect.lock_clause(mode),
            None => Ok(None),
        }
    }

    fn lock_suffix(&self) -> QueryResult<String> {
        let Some(LockClause::Suffix { clause, modifier }) = self.lock_clause()? else {
            return Ok(String::new());
        };
        let mut out = format!(" {}", clause);
        if !self.expr.lock_tables.is_empty() {
            if !self.dialect.lock.supports_lock_tables {
                let mode = self.expr.lock.as_ref().map(|m| m.to_string()).unwrap_or_default();
                return Err(QueryError::unsupported_lock(
                    self.dialect.name,
                    format!("{} with lock tables", mode),
                ));
            }
            for table in &self.expr.lock_tables {
                self.expr.aliases.find(table)?;
            }
            let tables: Vec<String> = self.expr.lock_tables.iter().map(|t| self.escape(t)).collect();
            out.push_str(&format!(" OF {}", tables.join(", ")));
        }
        if let Some(modifier) = modifier {
            out.push(' ');
            out.push_str(modifier);
        }
        Ok(out)
    }

    // ============== UPDATE / DELETE ==============

    fn reject_select_clauses(&self) -> QueryResult<()> {
        let expr = self.expr;
        let offending = [
            (!expr.joins.is_empty(), "joins"),
            (!expr.relation_ids.is_empty(), "relation ids"),
            (!expr.relation_counts.is_empty(), "relation counts"),
            (!expr.group_bys.is_empty(), "GROUP BY"),
            (!expr.havings.is_empty(), "HAVING"),
            (!expr.orders.is_empty(), "ORDER BY"),
            (expr.limit.is_some() || expr.offset.is_some(), "LIMIT/OFFSET"),
            (expr.has_page(), "skip/take"),
            (expr.lock.is_some(), "locking"),
        ];
        if let Some((_, clause)) = offending.iter().find(|(present, _)| *present) {
            return Err(QueryError::invalid_query_shape(format!(
                "{} cannot be used in a {} query",
                clause,
                expr.query_type.as_str()
            )));
        }
        Ok(())
    }

    fn target_table(&self) -> QueryResult<(String, Option<&'a EntityMetadata>)> {
        let main = self.expr.aliases.main()?;
        let table = main
            .table_name()
            .ok_or_else(|| QueryError::invalid_query_shape("cannot modify a sub-query"))?;
        Ok((self.escape(table), main.metadata.as_deref()))
    }

    fn render_update(&self) -> QueryResult<String> {
        self.reject_select_clauses()?;
        if self.expr.sets.is_empty() {
            return Err(QueryError::invalid_query_shape("UPDATE needs at least one value to set"));
        }
        let (table, meta) = self.target_table()?;
        let subst = self.subst();
        let mut assigned = HashSet::new();
        let mut assignments = Vec::new();
        for (key, value) in &self.expr.sets {
            let column = meta
                .and_then(|m| resolve_property(m, key))
                .map(|(name, _)| name)
                .unwrap_or_else(|| key.clone());
            let value = match value {
                SetValue::Param(name) => format!(":{}", name),
                SetValue::Raw(raw) => subst.replace(raw)?,
            };
            assignments.push(format!("{} = {}", subst.escape(&column), value));
            assigned.insert(column);
        }
        if let Some(meta) = meta {
            if let Some(version) = meta.version_column() {
                if !assigned.contains(&version.database_name) {
                    let column = subst.escape(&version.database_name);
                    assignments.push(format!("{} = {} + 1", column, column));
                }
            }
            if let Some(updated) = meta.update_date_column() {
                if !assigned.contains(&updated.database_name) {
                    assignments.push(format!(
                        "{} = CURRENT_TIMESTAMP",
                        subst.escape(&updated.database_name)
                    ));
                }
            }
        }
        Ok(format!(
            "UPDATE {} SET {}{}",
            table,
            assignments.join(", "),
            self.where_clause(&[])?
        ))
    }

    fn render_delete(&self) -> QueryResult<String> {
        self.reject_select_clauses()?;
        let (table, _) = self.target_table()?;
        Ok(format!("DELETE FROM {}{}", table, self.where_clause(&[])?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::alias::AliasTarget;
    use crate::expression::{Cardinality, JoinAttribute, JoinSource, SelectItem};
    use crate::locking::LockMode;
    use crate::resolver::resolve_relation_path;
    use crate::test_support::blog_schema;
    use crate::types::NullsOrder;
    use pretty_assertions::assert_eq;

    fn post_query(schema: &Schema) -> QueryExpression {
        let mut expr = QueryExpression::new(QueryType::Select);
        expr.aliases
            .create_alias(
                Some("post"),
                AliasKind::From,
                AliasTarget::Entity(schema.entity("Post").unwrap().clone()),
            )
            .unwrap();
        expr.selects.push(SelectItem {
            selection: "post".into(),
            alias_name: None,
        });
        expr
    }

    fn join_categories(schema: &Schema, expr: &mut QueryExpression) {
        let path = resolve_relation_path(&expr.aliases, schema, "post.categories").unwrap();
        expr.aliases
            .create_alias(
                Some("category"),
                AliasKind::Join,
                AliasTarget::Entity(path.target.clone()),
            )
            .unwrap();
        expr.joins.push(JoinAttribute {
            direction: JoinDirection::Left,
            source: JoinSource::Relation(path),
            alias: "category".into(),
            condition: None,
            selected: true,
            map_to: None,
            cardinality: Cardinality::Many,
        });
    }

    #[test]
    fn test_select_with_many_to_many_join() {
        let schema = blog_schema();
        let mut expr = post_query(&schema);
        join_categories(&schema, &mut expr);
        expr.push_where(PredicateKind::And, "post.id = :id");
        let sql = Renderer::new(&expr, &schema, &Dialect::postgres(), true)
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"post\".\"id\" AS \"post_id\", \"post\".\"title\" AS \"post_title\", \
             \"post\".\"version\" AS \"post_version\", \"post\".\"updated_at\" AS \"post_updated_at\", \
             \"post\".\"author_id\" AS \"post_author_id\", \
             \"category\".\"id\" AS \"category_id\", \"category\".\"name\" AS \"category_name\" \
             FROM \"posts\" \"post\" \
             LEFT JOIN \"post_categories\" \"post_categories\" ON \"post_categories\".\"post_id\" = \"post\".\"id\" \
             LEFT JOIN \"categories\" \"category\" ON \"category\".\"id\" = \"post_categories\".\"category_id\" \
             WHERE \"post\".\"id\" = :id"
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let schema = blog_schema();
        let build = || {
            let mut expr = post_query(&schema);
            join_categories(&schema, &mut expr);
            expr.orders.insert("post.title".into(), OrderSpec::desc());
            expr.limit = Some(3);
            Renderer::new(&expr, &schema, &Dialect::mysql(), true)
                .render()
                .unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_partial_select_keeps_primary_key() {
        let schema = blog_schema();
        let mut expr = post_query(&schema);
        expr.selects = vec![SelectItem {
            selection: "post.title".into(),
            alias_name: None,
        }];
        let sql = Renderer::new(&expr, &schema, &Dialect::sqlite(), true)
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"post\".\"id\" AS \"post_id\", \"post\".\"title\" AS \"post_title\" FROM \"posts\" \"post\""
        );
    }

    #[test]
    fn test_limit_styles() {
        let schema = blog_schema();
        let mut expr = post_query(&schema);
        expr.selects = vec![SelectItem {
            selection: "post.id".into(),
            alias_name: None,
        }];
        expr.offset = Some(5);

        let sqlite = Renderer::new(&expr, &schema, &Dialect::sqlite(), true).render().unwrap();
        assert!(sqlite.ends_with("LIMIT -1 OFFSET 5"));
        let mysql = Renderer::new(&expr, &schema, &Dialect::mysql(), true).render().unwrap();
        assert!(mysql.ends_with("LIMIT 18446744073709551615 OFFSET 5"));
        let pg = Renderer::new(&expr, &schema, &Dialect::postgres(), true).render().unwrap();
        assert!(pg.ends_with("\"post\" OFFSET 5"));

        expr.limit = Some(10);
        let mssql = Renderer::new(&expr, &schema, &Dialect::mssql(), true).render().unwrap();
        assert!(mssql.ends_with("ORDER BY (SELECT NULL) OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY"));
        let oracle = Renderer::new(&expr, &schema, &Dialect::oracle(), true).render().unwrap();
        assert!(oracle.starts_with("SELECT * FROM (SELECT \"rn_inner\".*, ROWNUM \"rn\" FROM (SELECT"));
        assert!(oracle.ends_with("WHERE ROWNUM <= 15) WHERE \"rn\" > 5"));
    }

    #[test]
    fn test_nulls_ordering_emulated() {
        let schema = blog_schema();
        let mut expr = post_query(&schema);
        expr.orders
            .insert("post.title".into(), OrderSpec::asc().nulls(NullsOrder::Last));
        let pg = Renderer::new(&expr, &schema, &Dialect::postgres(), true).render().unwrap();
        assert!(pg.ends_with("ORDER BY \"post\".\"title\" ASC NULLS LAST"));
        let mysql = Renderer::new(&expr, &schema, &Dialect::mysql(), true).render().unwrap();
        assert!(mysql.ends_with(
            "ORDER BY CASE WHEN `post`.`title` IS NULL THEN 1 ELSE 0 END ASC, `post`.`title` ASC"
        ));
    }

    #[test]
    fn test_lock_clauses() {
        let schema = blog_schema();
        let mut expr = post_query(&schema);
        expr.lock = Some(LockMode::PessimisticPartialWrite);
        expr.lock_tables = vec!["post".into()];
        let pg = Renderer::new(&expr, &schema, &Dialect::postgres(), true).render().unwrap();
        assert!(pg.ends_with("FOR UPDATE OF \"post\" SKIP LOCKED"));

        expr.lock = Some(LockMode::PessimisticWrite);
        expr.lock_tables.clear();
        let mssql = Renderer::new(&expr, &schema, &Dialect::mssql(), true).render().unwrap();
        assert!(mssql.contains("FROM [posts] [post] WITH (UPDLOCK, ROWLOCK)"));

        let err = Renderer::new(&expr, &schema, &Dialect::sqlite(), true).render().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnsupportedLockOnDialect);
    }

    #[test]
    fn test_count_composite_styles() {
        let schema = blog_schema();
        let mut expr = QueryExpression::new(QueryType::Select);
        expr.aliases
            .create_alias(
                Some("pc"),
                AliasKind::From,
                AliasTarget::Entity(schema.entity("PostCategory").unwrap().clone()),
            )
            .unwrap();
        let pg = Renderer::new(&expr, &schema, &Dialect::postgres(), true).render_count().unwrap();
        assert_eq!(
            pg,
            "SELECT COUNT(DISTINCT(\"pc\".\"post_id\", \"pc\".\"category_id\")) AS \"cnt\" FROM \"post_categories\" \"pc\""
        );
        let sqlite = Renderer::new(&expr, &schema, &Dialect::sqlite(), true).render_count().unwrap();
        assert!(sqlite.contains("COUNT(DISTINCT(\"pc\".\"post_id\" || '|;|' || \"pc\".\"category_id\"))"));
        let mysql = Renderer::new(&expr, &schema, &Dialect::mysql(), true).render_count().unwrap();
        assert!(mysql.contains("COUNT(DISTINCT `pc`.`post_id`, `pc`.`category_id`)"));
    }

    #[test]
    fn test_update_bumps_version_and_date() {
        let schema = blog_schema();
        let mut expr = QueryExpression::new(QueryType::Update);
        expr.aliases
            .create_alias(
                Some("post"),
                AliasKind::From,
                AliasTarget::Entity(Arc::clone(schema.entity("Post").unwrap())),
            )
            .unwrap();
        expr.sets.insert("title".into(), SetValue::Param("upd_title".into()));
        expr.push_where(PredicateKind::And, "post.id = :id");
        let sql = Renderer::new(&expr, &schema, &Dialect::postgres(), true).render().unwrap();
        assert_eq!(
            sql,
            "UPDATE \"posts\" SET \"title\" = :upd_title, \"version\" = \"version\" + 1, \
             \"updated_at\" = CURRENT_TIMESTAMP WHERE \"id\" = :id"
        );
    }

    #[test]
    fn test_delete_rejects_select_clauses() {
        let schema = blog_schema();
        let mut expr = QueryExpression::new(QueryType::Delete);
        expr.aliases
            .create_alias(
                Some("post"),
                AliasKind::From,
                AliasTarget::Entity(Arc::clone(schema.entity("Post").unwrap())),
            )
            .unwrap();
        expr.push_where(PredicateKind::And, "post.title = :t");
        assert_eq!(
            Renderer::new(&expr, &schema, &Dialect::sqlite(), true).render().unwrap(),
            "DELETE FROM \"posts\" WHERE \"title\" = :t"
        );
        expr.group_bys.push("post.title".into());
        let err = Renderer::new(&expr, &schema, &Dialect::sqlite(), true).render().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidQueryShape);
    }

    #[test]
    fn test_escaping_disabled() {
        let schema = blog_schema();
        let mut expr = post_query(&schema);
        expr.selects = vec![SelectItem {
            selection: "post.id".into(),
            alias_name: None,
        }];
        expr.flags.escaping = false;
        let sql = Renderer::new(&expr, &schema, &Dialect::postgres(), true).render().unwrap();
        assert_eq!(sql, "SELECT post.id AS post_id FROM posts post");
    }
}
