//! The select query builder.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::alias::{Alias, AliasKind, AliasRegistry, AliasTarget};
use crate::builder::join::{JoinSpec, JoinTarget};
use crate::builder::push_where_in_ids;
use crate::data_source::DataSource;
use crate::driver::{self, Phase};
use crate::error::{QueryError, QueryResult};
use crate::expression::{
    Cardinality, JoinAttribute, JoinSource, PredicateKind, QueryExpression, QueryType, Refinement,
    RelationCountAttribute, RelationIdAttribute, RelationPath, SelectItem,
};
use crate::hydrate::{EntityGraph, Hydrator, entity_key};
use crate::locking::{LockMode, check_lock, verify_version};
use crate::metadata::RelationKind;
use crate::pagination::Paginator;
use crate::resolver::resolve_relation_path;
use crate::side_load::SideLoader;
use crate::sql::params::bind_named;
use crate::sql::{Renderer, SelectOptions, read_count};
use crate::types::OrderSpec;
use crate::value::{Row, Value};

/// Builds and runs SELECT queries.
///
/// ```rust,ignore
/// let (posts, total) = source
///     .select("post")
///     .from("Post", "post")
///     .left_join_and_select("post.categories", "category")
///     .load_relation_count_and_map("post.commentCount", "post.comments")
///     .order_by("post.title", OrderSpec::asc())
///     .skip(20)
///     .take(10)
///     .get_many_and_count()
///     .await?;
/// ```
pub struct SelectQueryBuilder {
    source: DataSource,
    expr: QueryExpression,
    error: Option<QueryError>,
}

impl Clone for SelectQueryBuilder {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            expr: self.expr.fork(),
            error: self.error.as_ref().map(QueryError::detached),
        }
    }
}

impl fmt::Debug for SelectQueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectQueryBuilder")
            .field("expr", &self.expr)
            .field("error", &self.error)
            .finish()
    }
}

impl SelectQueryBuilder {
    pub(crate) fn new(source: DataSource) -> Self {
        Self {
            source,
            expr: QueryExpression::new(QueryType::Select),
            error: None,
        }
    }

    /// The accumulated expression.
    pub fn expression(&self) -> &QueryExpression {
        &self.expr
    }

    /// The first error recorded while building, if any.
    pub fn build_error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    /// Named parameters set so far.
    pub fn parameters(&self) -> &IndexMap<String, Value> {
        &self.expr.parameters
    }

    /// Run a fallible step unless an error was already recorded.
    fn apply(mut self, step: impl FnOnce(&mut Self) -> QueryResult<()>) -> Self {
        if self.error.is_none() {
            if let Err(e) = step(&mut self) {
                debug!(code = %e.code, error = %e.message, "query build error recorded");
                self.error = Some(e);
            }
        }
        self
    }

    fn check(&self) -> QueryResult<()> {
        match &self.error {
            Some(e) => Err(e.detached()),
            None => Ok(()),
        }
    }

    /// An independent copy; changes to either side never reach the other.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// A new builder rendered as a parenthesized sub-query.
    pub fn subquery(&self) -> Self {
        let mut qb = Self::new(self.source.clone());
        qb.expr.flags.subquery = true;
        qb
    }

    /// Turn identifier escaping off for this query.
    pub fn disable_escaping(mut self) -> Self {
        self.expr.flags.escaping = false;
        self
    }

    /// Do not join parent tables of inheriting entities.
    pub fn ignore_parent_tables_joins(mut self) -> Self {
        self.expr.flags.ignore_parent_tables_joins = true;
        self
    }

    // ============== Selection ==============

    /// Replace the selection. Entries are alias names (every column),
    /// `alias.property` paths, or raw expressions.
    pub fn select<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expr.selects = items
            .into_iter()
            .map(|s| SelectItem {
                selection: s.into(),
                alias_name: None,
            })
            .collect();
        self
    }

    /// Add one selection.
    pub fn add_select(mut self, selection: impl Into<String>) -> Self {
        self.expr.selects.push(SelectItem {
            selection: selection.into(),
            alias_name: None,
        });
        self
    }

    /// Add a raw expression under an output name.
    pub fn add_select_as(mut self, selection: impl Into<String>, name: impl Into<String>) -> Self {
        self.expr.selects.push(SelectItem {
            selection: selection.into(),
            alias_name: Some(name.into()),
        });
        self
    }

    // ============== Sources ==============

    fn set_main(&mut self, name: &str, target: AliasTarget) -> QueryResult<()> {
        let Ok(main) = self.expr.aliases.main() else {
            self.expr
                .aliases
                .create_alias(Some(name), AliasKind::From, target)?;
            return Ok(());
        };
        if main.name != name && self.expr.aliases.contains(name) {
            return Err(QueryError::duplicate_alias(name));
        }
        let mut scratch = AliasRegistry::new();
        let alias: Alias = scratch
            .create_alias(Some(name), AliasKind::From, target)?
            .clone();
        self.expr.aliases.replace_main(alias);
        Ok(())
    }

    /// Select from an entity. Calling it again replaces the main alias.
    pub fn from(self, entity: &str, alias: &str) -> Self {
        let entity = entity.to_string();
        let alias = alias.to_string();
        self.apply(move |qb| {
            let meta = qb.source.schema().entity(&entity)?.clone();
            qb.set_main(&alias, AliasTarget::Entity(meta))
        })
    }

    /// Select from a table without metadata.
    pub fn from_table(self, table: &str, alias: &str) -> Self {
        let table = table.to_string();
        let alias = alias.to_string();
        self.apply(move |qb| qb.set_main(&alias, AliasTarget::Table(table)))
    }

    /// Select from a derived table; its parameters are merged.
    pub fn from_subquery(self, subquery: SelectQueryBuilder, alias: &str) -> Self {
        let alias = alias.to_string();
        self.apply(move |qb| {
            let sql = subquery.subquery_text()?;
            qb.expr.merge_parameters(&subquery.expr.parameters);
            qb.set_main(&alias, AliasTarget::Subquery(sql))
        })
    }

    /// Render as a parenthesized sub-query, failing on recorded errors.
    fn subquery_text(&self) -> QueryResult<String> {
        self.check()?;
        let mut expr = self.expr.fork();
        expr.flags.subquery = true;
        let dialect = self.source.dialect();
        Renderer::new(
            &expr,
            self.source.schema(),
            &dialect,
            self.source.config().escape_identifiers,
        )
        .render()
    }

    // ============== Joins ==============

    /// Add a join.
    pub fn join(self, spec: JoinSpec) -> Self {
        self.apply(move |qb| qb.add_join(spec))
    }

    /// `INNER JOIN` a relation without selecting it.
    pub fn inner_join(self, path: &str, alias: &str) -> Self {
        self.join(JoinSpec::relation(path, alias).inner())
    }

    /// `LEFT JOIN` a relation without selecting it.
    pub fn left_join(self, path: &str, alias: &str) -> Self {
        self.join(JoinSpec::relation(path, alias).left())
    }

    /// `INNER JOIN` a relation and hydrate it.
    pub fn inner_join_and_select(self, path: &str, alias: &str) -> Self {
        self.join(JoinSpec::relation(path, alias).inner().select())
    }

    /// `LEFT JOIN` a relation and hydrate it.
    pub fn left_join_and_select(self, path: &str, alias: &str) -> Self {
        self.join(JoinSpec::relation(path, alias).left().select())
    }

    fn add_join(&mut self, spec: JoinSpec) -> QueryResult<()> {
        let JoinSpec {
            direction,
            target,
            alias,
            condition,
            select,
            map_to,
        } = spec;

        let source = match target {
            JoinTarget::Relation(path) => {
                let path = resolve_relation_path(&self.expr.aliases, self.source.schema(), &path)?;
                self.expr.aliases.create_alias(
                    Some(&alias),
                    AliasKind::Join,
                    AliasTarget::Entity(path.target.clone()),
                )?;
                if path.relation.kind == RelationKind::ManyToMany {
                    let owner = self.source.schema().owning_relation(&path.relation)?;
                    let junction_alias = path.junction_alias();
                    if let Some(junction) = &owner.junction {
                        if !self.expr.aliases.contains(&junction_alias) {
                            self.expr.aliases.create_alias(
                                Some(&junction_alias),
                                AliasKind::Junction,
                                AliasTarget::Table(junction.table_name.clone()),
                            )?;
                        }
                    }
                }
                JoinSource::Relation(path)
            }
            JoinTarget::Entity(entity) => {
                let meta = self.source.schema().entity(&entity)?.clone();
                self.expr.aliases.create_alias(
                    Some(&alias),
                    AliasKind::Join,
                    AliasTarget::Entity(meta.clone()),
                )?;
                JoinSource::Entity(meta)
            }
            JoinTarget::Table(table) => {
                self.expr.aliases.create_alias(
                    Some(&alias),
                    AliasKind::Join,
                    AliasTarget::Table(table.clone()),
                )?;
                JoinSource::Table(table)
            }
            JoinTarget::Subquery(subquery) => {
                let sql = subquery.subquery_text()?;
                self.expr.merge_parameters(&subquery.expr.parameters);
                self.expr.aliases.create_alias(
                    Some(&alias),
                    AliasKind::Subquery,
                    AliasTarget::Subquery(sql.clone()),
                )?;
                JoinSource::Subquery(sql)
            }
        };

        let (map_to, cardinality) = match map_to {
            Some((map_to, cardinality)) => {
                self.mapping_parent(&map_to)?;
                (Some(map_to), cardinality)
            }
            None => (None, Cardinality::One),
        };

        self.expr.joins.push(JoinAttribute {
            direction,
            source,
            alias,
            condition,
            selected: select,
            map_to,
            cardinality,
        });
        Ok(())
    }

    /// Validate a dotted `alias.property` target, returning the alias.
    fn mapping_parent<'m>(&self, map_to: &'m str) -> QueryResult<&'m str> {
        let (parent, _) = map_to.split_once('.').ok_or_else(|| {
            QueryError::invalid_query_shape(format!(
                "\"{}\" is not a mapping path, expected alias.property",
                map_to
            ))
        })?;
        self.expr.aliases.find(parent)?;
        Ok(parent)
    }

    /// Resolve the relation of a side-load; it must belong to the mapped alias.
    fn side_load_path(&self, map_to: &str, path: &str) -> QueryResult<RelationPath> {
        let parent = self.mapping_parent(map_to)?;
        let path = resolve_relation_path(&self.expr.aliases, self.source.schema(), path)?;
        if path.parent_alias != parent {
            return Err(QueryError::invalid_query_shape(format!(
                "\"{}\" must be mapped onto alias {}, not {}",
                path.dotted(),
                path.parent_alias,
                parent
            )));
        }
        Ok(path)
    }

    // ============== Relation ids and counts ==============

    fn add_relation_id(
        self,
        map_to: &str,
        path: &str,
        alias: Option<String>,
        refinement: Option<Refinement>,
        disable_mixed_map: bool,
    ) -> Self {
        let map_to = map_to.to_string();
        let path = path.to_string();
        self.apply(move |qb| {
            let path = qb.side_load_path(&map_to, &path)?;
            qb.expr.relation_ids.push(RelationIdAttribute {
                path,
                alias,
                map_to,
                refinement,
                disable_mixed_map,
            });
            Ok(())
        })
    }

    /// Load the ids of a relation into `map_to` without joining it.
    pub fn load_relation_id_and_map(self, map_to: &str, path: &str) -> Self {
        self.add_relation_id(map_to, path, None, None, false)
    }

    /// Like [`load_relation_id_and_map`](Self::load_relation_id_and_map), but
    /// ids are always objects keyed by property, even for single-column keys.
    pub fn load_relation_id_objects_and_map(self, map_to: &str, path: &str) -> Self {
        self.add_relation_id(map_to, path, None, None, true)
    }

    /// Load relation ids through a narrowed query over `alias`.
    pub fn load_relation_id_and_map_with<F>(
        self,
        map_to: &str,
        path: &str,
        alias: &str,
        refine: F,
    ) -> Self
    where
        F: Fn(SelectQueryBuilder) -> SelectQueryBuilder + Send + Sync + 'static,
    {
        self.add_relation_id(map_to, path, Some(alias.to_string()), Some(Arc::new(refine)), false)
    }

    fn add_relation_count(
        self,
        map_to: &str,
        path: &str,
        alias: Option<String>,
        refinement: Option<Refinement>,
    ) -> Self {
        let map_to = map_to.to_string();
        let path = path.to_string();
        self.apply(move |qb| {
            let path = qb.side_load_path(&map_to, &path)?;
            qb.expr.relation_counts.push(RelationCountAttribute {
                path,
                alias,
                map_to,
                refinement,
            });
            Ok(())
        })
    }

    /// Count related rows into `map_to` without joining them.
    pub fn load_relation_count_and_map(self, map_to: &str, path: &str) -> Self {
        self.add_relation_count(map_to, path, None, None)
    }

    /// Count related rows through a narrowed query over `alias`.
    pub fn load_relation_count_and_map_with<F>(
        self,
        map_to: &str,
        path: &str,
        alias: &str,
        refine: F,
    ) -> Self
    where
        F: Fn(SelectQueryBuilder) -> SelectQueryBuilder + Send + Sync + 'static,
    {
        self.add_relation_count(map_to, path, Some(alias.to_string()), Some(Arc::new(refine)))
    }

    // ============== Conditions ==============

    /// Replace the WHERE clause.
    pub fn r#where(mut self, condition: impl Into<String>) -> Self {
        self.expr.wheres.clear();
        self.expr.push_where(PredicateKind::Simple, condition);
        self
    }

    /// Add a condition with `AND`.
    pub fn and_where(mut self, condition: impl Into<String>) -> Self {
        self.expr.push_where(PredicateKind::And, condition);
        self
    }

    /// Add a condition with `OR`.
    pub fn or_where(mut self, condition: impl Into<String>) -> Self {
        self.expr.push_where(PredicateKind::Or, condition);
        self
    }

    /// Replace the WHERE clause with a primary key match.
    ///
    /// Composite keys are given as JSON objects keyed by property.
    pub fn where_in_ids<I, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.expr.wheres.clear();
        self.and_where_in_ids(ids)
    }

    /// Add a primary key match with `AND`.
    pub fn and_where_in_ids<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        self.apply(move |qb| push_where_in_ids(&mut qb.expr, PredicateKind::And, ids))
    }

    /// Add a primary key match with `OR`.
    pub fn or_where_in_ids<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        self.apply(move |qb| push_where_in_ids(&mut qb.expr, PredicateKind::Or, ids))
    }

    /// Replace the HAVING clause.
    pub fn having(mut self, condition: impl Into<String>) -> Self {
        self.expr.havings.clear();
        self.expr.push_having(PredicateKind::Simple, condition);
        self
    }

    /// Add a HAVING condition with `AND`.
    pub fn and_having(mut self, condition: impl Into<String>) -> Self {
        self.expr.push_having(PredicateKind::And, condition);
        self
    }

    /// Add a HAVING condition with `OR`.
    pub fn or_having(mut self, condition: impl Into<String>) -> Self {
        self.expr.push_having(PredicateKind::Or, condition);
        self
    }

    /// Replace the GROUP BY list.
    pub fn group_by(mut self, expression: impl Into<String>) -> Self {
        self.expr.group_bys = vec![expression.into()];
        self
    }

    /// Add a GROUP BY expression.
    pub fn add_group_by(mut self, expression: impl Into<String>) -> Self {
        self.expr.group_bys.push(expression.into());
        self
    }

    // ============== Ordering and paging ==============

    /// Replace the ordering.
    pub fn order_by(mut self, key: impl Into<String>, order: impl Into<OrderSpec>) -> Self {
        self.expr.orders.clear();
        self.expr.orders.insert(key.into(), order.into());
        self
    }

    /// Add an ordering key.
    pub fn add_order_by(mut self, key: impl Into<String>, order: impl Into<OrderSpec>) -> Self {
        self.expr.orders.insert(key.into(), order.into());
        self
    }

    /// Row limit of the statement.
    pub fn limit(mut self, limit: u64) -> Self {
        self.expr.limit = Some(limit);
        self
    }

    /// Row offset of the statement.
    pub fn offset(mut self, offset: u64) -> Self {
        self.expr.offset = Some(offset);
        self
    }

    /// Entities to skip; correct over to-many joins.
    pub fn skip(mut self, skip: u64) -> Self {
        self.expr.skip = Some(skip);
        self
    }

    /// Entities to take; correct over to-many joins.
    pub fn take(mut self, take: u64) -> Self {
        self.expr.take = Some(take);
        self
    }

    // ============== Locking and parameters ==============

    /// Set the lock mode.
    pub fn set_lock(mut self, mode: LockMode) -> Self {
        self.expr.lock = Some(mode);
        self
    }

    /// Restrict a row lock to the given aliases (`FOR UPDATE OF ...`).
    pub fn set_lock_tables<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expr.lock_tables = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Set a named parameter.
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.expr.parameters.insert(name.into(), value.into());
        self
    }

    /// Set several named parameters.
    pub fn set_parameters<I, K, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in parameters {
            self.expr.parameters.insert(name.into(), value.into());
        }
        self
    }

    // ============== Rendering ==============

    /// SQL text with named parameters intact.
    pub fn get_query(&self) -> QueryResult<String> {
        self.check()?;
        let dialect = self.source.dialect();
        Renderer::new(
            &self.expr,
            self.source.schema(),
            &dialect,
            self.source.config().escape_identifiers,
        )
        .render()
    }

    /// SQL text with positional placeholders and the bound values.
    pub fn get_sql_and_parameters(&self) -> QueryResult<(String, Vec<Value>)> {
        let sql = self.get_query()?;
        bind_named(&sql, &self.expr.parameters, &self.source.dialect())
    }

    fn check_lock_for(&self, single: bool) -> QueryResult<()> {
        let Some(mode) = &self.expr.lock else {
            return Ok(());
        };
        let dialect = self.source.dialect();
        let transaction_active = self.source.driver().is_transaction_active();
        let main = self.expr.aliases.main()?;
        match (main.metadata.as_deref(), mode) {
            (Some(meta), mode) => check_lock(mode, &dialect, meta, transaction_active, single),
            (None, LockMode::Optimistic(_)) if !single => {
                Err(QueryError::optimistic_lock_cannot_be_used())
            }
            (None, LockMode::Optimistic(_)) => {
                Err(QueryError::no_version_or_update_column(&main.name))
            }
            (None, mode) => {
                dialect.lock_clause(mode)?;
                if mode.is_pessimistic() && !transaction_active {
                    return Err(QueryError::lock_without_transaction());
                }
                Ok(())
            }
        }
    }

    // ============== Raw terminals ==============

    /// Run the statement and return raw rows.
    pub async fn get_raw_many(&self) -> QueryResult<Vec<Row>> {
        self.raw_rows(Phase::Main).await
    }

    pub(crate) async fn raw_rows(&self, phase: Phase) -> QueryResult<Vec<Row>> {
        self.check()?;
        self.check_lock_for(false)?;
        let (sql, params) = self.get_sql_and_parameters()?;
        driver::query(self.source.driver(), phase, sql, params).await
    }

    /// Run the statement and return the first raw row.
    pub async fn get_raw_one(&self) -> QueryResult<Option<Row>> {
        Ok(self.get_raw_many().await?.into_iter().next())
    }

    // ============== Entity terminals ==============

    async fn load(&self, single: bool) -> QueryResult<(EntityGraph, Vec<Row>)> {
        self.check()?;
        self.check_lock_for(single)?;
        let main = self.expr.aliases.main()?;
        let meta = main.metadata()?.clone();
        let dialect = self.source.dialect();
        let schema = self.source.schema();
        let config = self.source.config();
        let driver = self.source.driver();

        let page = if Paginator::applies(&self.expr) {
            Paginator::new(&self.expr, schema, &dialect, config)
                .fetch(driver)
                .await?
                .map(Some)
        } else {
            Some(None)
        };

        let rows = match &page {
            // empty page: nothing else is sent
            None => Vec::new(),
            Some(page) => {
                let mut parameters = self.expr.parameters.clone();
                let mut options = SelectOptions::default();
                if let Some(page) = page {
                    parameters.extend(page.parameters.clone());
                    options.extra_conditions.push(page.condition.clone());
                }
                let sql = Renderer::new(&self.expr, schema, &dialect, config.escape_identifiers)
                    .render_select(&options)?;
                let (sql, params) = bind_named(&sql, &parameters, &dialect)?;
                driver::query(driver, Phase::Main, sql, params).await?
            }
        };

        let mut graph = Hydrator::new(&self.expr).hydrate(&rows)?;
        if let Some(Some(page)) = &page {
            graph.order_roots_by(&page.keys);
        }

        let has_side_loads =
            !self.expr.relation_ids.is_empty() || !self.expr.relation_counts.is_empty();
        if has_side_loads && !graph.is_empty() {
            SideLoader::new(&self.source, &self.expr)
                .load(&rows, &mut graph)
                .await?;
        }

        if single {
            if let Some(LockMode::Optimistic(expected)) = &self.expr.lock {
                let root_key = graph
                    .roots()
                    .first()
                    .and_then(|id| graph.node(*id))
                    .map(|node| node.key.clone());
                if let Some(root_key) = root_key {
                    let row = rows
                        .iter()
                        .find(|row| entity_key(row, &main.name, &meta).as_deref() == Some(&root_key));
                    if let Some(row) = row {
                        verify_version(&meta, &main.name, row, expected)?;
                    }
                }
            }
        }

        if let Some(listener) = self.source.listener() {
            listener.after_load(&meta, &rows);
        }
        Ok((graph, rows))
    }

    /// Hydrate entities into a graph.
    pub async fn get_graph(&self) -> QueryResult<EntityGraph> {
        Ok(self.load(false).await?.0)
    }

    /// Hydrate entities as nested JSON.
    pub async fn get_many(&self) -> QueryResult<Vec<JsonValue>> {
        Ok(self.load(false).await?.0.to_json())
    }

    /// Hydrate entities and deserialize them.
    pub async fn get_many_as<T: DeserializeOwned>(&self) -> QueryResult<Vec<T>> {
        self.load(false).await?.0.deserialize()
    }

    /// Hydrate the first entity.
    ///
    /// This is the only terminal, with [`get_one_or_fail`](Self::get_one_or_fail),
    /// accepting an optimistic lock.
    pub async fn get_one(&self) -> QueryResult<Option<JsonValue>> {
        let (graph, _) = self.load(true).await?;
        Ok(graph.roots().first().map(|id| graph.node_json(*id)))
    }

    /// Hydrate the first entity and deserialize it.
    pub async fn get_one_as<T: DeserializeOwned>(&self) -> QueryResult<Option<T>> {
        match self.get_one().await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| QueryError::deserialization(e.to_string()).with_source(e)),
            None => Ok(None),
        }
    }

    /// Hydrate the first entity, failing with `RecordNotFound` when none matched.
    pub async fn get_one_or_fail(&self) -> QueryResult<JsonValue> {
        match self.get_one().await? {
            Some(value) => Ok(value),
            None => {
                let entity = self
                    .expr
                    .aliases
                    .main()
                    .ok()
                    .and_then(|main| main.metadata.as_ref().map(|m| m.name.clone()))
                    .unwrap_or_default();
                Err(QueryError::not_found(entity))
            }
        }
    }

    /// Count distinct entities matching the query.
    pub async fn get_count(&self) -> QueryResult<u64> {
        self.check()?;
        self.check_lock_for(false)?;
        let dialect = self.source.dialect();
        let sql = Renderer::new(
            &self.expr,
            self.source.schema(),
            &dialect,
            self.source.config().escape_identifiers,
        )
        .render_count()?;
        let (sql, params) = bind_named(&sql, &self.expr.parameters, &dialect)?;
        let rows = driver::query(self.source.driver(), Phase::Count, sql, params).await?;
        Ok(rows.first().and_then(read_count).unwrap_or(0))
    }

    /// Hydrate a page of entities and count every match.
    pub async fn get_many_and_count(&self) -> QueryResult<(Vec<JsonValue>, u64)> {
        let entities = self.get_many().await?;
        let count = self.get_count().await?;
        Ok((entities, count))
    }
}
