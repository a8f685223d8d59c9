//! Entity paging over row-multiplying joins.
//!
//! `LIMIT` on a statement joining a to-many relation counts rows, not
//! entities. When `skip`/`take` is combined with such joins the page is
//! computed in two steps: a distinct query over the primary keys of the main
//! alias selects the exact page, then the full statement is restricted to
//! those keys.
//!
//! ```text
//! SELECT DISTINCT "distinctAlias"."post_id" AS "ids_post_id"
//! FROM (SELECT ... joins ... WHERE ...) "distinctAlias"
//! ORDER BY "distinctAlias"."post_id" ASC LIMIT 10
//! ```

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::dialect::Dialect;
use crate::driver::{self, Driver, Phase};
use crate::error::QueryResult;
use crate::expression::{QueryExpression, SelectItem};
use crate::metadata::Schema;
use crate::sql::params::bind_named;
use crate::sql::properties::resolve_property;
use crate::sql::{Renderer, SelectOptions, column_alias};
use crate::types::OrderSpec;
use crate::value::{Row, Value};

/// Alias of the derived table wrapping the joined statement.
const DISTINCT_ALIAS: &str = "distinctAlias";

/// Prefix of the primary key columns returned by the distinct query.
const IDS_PREFIX: &str = "ids_";

/// Parameter name carrying non-inlined page keys.
const PAGE_PARAMETER: &str = "tessera_page_ids";

/// The keys of one computed page.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Page {
    /// Entity keys in page order, serialized as hydration keys.
    pub keys: Vec<String>,
    /// Condition restricting the main alias to the page.
    pub condition: String,
    /// Parameters used by `condition`.
    pub parameters: IndexMap<String, Value>,
}

/// Computes pages for one expression.
pub(crate) struct Paginator<'a> {
    expr: &'a QueryExpression,
    schema: &'a Schema,
    dialect: &'a Dialect,
    config: &'a EngineConfig,
}

impl<'a> Paginator<'a> {
    pub fn new(
        expr: &'a QueryExpression,
        schema: &'a Schema,
        dialect: &'a Dialect,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            expr,
            schema,
            dialect,
            config,
        }
    }

    /// Whether the expression needs the two-step strategy.
    pub fn applies(expr: &QueryExpression) -> bool {
        expr.has_page() && expr.has_fan_out_joins()
    }

    /// Column of the derived table an order key sorts by.
    ///
    /// Keys without an alias are used as written.
    fn order_column(&self, key: &str) -> QueryResult<String> {
        let Some((alias, property)) = key.split_once('.') else {
            return Ok(key.to_string());
        };
        let resolved = self
            .expr
            .aliases
            .find(alias)?
            .metadata
            .as_deref()
            .and_then(|meta| resolve_property(meta, property))
            .map(|(column, _)| column_alias(alias, &column));
        Ok(resolved.unwrap_or_else(|| key.to_string()))
    }

    /// Render the distinct primary key query with named parameters intact.
    pub fn ids_query(&self) -> QueryResult<String> {
        let main = self.expr.aliases.main()?;
        let meta = main.metadata()?;

        let mut inner = self.expr.fork();
        inner.lock = None;
        inner.lock_tables.clear();
        inner.flags.subquery = false;

        let renderer = Renderer::new(self.expr, self.schema, self.dialect, self.config.escape_identifiers);
        let mut orders = renderer.effective_orders(main);
        if orders.is_empty() {
            orders = meta
                .primary_columns()
                .map(|c| (format!("{}.{}", main.name, c.property_path), OrderSpec::asc()))
                .collect();
        }

        // order keys of aliases that are not fully selected are exposed explicitly
        for (key, _) in &orders {
            let Some((alias, _)) = key.split_once('.') else {
                continue;
            };
            let name = self.order_column(key)?;
            if name != *key
                && !inner.is_alias_selected(alias)
                && !inner.selects.iter().any(|s| s.selection == *key)
            {
                inner.selects.push(SelectItem {
                    selection: key.clone(),
                    alias_name: Some(name),
                });
            }
        }

        let inner_renderer = Renderer::new(&inner, self.schema, self.dialect, self.config.escape_identifiers);
        let inner_sql = inner_renderer.render_select(&SelectOptions {
            without_order: true,
            without_limits: true,
            extra_conditions: Vec::new(),
        })?;

        let distinct = inner_renderer.escape(DISTINCT_ALIAS);
        let mut columns = Vec::new();
        let mut seen = HashSet::new();
        for column in meta.primary_columns() {
            let name = column_alias(&main.name, &column.database_name);
            columns.push(format!(
                "{}.{} AS {}",
                distinct,
                inner_renderer.escape(&name),
                inner_renderer.escape(&format!("{}{}", IDS_PREFIX, name))
            ));
            seen.insert(name);
        }
        let mut order_items = Vec::new();
        for (key, spec) in &orders {
            let name = self.order_column(key)?;
            let reference = format!("{}.{}", distinct, inner_renderer.escape(&name));
            if seen.insert(name) {
                columns.push(reference.clone());
            }
            order_items.push(inner_renderer.order_item(&reference, spec));
        }

        let sql = format!(
            "SELECT DISTINCT {} FROM ({}) {} ORDER BY {}",
            columns.join(", "),
            inner_sql,
            distinct,
            order_items.join(", ")
        );
        Ok(inner_renderer.apply_limits(sql, true, self.expr.take, self.expr.skip))
    }

    /// Build the page restriction from the rows of the distinct query.
    ///
    /// Returns `None` for an empty page.
    pub fn page(&self, rows: &[Row]) -> QueryResult<Option<Page>> {
        let main = self.expr.aliases.main()?;
        let meta = main.metadata()?;
        let names: Vec<(String, String)> = meta
            .primary_columns()
            .map(|c| {
                (
                    format!("{}{}", IDS_PREFIX, column_alias(&main.name, &c.database_name)),
                    c.database_name.clone(),
                )
            })
            .collect();

        let mut keys = Vec::new();
        let mut ids: Vec<Vec<Value>> = Vec::new();
        let mut seen = HashSet::new();
        let mut duplicates = 0usize;
        for row in rows {
            let json: Vec<serde_json::Value> = names
                .iter()
                .map(|(name, _)| row.get(name).cloned().unwrap_or(serde_json::Value::Null))
                .collect();
            let key = serde_json::Value::Array(json.clone()).to_string();
            if !seen.insert(key.clone()) {
                duplicates += 1;
                continue;
            }
            keys.push(key);
            ids.push(json.iter().map(Value::from_json).collect());
        }
        if duplicates > 0 {
            warn!(
                alias = %main.name,
                duplicates,
                "page query returned duplicate keys, ordering by a joined to-many column shrinks the page"
            );
        }
        if ids.is_empty() {
            debug!(alias = %main.name, "page is empty");
            return Ok(None);
        }

        let renderer = Renderer::new(self.expr, self.schema, self.dialect, self.config.escape_identifiers);
        let subst = renderer.subst();
        let columns: Vec<String> = names
            .iter()
            .map(|(_, column)| subst.column(&main.name, column))
            .collect();

        let inline = self.config.inline_numeric_page_ids
            && ids.iter().flatten().all(|v| v.as_integer().is_some());
        if inline && ids.len() > self.config.max_inline_ids {
            debug!(ids = ids.len(), max = self.config.max_inline_ids, "inlining a large page");
        }

        let mut parameters = IndexMap::new();
        let condition = if columns.len() == 1 {
            if inline {
                let literals: Vec<String> = ids
                    .iter()
                    .filter_map(|key| key[0].as_integer())
                    .map(|id| id.to_string())
                    .collect();
                format!("{} IN ({})", columns[0], literals.join(", "))
            } else {
                parameters.insert(
                    PAGE_PARAMETER.to_string(),
                    Value::List(ids.into_iter().map(|mut key| key.remove(0)).collect()),
                );
                format!("{} IN (:...{})", columns[0], PAGE_PARAMETER)
            }
        } else {
            let mut alternatives = Vec::with_capacity(ids.len());
            for (i, key) in ids.into_iter().enumerate() {
                let mut parts = Vec::with_capacity(key.len());
                for (j, value) in key.into_iter().enumerate() {
                    match value.as_integer().filter(|_| inline) {
                        Some(id) => parts.push(format!("{} = {}", columns[j], id)),
                        None => {
                            let name = format!("{}_{}_{}", PAGE_PARAMETER, i, j);
                            parts.push(format!("{} = :{}", columns[j], name));
                            parameters.insert(name, value);
                        }
                    }
                }
                alternatives.push(format!("({})", parts.join(" AND ")));
            }
            format!("({})", alternatives.join(" OR "))
        };

        Ok(Some(Page {
            keys,
            condition,
            parameters,
        }))
    }

    /// Run the distinct query and build the page.
    pub async fn fetch(&self, driver: &dyn Driver) -> QueryResult<Option<Page>> {
        let sql = self.ids_query()?;
        let (sql, params) = bind_named(&sql, &self.expr.parameters, self.dialect)?;
        let rows = driver::query(driver, Phase::PageIds, sql, params).await?;
        self.page(&rows)
    }
}
