//! Relation-id and relation-count side-loads.
//!
//! After the main rows are hydrated, every relation-id and relation-count
//! attribute is answered by one extra query keyed by the parent entities'
//! join values, or straight from the main rows when the parent table holds
//! the foreign key. Results are merged into the graph only after every
//! side-load succeeded.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, try_join_all};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::builder::{JoinSpec, SelectQueryBuilder};
use crate::data_source::DataSource;
use crate::driver::Phase;
use crate::error::{QueryError, QueryResult};
use crate::expression::{
    QueryExpression, Refinement, RelationCountAttribute, RelationIdAttribute, RelationPath,
};
use crate::hydrate::{EntityGraph, NodeId, entity_key};
use crate::metadata::{EntityMetadata, JoinColumn, RelationKind};
use crate::sql::{COUNT_ALIAS, column_alias, read_count};
use crate::value::{Row, Value};

/// Prefix of the columns carrying parent keys back from a side-load.
const PARENT_PREFIX: &str = "tessera_parent_";

/// Values to write into one property of the parent nodes.
struct Assignment {
    nodes: Vec<NodeId>,
    property: String,
    values: HashMap<NodeId, JsonValue>,
    default: JsonValue,
}

/// Junction joined between the target and the parent keys.
struct JunctionJoin {
    table: String,
    alias: String,
    /// Junction columns referencing the target.
    target_columns: Vec<JoinColumn>,
}

/// Where the keys referencing the parent live.
struct ParentLink {
    junction: Option<JunctionJoin>,
    /// Columns holding parent keys, paired with the parent columns they reference.
    columns: Vec<JoinColumn>,
}

impl ParentLink {
    fn referenced(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|jc| jc.referenced_column.as_str())
            .collect()
    }
}

/// Runs the side-loads of one expression.
pub(crate) struct SideLoader<'a> {
    source: &'a DataSource,
    expr: &'a QueryExpression,
}

impl<'a> SideLoader<'a> {
    pub fn new(source: &'a DataSource, expr: &'a QueryExpression) -> Self {
        Self { source, expr }
    }

    /// Run every side-load and merge the results into `graph`.
    pub async fn load(&self, rows: &[Row], graph: &mut EntityGraph) -> QueryResult<()> {
        let assignments = {
            let graph = &*graph;
            let mut loads: Vec<BoxFuture<'_, QueryResult<Assignment>>> = Vec::new();
            for attr in &self.expr.relation_ids {
                loads.push(Box::pin(self.relation_id(attr, rows, graph)));
            }
            for attr in &self.expr.relation_counts {
                loads.push(Box::pin(self.relation_count(attr, rows, graph)));
            }
            if self.source.config().concurrent_side_loads {
                try_join_all(loads).await?
            } else {
                let mut out = Vec::with_capacity(loads.len());
                for load in loads {
                    out.push(load.await?);
                }
                out
            }
        };

        for assignment in assignments {
            let Assignment {
                nodes,
                property,
                mut values,
                default,
            } = assignment;
            for node in nodes {
                let value = values.remove(&node).unwrap_or_else(|| default.clone());
                graph.set_field(node, &property, value);
            }
        }
        Ok(())
    }

    async fn relation_id(
        &self,
        attr: &RelationIdAttribute,
        rows: &[Row],
        graph: &EntityGraph,
    ) -> QueryResult<Assignment> {
        let path = &attr.path;
        let many = path.relation.kind.is_many();
        let mut assignment = Assignment {
            nodes: parent_nodes(graph, path),
            property: mapped_property(&attr.map_to),
            values: HashMap::new(),
            default: if many {
                JsonValue::Array(Vec::new())
            } else {
                JsonValue::Null
            },
        };

        if is_owning_to_one(path) {
            let fk: Vec<&str> = path.relation.join_columns.iter().map(|jc| jc.name.as_str()).collect();
            for (node, keys) in parent_values(rows, graph, path, &fk) {
                if keys.iter().all(JsonValue::is_null) {
                    continue;
                }
                let pairs = path
                    .relation
                    .join_columns
                    .iter()
                    .map(|jc| property_of(&path.target, &jc.referenced_column))
                    .zip(keys);
                assignment
                    .values
                    .insert(node, id_value(pairs, attr.disable_mixed_map));
            }
            return Ok(assignment);
        }

        let alias = side_alias(attr.alias.as_deref(), path);
        let link = self.parent_link(path, &alias)?;
        let parents = non_null_parents(parent_values(rows, graph, path, &link.referenced()));
        if parents.is_empty() {
            return Ok(assignment);
        }

        let target = &path.target;
        debug!(relation = %path.dotted(), parents = parents.len(), "loading relation ids");
        let qb = self
            .source
            .create_query_builder()
            .select(
                target
                    .primary_columns()
                    .map(|c| format!("{}.{}", alias, c.property_path)),
            )
            .from(&target.name, &alias);
        let (qb, _) = self.with_link(qb, &link, &alias, &parents);
        let qb = refine(qb, attr.refinement.as_ref());
        let result = qb.raw_rows(Phase::RelationId).await?;

        let index = parent_index(&parents);
        let mut found: HashMap<NodeId, Vec<JsonValue>> = HashMap::new();
        for row in &result {
            let Some(nodes) = index.get(&linked_key(row, link.columns.len())) else {
                continue;
            };
            let pairs = target.primary_columns().map(|c| {
                let value = row
                    .get(&column_alias(&alias, &c.database_name))
                    .cloned()
                    .unwrap_or(JsonValue::Null);
                (c.property_path.clone(), value)
            });
            let id = id_value(pairs, attr.disable_mixed_map);
            for node in nodes {
                found.entry(*node).or_default().push(id.clone());
            }
        }

        assignment.values = found
            .into_iter()
            .map(|(node, ids)| {
                let value = if many {
                    JsonValue::Array(ids)
                } else {
                    ids.into_iter().next().unwrap_or(JsonValue::Null)
                };
                (node, value)
            })
            .collect();
        Ok(assignment)
    }

    async fn relation_count(
        &self,
        attr: &RelationCountAttribute,
        rows: &[Row],
        graph: &EntityGraph,
    ) -> QueryResult<Assignment> {
        let path = &attr.path;
        let mut assignment = Assignment {
            nodes: parent_nodes(graph, path),
            property: mapped_property(&attr.map_to),
            values: HashMap::new(),
            default: JsonValue::from(0),
        };

        if is_owning_to_one(path) {
            let fk: Vec<&str> = path.relation.join_columns.iter().map(|jc| jc.name.as_str()).collect();
            for (node, keys) in parent_values(rows, graph, path, &fk) {
                let count = if keys.iter().all(JsonValue::is_null) { 0 } else { 1 };
                assignment.values.insert(node, JsonValue::from(count));
            }
            return Ok(assignment);
        }

        let alias = side_alias(attr.alias.as_deref(), path);
        let link = self.parent_link(path, &alias)?;
        let parents = non_null_parents(parent_values(rows, graph, path, &link.referenced()));
        if parents.is_empty() {
            return Ok(assignment);
        }

        debug!(relation = %path.dotted(), parents = parents.len(), "counting relations");
        let target = &path.target;
        let qb = self.source.create_query_builder().from(&target.name, &alias);
        let (mut qb, holder) = self.with_link(qb, &link, &alias, &parents);
        let primary: Vec<String> = target
            .primary_columns()
            .map(|c| self.column(&alias, &c.database_name))
            .collect();
        let count = match primary.as_slice() {
            [single] => format!("COUNT(DISTINCT({}))", single),
            _ => "COUNT(*)".to_string(),
        };
        qb = qb.add_select_as(count, COUNT_ALIAS);
        for jc in &link.columns {
            qb = qb.add_group_by(self.column(&holder, &jc.name));
        }
        let qb = refine(qb, attr.refinement.as_ref());
        let result = qb.raw_rows(Phase::RelationCount).await?;

        let index = parent_index(&parents);
        for row in &result {
            let Some(nodes) = index.get(&linked_key(row, link.columns.len())) else {
                continue;
            };
            let count = read_count(row).unwrap_or(0);
            for node in nodes {
                let entry = assignment.values.entry(*node).or_insert(JsonValue::from(0));
                let total = entry.as_u64().unwrap_or(0) + count;
                *entry = JsonValue::from(total);
            }
        }
        Ok(assignment)
    }

    /// Escaped `alias.column` as configured.
    fn column(&self, alias: &str, column: &str) -> String {
        if self.source.config().escape_identifiers {
            let dialect = self.source.dialect();
            format!("{}.{}", dialect.escape(alias), dialect.escape(column))
        } else {
            format!("{}.{}", alias, column)
        }
    }

    /// Locate the columns referencing the parent for a non-owning relation.
    fn parent_link(&self, path: &RelationPath, alias: &str) -> QueryResult<ParentLink> {
        let relation = &path.relation;
        let owner = self.source.schema().owning_relation(relation)?;
        match relation.kind {
            RelationKind::OneToMany | RelationKind::OneToOne => Ok(ParentLink {
                junction: None,
                columns: owner.join_columns.clone(),
            }),
            RelationKind::ManyToMany => {
                let junction = owner.junction.as_ref().ok_or_else(|| {
                    QueryError::invalid_metadata(
                        &relation.target,
                        format!("relation {} has no junction table", owner.property_name),
                    )
                })?;
                let (parent_side, target_side) = if relation.is_owning() {
                    (&junction.owner_columns, &junction.inverse_columns)
                } else {
                    (&junction.inverse_columns, &junction.owner_columns)
                };
                Ok(ParentLink {
                    junction: Some(JunctionJoin {
                        table: junction.table_name.clone(),
                        alias: format!("{}_junction", alias),
                        target_columns: target_side.clone(),
                    }),
                    columns: parent_side.clone(),
                })
            }
            RelationKind::ManyToOne => Err(QueryError::invalid_metadata(
                &path.parent.name,
                format!("relation {} has no join columns", path.property),
            )),
        }
    }

    /// Join the junction if any, select the parent keys and restrict them.
    ///
    /// Returns the builder and the alias holding the parent keys.
    fn with_link(
        &self,
        mut qb: SelectQueryBuilder,
        link: &ParentLink,
        alias: &str,
        parents: &[(NodeId, Vec<JsonValue>)],
    ) -> (SelectQueryBuilder, String) {
        let holder = match &link.junction {
            Some(junction) => {
                let condition = junction
                    .target_columns
                    .iter()
                    .map(|jc| {
                        format!(
                            "{} = {}",
                            self.column(&junction.alias, &jc.name),
                            self.column(alias, &jc.referenced_column)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                qb = qb.join(
                    JoinSpec::table(junction.table.clone(), junction.alias.clone())
                        .inner()
                        .on(condition),
                );
                junction.alias.clone()
            }
            None => alias.to_string(),
        };

        let columns: Vec<String> = link
            .columns
            .iter()
            .map(|jc| self.column(&holder, &jc.name))
            .collect();
        for (i, column) in columns.iter().enumerate() {
            qb = qb.add_select_as(column.clone(), format!("{}{}", PARENT_PREFIX, i));
        }

        let mut distinct = HashSet::new();
        let keys: Vec<&Vec<JsonValue>> = parents
            .iter()
            .map(|(_, keys)| keys)
            .filter(|keys| distinct.insert(match_key(keys.iter().cloned())))
            .collect();

        if let [column] = columns.as_slice() {
            let name = format!("{}ids", PARENT_PREFIX);
            let values: Vec<Value> = keys.iter().map(|k| Value::from_json(&k[0])).collect();
            qb = qb
                .and_where(format!("{} IN (:...{})", column, name))
                .set_parameter(name, Value::List(values));
        } else {
            let mut alternatives = Vec::with_capacity(keys.len());
            for (i, key) in keys.iter().enumerate() {
                let mut parts = Vec::with_capacity(columns.len());
                for (j, column) in columns.iter().enumerate() {
                    let name = format!("{}{}_{}", PARENT_PREFIX, i, j);
                    parts.push(format!("{} = :{}", column, name));
                    qb = qb.set_parameter(name, Value::from_json(&key[j]));
                }
                alternatives.push(format!("({})", parts.join(" AND ")));
            }
            qb = qb.and_where(format!("({})", alternatives.join(" OR ")));
        }
        (qb, holder)
    }
}

fn refine(qb: SelectQueryBuilder, refinement: Option<&Refinement>) -> SelectQueryBuilder {
    match refinement {
        Some(refinement) => refinement(qb),
        None => qb,
    }
}

fn is_owning_to_one(path: &RelationPath) -> bool {
    path.relation.kind.is_one() && !path.relation.join_columns.is_empty()
}

/// Alias of the side-load query's main table.
fn side_alias(alias: Option<&str>, path: &RelationPath) -> String {
    alias.map_or_else(|| path.property.clone(), str::to_string)
}

fn mapped_property(map_to: &str) -> String {
    map_to
        .split_once('.')
        .map_or(map_to, |(_, property)| property)
        .to_string()
}

fn parent_nodes(graph: &EntityGraph, path: &RelationPath) -> Vec<NodeId> {
    graph.nodes_of(&path.parent_alias).map(|(id, _)| id).collect()
}

/// Values of `columns` of the parent alias, once per parent node.
fn parent_values(
    rows: &[Row],
    graph: &EntityGraph,
    path: &RelationPath,
    columns: &[&str],
) -> Vec<(NodeId, Vec<JsonValue>)> {
    let alias = path.parent_alias.as_str();
    let index: HashMap<&str, NodeId> = graph
        .nodes_of(alias)
        .map(|(id, node)| (node.key.as_str(), id))
        .collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let Some(key) = entity_key(row, alias, &path.parent) else {
            continue;
        };
        let Some(&node) = index.get(key.as_str()) else {
            continue;
        };
        if !seen.insert(node) {
            continue;
        }
        let values = columns
            .iter()
            .map(|c| {
                row.get(&column_alias(alias, c))
                    .cloned()
                    .unwrap_or(JsonValue::Null)
            })
            .collect();
        out.push((node, values));
    }
    out
}

fn non_null_parents(parents: Vec<(NodeId, Vec<JsonValue>)>) -> Vec<(NodeId, Vec<JsonValue>)> {
    parents
        .into_iter()
        .filter(|(_, keys)| !keys.iter().any(JsonValue::is_null))
        .collect()
}

/// Parent nodes by normalized key.
fn parent_index(parents: &[(NodeId, Vec<JsonValue>)]) -> HashMap<String, Vec<NodeId>> {
    let mut index: HashMap<String, Vec<NodeId>> = HashMap::new();
    for (node, keys) in parents {
        index
            .entry(match_key(keys.iter().cloned()))
            .or_default()
            .push(*node);
    }
    index
}

/// Normalized parent key of a side-load row.
fn linked_key(row: &Row, columns: usize) -> String {
    match_key((0..columns).map(|i| {
        row.get(&format!("{}{}", PARENT_PREFIX, i))
            .cloned()
            .unwrap_or(JsonValue::Null)
    }))
}

/// Key for matching parent values; drivers may return numbers as strings.
fn match_key(values: impl Iterator<Item = JsonValue>) -> String {
    JsonValue::Array(values.map(normalize).collect()).to_string()
}

fn normalize(value: JsonValue) -> JsonValue {
    if let JsonValue::String(s) = &value {
        if let Ok(n) = s.parse::<i64>() {
            return JsonValue::from(n);
        }
    }
    value
}

fn property_of(entity: &EntityMetadata, column: &str) -> String {
    entity
        .column_by_database_name(column)
        .map_or_else(|| column.to_string(), |c| c.property_path.clone())
}

/// A bare value for single-column keys, otherwise an object keyed by property.
fn id_value(pairs: impl Iterator<Item = (String, JsonValue)>, always_object: bool) -> JsonValue {
    let map: Map<String, JsonValue> = pairs.collect();
    if map.len() == 1 && !always_object {
        return map.into_iter().next().map(|(_, v)| v).unwrap_or(JsonValue::Null);
    }
    JsonValue::Object(map)
}
