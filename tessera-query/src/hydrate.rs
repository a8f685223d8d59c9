//! Result hydration.
//!
//! Flat rows are folded into an [`EntityGraph`]: an arena holding one node
//! per distinct `(alias, primary key)` with relations stored as node ids.
//! Duplicate rows caused by to-many joins collapse onto the same nodes, and
//! back-references are just two nodes pointing at each other. Nested JSON is
//! produced on demand by [`EntityGraph::to_json`], which stops at entities
//! already being materialized, whichever alias reached them.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use tracing::trace;

use crate::error::{QueryError, QueryResult};
use crate::expression::{Cardinality, QueryExpression};
use crate::metadata::EntityMetadata;
use crate::sql::column_alias;
use crate::value::Row;

/// Index of a node in an [`EntityGraph`].
pub type NodeId = usize;

/// A relation from one node to others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// A to-one relation, `None` when the joined row was missing.
    One(Option<NodeId>),
    /// A to-many relation in first-seen order.
    Many(Vec<NodeId>),
}

/// One hydrated entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    /// Alias the entity was selected under.
    pub alias: String,
    /// Entity name.
    pub entity: String,
    /// Primary key, serialized as a JSON array.
    pub key: String,
    /// Column values by property; embedded paths are nested objects.
    pub fields: Map<String, JsonValue>,
    /// Primary key values by property.
    pub primary: Map<String, JsonValue>,
    /// Relations by property.
    pub links: IndexMap<String, Link>,
}

/// Arena of hydrated entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityGraph {
    nodes: Vec<EntityNode>,
    roots: Vec<NodeId>,
}

/// Primary key of `alias` in a row, `None` when every key column is null.
pub(crate) fn entity_key(row: &Row, alias: &str, meta: &EntityMetadata) -> Option<String> {
    let values: Vec<JsonValue> = meta
        .primary_columns()
        .map(|c| {
            row.get(&column_alias(alias, &c.database_name))
                .cloned()
                .unwrap_or(JsonValue::Null)
        })
        .collect();
    if values.iter().all(JsonValue::is_null) {
        return None;
    }
    Some(JsonValue::Array(values).to_string())
}

/// Set `value` at a dotted property path, creating nested objects.
fn set_path(target: &mut Map<String, JsonValue>, path: &str, value: JsonValue) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

impl EntityGraph {
    /// Root node ids in result order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// A node by id.
    pub fn node(&self, id: NodeId) -> Option<&EntityNode> {
        self.nodes.get(id)
    }

    /// Number of distinct entities.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was hydrated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes of an alias.
    pub fn nodes_of<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = (NodeId, &'a EntityNode)> + 'a {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.alias == alias)
    }

    /// Set a plain field on a node.
    pub(crate) fn set_field(&mut self, id: NodeId, property: &str, value: JsonValue) {
        if let Some(node) = self.nodes.get_mut(id) {
            set_path(&mut node.fields, property, value);
        }
    }

    /// Reorder roots to follow `keys`; roots with unknown keys go last.
    pub(crate) fn order_roots_by(&mut self, keys: &[String]) {
        let position: HashMap<&str, usize> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.as_str(), i))
            .collect();
        let nodes = &self.nodes;
        self.roots.sort_by_key(|id| {
            position
                .get(nodes[*id].key.as_str())
                .copied()
                .unwrap_or(usize::MAX)
        });
    }

    /// Materialize every root as nested JSON.
    pub fn to_json(&self) -> Vec<JsonValue> {
        self.roots.iter().map(|id| self.node_json(*id)).collect()
    }

    /// Materialize one node as nested JSON.
    ///
    /// An entity reached again while it is being materialized is emitted as
    /// its primary key only. Identity is the entity name and key, so a
    /// back-reference joined under another alias (`post` then
    /// `author.posts`) stops as well.
    pub fn node_json(&self, id: NodeId) -> JsonValue {
        let mut visiting = HashSet::new();
        self.materialize(id, &mut visiting)
    }

    fn materialize<'g>(&'g self, id: NodeId, visiting: &mut HashSet<(&'g str, &'g str)>) -> JsonValue {
        let node = &self.nodes[id];
        let identity = (node.entity.as_str(), node.key.as_str());
        if !visiting.insert(identity) {
            return JsonValue::Object(node.primary.clone());
        }
        let mut out = node.fields.clone();
        for (property, link) in &node.links {
            let value = match link {
                Link::One(None) => JsonValue::Null,
                Link::One(Some(target)) => self.materialize(*target, visiting),
                Link::Many(targets) => JsonValue::Array(
                    targets
                        .iter()
                        .map(|target| self.materialize(*target, visiting))
                        .collect(),
                ),
            };
            set_path(&mut out, property, value);
        }
        visiting.remove(&identity);
        JsonValue::Object(out)
    }

    /// Deserialize every root into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> QueryResult<Vec<T>> {
        self.to_json()
            .into_iter()
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| QueryError::deserialization(e.to_string()).with_source(e))
            })
            .collect()
    }
}

/// Builds an [`EntityGraph`] from rows of one expression.
pub(crate) struct Hydrator<'a> {
    expr: &'a QueryExpression,
    graph: EntityGraph,
    index: HashMap<(String, String), NodeId>,
}

impl<'a> Hydrator<'a> {
    pub fn new(expr: &'a QueryExpression) -> Self {
        Self {
            expr,
            graph: EntityGraph::default(),
            index: HashMap::new(),
        }
    }

    fn node_for(&mut self, row: &Row, alias: &str, meta: &EntityMetadata) -> Option<(NodeId, bool)> {
        let key = entity_key(row, alias, meta)?;
        if let Some(id) = self.index.get(&(alias.to_string(), key.clone())) {
            return Some((*id, false));
        }
        let mut fields = Map::new();
        let mut primary = Map::new();
        for column in &meta.columns {
            let Some(value) = row.get(&column_alias(alias, &column.database_name)) else {
                continue;
            };
            if column.primary {
                primary.insert(column.property_path.clone(), value.clone());
            }
            set_path(&mut fields, &column.property_path, value.clone());
        }
        let id = self.graph.nodes.len();
        self.graph.nodes.push(EntityNode {
            alias: alias.to_string(),
            entity: meta.name.clone(),
            key: key.clone(),
            fields,
            primary,
            links: IndexMap::new(),
        });
        self.index.insert((alias.to_string(), key), id);
        Some((id, true))
    }

    /// Fold rows into the graph.
    pub fn hydrate(mut self, rows: &[Row]) -> QueryResult<EntityGraph> {
        let main = self.expr.aliases.main()?;
        let main_meta = main.metadata()?.clone();
        let main_name = main.name.clone();

        for row in rows {
            let Some((root, created)) = self.node_for(row, &main_name, &main_meta) else {
                continue;
            };
            if created {
                self.graph.roots.push(root);
            }
            let mut row_nodes: HashMap<String, NodeId> = HashMap::new();
            row_nodes.insert(main_name.clone(), root);

            for join in &self.expr.joins {
                if !join.selected {
                    continue;
                }
                let Some(meta) = self
                    .expr
                    .aliases
                    .get(&join.alias)
                    .and_then(|a| a.metadata.clone())
                else {
                    continue;
                };
                let Some((parent_alias, property)) = join.mapping() else {
                    continue;
                };
                let Some(&parent) = row_nodes.get(&parent_alias) else {
                    continue;
                };
                let cardinality = join.effective_cardinality();
                let child = self.node_for(row, &join.alias, &meta).map(|(id, _)| id);
                if let Some(child) = child {
                    row_nodes.insert(join.alias.clone(), child);
                }
                let links = &mut self.graph.nodes[parent].links;
                match cardinality {
                    Cardinality::Many => {
                        let entry = links
                            .entry(property)
                            .or_insert_with(|| Link::Many(Vec::new()));
                        if let (Link::Many(ids), Some(child)) = (entry, child) {
                            if !ids.contains(&child) {
                                ids.push(child);
                            }
                        }
                    }
                    Cardinality::One => {
                        let entry = links.entry(property).or_insert(Link::One(None));
                        if let (Link::One(slot), Some(child)) = (entry, child) {
                            *slot = Some(child);
                        }
                    }
                }
            }
        }

        trace!(
            rows = rows.len(),
            entities = self.graph.len(),
            roots = self.graph.roots.len(),
            "hydrated rows"
        );
        Ok(self.graph)
    }
}
