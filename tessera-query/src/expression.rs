//! The query expression model.
//!
//! A [`QueryExpression`] is the state a builder accumulates: aliases, selects,
//! joins, predicates, ordering, paging, locking and parameters. Builders
//! mutate it through their fluent methods and the renderer reads it.
//!
//! [`QueryExpression::fork`] produces an independent copy. Every list and map
//! is copied while entity metadata stays shared behind `Arc`, so changes made
//! to a fork (an id-only page query, a count query, a sub-query) never reach
//! the original.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::alias::AliasRegistry;
use crate::builder::SelectQueryBuilder;
use crate::locking::LockMode;
use crate::metadata::{EntityMetadata, RelationMetadata};
use crate::types::OrderSpec;
use crate::value::Value;

/// Statement type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// SELECT.
    Select,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
}

impl QueryType {
    /// Statement keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Join direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
}

impl JoinDirection {
    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// Whether a mapped join yields one value or a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// A single value (or nothing).
    One,
    /// A list of values.
    Many,
}

/// A relation path resolved against registered aliases and metadata.
#[derive(Debug, Clone)]
pub struct RelationPath {
    /// Alias owning the relation property.
    pub parent_alias: String,
    /// Relation property name.
    pub property: String,
    /// Entity shape of the parent alias.
    pub parent: Arc<EntityMetadata>,
    /// The relation descriptor.
    pub relation: Arc<RelationMetadata>,
    /// Entity shape of the relation target.
    pub target: Arc<EntityMetadata>,
}

impl RelationPath {
    /// Alias of the junction table for a many-to-many relation.
    ///
    /// Derived only from the parent alias and the property so that joining
    /// the same relation twice resolves to the same junction alias.
    pub fn junction_alias(&self) -> String {
        format!("{}_{}", self.parent_alias, self.property)
    }

    /// The dotted path, `parent.property`.
    pub fn dotted(&self) -> String {
        format!("{}.{}", self.parent_alias, self.property)
    }
}

/// Source of a join.
#[derive(Debug, Clone)]
pub enum JoinSource {
    /// A relation of an already registered alias.
    Relation(RelationPath),
    /// An entity joined with an explicit condition.
    Entity(Arc<EntityMetadata>),
    /// A plain table joined with an explicit condition.
    Table(String),
    /// A derived table joined with an explicit condition.
    Subquery(String),
}

/// A join registered on the expression.
#[derive(Debug, Clone)]
pub struct JoinAttribute {
    /// Inner or left.
    pub direction: JoinDirection,
    /// What is joined.
    pub source: JoinSource,
    /// Alias of the joined table.
    pub alias: String,
    /// Extra condition, appended with `AND` to relation conditions.
    pub condition: Option<String>,
    /// Whether the joined alias' columns are selected.
    pub selected: bool,
    /// Property receiving the hydrated value, for joins that are not relations
    /// or that map somewhere other than the relation property.
    pub map_to: Option<String>,
    /// Cardinality of `map_to`.
    pub cardinality: Cardinality,
}

impl JoinAttribute {
    /// The resolved relation, when joining a relation path.
    pub fn relation(&self) -> Option<&RelationPath> {
        match &self.source {
            JoinSource::Relation(path) => Some(path),
            _ => None,
        }
    }

    /// Parent alias and property the hydrated value is attached to.
    ///
    /// `map_to` is a dotted `alias.property`; relation joins default to the
    /// relation property on the parent alias.
    pub fn mapping(&self) -> Option<(String, String)> {
        if let Some(map_to) = &self.map_to {
            let (parent, property) = map_to.split_once('.')?;
            return Some((parent.to_string(), property.to_string()));
        }
        self.relation()
            .map(|path| (path.parent_alias.clone(), path.property.clone()))
    }

    /// Whether joined rows can multiply the rows of the main alias.
    pub fn fans_out(&self) -> bool {
        match &self.source {
            JoinSource::Relation(path) => path.relation.kind.is_many(),
            _ => true,
        }
    }

    /// Effective cardinality of the hydrated value.
    pub fn effective_cardinality(&self) -> Cardinality {
        match (&self.map_to, self.relation()) {
            (None, Some(path)) if path.relation.kind.is_many() => Cardinality::Many,
            (None, Some(_)) => Cardinality::One,
            _ => self.cardinality,
        }
    }
}

/// Callback narrowing a relation-id side-load query.
pub type Refinement = Arc<dyn Fn(SelectQueryBuilder) -> SelectQueryBuilder + Send + Sync>;

/// A relation-id attribute: load the ids of related rows without joining.
#[derive(Clone)]
pub struct RelationIdAttribute {
    /// The relation whose ids are loaded.
    pub path: RelationPath,
    /// Alias used inside the side-load query.
    pub alias: Option<String>,
    /// Dotted `alias.property` receiving the ids.
    pub map_to: String,
    /// Optional query narrowing.
    pub refinement: Option<Refinement>,
    /// Always map ids to objects, even for single-column keys.
    pub disable_mixed_map: bool,
}

impl fmt::Debug for RelationIdAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationIdAttribute")
            .field("path", &self.path.dotted())
            .field("alias", &self.alias)
            .field("map_to", &self.map_to)
            .field("refinement", &self.refinement.is_some())
            .field("disable_mixed_map", &self.disable_mixed_map)
            .finish()
    }
}

/// A relation-count attribute: count related rows without joining.
#[derive(Clone)]
pub struct RelationCountAttribute {
    /// The relation whose rows are counted.
    pub path: RelationPath,
    /// Alias used inside the side-load query.
    pub alias: Option<String>,
    /// Dotted `alias.property` receiving the count.
    pub map_to: String,
    /// Optional query narrowing.
    pub refinement: Option<Refinement>,
}

impl fmt::Debug for RelationCountAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationCountAttribute")
            .field("path", &self.path.dotted())
            .field("alias", &self.alias)
            .field("map_to", &self.map_to)
            .field("refinement", &self.refinement.is_some())
            .finish()
    }
}

/// How a predicate joins the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateKind {
    /// The first predicate.
    Simple,
    /// Joined with `AND`.
    And,
    /// Joined with `OR`.
    Or,
}

/// One WHERE or HAVING predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Connective.
    pub kind: PredicateKind,
    /// SQL fragment, possibly containing property paths and named parameters.
    pub text: String,
}

/// One entry of the SELECT list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    /// An alias name (all its columns), `alias.property`, or a raw expression.
    pub selection: String,
    /// Output name for raw expressions.
    pub alias_name: Option<String>,
}

/// Value assigned by an UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetValue {
    /// A named parameter holding the value.
    Param(String),
    /// A raw SQL expression.
    Raw(String),
}

/// Flags altering rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionFlags {
    /// Rendered as a sub-query: wrapped in parentheses, named parameters kept.
    pub subquery: bool,
    /// Identifiers are escaped.
    pub escaping: bool,
    /// Parent tables of class-table inheritance are not joined.
    pub ignore_parent_tables_joins: bool,
}

impl Default for ExpressionFlags {
    fn default() -> Self {
        Self {
            subquery: false,
            escaping: true,
            ignore_parent_tables_joins: false,
        }
    }
}

/// The mutable state of one query.
#[derive(Debug, Clone)]
pub struct QueryExpression {
    /// Statement type.
    pub query_type: QueryType,
    /// Registered aliases; the `From` alias is the main alias.
    pub aliases: AliasRegistry,
    /// SELECT list.
    pub selects: Vec<SelectItem>,
    /// Joins in registration order.
    pub joins: Vec<JoinAttribute>,
    /// Relation-id side-loads.
    pub relation_ids: Vec<RelationIdAttribute>,
    /// Relation-count side-loads.
    pub relation_counts: Vec<RelationCountAttribute>,
    /// WHERE predicates.
    pub wheres: Vec<Predicate>,
    /// HAVING predicates.
    pub havings: Vec<Predicate>,
    /// GROUP BY expressions.
    pub group_bys: Vec<String>,
    /// ORDER BY keys, in insertion order.
    pub orders: IndexMap<String, OrderSpec>,
    /// Raw `LIMIT`.
    pub limit: Option<u64>,
    /// Raw `OFFSET`.
    pub offset: Option<u64>,
    /// Entities to skip, paginated over joins.
    pub skip: Option<u64>,
    /// Entities to take, paginated over joins.
    pub take: Option<u64>,
    /// Lock mode.
    pub lock: Option<LockMode>,
    /// Aliases named in `FOR UPDATE OF`.
    pub lock_tables: Vec<String>,
    /// Named parameters.
    pub parameters: IndexMap<String, Value>,
    /// UPDATE assignments keyed by property path or column.
    pub sets: IndexMap<String, SetValue>,
    /// Rendering flags.
    pub flags: ExpressionFlags,
}

impl QueryExpression {
    /// Create an empty expression.
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            aliases: AliasRegistry::new(),
            selects: Vec::new(),
            joins: Vec::new(),
            relation_ids: Vec::new(),
            relation_counts: Vec::new(),
            wheres: Vec::new(),
            havings: Vec::new(),
            group_bys: Vec::new(),
            orders: IndexMap::new(),
            limit: None,
            offset: None,
            skip: None,
            take: None,
            lock: None,
            lock_tables: Vec::new(),
            parameters: IndexMap::new(),
            sets: IndexMap::new(),
            flags: ExpressionFlags::default(),
        }
    }

    /// An independent copy of this expression.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Whether the alias' columns are selected, either directly or through
    /// a selecting join.
    pub fn is_alias_selected(&self, alias: &str) -> bool {
        self.selects.iter().any(|s| s.selection == alias)
            || self.joins.iter().any(|j| j.alias == alias && j.selected)
    }

    /// Whether any join can multiply rows of the main alias.
    pub fn has_fan_out_joins(&self) -> bool {
        self.joins.iter().any(JoinAttribute::fans_out)
    }

    /// Whether entity paging (`skip`/`take`) was requested.
    pub fn has_page(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }

    /// Append a predicate, using `Simple` for the first one.
    pub(crate) fn push_where(&mut self, kind: PredicateKind, text: impl Into<String>) {
        let kind = if self.wheres.is_empty() {
            PredicateKind::Simple
        } else {
            kind
        };
        self.wheres.push(Predicate {
            kind,
            text: text.into(),
        });
    }

    /// Append a HAVING predicate.
    pub(crate) fn push_having(&mut self, kind: PredicateKind, text: impl Into<String>) {
        let kind = if self.havings.is_empty() {
            PredicateKind::Simple
        } else {
            kind
        };
        self.havings.push(Predicate {
            kind,
            text: text.into(),
        });
    }

    /// Merge parameters of a sub-query; existing names are overwritten.
    pub(crate) fn merge_parameters(&mut self, parameters: &IndexMap<String, Value>) {
        for (name, value) in parameters {
            self.parameters.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SortOrder;

    #[test]
    fn test_fork_is_independent() {
        let mut original = QueryExpression::new(QueryType::Select);
        original.push_where(PredicateKind::And, "post.id = :id");
        original.parameters.insert("id".into(), Value::Int(1));
        original
            .orders
            .insert("post.title".into(), SortOrder::Asc.into());

        let mut fork = original.fork();
        fork.push_where(PredicateKind::And, "post.title IS NOT NULL");
        fork.parameters.insert("id".into(), Value::Int(2));
        fork.orders.clear();
        fork.take = Some(5);

        assert_eq!(original.wheres.len(), 1);
        assert_eq!(original.parameters["id"], Value::Int(1));
        assert_eq!(original.orders.len(), 1);
        assert!(original.take.is_none());
        assert_eq!(fork.wheres[1].kind, PredicateKind::And);
    }

    #[test]
    fn test_first_predicate_is_simple() {
        let mut expr = QueryExpression::new(QueryType::Select);
        expr.push_where(PredicateKind::Or, "a = 1");
        expr.push_where(PredicateKind::Or, "b = 1");
        assert_eq!(expr.wheres[0].kind, PredicateKind::Simple);
        assert_eq!(expr.wheres[1].kind, PredicateKind::Or);
    }

    #[test]
    fn test_flags_default_to_escaping() {
        let flags = ExpressionFlags::default();
        assert!(flags.escaping);
        assert!(!flags.subquery);
        assert!(!flags.ignore_parent_tables_joins);
    }
}
