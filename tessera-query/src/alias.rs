//! Alias registry.
//!
//! Every table, joined relation and sub-query bound inside one query gets a
//! unique [`Alias`]. Anything referring to an alias (join conditions, property
//! paths in predicates, relation-id attributes) resolves it here, so an
//! unknown name is a build error instead of a database error.

use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::metadata::EntityMetadata;

/// Role of an alias within a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    /// The main selection.
    From,
    /// A joined table or relation.
    Join,
    /// A junction table introduced by a many-to-many join.
    Junction,
    /// A derived table.
    Subquery,
}

/// A named binding of a table, relation or sub-query.
#[derive(Debug, Clone)]
pub struct Alias {
    /// Name, unique within the query.
    pub name: String,
    /// Role within the query.
    pub kind: AliasKind,
    /// Entity shape, when the alias is bound to an entity.
    pub metadata: Option<Arc<EntityMetadata>>,
    /// Table name, for aliases bound to a table.
    pub table_path: Option<String>,
    /// SQL text, for aliases bound to a sub-query.
    pub subquery: Option<String>,
}

impl Alias {
    /// Whether entity metadata is attached.
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Attached metadata, failing when the alias is bound to a plain table.
    pub fn metadata(&self) -> QueryResult<&Arc<EntityMetadata>> {
        self.metadata.as_ref().ok_or_else(|| {
            QueryError::invalid_query_shape(format!(
                "Alias \"{}\" is not bound to an entity",
                self.name
            ))
            .with_alias(&self.name)
        })
    }

    /// Table referenced in FROM/JOIN, if any.
    pub fn table_name(&self) -> Option<&str> {
        self.table_path
            .as_deref()
            .or_else(|| self.metadata.as_deref().map(|m| m.table_name.as_str()))
    }
}

/// What a new alias binds to.
#[derive(Debug, Clone)]
pub enum AliasTarget {
    /// An entity with metadata.
    Entity(Arc<EntityMetadata>),
    /// A plain table.
    Table(String),
    /// A derived table.
    Subquery(String),
}

/// Registry of the aliases of one query, in registration order.
#[derive(Debug, Clone, Default)]
pub struct AliasRegistry {
    aliases: Vec<Alias>,
}

impl AliasRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alias.
    ///
    /// Without an explicit name the alias is named after the entity or
    /// table. Registering a name twice fails with `DuplicateAlias`.
    pub fn create_alias(
        &mut self,
        name: Option<&str>,
        kind: AliasKind,
        target: AliasTarget,
    ) -> QueryResult<&Alias> {
        let name = match (name, &target) {
            (Some(name), _) => name.to_string(),
            (None, AliasTarget::Entity(meta)) => meta.name.clone(),
            (None, AliasTarget::Table(table)) => table.clone(),
            (None, AliasTarget::Subquery(_)) => {
                return Err(QueryError::invalid_query_shape(
                    "Sub-query sources need an explicit alias",
                ));
            }
        };
        if self.contains(&name) {
            return Err(QueryError::duplicate_alias(name));
        }
        let (metadata, table_path, subquery) = match target {
            AliasTarget::Entity(meta) => (Some(meta), None, None),
            AliasTarget::Table(table) => (None, Some(table), None),
            AliasTarget::Subquery(sql) => (None, None, Some(sql)),
        };
        self.aliases.push(Alias {
            name,
            kind,
            metadata,
            table_path,
            subquery,
        });
        Ok(&self.aliases[self.aliases.len() - 1])
    }

    /// Find an alias by name, failing with `UnknownAlias`.
    pub fn find(&self, name: &str) -> QueryResult<&Alias> {
        self.get(name).ok_or_else(|| QueryError::unknown_alias(name))
    }

    /// Find an alias by name.
    pub fn get(&self, name: &str) -> Option<&Alias> {
        self.aliases.iter().find(|a| a.name == name)
    }

    /// Whether an alias with the name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The main alias: the first `From` alias.
    pub fn main(&self) -> QueryResult<&Alias> {
        self.aliases
            .iter()
            .find(|a| a.kind == AliasKind::From)
            .ok_or_else(QueryError::alias_not_set)
    }

    /// All aliases in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.iter()
    }

    /// Replace the main alias, keeping its position.
    pub(crate) fn replace_main(&mut self, alias: Alias) {
        match self.aliases.iter().position(|a| a.kind == AliasKind::From) {
            Some(index) => self.aliases[index] = alias,
            None => self.aliases.insert(0, alias),
        }
    }
}
