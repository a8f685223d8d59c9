//! Entity metadata consumed by the engine.
//!
//! Metadata is produced elsewhere (derive macros, schema files) and handed to
//! the engine as a read-only [`Schema`]. The engine only ever looks things up:
//! primary keys, relation descriptors with their ownership and join columns,
//! junction tables, default ordering and version/update-date columns.
//!
//! ```rust
//! use tessera_query::metadata::{ColumnMetadata, EntityMetadata, JunctionMetadata, RelationMetadata, Schema};
//!
//! let schema = Schema::builder()
//!     .entity(
//!         EntityMetadata::new("Post", "posts")
//!             .column(ColumnMetadata::primary("id"))
//!             .column(ColumnMetadata::new("title"))
//!             .relation(RelationMetadata::many_to_many("categories", "Category").junction(
//!                 JunctionMetadata::new("post_categories")
//!                     .owner_column("post_id", "id")
//!                     .inverse_column("category_id", "id"),
//!             )),
//!     )
//!     .entity(
//!         EntityMetadata::new("Category", "categories")
//!             .column(ColumnMetadata::primary("id"))
//!             .column(ColumnMetadata::new("name")),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert!(schema.entity("Post").unwrap().find_relation("categories").is_some());
//! ```

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{QueryError, QueryResult};
use crate::types::SortOrder;

/// Kind of relation between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// One-to-one relation (e.g., User has one Profile).
    OneToOne,
    /// One-to-many relation (e.g., User has many Posts).
    OneToMany,
    /// Many-to-one relation (e.g., Post belongs to User).
    ManyToOne,
    /// Many-to-many relation (e.g., Post has many Categories).
    ManyToMany,
}

impl RelationKind {
    /// Check if this relation yields multiple records.
    pub fn is_many(&self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// Check if this relation yields a single record.
    pub fn is_one(&self) -> bool {
        matches!(self, Self::OneToOne | Self::ManyToOne)
    }
}

/// A column mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Property path on the entity; dotted for embedded objects (`profile.bio`).
    pub property_path: String,
    /// Physical column name.
    pub database_name: String,
    /// Part of the primary key.
    pub primary: bool,
    /// Version column used by optimistic locking.
    pub version: bool,
    /// Update timestamp column used by optimistic locking.
    pub update_date: bool,
    /// Stored in the parent table of a class-table inheritance.
    pub inherited: bool,
}

impl ColumnMetadata {
    /// A column whose physical name equals its property name.
    pub fn new(property: impl Into<String>) -> Self {
        let property = property.into();
        Self::mapped(property.clone(), property.replace('.', "_"))
    }

    /// A column with an explicit physical name.
    pub fn mapped(property: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            property_path: property.into(),
            database_name: database_name.into(),
            primary: false,
            version: false,
            update_date: false,
            inherited: false,
        }
    }

    /// A primary key column.
    pub fn primary(property: impl Into<String>) -> Self {
        Self::new(property).primary_key()
    }

    /// Mark as part of the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Mark as the version column.
    pub fn version(mut self) -> Self {
        self.version = true;
        self
    }

    /// Mark as the update timestamp column.
    pub fn update_date(mut self) -> Self {
        self.update_date = true;
        self
    }

    /// Mark as stored in the parent table.
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }
}

/// A foreign key column pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinColumn {
    /// Column holding the key (on the owning table or the junction table).
    pub name: String,
    /// Column it references on the other table.
    pub referenced_column: String,
}

impl JoinColumn {
    /// Create a new join column pairing.
    pub fn new(name: impl Into<String>, referenced_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Junction table of a many-to-many relation, described from its owning side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionMetadata {
    /// Name of the junction table.
    pub table_name: String,
    /// Junction columns referencing the owning entity.
    pub owner_columns: Vec<JoinColumn>,
    /// Junction columns referencing the target entity.
    pub inverse_columns: Vec<JoinColumn>,
}

impl JunctionMetadata {
    /// Create a junction table descriptor.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            owner_columns: Vec::new(),
            inverse_columns: Vec::new(),
        }
    }

    /// Add a column referencing the owning entity.
    pub fn owner_column(mut self, name: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.owner_columns.push(JoinColumn::new(name, referenced));
        self
    }

    /// Add a column referencing the target entity.
    pub fn inverse_column(mut self, name: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.inverse_columns.push(JoinColumn::new(name, referenced));
        self
    }
}

/// A relation declared on an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMetadata {
    /// Property holding the related entity or entities.
    pub property_name: String,
    /// Kind of relation.
    pub kind: RelationKind,
    /// Name of the target entity.
    pub target: String,
    /// Foreign key columns on this entity's table (owning to-one sides).
    pub join_columns: Vec<JoinColumn>,
    /// Junction table (owning many-to-many sides).
    pub junction: Option<JunctionMetadata>,
    /// Property of the owning relation on the target (inverse sides).
    pub inverse_property: Option<String>,
}

impl RelationMetadata {
    fn new(property: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            property_name: property.into(),
            kind,
            target: target.into(),
            join_columns: Vec::new(),
            junction: None,
            inverse_property: None,
        }
    }

    /// A many-to-one relation; add its foreign key with [`join_column`](Self::join_column).
    pub fn many_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::ManyToOne, target)
    }

    /// A one-to-many relation, the inverse of `inverse_property` on the target.
    pub fn one_to_many(
        property: impl Into<String>,
        target: impl Into<String>,
        inverse_property: impl Into<String>,
    ) -> Self {
        Self::new(property, RelationKind::OneToMany, target).inverse_of(inverse_property)
    }

    /// A one-to-one relation; owning with join columns, inverse with `inverse_of`.
    pub fn one_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::OneToOne, target)
    }

    /// A many-to-many relation; owning with a junction, inverse with `inverse_of`.
    pub fn many_to_many(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::ManyToMany, target)
    }

    /// Add a foreign key column on this entity's table.
    pub fn join_column(mut self, name: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.join_columns.push(JoinColumn::new(name, referenced));
        self
    }

    /// Set the junction table.
    pub fn junction(mut self, junction: JunctionMetadata) -> Self {
        self.junction = Some(junction);
        self
    }

    /// Declare this relation as the inverse of `property` on the target.
    pub fn inverse_of(mut self, property: impl Into<String>) -> Self {
        self.inverse_property = Some(property.into());
        self
    }

    /// Whether this side physically holds the foreign key or defines the junction.
    pub fn is_owning(&self) -> bool {
        match self.kind {
            RelationKind::ManyToOne => true,
            RelationKind::OneToMany => false,
            RelationKind::OneToOne => !self.join_columns.is_empty(),
            RelationKind::ManyToMany => self.junction.is_some(),
        }
    }
}

/// Parent table of a class-table inheritance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentTable {
    /// Name of the parent table.
    pub table_name: String,
    /// Child primary key columns paired with parent primary key columns.
    pub join_columns: Vec<JoinColumn>,
}

impl ParentTable {
    /// Create a parent table descriptor.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            join_columns: Vec::new(),
        }
    }

    /// Pair a child key column with the parent key column.
    pub fn join_column(mut self, name: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.join_columns.push(JoinColumn::new(name, referenced));
        self
    }
}

/// A column as it appears in a SELECT list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    /// Physical column name.
    pub database_name: String,
    /// Property path, `None` for foreign keys without a declared column.
    pub property_path: Option<String>,
    /// Read from the parent table.
    pub inherited: bool,
}

/// Shape of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    /// Entity name.
    pub name: String,
    /// Physical table name.
    pub table_name: String,
    /// Mapped columns.
    pub columns: Vec<ColumnMetadata>,
    /// Declared relations.
    pub relations: Vec<Arc<RelationMetadata>>,
    /// Default ordering by property path.
    pub default_order: Vec<(String, SortOrder)>,
    /// Parent table for class-table inheritance.
    pub parent_table: Option<ParentTable>,
}

impl EntityMetadata {
    /// Create an entity mapped to a table.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            columns: Vec::new(),
            relations: Vec::new(),
            default_order: Vec::new(),
            parent_table: None,
        }
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a relation.
    pub fn relation(mut self, relation: RelationMetadata) -> Self {
        self.relations.push(Arc::new(relation));
        self
    }

    /// Add a default ordering key.
    pub fn order_by(mut self, property: impl Into<String>, order: SortOrder) -> Self {
        self.default_order.push((property.into(), order));
        self
    }

    /// Set the parent table.
    pub fn parent_table(mut self, parent: ParentTable) -> Self {
        self.parent_table = Some(parent);
        self
    }

    /// Primary key columns in declaration order.
    pub fn primary_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.primary)
    }

    /// Whether the primary key spans several columns.
    pub fn has_composite_key(&self) -> bool {
        self.primary_columns().count() > 1
    }

    /// Find a column by property path.
    pub fn column_by_property(&self, path: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.property_path == path)
    }

    /// Find a column by physical name.
    pub fn column_by_database_name(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.database_name == name)
    }

    /// Find a relation by property name.
    pub fn find_relation(&self, property: &str) -> Option<&Arc<RelationMetadata>> {
        self.relations.iter().find(|r| r.property_name == property)
    }

    /// The version column, if any.
    pub fn version_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.version)
    }

    /// The update timestamp column, if any.
    pub fn update_date_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.update_date)
    }

    /// Columns to select for this entity: declared columns followed by the
    /// foreign keys of owning to-one relations not declared as columns.
    pub fn select_columns(&self, include_inherited: bool) -> Vec<SelectColumn> {
        let mut out: Vec<SelectColumn> = self
            .columns
            .iter()
            .filter(|c| include_inherited || !c.inherited)
            .map(|c| SelectColumn {
                database_name: c.database_name.clone(),
                property_path: Some(c.property_path.clone()),
                inherited: c.inherited,
            })
            .collect();
        for relation in &self.relations {
            for jc in &relation.join_columns {
                if !out.iter().any(|c| c.database_name == jc.name) {
                    out.push(SelectColumn {
                        database_name: jc.name.clone(),
                        property_path: None,
                        inherited: false,
                    });
                }
            }
        }
        out
    }
}

impl EntityMetadata {
    /// Shorthand used by builders and tests.
    pub fn relation_named(&self, property: &str) -> QueryResult<&Arc<RelationMetadata>> {
        self.find_relation(property)
            .ok_or_else(|| QueryError::relation_not_found(&self.name, property))
    }
}

/// Read-only registry of entity metadata.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: IndexMap<String, Arc<EntityMetadata>>,
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Look up an entity by name.
    pub fn entity(&self, name: &str) -> QueryResult<&Arc<EntityMetadata>> {
        self.entities
            .get(name)
            .ok_or_else(|| QueryError::entity_not_found(name))
    }

    /// Whether an entity is registered under the name.
    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// All registered entities.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityMetadata>> {
        self.entities.values()
    }

    /// The relation that owns the foreign keys or junction for `relation`:
    /// the relation itself when owning, otherwise its counterpart on the target.
    pub fn owning_relation(
        &self,
        relation: &Arc<RelationMetadata>,
    ) -> QueryResult<Arc<RelationMetadata>> {
        if relation.is_owning() {
            return Ok(relation.clone());
        }
        let target = self.entity(&relation.target)?;
        let inverse = relation.inverse_property.as_deref().ok_or_else(|| {
            QueryError::invalid_metadata(
                &relation.target,
                format!("relation {} has no owning side", relation.property_name),
            )
        })?;
        Ok(target.relation_named(inverse)?.clone())
    }
}

/// Builder validating entity metadata into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityMetadata>,
}

impl SchemaBuilder {
    /// Register an entity.
    pub fn entity(mut self, entity: EntityMetadata) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate and build the schema.
    pub fn build(self) -> QueryResult<Schema> {
        let mut entities = IndexMap::new();
        for entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(QueryError::invalid_metadata(&entity.name, "declared twice"));
            }
            entities.insert(entity.name.clone(), Arc::new(entity));
        }
        let schema = Schema { entities };
        for entity in schema.entities.values() {
            validate_entity(&schema, entity)?;
        }
        Ok(schema)
    }
}

fn validate_entity(schema: &Schema, entity: &EntityMetadata) -> QueryResult<()> {
    if entity.primary_columns().next().is_none() {
        return Err(QueryError::invalid_metadata(&entity.name, "no primary column"));
    }
    for relation in &entity.relations {
        let target = schema.entity(&relation.target).map_err(|_| {
            QueryError::invalid_metadata(
                &entity.name,
                format!(
                    "relation {} targets unknown entity {}",
                    relation.property_name, relation.target
                ),
            )
        })?;
        let fail = |message: &str| {
            Err(QueryError::invalid_metadata(
                &entity.name,
                format!("relation {}: {}", relation.property_name, message),
            ))
        };
        match relation.kind {
            RelationKind::ManyToOne if relation.join_columns.is_empty() => {
                return fail("many-to-one relations need join columns");
            }
            RelationKind::ManyToMany => {
                if let Some(junction) = &relation.junction {
                    if junction.owner_columns.is_empty() || junction.inverse_columns.is_empty() {
                        return fail("junction needs owner and inverse columns");
                    }
                }
            }
            _ => {}
        }
        if !relation.is_owning() {
            let Some(inverse) = relation.inverse_property.as_deref() else {
                return fail("inverse relations must name the owning property");
            };
            let Some(owner) = target.find_relation(inverse) else {
                return fail("inverse property is not a relation on the target");
            };
            if !owner.is_owning() || owner.target != entity.name {
                return fail("inverse property must be an owning relation back to this entity");
            }
        }
    }
    Ok(())
}
