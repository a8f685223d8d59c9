//! Join requests.

use crate::builder::SelectQueryBuilder;
use crate::expression::{Cardinality, JoinDirection};

/// What a join binds.
#[derive(Debug, Clone)]
pub enum JoinTarget {
    /// A relation path, `parentAlias.property`.
    Relation(String),
    /// An entity by name.
    Entity(String),
    /// A plain table.
    Table(String),
    /// A sub-query.
    Subquery(Box<SelectQueryBuilder>),
}

/// A join to add to a select query.
///
/// ```rust,ignore
/// let spec = JoinSpec::relation("post.categories", "category")
///     .left()
///     .select()
///     .on("category.name <> :hidden");
/// ```
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub(crate) direction: JoinDirection,
    pub(crate) target: JoinTarget,
    pub(crate) alias: String,
    pub(crate) condition: Option<String>,
    pub(crate) select: bool,
    pub(crate) map_to: Option<(String, Cardinality)>,
}

impl JoinSpec {
    fn new(target: JoinTarget, alias: impl Into<String>) -> Self {
        Self {
            direction: JoinDirection::Inner,
            target,
            alias: alias.into(),
            condition: None,
            select: false,
            map_to: None,
        }
    }

    /// Join a relation of a registered alias.
    pub fn relation(path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(JoinTarget::Relation(path.into()), alias)
    }

    /// Join an entity; the condition is given with [`on`](Self::on).
    pub fn entity(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(JoinTarget::Entity(entity.into()), alias)
    }

    /// Join a table without metadata.
    pub fn table(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(JoinTarget::Table(table.into()), alias)
    }

    /// Join a derived table.
    pub fn subquery(subquery: SelectQueryBuilder, alias: impl Into<String>) -> Self {
        Self::new(JoinTarget::Subquery(Box::new(subquery)), alias)
    }

    /// Use `INNER JOIN` (the default).
    pub fn inner(mut self) -> Self {
        self.direction = JoinDirection::Inner;
        self
    }

    /// Use `LEFT JOIN`.
    pub fn left(mut self) -> Self {
        self.direction = JoinDirection::Left;
        self
    }

    /// Extra condition; ANDed to the relation condition.
    pub fn on(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Select the joined alias' columns.
    pub fn select(mut self) -> Self {
        self.select = true;
        self
    }

    /// Hydrate the joined entity into `alias.property` as a single value.
    pub fn map_one(mut self, map_to: impl Into<String>) -> Self {
        self.map_to = Some((map_to.into(), Cardinality::One));
        self.select = true;
        self
    }

    /// Hydrate the joined entities into `alias.property` as a list.
    pub fn map_many(mut self, map_to: impl Into<String>) -> Self {
        self.map_to = Some((map_to.into(), Cardinality::Many));
        self.select = true;
        self
    }
}
