//! Entry point wiring metadata, a driver and configuration together.

use std::fmt;
use std::sync::Arc;

use crate::builder::{
    DeleteQueryBuilder, RelationQueryBuilder, SelectQueryBuilder, UpdateQueryBuilder,
};
use crate::config::EngineConfig;
use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::metadata::{EntityMetadata, Schema};
use crate::value::Row;

/// Notified after entities were hydrated.
///
/// Called once per successful entity-returning terminal call with the main
/// entity and the raw rows. Raw terminals and relation mutations never call
/// it. Implementations must not fail; anything they do is fire-and-forget.
pub trait LoadListener: Send + Sync {
    /// Entities of `entity` were loaded from `rows`.
    fn after_load(&self, entity: &EntityMetadata, rows: &[Row]);
}

/// Shared handle creating query builders.
///
/// Cloning is cheap; every part is reference counted.
///
/// ```rust,ignore
/// let source = DataSource::new(schema, driver);
/// let posts = source
///     .select("post")
///     .from("Post", "post")
///     .left_join_and_select("post.categories", "category")
///     .r#where("post.id = :id")
///     .set_parameter("id", 1)
///     .get_many()
///     .await?;
/// ```
#[derive(Clone)]
pub struct DataSource {
    schema: Arc<Schema>,
    driver: Arc<dyn Driver>,
    config: Arc<EngineConfig>,
    listener: Option<Arc<dyn LoadListener>>,
}

impl DataSource {
    /// Create a data source with the default configuration.
    pub fn new(schema: impl Into<Arc<Schema>>, driver: Arc<dyn Driver>) -> Self {
        Self {
            schema: schema.into(),
            driver,
            config: Arc::new(EngineConfig::default()),
            listener: None,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Install a load listener.
    pub fn with_listener(mut self, listener: Arc<dyn LoadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Entity metadata.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The driver.
    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dialect of the driver.
    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    pub(crate) fn listener(&self) -> Option<&dyn LoadListener> {
        self.listener.as_deref()
    }

    /// An empty select query builder.
    pub fn create_query_builder(&self) -> SelectQueryBuilder {
        SelectQueryBuilder::new(self.clone())
    }

    /// A select query builder starting with `selection`.
    pub fn select(&self, selection: impl Into<String>) -> SelectQueryBuilder {
        self.create_query_builder().select([selection.into()])
    }

    /// An UPDATE of an entity's table.
    pub fn update(&self, entity: &str) -> UpdateQueryBuilder {
        UpdateQueryBuilder::new(self.clone(), entity)
    }

    /// A DELETE from an entity's table.
    pub fn delete_from(&self, entity: &str) -> DeleteQueryBuilder {
        DeleteQueryBuilder::new(self.clone(), entity)
    }

    /// Relation mutations of `entity.property`.
    pub fn relation(&self, entity: &str, property: &str) -> RelationQueryBuilder {
        RelationQueryBuilder::new(self.clone(), entity, property)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("dialect", &self.driver.dialect().name)
            .field("entities", &self.schema.entities().count())
            .field("config", &self.config)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
