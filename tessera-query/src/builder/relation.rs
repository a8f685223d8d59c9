//! Relation mutations.
//!
//! Changes which entities a relation points at without loading them: to-one
//! relations are `set`, to-many relations get ids `add`ed and `remove`d.
//! Foreign keys are written with UPDATE statements, junction rows with
//! INSERT and DELETE. Statements run on the driver as they are; wrapping them
//! in a transaction is up to the caller.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::builder::missing_key_part;
use crate::data_source::DataSource;
use crate::driver::{self, Phase};
use crate::error::{QueryError, QueryResult};
use crate::metadata::{EntityMetadata, JoinColumn, RelationKind, RelationMetadata};
use crate::sql::params::bind_named;
use crate::value::Value;

/// Mutates one relation of the entities selected with [`of`](Self::of).
///
/// ```rust,ignore
/// source.relation("Post", "categories").of([1]).add([3, 4]).await?;
/// source.relation("Post", "author").of([1]).set(7).await?;
/// ```
#[derive(Debug, Clone)]
pub struct RelationQueryBuilder {
    source: DataSource,
    entity: Option<Arc<EntityMetadata>>,
    relation: Option<Arc<RelationMetadata>>,
    of: Vec<Value>,
    error: Option<Arc<QueryError>>,
}

impl RelationQueryBuilder {
    pub(crate) fn new(source: DataSource, entity: &str, property: &str) -> Self {
        let resolved = source.schema().entity(entity).and_then(|meta| {
            let relation = meta.relation_named(property)?.clone();
            Ok((meta.clone(), relation))
        });
        let (entity, relation, error) = match resolved {
            Ok((entity, relation)) => (Some(entity), Some(relation), None),
            Err(e) => (None, None, Some(Arc::new(e))),
        };
        Self {
            source,
            entity,
            relation,
            of: Vec::new(),
            error,
        }
    }

    /// Entities whose relation is changed, by primary key.
    ///
    /// Composite keys are given as JSON objects keyed by property.
    pub fn of<I, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.of = ids.into_iter().map(Into::into).collect();
        self
    }

    fn parts(&self) -> QueryResult<(&Arc<EntityMetadata>, &Arc<RelationMetadata>)> {
        if let Some(e) = &self.error {
            return Err(e.detached());
        }
        let (Some(entity), Some(relation)) = (&self.entity, &self.relation) else {
            return Err(QueryError::internal("relation builder without metadata"));
        };
        if self.of.is_empty() {
            return Err(QueryError::invalid_query_shape(
                "of() must name at least one entity before mutating a relation",
            )
            .with_relation(&relation.property_name));
        }
        Ok((entity, relation))
    }

    fn single_of(&self, relation: &RelationMetadata) -> QueryResult<&Value> {
        match self.of.as_slice() {
            [one] => Ok(one),
            _ => Err(QueryError::invalid_query_shape(format!(
                "relation {} can only be changed for one entity at a time",
                relation.property_name
            ))
            .with_relation(&relation.property_name)),
        }
    }

    fn target(&self, relation: &RelationMetadata) -> QueryResult<Arc<EntityMetadata>> {
        Ok(self.source.schema().entity(&relation.target)?.clone())
    }

    /// Point a to-one relation at `value`, or clear it with `Value::Null`.
    pub async fn set(&self, value: impl Into<Value>) -> QueryResult<u64> {
        let value = value.into();
        let (entity, relation) = self.parts()?;
        if relation.kind.is_many() {
            return Err(QueryError::invalid_query_shape(format!(
                "set() only applies to to-one relations, use add() and remove() for {}",
                relation.property_name
            ))
            .with_relation(&relation.property_name));
        }
        let target = self.target(relation)?;

        if relation.is_owning() {
            let mut update = self.source.update(&entity.name);
            for jc in &relation.join_columns {
                let part = if value.is_null() {
                    Value::Null
                } else {
                    key_part(&target, &value, &jc.referenced_column)?
                };
                update = update.set(&fk_path(relation, jc), part);
            }
            debug!(entity = %entity.name, relation = %relation.property_name, "setting relation");
            return update.where_in_ids(self.of.clone()).execute().await;
        }

        // inverse one-to-one: the key lives on the target
        let of = self.single_of(relation)?;
        let owner = self.source.schema().owning_relation(relation)?;
        let mut detach = self.source.update(&target.name);
        for (i, jc) in owner.join_columns.iter().enumerate() {
            let name = format!("rel_of_{}", i);
            detach = detach
                .set(&fk_path(&owner, jc), Value::Null)
                .and_where(format!("{}.{} = :{}", target.name, fk_path(&owner, jc), name))
                .set_parameter(name, key_part(entity, of, &jc.referenced_column)?);
        }
        let mut affected = detach.execute().await?;

        if !value.is_null() {
            let mut attach = self.source.update(&target.name);
            for jc in &owner.join_columns {
                attach = attach.set(&fk_path(&owner, jc), key_part(entity, of, &jc.referenced_column)?);
            }
            affected += attach.where_in_ids([value]).execute().await?;
        }
        Ok(affected)
    }

    /// Add entities to a to-many relation.
    pub async fn add<I, V>(&self, ids: I) -> QueryResult<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let (entity, relation) = self.parts()?;
        if ids.is_empty() {
            return Ok(0);
        }
        match relation.kind {
            RelationKind::OneToMany => {
                let of = self.single_of(relation)?;
                let target = self.target(relation)?;
                let owner = self.source.schema().owning_relation(relation)?;
                let mut update = self.source.update(&target.name);
                for jc in &owner.join_columns {
                    update = update.set(&fk_path(&owner, jc), key_part(entity, of, &jc.referenced_column)?);
                }
                update.where_in_ids(ids).execute().await
            }
            RelationKind::ManyToMany => {
                let (table, columns, rows) = self.junction_rows(entity, relation, &ids)?;
                let mut parameters = IndexMap::new();
                let mut tuples = Vec::with_capacity(rows.len());
                for (i, row) in rows.into_iter().enumerate() {
                    let mut names = Vec::with_capacity(row.len());
                    for (j, value) in row.into_iter().enumerate() {
                        let name = format!("rel_{}_{}", i, j);
                        names.push(format!(":{}", name));
                        parameters.insert(name, value);
                    }
                    tuples.push(format!("({})", names.join(", ")));
                }
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    table,
                    columns.join(", "),
                    tuples.join(", ")
                );
                self.run(sql, &parameters).await
            }
            _ => Err(to_many_only(relation)),
        }
    }

    /// Remove entities from a to-many relation.
    pub async fn remove<I, V>(&self, ids: I) -> QueryResult<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let (entity, relation) = self.parts()?;
        if ids.is_empty() {
            return Ok(0);
        }
        match relation.kind {
            RelationKind::OneToMany => {
                let of = self.single_of(relation)?;
                let target = self.target(relation)?;
                let owner = self.source.schema().owning_relation(relation)?;
                let mut update = self.source.update(&target.name).where_in_ids(ids);
                for (i, jc) in owner.join_columns.iter().enumerate() {
                    let name = format!("rel_of_{}", i);
                    update = update
                        .set(&fk_path(&owner, jc), Value::Null)
                        .and_where(format!("{}.{} = :{}", target.name, fk_path(&owner, jc), name))
                        .set_parameter(name, key_part(entity, of, &jc.referenced_column)?);
                }
                update.execute().await
            }
            RelationKind::ManyToMany => {
                let (table, columns, rows) = self.junction_rows(entity, relation, &ids)?;
                let mut parameters = IndexMap::new();
                let mut alternatives = Vec::with_capacity(rows.len());
                for (i, row) in rows.into_iter().enumerate() {
                    let mut parts = Vec::with_capacity(row.len());
                    for (j, value) in row.into_iter().enumerate() {
                        let name = format!("rel_{}_{}", i, j);
                        parts.push(format!("{} = :{}", columns[j], name));
                        parameters.insert(name, value);
                    }
                    alternatives.push(format!("({})", parts.join(" AND ")));
                }
                let sql = format!("DELETE FROM {} WHERE {}", table, alternatives.join(" OR "));
                self.run(sql, &parameters).await
            }
            _ => Err(to_many_only(relation)),
        }
    }

    /// Remove `removed`, then add `added`.
    pub async fn add_and_remove<A, R, V, W>(&self, added: A, removed: R) -> QueryResult<u64>
    where
        A: IntoIterator<Item = V>,
        V: Into<Value>,
        R: IntoIterator<Item = W>,
        W: Into<Value>,
    {
        let removed = self.remove(removed).await?;
        let added = self.add(added).await?;
        Ok(removed + added)
    }

    /// Escaped junction table, escaped columns in owner-then-inverse order,
    /// and one value row per `(of, id)` pair.
    #[allow(clippy::type_complexity)]
    fn junction_rows(
        &self,
        entity: &Arc<EntityMetadata>,
        relation: &Arc<RelationMetadata>,
        ids: &[Value],
    ) -> QueryResult<(String, Vec<String>, Vec<Vec<Value>>)> {
        let target = self.target(relation)?;
        let owner = self.source.schema().owning_relation(relation)?;
        let junction = owner.junction.as_ref().ok_or_else(|| {
            QueryError::invalid_metadata(
                &relation.target,
                format!("relation {} has no junction table", owner.property_name),
            )
        })?;

        // owner columns reference the owning entity
        let (owner_entity, owner_ids, inverse_entity, inverse_ids) = if relation.is_owning() {
            (entity.as_ref(), self.of.as_slice(), target.as_ref(), ids)
        } else {
            (target.as_ref(), ids, entity.as_ref(), self.of.as_slice())
        };

        let mut rows = Vec::with_capacity(owner_ids.len() * inverse_ids.len());
        for owner_id in owner_ids {
            for inverse_id in inverse_ids {
                let mut row = Vec::new();
                for jc in &junction.owner_columns {
                    row.push(key_part(owner_entity, owner_id, &jc.referenced_column)?);
                }
                for jc in &junction.inverse_columns {
                    row.push(key_part(inverse_entity, inverse_id, &jc.referenced_column)?);
                }
                rows.push(row);
            }
        }

        let columns = junction
            .owner_columns
            .iter()
            .chain(&junction.inverse_columns)
            .map(|jc| self.escape(&jc.name))
            .collect();
        Ok((self.escape(&junction.table_name), columns, rows))
    }

    fn escape(&self, name: &str) -> String {
        if self.source.config().escape_identifiers {
            self.source.dialect().escape(name)
        } else {
            name.to_string()
        }
    }

    async fn run(&self, sql: String, parameters: &IndexMap<String, Value>) -> QueryResult<u64> {
        let (sql, params) = bind_named(&sql, parameters, &self.source.dialect())?;
        driver::execute(self.source.driver(), Phase::Mutation, sql, params).await
    }
}

/// Property path of a foreign key column, `relation.referenced`.
fn fk_path(relation: &RelationMetadata, jc: &JoinColumn) -> String {
    format!("{}.{}", relation.property_name, jc.referenced_column)
}

/// The value of `column` within an id of `entity`.
fn key_part(entity: &EntityMetadata, id: &Value, column: &str) -> QueryResult<Value> {
    match id {
        Value::Json(JsonValue::Object(map)) => {
            let property = entity
                .column_by_database_name(column)
                .map_or(column, |c| c.property_path.as_str());
            map.get(property)
                .or_else(|| map.get(column))
                .map(Value::from_json)
                .ok_or_else(|| missing_key_part(&entity.name, property))
        }
        other if !entity.has_composite_key() => Ok(other.clone()),
        _ => Err(QueryError::invalid_query_shape(format!(
            "{} has a composite primary key, ids must be objects keyed by property",
            entity.name
        ))
        .with_entity(&entity.name)),
    }
}

fn to_many_only(relation: &RelationMetadata) -> QueryError {
    QueryError::invalid_query_shape(format!(
        "add() and remove() only apply to to-many relations, use set() for {}",
        relation.property_name
    ))
    .with_relation(&relation.property_name)
}

#[cfg(test)]
mod tests {
    use crate::data_source::DataSource;
    use crate::dialect::Dialect;
    use crate::error::ErrorCode;
    use crate::test_support::{MockDriver, blog_schema};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn source(driver: std::sync::Arc<MockDriver>) -> DataSource {
        DataSource::new(blog_schema(), driver)
    }

    #[tokio::test]
    async fn test_set_many_to_one() {
        let driver = MockDriver::new(Dialect::sqlite()).shared();
        let relation = source(driver.clone()).relation("Post", "author").of([1]);
        relation.set(5).await.unwrap();
        relation.set(Value::Null).await.unwrap();
        let statements = driver.statements();
        assert_eq!(
            statements[0],
            "UPDATE \"posts\" SET \"author_id\" = ?, \"version\" = \"version\" + 1, \
             \"updated_at\" = CURRENT_TIMESTAMP WHERE \"id\" IN (?)"
        );
        assert_eq!(driver.params(0), vec![Value::Int(5), Value::Int(1)]);
        assert_eq!(driver.params(1), vec![Value::Null, Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_junction_rows_follow_ownership() {
        let driver = MockDriver::new(Dialect::sqlite()).shared();
        let source = source(driver.clone());
        source
            .relation("Post", "categories")
            .of([1])
            .add([3, 4])
            .await
            .unwrap();
        source
            .relation("Category", "posts")
            .of([3])
            .remove([1])
            .await
            .unwrap();
        let statements = driver.statements();
        assert_eq!(
            statements[0],
            "INSERT INTO \"post_categories\" (\"post_id\", \"category_id\") VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            driver.params(0),
            vec![Value::Int(1), Value::Int(3), Value::Int(1), Value::Int(4)]
        );
        assert_eq!(
            statements[1],
            "DELETE FROM \"post_categories\" WHERE (\"post_id\" = ? AND \"category_id\" = ?)"
        );
        assert_eq!(driver.params(1), vec![Value::Int(1), Value::Int(3)]);
    }

    #[tokio::test]
    async fn test_one_to_many_updates_target_keys() {
        let driver = MockDriver::new(Dialect::postgres()).shared();
        let relation = source(driver.clone()).relation("User", "posts").of([7]);
        relation.add_and_remove([1, 2], [3]).await.unwrap();
        let statements = driver.statements();
        assert_eq!(
            statements[0],
            "UPDATE \"posts\" SET \"author_id\" = $1, \"version\" = \"version\" + 1, \
             \"updated_at\" = CURRENT_TIMESTAMP WHERE \"id\" IN ($2) AND \"author_id\" = $3"
        );
        assert_eq!(driver.params(0), vec![Value::Null, Value::Int(3), Value::Int(7)]);
        assert_eq!(
            statements[1],
            "UPDATE \"posts\" SET \"author_id\" = $1, \"version\" = \"version\" + 1, \
             \"updated_at\" = CURRENT_TIMESTAMP WHERE \"id\" IN ($2, $3)"
        );
        assert_eq!(driver.params(1), vec![Value::Int(7), Value::Int(1), Value::Int(2)]);
    }

    #[tokio::test]
    async fn test_misuse_is_rejected_before_driver() {
        let driver = MockDriver::new(Dialect::sqlite()).shared();
        let source = source(driver.clone());

        let err = source.relation("Post", "categories").of([1]).set(2).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryShape);

        let err = source.relation("Post", "author").of([1]).add([2]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryShape);

        let err = source.relation("Post", "categories").add([2]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryShape);

        let err = source.relation("User", "posts").of([1, 2]).add([3]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryShape);

        let err = source.relation("Post", "tags").of([1]).add([2]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RelationNotFound);

        assert!(driver.statements().is_empty());
    }
}
