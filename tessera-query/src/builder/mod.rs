//! Fluent query builders.
//!
//! Builder methods never fail. The first structural error (unknown alias,
//! missing relation, duplicate alias, ...) is recorded and returned by every
//! terminal call before anything is sent to the driver.

mod delete;
mod join;
mod relation;
mod select;
mod update;

pub use delete::DeleteQueryBuilder;
pub use join::{JoinSpec, JoinTarget};
pub use relation::RelationQueryBuilder;
pub use select::SelectQueryBuilder;
pub use update::UpdateQueryBuilder;

use std::sync::Arc;

use crate::alias::{AliasKind, AliasTarget};
use crate::error::{QueryError, QueryResult};
use crate::expression::{PredicateKind, QueryExpression};
use crate::metadata::{EntityMetadata, Schema};
use crate::value::Value;

/// Register the main alias of a mutation.
fn main_entity(
    expr: &mut QueryExpression,
    schema: &Schema,
    entity: &str,
) -> QueryResult<Arc<EntityMetadata>> {
    let meta = schema.entity(entity)?.clone();
    expr.aliases
        .create_alias(None, AliasKind::From, AliasTarget::Entity(meta.clone()))?;
    Ok(meta)
}

/// Name for a generated parameter, unique within the expression.
fn generated_parameter(expr: &QueryExpression, prefix: &str) -> String {
    let mut index = expr.parameters.len();
    loop {
        let name = format!("{}_{}", prefix, index);
        if !expr.parameters.contains_key(&name) {
            return name;
        }
        index += 1;
    }
}

/// Append `pk IN (ids)` for the main alias, or an OR of key matches for
/// composite keys given as JSON objects keyed by property.
fn push_where_in_ids(
    expr: &mut QueryExpression,
    kind: PredicateKind,
    ids: Vec<Value>,
) -> QueryResult<()> {
    let main = expr.aliases.main()?;
    let meta = main.metadata()?.clone();
    let alias = main.name.clone();
    let primary: Vec<String> = meta
        .primary_columns()
        .map(|c| c.property_path.clone())
        .collect();

    if ids.is_empty() {
        expr.push_where(kind, "1 = 0");
        return Ok(());
    }

    if let [property] = primary.as_slice() {
        let ids = ids
            .into_iter()
            .map(|id| match id {
                Value::Json(serde_json::Value::Object(map)) => map
                    .get(property)
                    .map(Value::from_json)
                    .ok_or_else(|| missing_key_part(&meta.name, property)),
                other => Ok(other),
            })
            .collect::<QueryResult<Vec<_>>>()?;
        let name = generated_parameter(expr, "tessera_ids");
        expr.push_where(kind, format!("{}.{} IN (:...{})", alias, property, name));
        expr.parameters.insert(name, Value::List(ids));
        return Ok(());
    }

    let mut alternatives = Vec::with_capacity(ids.len());
    for id in ids {
        let Value::Json(serde_json::Value::Object(map)) = id else {
            return Err(QueryError::invalid_query_shape(format!(
                "{} has a composite primary key, ids must be objects keyed by property",
                meta.name
            )));
        };
        let mut parts = Vec::with_capacity(primary.len());
        for property in &primary {
            let value = map
                .get(property)
                .ok_or_else(|| missing_key_part(&meta.name, property))?;
            let name = generated_parameter(expr, "tessera_ids");
            parts.push(format!("{}.{} = :{}", alias, property, name));
            expr.parameters.insert(name, Value::from_json(value));
        }
        alternatives.push(format!("({})", parts.join(" AND ")));
    }
    expr.push_where(kind, format!("({})", alternatives.join(" OR ")));
    Ok(())
}

fn missing_key_part(entity: &str, property: &str) -> QueryError {
    QueryError::invalid_query_shape(format!("id of {} is missing key property {}", entity, property))
        .with_entity(entity)
}
