//! The UPDATE builder.

use indexmap::IndexMap;

use crate::builder::{main_entity, push_where_in_ids};
use crate::data_source::DataSource;
use crate::driver::{self, Phase};
use crate::error::{QueryError, QueryResult};
use crate::expression::{PredicateKind, QueryExpression, QueryType, SetValue};
use crate::sql::Renderer;
use crate::sql::params::bind_named;
use crate::value::Value;

/// Builds and runs UPDATE statements against an entity's table.
///
/// Version and update date columns are maintained automatically unless set
/// explicitly.
///
/// ```rust,ignore
/// let affected = source
///     .update("Post")
///     .set("title", "Renamed")
///     .r#where("Post.id = :id")
///     .set_parameter("id", 1)
///     .execute()
///     .await?;
/// ```
#[derive(Debug)]
pub struct UpdateQueryBuilder {
    source: DataSource,
    expr: QueryExpression,
    error: Option<QueryError>,
}

impl UpdateQueryBuilder {
    pub(crate) fn new(source: DataSource, entity: &str) -> Self {
        let mut expr = QueryExpression::new(QueryType::Update);
        let error = main_entity(&mut expr, source.schema(), entity).err();
        Self {
            source,
            expr,
            error,
        }
    }

    /// The accumulated expression.
    pub fn expression(&self) -> &QueryExpression {
        &self.expr
    }

    /// The first error recorded while building, if any.
    pub fn build_error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    fn apply(mut self, step: impl FnOnce(&mut Self) -> QueryResult<()>) -> Self {
        if self.error.is_none() {
            if let Err(e) = step(&mut self) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Assign a bound value to a property, a relation (its foreign key) or a column.
    pub fn set(mut self, property: &str, value: impl Into<Value>) -> Self {
        let name = format!("upd_{}", property.replace('.', "_"));
        self.expr
            .sets
            .insert(property.to_string(), SetValue::Param(name.clone()));
        self.expr.parameters.insert(name, value.into());
        self
    }

    /// Assign several bound values.
    pub fn set_values<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (property, value) in values {
            self = self.set(property.as_ref(), value);
        }
        self
    }

    /// Assign a raw SQL expression.
    pub fn set_raw(mut self, property: &str, expression: impl Into<String>) -> Self {
        self.expr
            .sets
            .insert(property.to_string(), SetValue::Raw(expression.into()));
        self
    }

    /// Replace the WHERE clause.
    pub fn r#where(mut self, condition: impl Into<String>) -> Self {
        self.expr.wheres.clear();
        self.expr.push_where(PredicateKind::Simple, condition);
        self
    }

    /// Add a condition with `AND`.
    pub fn and_where(mut self, condition: impl Into<String>) -> Self {
        self.expr.push_where(PredicateKind::And, condition);
        self
    }

    /// Add a condition with `OR`.
    pub fn or_where(mut self, condition: impl Into<String>) -> Self {
        self.expr.push_where(PredicateKind::Or, condition);
        self
    }

    /// Restrict to primary keys, replacing the WHERE clause.
    pub fn where_in_ids<I, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.expr.wheres.clear();
        self.and_where_in_ids(ids)
    }

    /// Add a primary key restriction with `AND`.
    pub fn and_where_in_ids<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        self.apply(move |qb| push_where_in_ids(&mut qb.expr, PredicateKind::And, ids))
    }

    /// Set a named parameter.
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.expr.parameters.insert(name.into(), value.into());
        self
    }

    /// Named parameters set so far.
    pub fn parameters(&self) -> &IndexMap<String, Value> {
        &self.expr.parameters
    }

    /// SQL text with named parameters intact.
    pub fn get_query(&self) -> QueryResult<String> {
        if let Some(e) = &self.error {
            return Err(e.detached());
        }
        let dialect = self.source.dialect();
        Renderer::new(
            &self.expr,
            self.source.schema(),
            &dialect,
            self.source.config().escape_identifiers,
        )
        .render()
    }

    /// SQL text with positional placeholders and the bound values.
    pub fn get_sql_and_parameters(&self) -> QueryResult<(String, Vec<Value>)> {
        let sql = self.get_query()?;
        bind_named(&sql, &self.expr.parameters, &self.source.dialect())
    }

    /// Run the statement, returning the number of affected rows.
    pub async fn execute(&self) -> QueryResult<u64> {
        let (sql, params) = self.get_sql_and_parameters()?;
        driver::execute(self.source.driver(), Phase::Mutation, sql, params).await
    }
}

#[cfg(test)]
mod tests {
    use crate::data_source::DataSource;
    use crate::dialect::Dialect;
    use crate::error::ErrorCode;
    use crate::test_support::{MockDriver, blog_schema};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_update_by_ids() {
        let driver = MockDriver::new(Dialect::postgres()).shared();
        let source = DataSource::new(blog_schema(), driver.clone());
        let affected = source
            .update("Post")
            .set("title", "Renamed")
            .set("author", 3)
            .where_in_ids([1, 2])
            .execute()
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(
            driver.statements()[0],
            "UPDATE \"posts\" SET \"title\" = $1, \"author_id\" = $2, \"version\" = \"version\" + 1, \
             \"updated_at\" = CURRENT_TIMESTAMP WHERE \"id\" IN ($3, $4)"
        );
        assert_eq!(
            driver.params(0),
            vec![Value::from("Renamed"), Value::Int(3), Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn test_raw_values_and_plain_columns() {
        let driver = MockDriver::new(Dialect::mysql()).shared();
        let source = DataSource::new(blog_schema(), driver);
        let (sql, params) = source
            .update("Comment")
            .set_raw("body", "UPPER(body)")
            .r#where("post_id = :post")
            .set_parameter("post", 9)
            .get_sql_and_parameters()
            .unwrap();
        assert_eq!(sql, "UPDATE `comments` SET `body` = UPPER(body) WHERE post_id = ?");
        assert_eq!(params, vec![Value::Int(9)]);
    }

    #[tokio::test]
    async fn test_errors_surface_before_driver() {
        let driver = MockDriver::new(Dialect::postgres()).shared();
        let source = DataSource::new(blog_schema(), driver.clone());
        let err = source.update("Nope").set("a", 1).execute().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EntityNotFound);

        let err = source.update("Post").execute().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQueryShape);

        let err = source
            .update("Post")
            .set("title", "x")
            .r#where("id = :id")
            .execute()
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingParameter);
        assert!(driver.statements().is_empty());
    }
}
