//! The DELETE builder.

use crate::builder::{main_entity, push_where_in_ids};
use crate::data_source::DataSource;
use crate::driver::{self, Phase};
use crate::error::{QueryError, QueryResult};
use crate::expression::{PredicateKind, QueryExpression, QueryType};
use crate::sql::Renderer;
use crate::sql::params::bind_named;
use crate::value::Value;

/// Builds and runs DELETE statements against an entity's table.
#[derive(Debug)]
pub struct DeleteQueryBuilder {
    source: DataSource,
    expr: QueryExpression,
    error: Option<QueryError>,
}

impl DeleteQueryBuilder {
    pub(crate) fn new(source: DataSource, entity: &str) -> Self {
        let mut expr = QueryExpression::new(QueryType::Delete);
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
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if self.error.is_none() {
            if let Err(e) = push_where_in_ids(&mut self.expr, PredicateKind::And, ids) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Set a named parameter.
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.expr.parameters.insert(name.into(), value.into());
        self
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
