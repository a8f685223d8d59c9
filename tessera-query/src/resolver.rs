//! Join resolution.
//!
//! Relation paths (`post.categories`) are resolved once, when the join is
//! added, into a typed [`RelationPath`]. Rendering then turns each join into
//! one clause, or two for many-to-many relations, choosing the column pairing
//! from the kind and ownership of the relation.

use std::collections::HashSet;

use crate::alias::AliasRegistry;
use crate::error::{QueryError, QueryResult};
use crate::expression::{JoinAttribute, JoinDirection, JoinSource, RelationPath};
use crate::metadata::{EntityMetadata, JoinColumn, RelationKind, Schema};
use crate::sql::properties::{Substitution, parent_alias};

/// Resolve `parentAlias.property` against registered aliases and metadata.
pub fn resolve_relation_path(
    aliases: &AliasRegistry,
    schema: &Schema,
    path: &str,
) -> QueryResult<RelationPath> {
    let (parent_alias, property) = path.split_once('.').ok_or_else(|| {
        QueryError::invalid_query_shape(format!(
            "\"{}\" is not a relation path, expected alias.property",
            path
        ))
    })?;
    let parent = aliases.find(parent_alias)?.metadata()?.clone();
    let relation = parent.relation_named(property)?.clone();
    let target = schema.entity(&relation.target)?.clone();
    Ok(RelationPath {
        parent_alias: parent_alias.to_string(),
        property: property.to_string(),
        parent,
        relation,
        target,
    })
}

/// Column pairings `(left, right)` rendered as `left_alias.left = right_alias.right`.
type Pairs<'a> = Vec<(&'a str, &'a str)>;

fn pairs_condition(
    subst: &Substitution<'_>,
    left_alias: &str,
    right_alias: &str,
    pairs: &Pairs<'_>,
) -> String {
    pairs
        .iter()
        .map(|(left, right)| {
            format!(
                "{} = {}",
                subst.column(left_alias, left),
                subst.column(right_alias, right)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `(name, referenced)` pairs oriented as `(referenced, name)`.
fn referenced_first(columns: &[JoinColumn]) -> Pairs<'_> {
    columns
        .iter()
        .map(|jc| (jc.referenced_column.as_str(), jc.name.as_str()))
        .collect()
}

fn name_first(columns: &[JoinColumn]) -> Pairs<'_> {
    columns
        .iter()
        .map(|jc| (jc.name.as_str(), jc.referenced_column.as_str()))
        .collect()
}

fn with_extra(
    condition: String,
    extra: Option<&str>,
    subst: &Substitution<'_>,
) -> QueryResult<String> {
    Ok(match extra {
        Some(extra) => format!("{} AND ({})", condition, subst.replace(extra)?),
        None => condition,
    })
}

fn table_ref(subst: &Substitution<'_>, table: &str, alias: &str) -> String {
    format!("{} {}", subst.escape(table), subst.escape(alias))
}

/// Render the clauses of one join.
///
/// `junctions` collects junction aliases already emitted so that joining the
/// same many-to-many relation again reuses the existing junction join.
pub(crate) fn render_join(
    join: &JoinAttribute,
    subst: &Substitution<'_>,
    schema: &Schema,
    junctions: &mut HashSet<String>,
) -> QueryResult<Vec<String>> {
    let direction = join.direction.as_sql();
    let extra = join.condition.as_deref();
    let mut clauses = Vec::new();

    let path = match &join.source {
        JoinSource::Relation(path) => path,
        JoinSource::Entity(meta) => {
            let mut clause = format!("{} {}", direction, table_ref(subst, &meta.table_name, &join.alias));
            if let Some(extra) = extra {
                clause.push_str(&format!(" ON {}", subst.replace(extra)?));
            }
            clauses.push(clause);
            clauses.extend(parent_table_join(meta, &join.alias, join.direction, subst));
            return Ok(clauses);
        }
        JoinSource::Table(table) => {
            let mut clause = format!("{} {}", direction, table_ref(subst, table, &join.alias));
            if let Some(extra) = extra {
                clause.push_str(&format!(" ON {}", subst.replace(extra)?));
            }
            clauses.push(clause);
            return Ok(clauses);
        }
        JoinSource::Subquery(sql) => {
            let mut clause = format!("{} {} {}", direction, sql, subst.escape(&join.alias));
            if let Some(extra) = extra {
                clause.push_str(&format!(" ON {}", subst.replace(extra)?));
            }
            clauses.push(clause);
            return Ok(clauses);
        }
    };

    let relation = &path.relation;
    let target_table = table_ref(subst, &path.target.table_name, &join.alias);
    let parent = path.parent_alias.as_str();
    let dest = join.alias.as_str();

    match relation.kind {
        RelationKind::ManyToOne | RelationKind::OneToOne if !relation.join_columns.is_empty() => {
            let pairs = referenced_first(&relation.join_columns);
            let condition = pairs_condition(subst, dest, parent, &pairs);
            clauses.push(format!(
                "{} {} ON {}",
                direction,
                target_table,
                with_extra(condition, extra, subst)?
            ));
        }
        RelationKind::OneToMany | RelationKind::OneToOne => {
            let owner = schema.owning_relation(relation)?;
            let pairs = name_first(&owner.join_columns);
            let condition = pairs_condition(subst, dest, parent, &pairs);
            clauses.push(format!(
                "{} {} ON {}",
                direction,
                target_table,
                with_extra(condition, extra, subst)?
            ));
        }
        RelationKind::ManyToOne => {
            return Err(QueryError::invalid_metadata(
                &path.parent.name,
                format!("relation {} has no join columns", path.property),
            ));
        }
        RelationKind::ManyToMany => {
            let junction_alias = path.junction_alias();
            let owner = schema.owning_relation(relation)?;
            let junction = owner.junction.as_ref().ok_or_else(|| {
                QueryError::invalid_metadata(
                    &relation.target,
                    format!("relation {} has no junction table", owner.property_name),
                )
            })?;
            // parent side and destination side of the junction
            let (parent_side, dest_side) = if relation.is_owning() {
                (&junction.owner_columns, &junction.inverse_columns)
            } else {
                (&junction.inverse_columns, &junction.owner_columns)
            };
            if junctions.insert(junction_alias.clone()) {
                let condition =
                    pairs_condition(subst, &junction_alias, parent, &name_first(parent_side));
                clauses.push(format!(
                    "{} {} ON {}",
                    direction,
                    table_ref(subst, &junction.table_name, &junction_alias),
                    condition
                ));
            }
            let condition =
                pairs_condition(subst, dest, &junction_alias, &referenced_first(dest_side));
            clauses.push(format!(
                "{} {} ON {}",
                direction,
                target_table,
                with_extra(condition, extra, subst)?
            ));
        }
    }

    clauses.extend(parent_table_join(&path.target, dest, join.direction, subst));
    Ok(clauses)
}

/// Join of the parent table for an alias of an entity with inherited columns.
pub(crate) fn parent_table_join(
    entity: &EntityMetadata,
    alias: &str,
    direction: JoinDirection,
    subst: &Substitution<'_>,
) -> Option<String> {
    if !subst.parent_joins {
        return None;
    }
    let parent = entity.parent_table.as_ref()?;
    let parent_alias = parent_alias(alias);
    let pairs = referenced_first(&parent.join_columns);
    Some(format!(
        "{} {} ON {}",
        direction.as_sql(),
        table_ref(subst, &parent.table_name, &parent_alias),
        pairs_condition(subst, &parent_alias, alias, &pairs)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::alias::{AliasKind, AliasTarget};
    use crate::dialect::Dialect;
    use crate::expression::Cardinality;
    use crate::metadata::{ColumnMetadata, ParentTable};
    use crate::test_support::blog_schema;
    use pretty_assertions::assert_eq;

    static PG: Dialect = Dialect::postgres();

    fn subst(aliases: &AliasRegistry) -> Substitution<'_> {
        Substitution {
            aliases,
            dialect: &PG,
            escaping: true,
            alias_prefixing: true,
            parent_joins: true,
        }
    }

    fn registry(schema: &Schema, entity: &str, alias: &str) -> AliasRegistry {
        let mut aliases = AliasRegistry::new();
        aliases
            .create_alias(
                Some(alias),
                AliasKind::From,
                AliasTarget::Entity(schema.entity(entity).unwrap().clone()),
            )
            .unwrap();
        aliases
    }

    fn relation_join(path: RelationPath, alias: &str, condition: Option<&str>) -> JoinAttribute {
        JoinAttribute {
            direction: JoinDirection::Left,
            source: JoinSource::Relation(path),
            alias: alias.to_string(),
            condition: condition.map(str::to_string),
            selected: true,
            map_to: None,
            cardinality: Cardinality::One,
        }
    }

    #[test]
    fn test_unknown_parent_and_relation() {
        let schema = blog_schema();
        let aliases = registry(&schema, "Post", "post");
        assert!(resolve_relation_path(&aliases, &schema, "p.author").unwrap_err().is_unknown_alias());
        assert!(
            resolve_relation_path(&aliases, &schema, "post.tags")
                .unwrap_err()
                .is_relation_not_found()
        );
    }

    #[test]
    fn test_many_to_one_join() {
        let schema = blog_schema();
        let mut aliases = registry(&schema, "Post", "post");
        let path = resolve_relation_path(&aliases, &schema, "post.author").unwrap();
        aliases
            .create_alias(Some("author"), AliasKind::Join, AliasTarget::Entity(path.target.clone()))
            .unwrap();
        let clauses = render_join(
            &relation_join(path, "author", Some("author.name <> ''")),
            &subst(&aliases),
            &schema,
            &mut HashSet::new(),
        )
        .unwrap();
        assert_eq!(
            clauses,
            vec![
                "LEFT JOIN \"users\" \"author\" ON \"author\".\"id\" = \"post\".\"author_id\" AND (\"author\".\"name\" <> '')"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_one_to_many_join() {
        let schema = blog_schema();
        let aliases = registry(&schema, "User", "user");
        let path = resolve_relation_path(&aliases, &schema, "user.posts").unwrap();
        let clauses = render_join(
            &relation_join(path, "post", None),
            &subst(&aliases),
            &schema,
            &mut HashSet::new(),
        )
        .unwrap();
        assert_eq!(
            clauses,
            vec!["LEFT JOIN \"posts\" \"post\" ON \"post\".\"author_id\" = \"user\".\"id\"".to_string()]
        );
    }

    #[test]
    fn test_many_to_many_owning_and_inverse_pairing() {
        let schema = blog_schema();
        let aliases = registry(&schema, "Post", "post");
        let path = resolve_relation_path(&aliases, &schema, "post.categories").unwrap();
        let owning = render_join(
            &relation_join(path, "category", None),
            &subst(&aliases),
            &schema,
            &mut HashSet::new(),
        )
        .unwrap();
        assert_eq!(
            owning,
            vec![
                "LEFT JOIN \"post_categories\" \"post_categories\" ON \"post_categories\".\"post_id\" = \"post\".\"id\"".to_string(),
                "LEFT JOIN \"categories\" \"category\" ON \"category\".\"id\" = \"post_categories\".\"category_id\"".to_string(),
            ]
        );

        let aliases = registry(&schema, "Category", "category");
        let path = resolve_relation_path(&aliases, &schema, "category.posts").unwrap();
        let inverse = render_join(
            &relation_join(path, "post", None),
            &subst(&aliases),
            &schema,
            &mut HashSet::new(),
        )
        .unwrap();
        assert_eq!(
            inverse,
            vec![
                "LEFT JOIN \"post_categories\" \"category_posts\" ON \"category_posts\".\"category_id\" = \"category\".\"id\"".to_string(),
                "LEFT JOIN \"posts\" \"post\" ON \"post\".\"id\" = \"category_posts\".\"post_id\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_repeated_many_to_many_reuses_junction() {
        let schema = blog_schema();
        let aliases = registry(&schema, "Post", "post");
        let mut junctions = HashSet::new();
        let path = resolve_relation_path(&aliases, &schema, "post.categories").unwrap();
        let first = render_join(&relation_join(path.clone(), "c1", None), &subst(&aliases), &schema, &mut junctions)
            .unwrap();
        let second = render_join(&relation_join(path, "c2", None), &subst(&aliases), &schema, &mut junctions)
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(second[0].contains("\"c2\".\"id\" = \"post_categories\".\"category_id\""));
    }

    #[test]
    fn test_table_join_uses_condition_verbatim() {
        let schema = blog_schema();
        let mut aliases = registry(&schema, "Post", "post");
        aliases
            .create_alias(Some("a"), AliasKind::Join, AliasTarget::Table("audit".into()))
            .unwrap();
        let join = JoinAttribute {
            direction: JoinDirection::Inner,
            source: JoinSource::Table("audit".into()),
            alias: "a".into(),
            condition: Some("a.post_id = post.id".into()),
            selected: false,
            map_to: None,
            cardinality: Cardinality::Many,
        };
        let clauses = render_join(&join, &subst(&aliases), &schema, &mut HashSet::new()).unwrap();
        assert_eq!(
            clauses,
            vec!["INNER JOIN \"audit\" \"a\" ON a.post_id = \"post\".\"id\"".to_string()]
        );
    }

    #[test]
    fn test_parent_table_join() {
        let entity = EntityMetadata::new("Admin", "admins")
            .column(ColumnMetadata::primary("id"))
            .column(ColumnMetadata::new("name").inherited())
            .parent_table(ParentTable::new("users").join_column("id", "id"));
        let aliases = AliasRegistry::new();
        let mut s = subst(&aliases);
        assert_eq!(
            parent_table_join(&entity, "admin", JoinDirection::Left, &s).as_deref(),
            Some("LEFT JOIN \"users\" \"admin_parent\" ON \"admin_parent\".\"id\" = \"admin\".\"id\"")
        );
        s.parent_joins = false;
        assert_eq!(parent_table_join(&entity, "admin", JoinDirection::Left, &s), None);
    }
}
