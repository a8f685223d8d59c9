//! Property path substitution in user fragments.
//!
//! Predicates, orderings and conditions are written against entity
//! properties (`post.title`, `post.author`, `user.profile.bio`). Before a
//! fragment is emitted every dotted path whose first segment is an alias with
//! metadata is rewritten to the escaped physical column. A path naming an
//! alias that was never registered fails the build. Quoted text is left
//! alone, so already escaped identifiers are never substituted twice.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::alias::AliasRegistry;
use crate::dialect::Dialect;
use crate::error::QueryResult;
use crate::metadata::EntityMetadata;
use crate::sql::params::{Segment, segments};

static PROPERTY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)+")
        .expect("property path pattern is valid")
});

/// Rendering context for substitution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Substitution<'a> {
    pub aliases: &'a AliasRegistry,
    pub dialect: &'a Dialect,
    pub escaping: bool,
    /// Prefix columns with their alias; off for UPDATE and DELETE.
    pub alias_prefixing: bool,
    /// Inherited columns are read through `{alias}_parent`.
    pub parent_joins: bool,
}

impl Substitution<'_> {
    /// Escape an identifier when escaping is enabled.
    pub fn escape(&self, name: &str) -> String {
        if self.escaping {
            self.dialect.escape(name)
        } else {
            name.to_string()
        }
    }

    /// Qualified column reference.
    pub fn column(&self, alias: &str, column: &str) -> String {
        if self.alias_prefixing {
            format!("{}.{}", self.escape(alias), self.escape(column))
        } else {
            self.escape(column)
        }
    }

    /// Rewrite property paths in a fragment.
    ///
    /// Fails with `UnknownAlias` when a dotted path outside quotes starts
    /// with a name that is not a registered alias.
    pub fn replace(&self, text: &str) -> QueryResult<String> {
        let mut out = String::with_capacity(text.len());
        for segment in segments(text, self.dialect) {
            match segment {
                Segment::Quoted(quoted) => out.push_str(quoted),
                Segment::Code(code) => self.replace_code(code, &mut out)?,
            }
        }
        Ok(out)
    }

    fn replace_code(&self, code: &str, out: &mut String) -> QueryResult<()> {
        let mut last = 0;
        for m in PROPERTY_PATH.find_iter(code) {
            out.push_str(&code[last..m.start()]);
            last = m.end();
            let matched = m.as_str();
            // parameters (`:post.id`) and numbers (`1.5e.x`) are not paths
            let preceded = code[..m.start()].chars().next_back();
            if matches!(preceded, Some(':' | '.' | '@' | '$'))
                || preceded.is_some_and(|c| c.is_ascii_alphanumeric())
            {
                out.push_str(matched);
                continue;
            }
            // qualified function names such as `pg_catalog.now()`
            if code[m.end()..].trim_start().starts_with('(') {
                out.push_str(matched);
                continue;
            }
            out.push_str(&self.substitute(matched)?);
        }
        out.push_str(&code[last..]);
        Ok(())
    }

    /// Substitute one dotted path whose first segment must be an alias.
    fn substitute(&self, path: &str) -> QueryResult<String> {
        if let Some((alias_name, _)) = path.split_once('.') {
            self.aliases.find(alias_name)?;
        }
        Ok(self.resolve(path).unwrap_or_else(|| path.to_string()))
    }

    /// Resolve one dotted path, `None` when it is not a known property.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let (alias_name, property) = path.split_once('.')?;
        let alias = self.aliases.get(alias_name)?;
        let metadata = alias.metadata.as_deref()?;
        let (column, inherited) = resolve_property(metadata, property)?;
        let alias_name = if inherited && self.parent_joins {
            parent_alias(alias_name)
        } else {
            alias_name.to_string()
        };
        Some(self.column(&alias_name, &column))
    }
}

/// Alias under which the parent table of `alias` is joined.
pub(crate) fn parent_alias(alias: &str) -> String {
    format!("{}_parent", alias)
}

/// Physical column of a property path and whether it is inherited.
///
/// Plain and embedded columns resolve directly. An owning to-one relation
/// resolves to its foreign key, either as `author` (single-column keys) or as
/// `author.id` naming the referenced property.
pub(crate) fn resolve_property(entity: &EntityMetadata, property: &str) -> Option<(String, bool)> {
    if let Some(column) = entity.column_by_property(property) {
        return Some((column.database_name.clone(), column.inherited));
    }
    let (relation_name, referenced) = match property.split_once('.') {
        Some((relation, rest)) => (relation, Some(rest)),
        None => (property, None),
    };
    let relation = entity.find_relation(relation_name)?;
    if !relation.kind.is_one() || relation.join_columns.is_empty() {
        return None;
    }
    match referenced {
        None if relation.join_columns.len() == 1 => {
            Some((relation.join_columns[0].name.clone(), false))
        }
        None => None,
        Some(referenced) => relation
            .join_columns
            .iter()
            .find(|jc| jc.referenced_column == referenced.replace('.', "_"))
            .map(|jc| (jc.name.clone(), false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::alias::{AliasKind, AliasTarget};
    use crate::error::ErrorCode;
    use crate::metadata::{ColumnMetadata, RelationMetadata};
    use pretty_assertions::assert_eq;

    fn registry() -> AliasRegistry {
        let post = EntityMetadata::new("Post", "posts")
            .column(ColumnMetadata::primary("id"))
            .column(ColumnMetadata::mapped("title", "post_title"))
            .column(ColumnMetadata::new("stats.views"))
            .column(ColumnMetadata::mapped("createdAt", "created_at").inherited())
            .relation(RelationMetadata::many_to_one("author", "User").join_column("author_id", "id"));
        let mut aliases = AliasRegistry::new();
        aliases
            .create_alias(Some("post"), AliasKind::From, AliasTarget::Entity(Arc::new(post)))
            .unwrap();
        aliases
    }

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

    #[test]
    fn test_simple_and_embedded_columns() {
        let aliases = registry();
        let s = subst(&aliases);
        assert_eq!(
            s.replace("post.title = :t AND post.stats.views > 3").unwrap(),
            "\"post\".\"post_title\" = :t AND \"post\".\"stats_views\" > 3"
        );
    }

    #[test]
    fn test_relation_paths_map_to_foreign_key() {
        let aliases = registry();
        let s = subst(&aliases);
        assert_eq!(s.replace("post.author = 1").unwrap(), "\"post\".\"author_id\" = 1");
        assert_eq!(s.replace("post.author.id = 1").unwrap(), "\"post\".\"author_id\" = 1");
    }

    #[test]
    fn test_quoted_and_unknown_property_paths_untouched() {
        let aliases = registry();
        let s = subst(&aliases);
        assert_eq!(
            s.replace("post.title = 'other.title'").unwrap(),
            "\"post\".\"post_title\" = 'other.title'"
        );
        assert_eq!(s.replace("\"post\".\"title\" = 1").unwrap(), "\"post\".\"title\" = 1");
        assert_eq!(s.replace("post.missing = 1").unwrap(), "post.missing = 1");
        assert_eq!(s.replace("post.id = :other.id").unwrap(), "\"post\".\"id\" = :other.id");
        assert_eq!(
            s.replace("post.createdAt < pg_catalog.now()").unwrap(),
            "\"post_parent\".\"created_at\" < pg_catalog.now()"
        );
    }

    #[test]
    fn test_unregistered_alias_fails() {
        let aliases = registry();
        let s = subst(&aliases);
        let err = s.replace("other.title = 'x'").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownAlias);
        let err = s.replace("post.id = 1 OR ghost.id = 1").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownAlias);
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn test_inherited_columns_use_parent_alias() {
        let aliases = registry();
        let s = subst(&aliases);
        assert_eq!(
            s.replace("post.createdAt < now()").unwrap(),
            "\"post_parent\".\"created_at\" < now()"
        );
    }

    #[test]
    fn test_without_prefix_or_escaping() {
        let aliases = registry();
        let mut s = subst(&aliases);
        s.alias_prefixing = false;
        assert_eq!(s.replace("post.title = :t").unwrap(), "\"post_title\" = :t");
        s.escaping = false;
        assert_eq!(s.replace("post.title = :t").unwrap(), "post_title = :t");
    }
}
