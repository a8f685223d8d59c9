//! Dialect capability descriptors.
//!
//! A [`Dialect`] is a plain value describing how one database spells the
//! parts of a statement that differ between engines: identifier quoting,
//! parameter placeholders, row limiting, lock clauses, null ordering and
//! multi-column `COUNT(DISTINCT ...)`. Drivers hand one out once and the
//! renderer consults its fields; there is no branching on driver types.
//!
//! ```rust
//! use tessera_query::dialect::Dialect;
//!
//! let pg = Dialect::postgres();
//! assert_eq!(pg.escape("post"), "\"post\"");
//! assert_eq!(pg.placeholder(2), "$2");
//!
//! let mysql = Dialect::mysql();
//! assert_eq!(mysql.escape("post"), "`post`");
//! assert_eq!(mysql.placeholder(2), "?");
//! ```

use crate::error::{QueryError, QueryResult};
use crate::locking::LockMode;

/// How bound parameters are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Dollar,
    /// `?` for every parameter.
    Question,
    /// `@P1`, `@P2`, ...
    AtP,
    /// `:1`, `:2`, ...
    Colon,
}

/// How result rows are limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `LIMIT n OFFSET m`.
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`, requires an `ORDER BY`.
    OffsetFetch,
    /// Wrap the statement and filter on `ROWNUM`.
    RowNum,
}

/// How `COUNT(DISTINCT ...)` over a composite key is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDistinctStyle {
    /// `COUNT(DISTINCT (a, b))`.
    Tuple,
    /// `COUNT(DISTINCT a, b)`.
    MultiArg,
    /// `COUNT(DISTINCT (a || '|;|' || b))`.
    PipeConcat,
    /// `COUNT(DISTINCT (CONCAT(a, '|;|', b)))`.
    ConcatFn,
}

/// Placement of a lock clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockClause {
    /// Appended after the statement, e.g. `FOR UPDATE` with an optional
    /// trailing modifier written after any lock tables (`SKIP LOCKED`).
    Suffix {
        /// The clause itself.
        clause: &'static str,
        /// Modifier following `OF tables`.
        modifier: Option<&'static str>,
    },
    /// A table hint written after the main table reference.
    TableHint(&'static str),
}

impl LockClause {
    const fn suffix(clause: &'static str) -> Self {
        Self::Suffix {
            clause,
            modifier: None,
        }
    }

    const fn suffix_with(clause: &'static str, modifier: &'static str) -> Self {
        Self::Suffix {
            clause,
            modifier: Some(modifier),
        }
    }
}

/// Lock clause table of a dialect. `None` means the mode is unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockSyntax {
    /// Shared row lock.
    pub read: Option<LockClause>,
    /// Exclusive row lock.
    pub write: Option<LockClause>,
    /// Exclusive lock skipping rows locked by others.
    pub partial_write: Option<LockClause>,
    /// Exclusive lock failing immediately when rows are locked.
    pub write_or_fail: Option<LockClause>,
    /// Exclusive lock that does not block key-share locks.
    pub for_no_key_update: Option<LockClause>,
    /// Read without taking locks; `None` renders nothing.
    pub dirty_read: Option<LockClause>,
    /// Whether `OF table, ...` may follow the clause.
    pub supports_lock_tables: bool,
}

/// Capability descriptor of one SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Dialect name, used in error messages.
    pub name: &'static str,
    /// Opening and closing identifier quote.
    pub quote: (char, char),
    /// Parameter placeholder style.
    pub placeholder_style: PlaceholderStyle,
    /// Row limiting syntax.
    pub limit_style: LimitStyle,
    /// Limit written when only an offset is requested, for dialects whose
    /// `OFFSET` cannot stand alone.
    pub unbounded_limit: Option<&'static str>,
    /// Lock clauses.
    pub lock: LockSyntax,
    /// Whether `NULLS FIRST` / `NULLS LAST` is understood.
    pub supports_nulls_ordering: bool,
    /// Composite `COUNT(DISTINCT ...)` syntax.
    pub count_distinct: CountDistinctStyle,
}

impl Dialect {
    /// PostgreSQL.
    pub const fn postgres() -> Self {
        Self {
            name: "postgres",
            quote: ('"', '"'),
            placeholder_style: PlaceholderStyle::Dollar,
            limit_style: LimitStyle::LimitOffset,
            unbounded_limit: None,
            lock: LockSyntax {
                read: Some(LockClause::suffix("FOR SHARE")),
                write: Some(LockClause::suffix("FOR UPDATE")),
                partial_write: Some(LockClause::suffix_with("FOR UPDATE", "SKIP LOCKED")),
                write_or_fail: Some(LockClause::suffix_with("FOR UPDATE", "NOWAIT")),
                for_no_key_update: Some(LockClause::suffix("FOR NO KEY UPDATE")),
                dirty_read: None,
                supports_lock_tables: true,
            },
            supports_nulls_ordering: true,
            count_distinct: CountDistinctStyle::Tuple,
        }
    }

    /// MySQL and MariaDB.
    pub const fn mysql() -> Self {
        Self {
            name: "mysql",
            quote: ('`', '`'),
            placeholder_style: PlaceholderStyle::Question,
            limit_style: LimitStyle::LimitOffset,
            unbounded_limit: Some("18446744073709551615"),
            lock: LockSyntax {
                read: Some(LockClause::suffix("LOCK IN SHARE MODE")),
                write: Some(LockClause::suffix("FOR UPDATE")),
                partial_write: Some(LockClause::suffix_with("FOR UPDATE", "SKIP LOCKED")),
                write_or_fail: Some(LockClause::suffix_with("FOR UPDATE", "NOWAIT")),
                for_no_key_update: None,
                dirty_read: None,
                supports_lock_tables: false,
            },
            supports_nulls_ordering: false,
            count_distinct: CountDistinctStyle::MultiArg,
        }
    }

    /// SQLite.
    pub const fn sqlite() -> Self {
        Self {
            name: "sqlite",
            quote: ('"', '"'),
            placeholder_style: PlaceholderStyle::Question,
            limit_style: LimitStyle::LimitOffset,
            unbounded_limit: Some("-1"),
            lock: LockSyntax {
                read: None,
                write: None,
                partial_write: None,
                write_or_fail: None,
                for_no_key_update: None,
                dirty_read: None,
                supports_lock_tables: false,
            },
            supports_nulls_ordering: true,
            count_distinct: CountDistinctStyle::PipeConcat,
        }
    }

    /// Microsoft SQL Server.
    pub const fn mssql() -> Self {
        Self {
            name: "mssql",
            quote: ('[', ']'),
            placeholder_style: PlaceholderStyle::AtP,
            limit_style: LimitStyle::OffsetFetch,
            unbounded_limit: None,
            lock: LockSyntax {
                read: Some(LockClause::TableHint("WITH (HOLDLOCK, ROWLOCK)")),
                write: Some(LockClause::TableHint("WITH (UPDLOCK, ROWLOCK)")),
                partial_write: Some(LockClause::TableHint("WITH (UPDLOCK, ROWLOCK, READPAST)")),
                write_or_fail: Some(LockClause::TableHint("WITH (UPDLOCK, ROWLOCK, NOWAIT)")),
                for_no_key_update: None,
                dirty_read: Some(LockClause::TableHint("WITH (NOLOCK)")),
                supports_lock_tables: false,
            },
            supports_nulls_ordering: false,
            count_distinct: CountDistinctStyle::ConcatFn,
        }
    }

    /// Oracle.
    pub const fn oracle() -> Self {
        Self {
            name: "oracle",
            quote: ('"', '"'),
            placeholder_style: PlaceholderStyle::Colon,
            limit_style: LimitStyle::RowNum,
            unbounded_limit: None,
            lock: LockSyntax {
                read: None,
                write: Some(LockClause::suffix("FOR UPDATE")),
                partial_write: Some(LockClause::suffix_with("FOR UPDATE", "SKIP LOCKED")),
                write_or_fail: Some(LockClause::suffix_with("FOR UPDATE", "NOWAIT")),
                for_no_key_update: None,
                dirty_read: None,
                supports_lock_tables: true,
            },
            supports_nulls_ordering: true,
            count_distinct: CountDistinctStyle::PipeConcat,
        }
    }

    /// Quote an identifier, doubling embedded closing quotes.
    pub fn escape(&self, name: &str) -> String {
        let (open, close) = self.quote;
        let mut out = String::with_capacity(name.len() + 2);
        out.push(open);
        for c in name.chars() {
            if c == close {
                out.push(close);
            }
            out.push(c);
        }
        out.push(close);
        out
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self.placeholder_style {
            PlaceholderStyle::Dollar => format!("${}", index),
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::AtP => format!("@P{}", index),
            PlaceholderStyle::Colon => format!(":{}", index),
        }
    }

    /// Lock clause for a pessimistic mode.
    ///
    /// Returns `None` for modes that render nothing on this dialect
    /// (optimistic locks, dirty reads without a hint) and fails with
    /// `UnsupportedLockOnDialect` for modes the dialect cannot express.
    pub fn lock_clause(&self, mode: &LockMode) -> QueryResult<Option<LockClause>> {
        let entry = match mode {
            LockMode::Optimistic(_) => return Ok(None),
            LockMode::DirtyRead => return Ok(self.lock.dirty_read),
            LockMode::PessimisticRead => self.lock.read,
            LockMode::PessimisticWrite => self.lock.write,
            LockMode::PessimisticPartialWrite => self.lock.partial_write,
            LockMode::PessimisticWriteOrFail => self.lock.write_or_fail,
            LockMode::ForNoKeyUpdate => self.lock.for_no_key_update,
        };
        entry
            .map(Some)
            .ok_or_else(|| QueryError::unsupported_lock(self.name, mode))
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::postgres()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_quote_styles() {
        assert_eq!(Dialect::postgres().escape("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::mysql().escape("a`b"), "`a``b`");
        assert_eq!(Dialect::mssql().escape("a]b"), "[a]]b]");
        assert_eq!(Dialect::sqlite().escape("post"), "\"post\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::postgres().placeholder(3), "$3");
        assert_eq!(Dialect::sqlite().placeholder(3), "?");
        assert_eq!(Dialect::mssql().placeholder(3), "@P3");
        assert_eq!(Dialect::oracle().placeholder(3), ":3");
    }

    #[test]
    fn test_lock_clauses() {
        let pg = Dialect::postgres();
        assert_eq!(
            pg.lock_clause(&LockMode::PessimisticRead).unwrap(),
            Some(LockClause::Suffix {
                clause: "FOR SHARE",
                modifier: None
            })
        );
        assert_eq!(
            Dialect::mysql().lock_clause(&LockMode::PessimisticRead).unwrap(),
            Some(LockClause::Suffix {
                clause: "LOCK IN SHARE MODE",
                modifier: None
            })
        );
        assert_eq!(
            Dialect::mssql().lock_clause(&LockMode::PessimisticWrite).unwrap(),
            Some(LockClause::TableHint("WITH (UPDLOCK, ROWLOCK)"))
        );
        let err = Dialect::sqlite()
            .lock_clause(&LockMode::PessimisticWrite)
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnsupportedLockOnDialect);
        assert!(Dialect::oracle().lock_clause(&LockMode::PessimisticRead).is_err());
        assert_eq!(Dialect::sqlite().lock_clause(&LockMode::DirtyRead).unwrap(), None);
    }
}
