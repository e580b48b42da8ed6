//! Backend-neutral database layer.
//!
//! The extraction engine talks to storage exclusively through
//! [Writer]. Two backends implement it: an embedded sqlite file and
//! a networked mysql server shared by aligned corpora.

pub mod mysql;
pub mod sqlite;

use crate::config::{Config, VertColumn};
use crate::errors::{DbError, ExtractError, Result};

/// Maximum width of a colcounts value cell; longer n-grams are
/// trimmed to fit the column.
pub const COLCOUNT_VARCHAR_SIZE: usize = 255;

/// A typed cell value on its way into the database. Missing
/// structural attributes travel as empty strings and are translated
/// to SQL NULL by the backends.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Real(f64),
    Null,
}

/// A prepared-insert handle produced by [Writer::prepare_insert].
/// The backends cache the actual statement per connection; the
/// handle itself only carries the SQL shape.
#[derive(Debug, Clone)]
pub struct InsertOp {
    pub table: String,
    pub sql: String,
    pub width: usize,
}

/// Storage contract for one extraction run. All row inserts happen
/// inside a single transaction opened by [Writer::initialize] and
/// finished by [Writer::commit] or [Writer::rollback].
pub trait Writer: Send {
    /// Does the corpus-scoped schema already exist?
    fn exists(&mut self) -> bool;

    /// Ensures the schema is present and opens the transaction. In
    /// non-append mode a pre-existing schema is dropped and recreated.
    fn initialize(&mut self, append: bool) -> std::result::Result<(), DbError>;

    fn prepare_insert(
        &mut self,
        table: &str,
        cols: &[String],
    ) -> std::result::Result<InsertOp, DbError>;

    fn exec_insert(
        &mut self,
        op: &InsertOp,
        values: &[Value],
    ) -> std::result::Result<(), DbError>;

    /// Deletes rows whose `attr` value sorts below `date`
    /// (lexicographic ISO-8601 comparison) and returns the number of
    /// removed rows. Matching nothing is not an error.
    fn remove_records_older_than(
        &mut self,
        date: &str,
        attr: &str,
    ) -> std::result::Result<usize, DbError>;

    fn commit(&mut self) -> std::result::Result<(), DbError>;

    fn rollback(&mut self) -> std::result::Result<(), DbError>;

    fn close(&mut self);
}

/// Instantiates the backend selected by `db.type`.
pub fn new_writer(conf: &Config) -> Result<Box<dyn Writer>> {
    match conf.db.db_type.as_str() {
        "sqlite" => Ok(Box::new(sqlite::SqliteWriter::new(conf))),
        "mysql" => Ok(Box::new(mysql::MysqlWriter::new(conf)?)),
        other => Err(ExtractError::ConfigInvalid(format!(
            "unsupported db type: {other}"
        ))),
    }
}

/// Database column names for counted vertical columns: `col0`,
/// `col3`, ... in configuration order.
pub fn colcount_col_names(columns: &[VertColumn]) -> Vec<String> {
    columns.iter().map(|c| format!("col{}", c.idx)).collect()
}

/// Database column names of exported structural attributes,
/// `<structure>_<attr>`, in deterministic (sorted) order.
pub fn structattr_col_names(
    structures: &std::collections::BTreeMap<String, Vec<String>>,
) -> Vec<String> {
    let mut ans = vec![];
    for (name, attrs) in structures {
        for attr in attrs {
            ans.push(format!("{name}_{attr}"));
        }
    }
    ans
}

/// Trims a value to the colcounts column width, on a character
/// boundary.
pub fn trim_value(s: &str) -> String {
    match s.char_indices().nth(COLCOUNT_VARCHAR_SIZE) {
        Some((pos, _)) => s[..pos].to_owned(),
        None => s.to_owned(),
    }
}

pub(crate) fn join_args(args: &[String]) -> String {
    args.join(", ")
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// SELECT column expressions for the bibliography view; the id
/// attribute is aliased to `id`.
pub(crate) fn bib_view_col_defs(cols: &[String], id_attr: &str) -> Vec<String> {
    cols.iter()
        .map(|c| {
            if c == id_attr {
                format!("{c} AS id")
            } else {
                c.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn colcount_names_follow_indices() {
        let columns = vec![
            VertColumn {
                idx: 0,
                ..VertColumn::default()
            },
            VertColumn {
                idx: 3,
                ..VertColumn::default()
            },
        ];
        assert_eq!(colcount_col_names(&columns), ["col0", "col3"]);
    }

    #[test]
    fn structattr_names_sorted_and_joined() {
        let mut structures = BTreeMap::new();
        structures.insert("p".to_owned(), vec!["id".to_owned()]);
        structures.insert(
            "doc".to_owned(),
            vec!["id".to_owned(), "title".to_owned()],
        );
        assert_eq!(
            structattr_col_names(&structures),
            ["doc_id", "doc_title", "p_id"]
        );
    }

    #[test]
    fn trim_respects_char_boundaries() {
        let long = "č".repeat(300);
        let trimmed = trim_value(&long);
        assert_eq!(trimmed.chars().count(), COLCOUNT_VARCHAR_SIZE);
    }

    #[test]
    fn bib_view_aliases_id() {
        let cols = vec!["doc_id".to_owned(), "doc_title".to_owned()];
        assert_eq!(
            bib_view_col_defs(&cols, "doc_id"),
            ["doc_id AS id", "doc_title"]
        );
    }
}
