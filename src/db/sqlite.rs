//! Embedded single-file backend.
//!
//! Tables are kept unprefixed for a standalone corpus; when a
//! parallel corpus groups several aligned corpora into one file, the
//! grouped name prefixes every table and view the same way the mysql
//! backend does it.

use crate::config::{BibViewConf, Config, SelfJoinConf, VertColumn};
use crate::db::{
    bib_view_col_defs, colcount_col_names, join_args, placeholders, structattr_col_names,
    InsertOp, Value, Writer,
};
use crate::errors::DbError;
use log::{info, warn};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::PathBuf;

const DEFAULT_PRECONF: [&str; 2] = ["PRAGMA synchronous = OFF", "PRAGMA journal_mode = MEMORY"];

pub struct SqliteWriter {
    conn: Option<Connection>,
    path: PathBuf,
    prefix: String,
    preconf: Vec<String>,
    structures: BTreeMap<String, Vec<String>>,
    indexed_cols: Vec<String>,
    self_join: SelfJoinConf,
    bib_view: BibViewConf,
    count_columns: Vec<VertColumn>,
    in_tx: bool,
}

impl SqliteWriter {
    pub fn new(conf: &Config) -> SqliteWriter {
        let prefix = if conf.parallel_corpus.is_empty() {
            String::new()
        } else {
            format!("{}_", conf.parallel_corpus)
        };
        SqliteWriter {
            conn: None,
            path: PathBuf::from(&conf.db.name),
            prefix,
            preconf: conf.db.preconf_queries.clone(),
            structures: conf.structures.clone(),
            indexed_cols: conf.indexed_cols.clone(),
            self_join: conf.self_join.clone(),
            bib_view: conf.bib_view.clone(),
            count_columns: conf
                .ngrams
                .as_ref()
                .map(|n| n.vert_columns.clone())
                .unwrap_or_default(),
            in_tx: false,
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn conn(&mut self) -> Result<&mut Connection, DbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::NoTransaction("database access".to_owned()))
    }

    fn drop_existing(&mut self) -> Result<(), DbError> {
        info!("attempting to drop possible existing tables and views");
        let stmts = [
            "DROP TABLE IF EXISTS cache".to_owned(),
            format!("DROP VIEW IF EXISTS {}", self.table("bibliography")),
            format!("DROP TABLE IF EXISTS {}", self.table("liveattrs_entry")),
            format!("DROP TABLE IF EXISTS {}", self.table("colcounts")),
        ];
        let conn = self.conn()?;
        for stmt in stmts {
            conn.execute_batch(&stmt)?;
        }
        Ok(())
    }

    fn create_schema(&mut self) -> Result<(), DbError> {
        info!("attempting to create tables and views");
        let entry_table = self.table("liveattrs_entry");
        let cols = structattr_col_names(&self.structures);
        let mut col_defs: Vec<String> = cols.iter().map(|c| format!("{c} TEXT")).collect();
        col_defs.push("poscount INTEGER".to_owned());
        col_defs.push("wordcount INTEGER".to_owned());
        col_defs.push("corpus_id TEXT".to_owned());
        if self.self_join.is_configured() {
            col_defs.push("item_id TEXT".to_owned());
        }
        let stmts = {
            let mut stmts = vec![
                "CREATE TABLE cache (key TEXT PRIMARY KEY, value TEXT)".to_owned(),
                format!(
                    "CREATE TABLE {entry_table} (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
                    join_args(&col_defs)
                ),
            ];
            if self.self_join.is_configured() {
                stmts.push(format!(
                    "CREATE UNIQUE INDEX {entry_table}_item_id_corpus_id_idx \
                     ON {entry_table}(item_id, corpus_id)"
                ));
            }
            for c in &self.indexed_cols {
                info!("creating custom index {}{c}_idx on {entry_table}({c})", self.prefix);
                stmts.push(format!(
                    "CREATE INDEX {}{c}_idx ON {entry_table}({c})",
                    self.prefix
                ));
            }
            if !self.count_columns.is_empty() {
                let cc_table = self.table("colcounts");
                let cc_names = colcount_col_names(&self.count_columns);
                let cc_defs: Vec<String> =
                    cc_names.iter().map(|c| format!("{c} TEXT")).collect();
                stmts.push(format!(
                    "CREATE TABLE {cc_table} ({}, hash_id TEXT PRIMARY KEY, \
                     corpus_id TEXT, count INTEGER, arf REAL, \
                     initial_cap INTEGER DEFAULT 0, ngram_size INTEGER)",
                    join_args(&cc_defs)
                ));
                stmts.push(format!(
                    "CREATE INDEX {cc_table}_corpus_id_idx ON {cc_table}(corpus_id)"
                ));
                stmts.push(format!(
                    "CREATE INDEX {cc_table}_ngram_size_idx ON {cc_table}(ngram_size)"
                ));
            }
            stmts
        };
        let conn = self.conn()?;
        for stmt in stmts {
            conn.execute_batch(&stmt)?;
        }
        Ok(())
    }

    fn create_bib_view(&mut self) -> Result<(), DbError> {
        let col_defs = bib_view_col_defs(&self.bib_view.cols, &self.bib_view.id_attr);
        let stmt = format!(
            "CREATE VIEW {} AS SELECT {} FROM {}",
            self.table("bibliography"),
            join_args(&col_defs),
            self.table("liveattrs_entry")
        );
        self.conn()?.execute_batch(&stmt)?;
        Ok(())
    }

    fn to_sql(values: &[Value]) -> Vec<rusqlite::types::Value> {
        values
            .iter()
            .map(|v| match v {
                // empty strings represent missing attributes
                Value::Str(s) if s.is_empty() => rusqlite::types::Value::Null,
                Value::Str(s) => rusqlite::types::Value::Text(s.clone()),
                Value::Int(i) => rusqlite::types::Value::Integer(*i),
                Value::Real(r) => rusqlite::types::Value::Real(*r),
                Value::Null => rusqlite::types::Value::Null,
            })
            .collect()
    }
}

impl Writer for SqliteWriter {
    fn exists(&mut self) -> bool {
        self.path.is_file()
    }

    fn initialize(&mut self, append: bool) -> Result<(), DbError> {
        let existed = self.path.is_file();
        self.conn = Some(Connection::open(&self.path)?);
        if !append {
            if existed {
                warn!(
                    "the database {} already exists, existing data will be deleted",
                    self.path.display()
                );
                self.drop_existing()?;
            }
            self.create_schema()?;
            if self.bib_view.is_configured() {
                self.create_bib_view()?;
            }
        }
        let preconf: Vec<String> = if self.preconf.is_empty() {
            info!("no pre-configuration queries found, using defaults");
            DEFAULT_PRECONF.iter().map(|s| s.to_string()).collect()
        } else {
            self.preconf.clone()
        };
        let conn = self.conn()?;
        for stmt in &preconf {
            info!("applying {stmt}");
            conn.execute_batch(stmt)?;
        }
        conn.execute_batch("BEGIN")?;
        self.in_tx = true;
        Ok(())
    }

    fn prepare_insert(&mut self, table: &str, cols: &[String]) -> Result<InsertOp, DbError> {
        if !self.in_tx {
            return Err(DbError::NoTransaction(format!("INSERT into {table}")));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(table),
            join_args(cols),
            placeholders(cols.len())
        );
        // validate the statement shape right away
        self.conn()?.prepare_cached(&sql)?;
        Ok(InsertOp {
            table: table.to_owned(),
            sql,
            width: cols.len(),
        })
    }

    fn exec_insert(&mut self, op: &InsertOp, values: &[Value]) -> Result<(), DbError> {
        debug_assert_eq!(values.len(), op.width);
        let params = Self::to_sql(values);
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&op.sql)?;
        stmt.execute(rusqlite::params_from_iter(params))?;
        Ok(())
    }

    fn remove_records_older_than(&mut self, date: &str, attr: &str) -> Result<usize, DbError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} < ?1",
            self.table("liveattrs_entry"),
            attr
        );
        let n = self.conn()?.execute(&sql, [date])?;
        Ok(n)
    }

    fn commit(&mut self) -> Result<(), DbError> {
        self.conn()?.execute_batch("COMMIT")?;
        self.in_tx = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        if !self.in_tx {
            return Ok(());
        }
        self.conn()?.execute_batch("ROLLBACK")?;
        self.in_tx = false;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                warn!("error closing database: {e}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DbConf;
    use std::collections::BTreeMap;

    fn temp_db_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("vrtdb-sqlite-test-{tag}-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn test_config(tag: &str) -> Config {
        let mut structures = BTreeMap::new();
        structures.insert(
            "doc".to_owned(),
            vec!["id".to_owned(), "date".to_owned()],
        );
        Config {
            corpus: "c1".to_owned(),
            atom_structure: "doc".to_owned(),
            structures,
            vertical_file: "unused.vrt".to_owned(),
            db: DbConf {
                db_type: "sqlite".to_owned(),
                name: temp_db_path(tag).to_string_lossy().into_owned(),
                ..DbConf::default()
            },
            ..Config::default()
        }
    }

    fn insert_entry(w: &mut SqliteWriter, op: &InsertOp, id: &str, date: &str) {
        w.exec_insert(
            op,
            &[
                Value::Str(id.to_owned()),
                Value::Str(date.to_owned()),
                Value::Int(3),
                Value::Int(0),
                Value::Str("c1".to_owned()),
            ],
        )
        .unwrap();
    }

    fn entry_cols() -> Vec<String> {
        ["doc_id", "doc_date", "poscount", "wordcount", "corpus_id"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn roundtrip_insert_and_commit() {
        let conf = test_config("roundtrip");
        let mut w = SqliteWriter::new(&conf);
        assert!(!w.exists());
        w.initialize(false).unwrap();
        let op = w.prepare_insert("liveattrs_entry", &entry_cols()).unwrap();
        insert_entry(&mut w, &op, "d1", "2021-05-01");
        w.commit().unwrap();
        let n: i64 = w
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM liveattrs_entry", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
        w.close();
        let _ = std::fs::remove_file(&w.path);
    }

    #[test]
    fn empty_strings_become_null() {
        let conf = test_config("nulls");
        let mut w = SqliteWriter::new(&conf);
        w.initialize(false).unwrap();
        let op = w.prepare_insert("liveattrs_entry", &entry_cols()).unwrap();
        insert_entry(&mut w, &op, "", "2021-05-01");
        w.commit().unwrap();
        let n: i64 = w
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM liveattrs_entry WHERE doc_id IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
        w.close();
        let _ = std::fs::remove_file(&w.path);
    }

    #[test]
    fn rollback_discards_rows() {
        let conf = test_config("rollback");
        let mut w = SqliteWriter::new(&conf);
        w.initialize(false).unwrap();
        let op = w.prepare_insert("liveattrs_entry", &entry_cols()).unwrap();
        insert_entry(&mut w, &op, "d1", "2021-05-01");
        w.rollback().unwrap();
        let n: i64 = w
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM liveattrs_entry", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
        w.close();
        let _ = std::fs::remove_file(&w.path);
    }

    #[test]
    fn retention_window_deletes_older_rows() {
        let conf = test_config("retention");
        let mut w = SqliteWriter::new(&conf);
        w.initialize(false).unwrap();
        let op = w.prepare_insert("liveattrs_entry", &entry_cols()).unwrap();
        insert_entry(&mut w, &op, "d1", "2019-12-31");
        insert_entry(&mut w, &op, "d2", "2021-05-01");
        let removed = w
            .remove_records_older_than("2020-01-01", "doc_date")
            .unwrap();
        assert_eq!(removed, 1);
        let removed = w
            .remove_records_older_than("2020-01-01", "doc_date")
            .unwrap();
        assert_eq!(removed, 0);
        w.commit().unwrap();
        w.close();
        let _ = std::fs::remove_file(&w.path);
    }

    #[test]
    fn self_join_uniqueness_enforced() {
        let mut conf = test_config("selfjoin");
        conf.self_join = SelfJoinConf {
            arg_columns: vec!["doc_id".to_owned()],
            generator_fn: "identity".to_owned(),
        };
        let mut w = SqliteWriter::new(&conf);
        w.initialize(false).unwrap();
        let mut cols = entry_cols();
        cols.push("item_id".to_owned());
        let op = w.prepare_insert("liveattrs_entry", &cols).unwrap();
        let row = |id: &str| {
            vec![
                Value::Str(id.to_owned()),
                Value::Str("2021-05-01".to_owned()),
                Value::Int(3),
                Value::Int(0),
                Value::Str("c1".to_owned()),
                Value::Str("x1".to_owned()),
            ]
        };
        w.exec_insert(&op, &row("d1")).unwrap();
        assert!(w.exec_insert(&op, &row("d2")).is_err());
        w.rollback().unwrap();
        w.close();
        let _ = std::fs::remove_file(&w.path);
    }

    #[test]
    fn parallel_corpus_prefixes_tables() {
        let mut conf = test_config("prefix");
        conf.parallel_corpus = "intercorp".to_owned();
        let mut w = SqliteWriter::new(&conf);
        w.initialize(false).unwrap();
        w.commit().unwrap();
        let n: i64 = w
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE type = 'table' AND name = 'intercorp_liveattrs_entry'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
        w.close();
        let _ = std::fs::remove_file(&w.path);
    }

    #[test]
    fn bib_view_selects_with_alias() {
        let mut conf = test_config("bib");
        conf.bib_view = BibViewConf {
            cols: vec!["doc_id".to_owned(), "doc_date".to_owned()],
            id_attr: "doc_id".to_owned(),
        };
        let mut w = SqliteWriter::new(&conf);
        w.initialize(false).unwrap();
        let op = w.prepare_insert("liveattrs_entry", &entry_cols()).unwrap();
        insert_entry(&mut w, &op, "d9", "2021-05-01");
        w.commit().unwrap();
        let id: String = w
            .conn()
            .unwrap()
            .query_row("SELECT id FROM bibliography", [], |r| r.get(0))
            .unwrap();
        assert_eq!(id, "d9");
        w.close();
        let _ = std::fs::remove_file(&w.path);
    }
}
