//! Networked backend for sharing one physical database between
//! aligned corpora.
//!
//! Every table and view carries the grouped corpus name as a prefix
//! (`intercorp_v13_liveattrs_entry`), so `intercorp_v13_en` and
//! `intercorp_v13_cs` extractions land next to each other.

use crate::config::{BibViewConf, Config, SelfJoinConf, VertColumn};
use crate::db::{
    bib_view_col_defs, colcount_col_names, join_args, placeholders, structattr_col_names,
    InsertOp, Value, Writer,
};
use crate::errors::{DbError, ExtractError, Result};
use log::{info, warn};
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params};
use std::collections::BTreeMap;

pub struct MysqlWriter {
    conn: Option<Conn>,
    db_name: String,
    grouped_corpus: String,
    structures: BTreeMap<String, Vec<String>>,
    indexed_cols: Vec<String>,
    self_join: SelfJoinConf,
    bib_view: BibViewConf,
    count_columns: Vec<VertColumn>,
    in_tx: bool,
}

impl MysqlWriter {
    pub fn new(conf: &Config) -> Result<MysqlWriter> {
        let (host, port) = match conf.db.host.split_once(':') {
            Some((h, p)) => {
                let port = p.parse::<u16>().map_err(|_| {
                    ExtractError::ConfigInvalid(format!("invalid db port: {p}"))
                })?;
                (h.to_owned(), Some(port))
            }
            None => (conf.db.host.clone(), None),
        };
        let mut opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .user(Some(conf.db.user.clone()))
            .pass(Some(conf.db.password.clone()))
            .db_name(Some(conf.db.name.clone()));
        if let Some(port) = port {
            opts = opts.tcp_port(port);
        }
        let conn = Conn::new(Opts::from(opts)).map_err(DbError::from)?;
        Ok(MysqlWriter {
            conn: Some(conn),
            db_name: conf.db.name.clone(),
            grouped_corpus: conf.grouped_corpus().to_owned(),
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
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}_{}", self.grouped_corpus, name)
    }

    fn conn(&mut self) -> std::result::Result<&mut Conn, DbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::NoTransaction("database access".to_owned()))
    }

    fn drop_existing(&mut self) -> std::result::Result<(), DbError> {
        info!("attempting to drop possible existing tables and views");
        let stmts = [
            "DROP TABLE IF EXISTS cache".to_owned(),
            format!("DROP VIEW IF EXISTS {}", self.table("bibliography")),
            format!("DROP TABLE IF EXISTS {}", self.table("liveattrs_entry")),
            format!("DROP TABLE IF EXISTS {}", self.table("colcounts")),
        ];
        let conn = self.conn()?;
        for stmt in stmts {
            conn.query_drop(&stmt)?;
        }
        Ok(())
    }

    fn create_schema(&mut self) -> std::result::Result<(), DbError> {
        info!("attempting to create tables and views");
        let entry_table = self.table("liveattrs_entry");
        let cols = structattr_col_names(&self.structures);
        let mut col_defs: Vec<String> =
            cols.iter().map(|c| format!("{c} VARCHAR(255)")).collect();
        col_defs.push("poscount INT".to_owned());
        col_defs.push("wordcount INT".to_owned());
        col_defs.push("corpus_id VARCHAR(63)".to_owned());
        if self.self_join.is_configured() {
            col_defs.push("item_id VARCHAR(127)".to_owned());
        }
        let mut stmts = vec![
            "CREATE TABLE cache (`key` VARCHAR(255) PRIMARY KEY, `value` TEXT)".to_owned(),
            format!(
                "CREATE TABLE {entry_table} (id INT PRIMARY KEY AUTO_INCREMENT, {})",
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
            info!(
                "creating custom index {}_{c}_idx on {entry_table}({c})",
                self.grouped_corpus
            );
            stmts.push(format!(
                "CREATE INDEX {}_{c}_idx ON {entry_table}({c})",
                self.grouped_corpus
            ));
        }
        if !self.count_columns.is_empty() {
            let cc_table = self.table("colcounts");
            let cc_names = colcount_col_names(&self.count_columns);
            let cc_defs: Vec<String> = cc_names
                .iter()
                .map(|c| format!("{c} VARCHAR(255)"))
                .collect();
            stmts.push(format!(
                "CREATE TABLE {cc_table} ({}, hash_id VARCHAR(40) PRIMARY KEY, \
                 corpus_id VARCHAR(63), count INT, arf FLOAT, \
                 initial_cap TINYINT DEFAULT 0, ngram_size TINYINT)",
                join_args(&cc_defs)
            ));
            stmts.push(format!(
                "CREATE INDEX {cc_table}_corpus_id_idx ON {cc_table}(corpus_id)"
            ));
            stmts.push(format!(
                "CREATE INDEX {cc_table}_ngram_size_idx ON {cc_table}(ngram_size)"
            ));
        }
        let conn = self.conn()?;
        for stmt in stmts {
            conn.query_drop(&stmt)?;
        }
        Ok(())
    }

    fn create_bib_view(&mut self) -> std::result::Result<(), DbError> {
        let col_defs = bib_view_col_defs(&self.bib_view.cols, &self.bib_view.id_attr);
        let stmt = format!(
            "CREATE VIEW {} AS SELECT {} FROM {}",
            self.table("bibliography"),
            join_args(&col_defs),
            self.table("liveattrs_entry")
        );
        self.conn()?.query_drop(&stmt)?;
        Ok(())
    }

    fn to_sql(values: &[Value]) -> Params {
        Params::Positional(
            values
                .iter()
                .map(|v| match v {
                    // empty strings represent missing attributes
                    Value::Str(s) if s.is_empty() => mysql::Value::NULL,
                    Value::Str(s) => mysql::Value::from(s.clone()),
                    Value::Int(i) => mysql::Value::from(*i),
                    Value::Real(r) => mysql::Value::from(*r),
                    Value::Null => mysql::Value::NULL,
                })
                .collect(),
        )
    }
}

impl Writer for MysqlWriter {
    fn exists(&mut self) -> bool {
        let table = self.table("liveattrs_entry");
        let db_name = self.db_name.clone();
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        let ans: std::result::Result<Option<bool>, mysql::Error> = conn.exec_first(
            "SELECT COUNT(*) > 0 FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
            (db_name, table),
        );
        match ans {
            Ok(found) => found.unwrap_or(false),
            Err(e) => {
                warn!("failed to test data storage existence: {e}");
                false
            }
        }
    }

    fn initialize(&mut self, append: bool) -> std::result::Result<(), DbError> {
        if !append {
            if self.exists() {
                warn!(
                    "the data storage {}/{} already exists, existing data will be deleted",
                    self.db_name,
                    self.table("liveattrs_entry")
                );
                self.drop_existing()?;
            }
            self.create_schema()?;
            if self.bib_view.is_configured() {
                self.create_bib_view()?;
            }
        }
        self.conn()?.query_drop("START TRANSACTION")?;
        self.in_tx = true;
        Ok(())
    }

    fn prepare_insert(
        &mut self,
        table: &str,
        cols: &[String],
    ) -> std::result::Result<InsertOp, DbError> {
        if !self.in_tx {
            return Err(DbError::NoTransaction(format!("INSERT into {table}")));
        }
        let sql = format!(
            "INSERT INTO `{}` ({}) VALUES ({})",
            self.table(table),
            join_args(cols),
            placeholders(cols.len())
        );
        self.conn()?.prep(&sql)?;
        Ok(InsertOp {
            table: table.to_owned(),
            sql,
            width: cols.len(),
        })
    }

    fn exec_insert(&mut self, op: &InsertOp, values: &[Value]) -> std::result::Result<(), DbError> {
        debug_assert_eq!(values.len(), op.width);
        let params = Self::to_sql(values);
        self.conn()?.exec_drop(&op.sql, params)?;
        Ok(())
    }

    fn remove_records_older_than(
        &mut self,
        date: &str,
        attr: &str,
    ) -> std::result::Result<usize, DbError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} < ?",
            self.table("liveattrs_entry"),
            attr
        );
        let conn = self.conn()?;
        conn.exec_drop(&sql, (date,))?;
        Ok(conn.affected_rows() as usize)
    }

    fn commit(&mut self) -> std::result::Result<(), DbError> {
        self.conn()?.query_drop("COMMIT")?;
        self.in_tx = false;
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), DbError> {
        if !self.in_tx {
            return Ok(());
        }
        self.conn()?.query_drop("ROLLBACK")?;
        self.in_tx = false;
        Ok(())
    }

    fn close(&mut self) {
        self.conn = None;
    }
}
