//! The extraction driver.
//!
//! An [Extractor] consumes parser events for one vertical file. It
//! keeps the open-structure context in an accumulator, materialises
//! one `liveattrs_entry` row per closed atom structure (or promoted
//! atom parent), feeds accepted tokens into the n-gram table and
//! reports progress on a status channel. Recoverable line errors are
//! counted against the configured budget; the run stops once the
//! budget is exhausted.

use crate::accum::Accumulator;
use crate::arf::ArfCalculator;
use crate::colgen::{self, AlignedColGenFn, AttrMap};
use crate::config::{max_column, Config, NgramConf};
use crate::db::{colcount_col_names, structattr_col_names, trim_value, InsertOp, Value, Writer};
use crate::dict::WordDict;
use crate::errors::{ExtractError, ProcError, Result};
use crate::filter::{self, LineFilter};
use crate::library::CancelToken;
use crate::modders::TransformerChain;
use crate::ngram::NgramCounter;
use crate::vertical::{LineProcessor, Structure, StructureClose, Token, VerticalParser};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use log::{error, info};
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::Ordering;

/// A progress report published on the status channel. `file` is
/// filled in by the orchestrator which knows which vertical is being
/// processed.
#[derive(Debug, Clone)]
pub struct Status {
    pub time: DateTime<Utc>,
    pub file: String,
    pub processed_atoms: usize,
    pub processed_lines: usize,
    pub error: Option<String>,
}

pub struct Extractor<'a> {
    writer: &'a mut dyn Writer,
    corpus_id: String,
    atom_struct: String,
    atom_parent_struct: String,
    structures: BTreeMap<String, Vec<String>>,
    max_num_errors: usize,
    ngrams: Option<NgramConf>,
    colgen_fn: Option<(AlignedColGenFn, Vec<String>)>,
    accum: Accumulator,
    nested_strict: bool,
    filter: Box<dyn LineFilter>,
    dict: WordDict,
    col_counts: FxHashMap<String, NgramCounter>,
    column_modders: Vec<Option<TransformerChain>>,
    curr_sentence: Vec<Vec<usize>>,
    curr_atom_attrs: Option<AttrMap>,
    attr_names: Vec<String>,
    doc_insert: Option<InsertOp>,
    atom_counter: usize,
    line_counter: usize,
    error_counter: usize,
    token_in_atom_counter: i64,
    token_counter: usize,
    last_atom_open_line: i64,
    status: Sender<Status>,
    cancel: CancelToken,
}

impl<'a> Extractor<'a> {
    pub fn new(
        writer: &'a mut dyn Writer,
        conf: &Config,
        cancel: CancelToken,
        status: Sender<Status>,
    ) -> Result<Extractor<'a>> {
        let filter = filter::filter_by_name(&conf.filter.fn_name)?;
        if conf.filter.fn_name.is_empty() {
            info!("no custom line filter defined, using 'pass_all'");
        }
        let colgen_fn = if conf.uses_self_join() {
            Some((
                colgen::get_generator(&conf.self_join.generator_fn)?,
                conf.self_join.arg_columns.clone(),
            ))
        } else {
            None
        };
        let mut column_modders = vec![];
        if let Some(ngrams) = &conf.ngrams {
            column_modders = vec![None; max_column(&ngrams.vert_columns) + 1];
            for vc in &ngrams.vert_columns {
                column_modders[vc.idx] = Some(TransformerChain::parse(&vc.mod_fn)?);
            }
        }
        Ok(Extractor {
            writer,
            corpus_id: conf.corpus.clone(),
            atom_struct: conf.atom_structure.clone(),
            atom_parent_struct: conf.atom_parent_structure.clone(),
            structures: conf.structures.clone(),
            max_num_errors: conf.max_num_errors,
            ngrams: conf.ngrams.clone(),
            colgen_fn,
            accum: Accumulator::new(conf.stack_struct_eval),
            nested_strict: conf.stack_struct_eval,
            filter,
            dict: WordDict::new(),
            col_counts: FxHashMap::default(),
            column_modders,
            curr_sentence: Vec::with_capacity(20),
            curr_atom_attrs: None,
            attr_names: vec![],
            doc_insert: None,
            atom_counter: 0,
            line_counter: 0,
            error_counter: 0,
            token_in_atom_counter: 0,
            token_counter: 0,
            last_atom_open_line: -1,
            status,
            cancel,
        })
    }

    pub fn num_tokens(&self) -> usize {
        self.token_counter
    }

    pub fn col_counts(&self) -> &FxHashMap<String, NgramCounter> {
        &self.col_counts
    }

    /// Runs the extraction over one vertical file. The writer must be
    /// initialized (schema present, transaction open). On success the
    /// n-gram table, when configured, has been flushed to the
    /// database; committing is left to the caller.
    pub fn run(&mut self, parser: &VerticalParser, path: &Path) -> Result<()> {
        info!("using zero-based indexing when reporting line errors");
        info!("starting to process vertical file {}", path.display());
        self.prepare()?;
        parser.parse_file(path, self)?;
        if let Some(ngrams) = self.ngrams.clone() {
            if ngrams.calc_arf {
                info!("calculating ARF (processing the vertical again)");
                let mut calc = ArfCalculator::new(
                    &mut self.col_counts,
                    &ngrams.vert_columns,
                    ngrams.ngram_size,
                    self.token_counter,
                    &self.column_modders,
                    &mut self.dict,
                    &self.atom_struct,
                    &self.atom_parent_struct,
                    self.nested_strict,
                    &*self.filter,
                    self.cancel.clone(),
                );
                parser.parse_file(path, &mut calc)?;
                calc.finalize();
            }
            info!("saving positional attribute counts into the database");
            self.insert_counts(&ngrams)?;
        }
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.attr_names = self.generate_attr_list();
        self.doc_insert = Some(
            self.writer
                .prepare_insert("liveattrs_entry", &self.attr_names)?,
        );
        Ok(())
    }

    fn generate_attr_list(&self) -> Vec<String> {
        let mut names = structattr_col_names(&self.structures);
        names.push("wordcount".to_owned());
        names.push("poscount".to_owned());
        names.push("corpus_id".to_owned());
        if self.colgen_fn.is_some() {
            names.push("item_id".to_owned());
        }
        names
    }

    /// Reports a recoverable error and checks the budget; the
    /// returned fatal error is the stop signal once the budget is
    /// exceeded.
    fn handle_proc_error(&mut self, line: usize, err: ProcError) -> Result<()> {
        let _ = self.status.send(Status {
            time: Utc::now(),
            file: String::new(),
            processed_atoms: self.atom_counter,
            processed_lines: line,
            error: Some(err.to_string()),
        });
        error!("parsing error on line {line}: {err}");
        self.error_counter += 1;
        if self.error_counter > self.max_num_errors {
            return Err(ExtractError::TooManyParsingErrors);
        }
        Ok(())
    }

    fn send_status(&self, line: usize) {
        let _ = self.status.send(Status {
            time: Utc::now(),
            file: String::new(),
            processed_atoms: self.atom_counter,
            processed_lines: line,
            error: None,
        });
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        Ok(())
    }

    /// Whitelisted attributes of all currently open structures, in
    /// database column form.
    fn current_accum_attrs(&self) -> AttrMap {
        let mut attrs = AttrMap::default();
        self.accum.for_each_attr(|s, k, v| {
            if self.accept_attr(s, k) {
                attrs.insert(format!("{s}_{k}"), Value::Str(v.to_owned()));
            }
            true
        });
        attrs
    }

    fn accept_attr(&self, struct_name: &str, attr_name: &str) -> bool {
        self.structures
            .get(struct_name)
            .map(|attrs| attrs.iter().any(|a| a == attr_name))
            .unwrap_or(false)
    }

    /// Snapshot taken when an atom (or atom parent) opens; `poscount`
    /// is overwritten at the closing event that emits the row.
    fn open_atom_context(&mut self, line: usize) -> Result<()> {
        let mut attrs = self.current_accum_attrs();
        attrs.insert("wordcount".to_owned(), Value::Int(0));
        attrs.insert("poscount".to_owned(), Value::Int(0));
        attrs.insert("corpus_id".to_owned(), Value::Str(self.corpus_id.clone()));
        let generated = self
            .colgen_fn
            .as_ref()
            .map(|(gen_fn, arg_columns)| gen_fn(&attrs, arg_columns));
        match generated {
            Some(Ok(item_id)) => {
                attrs.insert("item_id".to_owned(), Value::Str(item_id));
            }
            Some(Err(e)) => {
                self.curr_atom_attrs = Some(attrs);
                return self.handle_proc_error(line, e);
            }
            None => (),
        }
        self.curr_atom_attrs = Some(attrs);
        Ok(())
    }

    fn after_open(&mut self, name: &str, line: usize) -> Result<()> {
        if name == self.atom_struct {
            self.last_atom_open_line = line as i64;
            self.token_in_atom_counter = 0;
            self.atom_counter += 1;
            self.open_atom_context(line)?;
        } else if !self.atom_parent_struct.is_empty() && name == self.atom_parent_struct {
            self.token_in_atom_counter = 0;
            self.open_atom_context(line)?;
        }
        Ok(())
    }

    fn after_close(&mut self, elm_name: &str, line_open: usize, line: usize) -> Result<()> {
        let is_atom = elm_name == self.atom_struct;
        let promoted = !self.atom_parent_struct.is_empty()
            && elm_name == self.atom_parent_struct
            && self.last_atom_open_line < line_open as i64;
        if !is_atom && !promoted {
            return Ok(());
        }
        let attrs = self.curr_atom_attrs.as_mut().ok_or_else(|| {
            ExtractError::Internal(format!(
                "no open atom context for structure {elm_name} closed on line {line}"
            ))
        })?;
        attrs.insert(
            "poscount".to_owned(),
            Value::Int(self.token_in_atom_counter),
        );
        let values: Vec<Value> = self
            .attr_names
            .iter()
            .map(|n| {
                attrs
                    .get(n)
                    .cloned()
                    .unwrap_or_else(|| Value::Str(String::new()))
            })
            .collect();
        let op = self
            .doc_insert
            .clone()
            .ok_or_else(|| ExtractError::Internal("insert not prepared".to_owned()))?;
        self.writer.exec_insert(&op, &values)?;
        self.curr_atom_attrs = Some(AttrMap::default());
        self.curr_sentence.clear();
        Ok(())
    }

    fn count_ngram(&mut self, tk: &Token) {
        let Some(ngrams) = &self.ngrams else {
            return;
        };
        let mut attributes = vec![0usize; self.column_modders.len()];
        for vc in &ngrams.vert_columns {
            let raw = tk.pos_attr(vc.idx);
            let moded = match &self.column_modders[vc.idx] {
                Some(chain) => chain.transform(raw),
                None => raw.to_owned(),
            };
            attributes[vc.idx] = self.dict.add(&moded);
        }
        self.curr_sentence.push(attributes);
        if self.curr_sentence.len() >= ngrams.ngram_size {
            let mut ngram = NgramCounter::new(ngrams.ngram_size);
            let start = self.curr_sentence.len() - ngrams.ngram_size;
            for pos in &self.curr_sentence[start..] {
                ngram.add_token(pos.clone());
            }
            let key = ngram.unique_id(&ngrams.vert_columns);
            self.col_counts
                .entry(key)
                .and_modify(NgramCounter::inc_count)
                .or_insert(ngram);
        }
    }

    fn generate_hash_id(&self, cnt: &NgramCounter, columns: &[crate::config::VertColumn]) -> String {
        let mut hasher = Sha1::new();
        for vc in columns {
            hasher.update(cnt.column_ngram(vc.idx, &self.dict).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Flushes the in-memory n-gram table into `colcounts`.
    fn insert_counts(&mut self, ngrams: &NgramConf) -> Result<()> {
        let mut col_items = colcount_col_names(&ngrams.vert_columns);
        for aux in ["corpus_id", "count", "arf", "hash_id", "ngram_size"] {
            col_items.push(aux.to_owned());
        }
        let ins = self.writer.prepare_insert("colcounts", &col_items)?;
        let mut i = 0usize;
        for cnt in self.col_counts.values() {
            if i % 1000 == 0 && self.cancel.load(Ordering::Relaxed) {
                return Err(ExtractError::Cancelled);
            }
            let mut args: Vec<Value> = ngrams
                .vert_columns
                .iter()
                .map(|vc| Value::Str(trim_value(&cnt.column_ngram(vc.idx, &self.dict))))
                .collect();
            args.push(Value::Str(self.corpus_id.clone()));
            args.push(Value::Int(cnt.count() as i64));
            args.push(match cnt.arf() {
                Some(helper) => Value::Real(helper.accum),
                None => Value::Real(-1.0),
            });
            args.push(Value::Str(self.generate_hash_id(cnt, &ngrams.vert_columns)));
            args.push(Value::Int(cnt.length() as i64));
            self.writer.exec_insert(&ins, &args)?;
            i += 1;
            if i % 1000 == 0 {
                self.send_status(self.line_counter);
                if i % 100_000 == 0 {
                    info!("processed next chunk of colcount records: {i}");
                }
            }
        }
        Ok(())
    }
}

impl LineProcessor for Extractor<'_> {
    fn on_token(&mut self, tk: Token, line: usize) -> Result<()> {
        self.check_cancelled()?;
        self.line_counter = line;
        self.token_counter = tk.idx + 1;
        if self.filter.apply(&tk, &self.accum) {
            self.token_in_atom_counter += 1;
            self.count_ngram(&tk);
        }
        if line % 1000 == 0 {
            self.send_status(line);
        }
        Ok(())
    }

    fn on_struct_open(&mut self, st: Structure, line: usize) -> Result<()> {
        self.check_cancelled()?;
        self.line_counter = line;
        let name = st.name.clone();
        let is_empty = st.is_empty;
        if let Err(e) = self.accum.begin(line, st) {
            return self.handle_proc_error(line, e);
        }
        self.after_open(&name, line)?;
        if is_empty {
            match self.accum.end(line, &name) {
                Ok(item) => self.after_close(&item.elm.name, item.line_open, line)?,
                Err(e) => return self.handle_proc_error(line, e),
            }
        }
        if line % 1000 == 0 {
            self.send_status(line);
        }
        Ok(())
    }

    fn on_struct_close(&mut self, st: StructureClose, line: usize) -> Result<()> {
        self.check_cancelled()?;
        self.line_counter = line;
        match self.accum.end(line, &st.name) {
            Ok(item) => self.after_close(&item.elm.name, item.line_open, line)?,
            Err(e) => return self.handle_proc_error(line, e),
        }
        if line % 1000 == 0 {
            self.send_status(line);
        }
        Ok(())
    }

    fn on_parse_error(&mut self, line: usize, err: ProcError) -> Result<()> {
        self.handle_proc_error(line, err)
    }
}
