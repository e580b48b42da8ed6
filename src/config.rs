//! Task configuration.
//!
//! A single JSON document describes one extraction task: which
//! vertical file(s) to read, which structure is the atom, which
//! structural attributes to export, the n-gram setup and the target
//! database. Unknown fields are ignored so configs stay forward
//! compatible.

use crate::colgen;
use crate::errors::{ExtractError, Result};
use crate::filter;
use crate::modders::TransformerChain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One positional column selected for n-gram extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VertColumn {
    pub idx: usize,
    /// Colon-separated transformer chain applied to the raw value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mod_fn: String,
    /// Free-form tag for downstream systems (e.g. `word`, `lemma`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
}

/// Largest column index among `columns`, or 0 when empty. Sparse
/// per-token vectors are sized from this.
pub fn max_column(columns: &[VertColumn]) -> usize {
    columns.iter().map(|c| c.idx).max().unwrap_or(0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NgramConf {
    pub ngram_size: usize,
    #[serde(default, rename = "calcARF")]
    pub calc_arf: bool,
    #[serde(default)]
    pub vert_columns: Vec<VertColumn>,

    /// Legacy shape: bare column indices. Upgraded to `vertColumns`
    /// at load time.
    #[serde(default, skip_serializing)]
    pub attr_columns: Vec<usize>,
    /// Legacy shape: transformer names aligned with `attrColumns`.
    #[serde(default, skip_serializing)]
    pub column_mods: Vec<String>,
}

impl NgramConf {
    pub fn is_configured(&self) -> bool {
        !self.vert_columns.is_empty()
    }

    fn upgrade_legacy(&mut self) -> Result<()> {
        if self.attr_columns.is_empty() {
            return Ok(());
        }
        log::warn!("upgrading legacy n-gram configuration");
        if !self.vert_columns.is_empty() && self.vert_columns.len() != self.attr_columns.len() {
            return Err(ExtractError::ConfigInvalid(
                "vertColumns and attrColumns mismatch".to_owned(),
            ));
        }
        if !self.column_mods.is_empty() && self.column_mods.len() != self.attr_columns.len() {
            return Err(ExtractError::ConfigInvalid(
                "columnMods and attrColumns mismatch".to_owned(),
            ));
        }
        self.vert_columns = self
            .attr_columns
            .iter()
            .enumerate()
            .map(|(i, &idx)| VertColumn {
                idx,
                mod_fn: self.column_mods.get(i).cloned().unwrap_or_default(),
                role: String::new(),
            })
            .collect();
        self.attr_columns.clear();
        self.column_mods.clear();
        Ok(())
    }
}

/// Aligned-corpus join key setup: which structural attributes feed
/// the generator and which generator function derives `item_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfJoinConf {
    #[serde(default)]
    pub arg_columns: Vec<String>,
    #[serde(default)]
    pub generator_fn: String,
}

impl SelfJoinConf {
    pub fn is_configured(&self) -> bool {
        !self.generator_fn.is_empty()
    }
}

/// Bibliography view setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BibViewConf {
    #[serde(default)]
    pub cols: Vec<String>,
    #[serde(default)]
    pub id_attr: String,
}

impl BibViewConf {
    pub fn is_configured(&self) -> bool {
        !self.id_attr.is_empty() && !self.cols.is_empty()
    }
}

/// Target database connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DbConf {
    /// Backend selector: `sqlite` or `mysql`.
    #[serde(rename = "type")]
    pub db_type: String,
    /// Database name; for sqlite this is the database file path.
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Statements executed right after connecting (sqlite pragmas).
    #[serde(default, rename = "preconfSettings")]
    pub preconf_queries: Vec<String>,
}

/// Line filter plug-in reference. Filters are compiled in and found
/// by `fn` name; `lib` is kept for config compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConf {
    #[serde(default)]
    pub lib: String,
    #[serde(default, rename = "fn")]
    pub fn_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub corpus: String,
    /// Groups aligned corpora (e.g. `intercorp_v13_en` and
    /// `intercorp_v13_cs` under `intercorp_v13`) into shared tables.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parallel_corpus: String,
    pub atom_structure: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atom_parent_structure: String,
    /// Selects the strict (stack) attribute accumulator.
    #[serde(default)]
    pub stack_struct_eval: bool,
    /// Recoverable-error budget; exceeding it stops the run.
    #[serde(default)]
    pub max_num_errors: usize,
    pub structures: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngrams: Option<NgramConf>,
    /// Path to a vertical file or a directory of vertical files.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vertical_file: String,
    /// Explicit list of vertical files processed as one corpus.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertical_files: Vec<String>,
    pub db: DbConf,
    #[serde(default)]
    pub self_join: SelfJoinConf,
    #[serde(default)]
    pub indexed_cols: Vec<String>,
    #[serde(default)]
    pub bib_view: BibViewConf,
    #[serde(default)]
    pub filter: FilterConf,
    /// Retention window: rows whose `dateAttr` value sorts below this
    /// ISO date are deleted at the end of the run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remove_entries_before_date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date_attr: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path)?;
        let mut conf: Config = serde_json::from_str(&raw)
            .map_err(|e| ExtractError::ConfigInvalid(format!("failed to parse config: {e}")))?;
        if let Some(ngrams) = conf.ngrams.as_mut() {
            ngrams.upgrade_legacy()?;
        }
        conf.validate()?;
        Ok(conf)
    }

    pub fn uses_self_join(&self) -> bool {
        self.self_join.is_configured()
    }

    /// The corpus name used to scope shared tables: the parallel
    /// corpus when set, the corpus itself otherwise.
    pub fn grouped_corpus(&self) -> &str {
        if self.parallel_corpus.is_empty() {
            &self.corpus
        } else {
            &self.parallel_corpus
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ExtractError::ConfigInvalid(msg));
        if self.corpus.is_empty() {
            return fail("corpus must be set".to_owned());
        }
        if self.atom_structure.is_empty() {
            return fail("atomStructure must be set".to_owned());
        }
        if !self.structures.contains_key(&self.atom_structure) {
            return fail(format!(
                "atomStructure {} is not among configured structures",
                self.atom_structure
            ));
        }
        if !self.atom_parent_structure.is_empty()
            && !self.structures.contains_key(&self.atom_parent_structure)
        {
            return fail(format!(
                "atomParentStructure {} is not among configured structures",
                self.atom_parent_structure
            ));
        }
        if !self.vertical_file.is_empty() && !self.vertical_files.is_empty() {
            return fail("cannot use verticalFile and verticalFiles at the same time".to_owned());
        }
        if self.vertical_file.is_empty() && self.vertical_files.is_empty() {
            return fail("either verticalFile or verticalFiles must be set".to_owned());
        }
        if self.remove_entries_before_date.is_empty() != self.date_attr.is_empty() {
            return fail(
                "removeEntriesBeforeDate and dateAttr must be set together".to_owned(),
            );
        }
        if let Some(ngrams) = &self.ngrams {
            if ngrams.ngram_size < 1 {
                return fail("ngramSize must be at least 1".to_owned());
            }
            if !ngrams.is_configured() {
                return fail("ngrams requires at least one vertColumn".to_owned());
            }
            for vc in &ngrams.vert_columns {
                TransformerChain::parse(&vc.mod_fn)?;
            }
        }
        // resolve registry names here so a typo surfaces before the
        // writer touches (and in create mode drops) any schema
        if self.self_join.is_configured() {
            colgen::get_generator(&self.self_join.generator_fn)?;
        }
        filter::filter_by_name(&self.filter.fn_name)?;
        match self.db.db_type.as_str() {
            "sqlite" | "mysql" => (),
            other => return fail(format!("unsupported db type: {other}")),
        }
        if self.db.name.is_empty() {
            return fail("db.name must be set".to_owned());
        }
        Ok(())
    }
}

/// A half-empty scaffold configuration, printed by `template`.
pub fn template(corpus: &str) -> Config {
    let mut structures = BTreeMap::new();
    structures.insert(
        "doc".to_owned(),
        vec!["id".to_owned(), "title".to_owned()],
    );
    structures.insert("p".to_owned(), vec!["id".to_owned(), "type".to_owned()]);
    Config {
        corpus: corpus.to_owned(),
        atom_structure: "p".to_owned(),
        structures,
        db: DbConf {
            db_type: "sqlite".to_owned(),
            name: format!("{}.db", if corpus.is_empty() { "corpus" } else { corpus }),
            ..DbConf::default()
        },
        bib_view: BibViewConf {
            cols: vec![
                "doc_id".to_owned(),
                "doc_title".to_owned(),
                "doc_author".to_owned(),
                "doc_publisher".to_owned(),
            ],
            id_attr: "doc_id".to_owned(),
        },
        ..Config::default()
    }
}

/// Accepts a structural attribute in either database (`doc_id`) or
/// corpus-query (`doc.id`) form and returns the database form. Only
/// the first dot is rewritten, so structure names must not contain
/// underscores for the dotted form to stay unambiguous.
pub fn import_structattr_name(val: &str) -> String {
    val.replacen('.', "_", 1)
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal() -> Config {
        let mut structures = BTreeMap::new();
        structures.insert("doc".to_owned(), vec!["id".to_owned()]);
        Config {
            corpus: "syn2020".to_owned(),
            atom_structure: "doc".to_owned(),
            structures,
            vertical_file: "/tmp/syn2020.vrt".to_owned(),
            db: DbConf {
                db_type: "sqlite".to_owned(),
                name: "/tmp/syn2020.db".to_owned(),
                ..DbConf::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn minimal_is_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn atom_must_be_configured_structure() {
        let mut c = minimal();
        c.atom_structure = "s".to_owned();
        assert!(c.validate().is_err());
    }

    #[test]
    fn file_and_files_are_exclusive() {
        let mut c = minimal();
        c.vertical_files = vec!["/tmp/a.vrt".to_owned()];
        assert!(c.validate().is_err());
    }

    #[test]
    fn retention_fields_must_pair() {
        let mut c = minimal();
        c.remove_entries_before_date = "2020-01-01".to_owned();
        assert!(c.validate().is_err());
        c.date_attr = "doc.date".to_owned();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn ngram_size_must_be_positive() {
        let mut c = minimal();
        c.ngrams = Some(NgramConf {
            ngram_size: 0,
            vert_columns: vec![VertColumn {
                idx: 0,
                ..VertColumn::default()
            }],
            ..NgramConf::default()
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn unknown_self_join_generator_rejected() {
        let mut c = minimal();
        c.self_join = SelfJoinConf {
            arg_columns: vec!["doc_id".to_owned()],
            generator_fn: "md5".to_owned(),
        };
        assert!(c.validate().is_err());
        c.self_join.generator_fn = "identity".to_owned();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn unknown_filter_rejected() {
        let mut c = minimal();
        c.filter.fn_name = "only_nouns".to_owned();
        assert!(c.validate().is_err());
        c.filter.fn_name = "pass_all".to_owned();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn unknown_modder_rejected() {
        let mut c = minimal();
        c.ngrams = Some(NgramConf {
            ngram_size: 1,
            vert_columns: vec![VertColumn {
                idx: 0,
                mod_fn: "toUpper".to_owned(),
                ..VertColumn::default()
            }],
            ..NgramConf::default()
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn legacy_ngram_shape_upgraded() {
        let mut ngrams = NgramConf {
            ngram_size: 2,
            attr_columns: vec![0, 3],
            column_mods: vec!["toLower".to_owned(), String::new()],
            ..NgramConf::default()
        };
        ngrams.upgrade_legacy().unwrap();
        assert_eq!(ngrams.vert_columns.len(), 2);
        assert_eq!(ngrams.vert_columns[0].idx, 0);
        assert_eq!(ngrams.vert_columns[0].mod_fn, "toLower");
        assert_eq!(ngrams.vert_columns[1].idx, 3);
        assert_eq!(ngrams.vert_columns[1].mod_fn, "");
    }

    #[test]
    fn legacy_mismatch_rejected() {
        let mut ngrams = NgramConf {
            ngram_size: 2,
            attr_columns: vec![0, 3],
            vert_columns: vec![VertColumn::default()],
            ..NgramConf::default()
        };
        assert!(ngrams.upgrade_legacy().is_err());
    }

    #[test]
    fn grouped_corpus_prefers_parallel() {
        let mut c = minimal();
        assert_eq!(c.grouped_corpus(), "syn2020");
        c.parallel_corpus = "intercorp_v13".to_owned();
        assert_eq!(c.grouped_corpus(), "intercorp_v13");
    }

    #[test]
    fn unknown_json_fields_ignored() {
        let raw = r#"{
            "corpus": "c1",
            "atomStructure": "doc",
            "structures": {"doc": ["id"]},
            "verticalFile": "/tmp/c1.vrt",
            "db": {"type": "sqlite", "name": "/tmp/c1.db"},
            "futureKnob": true
        }"#;
        let conf: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(conf.corpus, "c1");
    }

    #[test]
    fn structattr_name_import() {
        assert_eq!(import_structattr_name("doc.date"), "doc_date");
        assert_eq!(import_structattr_name("doc_date"), "doc_date");
    }

    #[test]
    fn template_round_trips() {
        let t = template("syn2020");
        let json = serde_json::to_string_pretty(&t).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.atom_structure, "p");
        assert_eq!(back.db.name, "syn2020.db");
    }
}
