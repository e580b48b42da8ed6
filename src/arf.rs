//! Second-pass Average Reduced Frequency calculation.
//!
//! ARF weighs a type's frequency by how evenly its occurrences are
//! spread over the corpus: for a type with count `c` in a corpus of
//! `N` tokens, with `v = N/c`, `ARF = (1/v) * sum(min(v, d_i))` over
//! distances between consecutive occurrences, wrapping around the
//! corpus end. The two-pass scheme trades a second read of the
//! vertical for not having to keep all occurrence positions in
//! memory.
//!
//! See <https://wiki.korpus.cz/doku.php/en:pojmy:arf> for background.

use crate::accum::Accumulator;
use crate::config::{max_column, VertColumn};
use crate::dict::WordDict;
use crate::errors::{ExtractError, ProcError, Result};
use crate::filter::LineFilter;
use crate::library::CancelToken;
use crate::modders::TransformerChain;
use crate::ngram::NgramCounter;
use crate::vertical::{LineProcessor, Structure, StructureClose, Token};
use log::warn;
use rustc_hash::FxHashMap;
use std::sync::atomic::Ordering;

/// Replays the vertical over the n-gram table built by the first
/// pass. The calculator mirrors the extractor's sliding sentence
/// buffer (same columns, same transformers, same filter, same
/// atom-boundary reset), so pass-2 n-grams line up with pass-1
/// entries; n-grams that still miss the table are logged and skipped
/// (deeply nested identically-named atoms can cause this).
pub struct ArfCalculator<'a> {
    counts: &'a mut FxHashMap<String, NgramCounter>,
    vert_columns: &'a [VertColumn],
    ngram_size: usize,
    max_col: usize,
    num_tokens: usize,
    modders: &'a [Option<TransformerChain>],
    dict: &'a mut WordDict,
    atom_struct: &'a str,
    atom_parent_struct: &'a str,
    filter: &'a dyn LineFilter,
    accum: Accumulator,
    window: Vec<Vec<usize>>,
    last_atom_open_line: i64,
    cancel: CancelToken,
}

impl<'a> ArfCalculator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        counts: &'a mut FxHashMap<String, NgramCounter>,
        vert_columns: &'a [VertColumn],
        ngram_size: usize,
        num_tokens: usize,
        modders: &'a [Option<TransformerChain>],
        dict: &'a mut WordDict,
        atom_struct: &'a str,
        atom_parent_struct: &'a str,
        nested_strict: bool,
        filter: &'a dyn LineFilter,
        cancel: CancelToken,
    ) -> ArfCalculator<'a> {
        ArfCalculator {
            counts,
            vert_columns,
            ngram_size,
            max_col: max_column(vert_columns),
            num_tokens,
            modders,
            dict,
            atom_struct,
            atom_parent_struct,
            filter,
            accum: Accumulator::new(nested_strict),
            window: Vec::with_capacity(ngram_size),
            last_atom_open_line: -1,
            cancel,
        }
    }

    fn reset_window(&mut self) {
        self.window.clear();
    }

    fn match_ngram(&mut self, tk_idx: i64) {
        let mut ngram = NgramCounter::new(self.ngram_size);
        for pos in &self.window {
            ngram.add_token(pos.clone());
        }
        let key = ngram.unique_id(self.vert_columns);
        let Some(cnt) = self.counts.get_mut(&key) else {
            warn!("n-gram not found in the occurrence table, skipping");
            return;
        };
        if !cnt.has_arf() {
            cnt.add_arf(tk_idx);
        }
        let avg_dist = self.num_tokens as f64 / cnt.count() as f64;
        let helper = cnt.arf_mut().expect("helper installed above");
        if helper.prev_idx > -1 {
            helper.accum += avg_dist.min((tk_idx - helper.prev_idx) as f64);
        }
        helper.prev_idx = tk_idx;
    }

    /// Adds the wrap-around term and normalises by the average
    /// distance; call once after the second pass.
    pub fn finalize(&mut self) {
        for cnt in self.counts.values_mut() {
            let avg_dist = self.num_tokens as f64 / cnt.count() as f64;
            match cnt.arf_mut() {
                None => warn!("n-gram never matched during the ARF pass"),
                Some(helper) => {
                    let wrap = helper.first_idx + self.num_tokens as i64 - helper.prev_idx;
                    helper.accum += avg_dist.min(wrap as f64);
                    helper.accum = (helper.accum / avg_dist * 1000.0).round() / 1000.0;
                }
            }
        }
    }
}

impl LineProcessor for ArfCalculator<'_> {
    fn on_token(&mut self, tk: Token, _line: usize) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        let mut attributes = vec![0usize; self.max_col + 1];
        for vc in self.vert_columns {
            let raw = tk.pos_attr(vc.idx);
            let moded = match &self.modders[vc.idx] {
                Some(chain) => chain.transform(raw),
                None => raw.to_owned(),
            };
            attributes[vc.idx] = self.dict.add(&moded);
        }
        if !self.filter.apply(&tk, &self.accum) {
            return Ok(());
        }
        if self.window.len() == self.ngram_size {
            self.window.remove(0);
        }
        self.window.push(attributes);
        if self.window.len() == self.ngram_size {
            self.match_ngram(tk.idx as i64);
        }
        Ok(())
    }

    fn on_struct_open(&mut self, st: Structure, line: usize) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        if st.name == self.atom_struct {
            self.last_atom_open_line = line as i64;
        }
        let name = st.name.clone();
        let is_empty = st.is_empty;
        if self.accum.begin(line, st).is_ok() && is_empty {
            return self.on_struct_close(StructureClose { name }, line);
        }
        Ok(())
    }

    fn on_struct_close(&mut self, st: StructureClose, line: usize) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        match self.accum.end(line, &st.name) {
            Ok(item) => {
                if item.elm.name == self.atom_struct
                    || (item.elm.name == self.atom_parent_struct
                        && self.last_atom_open_line < item.line_open as i64)
                {
                    self.reset_window();
                }
            }
            // accumulator problems were already counted in pass 1
            Err(_) => {
                if st.name == self.atom_struct {
                    self.reset_window();
                }
            }
        }
        Ok(())
    }

    fn on_parse_error(&mut self, _line: usize, _err: ProcError) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::PassAll;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn unigram_columns() -> Vec<VertColumn> {
        vec![VertColumn {
            idx: 0,
            ..VertColumn::default()
        }]
    }

    fn token(idx: usize, word: &str) -> Token {
        Token {
            idx,
            columns: vec![word.to_owned()],
        }
    }

    /// Runs the second pass over a stream of single-column tokens.
    fn run_pass(
        counts: &mut FxHashMap<String, NgramCounter>,
        dict: &mut WordDict,
        words: &[&str],
        num_tokens: usize,
    ) {
        let columns = unigram_columns();
        let modders = vec![None];
        let filter = PassAll;
        let cancel: CancelToken = Arc::new(AtomicBool::new(false));
        let mut calc = ArfCalculator::new(
            counts,
            &columns,
            1,
            num_tokens,
            &modders,
            dict,
            "s",
            "",
            true,
            &filter,
            cancel,
        );
        for (i, w) in words.iter().enumerate() {
            calc.on_token(token(i, w), i).unwrap();
        }
        calc.finalize();
    }

    fn seed_unigram(dict: &mut WordDict, word: &str, count: u64) -> (String, FxHashMap<String, NgramCounter>) {
        let id = dict.add(word);
        let mut ng = NgramCounter::new(1);
        ng.add_token(vec![id]);
        for _ in 1..count {
            ng.inc_count();
        }
        let columns = unigram_columns();
        let key = ng.unique_id(&columns);
        let mut counts = FxHashMap::default();
        counts.insert(key.clone(), ng);
        (key, counts)
    }

    #[test]
    fn singleton_arf_is_one() {
        // one occurrence in a 1000-token corpus: the wrap-around
        // distance equals the corpus size, so ARF = 1.000
        let mut dict = WordDict::new();
        let (key, mut counts) = seed_unigram(&mut dict, "x", 1);
        let mut words = vec!["pad"; 1000];
        words[17] = "x";
        // the padding word never matched pass 1, seed it too
        let (_, pad) = seed_unigram(&mut dict, "pad", 999);
        counts.extend(pad);
        run_pass(&mut counts, &mut dict, &words, 1000);
        let arf = counts[&key].arf().unwrap();
        assert_eq!(arf.accum, 1.0);
    }

    #[test]
    fn evenly_spaced_type_reaches_count() {
        // occurrences at 2 and 7 in a 10-token corpus are perfectly
        // even (v = 5): ARF equals the count
        let mut dict = WordDict::new();
        let (key, mut counts) = seed_unigram(&mut dict, "x", 2);
        let (_, pad) = seed_unigram(&mut dict, "pad", 8);
        counts.extend(pad);
        let mut words = vec!["pad"; 10];
        words[2] = "x";
        words[7] = "x";
        run_pass(&mut counts, &mut dict, &words, 10);
        let arf = counts[&key].arf().unwrap();
        assert_eq!(arf.accum, 2.0);
    }

    #[test]
    fn clustered_type_stays_below_count() {
        // adjacent occurrences are capped at distance 1 each
        let mut dict = WordDict::new();
        let (key, mut counts) = seed_unigram(&mut dict, "x", 2);
        let (_, pad) = seed_unigram(&mut dict, "pad", 8);
        counts.extend(pad);
        let mut words = vec!["pad"; 10];
        words[3] = "x";
        words[4] = "x";
        run_pass(&mut counts, &mut dict, &words, 10);
        let arf = counts[&key].arf().unwrap();
        assert!(arf.accum > 0.0 && arf.accum < 2.0);
    }

    #[test]
    fn window_resets_on_atom_close() {
        // bigram BC straddles a sentence boundary and must not match
        let mut dict = WordDict::new();
        let a = dict.add("a");
        let b = dict.add("b");
        let c = dict.add("c");
        let columns = unigram_columns();
        let mut ab = NgramCounter::new(2);
        ab.add_token(vec![a]);
        ab.add_token(vec![b]);
        let mut bc = NgramCounter::new(2);
        bc.add_token(vec![b]);
        bc.add_token(vec![c]);
        let ab_key = ab.unique_id(&columns);
        let bc_key = bc.unique_id(&columns);
        let mut counts = FxHashMap::default();
        counts.insert(ab_key.clone(), ab);
        counts.insert(bc_key.clone(), bc);

        let modders = vec![None];
        let filter = PassAll;
        let cancel: CancelToken = Arc::new(AtomicBool::new(false));
        let mut calc = ArfCalculator::new(
            &mut counts,
            &columns,
            2,
            3,
            &modders,
            &mut dict,
            "s",
            "",
            true,
            &filter,
            cancel,
        );
        let s = Structure {
            name: "s".to_owned(),
            attrs: vec![],
            is_empty: false,
        };
        calc.on_struct_open(s.clone(), 0).unwrap();
        calc.on_token(token(0, "a"), 1).unwrap();
        calc.on_token(token(1, "b"), 2).unwrap();
        calc.on_struct_close(StructureClose { name: "s".to_owned() }, 3)
            .unwrap();
        calc.on_struct_open(s, 4).unwrap();
        calc.on_token(token(2, "c"), 5).unwrap();
        calc.on_struct_close(StructureClose { name: "s".to_owned() }, 6)
            .unwrap();
        assert!(counts[&ab_key].has_arf());
        assert!(!counts[&bc_key].has_arf());
    }
}
