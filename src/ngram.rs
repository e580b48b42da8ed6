//! In-memory n-gram occurrence table entries.

use crate::config::VertColumn;
use crate::dict::WordDict;
use itertools::Itertools;

/// ARF bookkeeping attached to an n-gram entry during the second
/// pass. `prev_idx` starts at the -1 sentinel; `accum` collects the
/// capped distances between consecutive occurrences.
#[derive(Debug, Clone, PartialEq)]
pub struct ArfHelper {
    pub accum: f64,
    pub first_idx: i64,
    pub prev_idx: i64,
}

/// One unique n-gram: its occurrence count, the per-position sparse
/// vectors of dictionary ids (indexed by vertical column), and the
/// lazily created ARF helper.
#[derive(Debug, Clone)]
pub struct NgramCounter {
    size: usize,
    count: u64,
    tokens: Vec<Vec<usize>>,
    arf: Option<ArfHelper>,
}

impl NgramCounter {
    /// Creates an entry for a freshly seen n-gram (count = 1).
    pub fn new(size: usize) -> NgramCounter {
        NgramCounter {
            size,
            count: 1,
            tokens: Vec::with_capacity(size),
            arf: None,
        }
    }

    /// Configured n-gram length.
    pub fn length(&self) -> usize {
        self.size
    }

    /// Number of positions filled in so far.
    pub fn curr_length(&self) -> usize {
        self.tokens.len()
    }

    pub fn add_token(&mut self, columns: Vec<usize>) {
        self.tokens.push(columns);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn inc_count(&mut self) {
        self.count += 1;
    }

    pub fn has_arf(&self) -> bool {
        self.arf.is_some()
    }

    /// Installs the ARF helper on the first pass-2 match.
    pub fn add_arf(&mut self, first_idx: i64) {
        self.arf = Some(ArfHelper {
            accum: 0.0,
            first_idx,
            prev_idx: -1,
        });
    }

    pub fn arf(&self) -> Option<&ArfHelper> {
        self.arf.as_ref()
    }

    pub fn arf_mut(&mut self) -> Option<&mut ArfHelper> {
        self.arf.as_mut()
    }

    /// Renders the n-gram of a single vertical column as
    /// dictionary-resolved words, e.g. `"the old house"`.
    pub fn column_ngram(&self, col_idx: usize, dict: &WordDict) -> String {
        self.tokens
            .iter()
            .map(|pos| dict.get(pos.get(col_idx).copied().unwrap_or(0)))
            .join(" ")
    }

    fn column_ngram_numeric(&self, col_idx: usize) -> String {
        self.tokens
            .iter()
            .map(|pos| pos.get(col_idx).copied().unwrap_or(0).to_string())
            .join(" ")
    }

    /// Canonical identifier of the n-gram: the numeric per-column
    /// n-grams of all configured columns, space-joined in column
    /// order. Distinct n-grams never collide here because dictionary
    /// ids are injective.
    pub fn unique_id(&self, columns: &[VertColumn]) -> String {
        columns
            .iter()
            .map(|c| self.column_ngram_numeric(c.idx))
            .join(" ")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cols(idxs: &[usize]) -> Vec<VertColumn> {
        idxs.iter()
            .map(|&idx| VertColumn {
                idx,
                mod_fn: String::new(),
                role: String::new(),
            })
            .collect()
    }

    #[test]
    fn key_depends_on_all_columns() {
        let columns = cols(&[0, 2]);
        let mut a = NgramCounter::new(2);
        a.add_token(vec![1, 0, 5]);
        a.add_token(vec![2, 0, 6]);
        let mut b = NgramCounter::new(2);
        b.add_token(vec![1, 0, 5]);
        b.add_token(vec![2, 0, 7]);
        assert_ne!(a.unique_id(&columns), b.unique_id(&columns));
    }

    #[test]
    fn key_is_stable() {
        let columns = cols(&[0]);
        let mut a = NgramCounter::new(2);
        a.add_token(vec![3]);
        a.add_token(vec![4]);
        let mut b = NgramCounter::new(2);
        b.add_token(vec![3]);
        b.add_token(vec![4]);
        assert_eq!(a.unique_id(&columns), b.unique_id(&columns));
    }

    #[test]
    fn column_ngram_resolves_words() {
        let mut dict = WordDict::new();
        let the = dict.add("the");
        let house = dict.add("house");
        let mut ng = NgramCounter::new(2);
        ng.add_token(vec![the]);
        ng.add_token(vec![house]);
        assert_eq!(ng.column_ngram(0, &dict), "the house");
    }

    #[test]
    fn arf_helper_lifecycle() {
        let mut ng = NgramCounter::new(1);
        ng.add_token(vec![1]);
        assert!(!ng.has_arf());
        ng.add_arf(10);
        let helper = ng.arf().unwrap();
        assert_eq!(helper.first_idx, 10);
        assert_eq!(helper.prev_idx, -1);
        assert_eq!(helper.accum, 0.0);
    }
}
