use rustc_hash::FxHashMap;

/// A bidirectional map between attribute values and dense non-zero
/// integer ids, used to shrink the in-memory n-gram table.
///
/// Ids start at 1; 0 is reserved for "no value" in sparse column vectors.
pub struct WordDict {
    data: FxHashMap<String, usize>,
    rev: Vec<String>,
}

impl WordDict {
    pub fn new() -> WordDict {
        WordDict {
            data: FxHashMap::default(),
            rev: vec![String::new()],
        }
    }

    /// Interns a word and returns its numeric id. Calling `add` twice
    /// with the same word returns the same id.
    pub fn add(&mut self, word: &str) -> usize {
        if let Some(&id) = self.data.get(word) {
            return id;
        }
        let id = self.rev.len();
        self.data.insert(word.to_owned(), id);
        self.rev.push(word.to_owned());
        id
    }

    /// Returns the word stored under an id, or an empty string for
    /// an unknown id.
    pub fn get(&self, id: usize) -> &str {
        self.rev.get(id).map(String::as_str).unwrap_or("")
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl Default for WordDict {
    fn default() -> WordDict {
        WordDict::new()
    }
}
