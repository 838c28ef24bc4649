use hashbrown::HashMap;

use crate::types::{WordID, NULL_SURFACE, NULL_WORD};

/// Bidirectional token <-> id map shared by the reader, the trainer and the
/// emitter. Id 0 is always the NULL word.
#[derive(Clone, Debug)]
pub struct Vocab {
    ids: HashMap<String, WordID>,
    words: Vec<String>,
}

impl Vocab {
    pub fn new() -> Self {
        let mut vocab = Vocab {
            ids: HashMap::new(),
            words: Vec::new(),
        };
        let null = vocab.intern(NULL_SURFACE);
        debug_assert_eq!(null, NULL_WORD);
        vocab
    }

    /// Returns the id of `word`, assigning the next dense id on first sight.
    pub fn intern(&mut self, word: &str) -> WordID {
        match self.ids.get(word) {
            Some(&id) => id,
            None => {
                let id = self.words.len() as WordID;
                self.ids.insert(word.to_string(), id);
                self.words.push(word.to_string());
                id
            }
        }
    }

    pub fn word(&self, id: WordID) -> &str {
        &self.words[id as usize]
    }

    /// Number of interned words, NULL included.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Joins the surfaces of `ids` with single spaces.
    pub fn surface(&self, ids: &[WordID]) -> String {
        let mut out = String::new();
        for (k, &id) in ids.iter().enumerate() {
            if k > 0 {
                out.push(' ');
            }
            out.push_str(self.word(id));
        }
        out
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}
