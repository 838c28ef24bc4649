use hashbrown::HashMap;

use crate::math::digamma;
use crate::types::{WordID, UNSEEN_PROB};

/// Sparse conditional table T[e][f]: a direct-addressed outer vector keyed
/// by source id over small open-addressed inner maps keyed by target id.
///
/// Probabilities and expected counts are staged separately: `prob` reads the
/// distribution fixed by the last `normalize`, while `increment` accumulates
/// into a shadow table. A pass therefore observes the previous pass's
/// estimate no matter how its increments are ordered, and normalization
/// promotes the accumulated counts wholesale.
#[derive(Clone, Debug, Default)]
pub struct TTable {
    probs: Vec<HashMap<WordID, f64>>,
    counts: Vec<HashMap<WordID, f64>>,
}

impl TTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// P(f | e), or the unseen floor when the pair was never accumulated.
    #[inline]
    pub fn prob(&self, e: WordID, f: WordID) -> f64 {
        match self.probs.get(e as usize) {
            Some(row) => row.get(&f).copied().unwrap_or(UNSEEN_PROB),
            None => UNSEEN_PROB,
        }
    }

    /// Adds `delta` to the staged count of (e, f), creating the entry if
    /// needed. Invisible to `prob` until the next normalization. Increments
    /// commute, so accumulation order never changes the promoted result.
    pub fn increment(&mut self, e: WordID, f: WordID, delta: f64) {
        let e = e as usize;
        if e >= self.counts.len() {
            self.counts.resize_with(e + 1, HashMap::new);
        }
        *self.counts[e].entry(f).or_insert(0.0) += delta;
    }

    /// Promotes the staged counts to the probability table, rescaling every
    /// row to a conditional distribution. Rows with no accumulated mass are
    /// dropped.
    pub fn normalize(&mut self) {
        std::mem::swap(&mut self.probs, &mut self.counts);
        self.counts.clear();
        for row in &mut self.probs {
            let total: f64 = row.values().sum();
            if total > 0.0 {
                for v in row.values_mut() {
                    *v /= total;
                }
            } else {
                row.clear();
            }
        }
    }

    /// Variational Bayes counterpart of [`TTable::normalize`] under a
    /// symmetric Dirichlet(alpha):
    /// T[e][f] <- exp(digamma(c + alpha) - digamma(total + alpha * |row|)).
    /// The caller guarantees alpha > 0.
    pub fn normalize_vb(&mut self, alpha: f64) {
        std::mem::swap(&mut self.probs, &mut self.counts);
        self.counts.clear();
        for row in &mut self.probs {
            if row.is_empty() {
                continue;
            }
            let total: f64 = row.values().sum::<f64>() + alpha * row.len() as f64;
            let denom = digamma(total);
            for v in row.values_mut() {
                *v = (digamma(*v + alpha) - denom).exp();
            }
        }
    }

    /// Number of source words with a nonempty distribution.
    pub fn occupied_rows(&self) -> usize {
        self.probs.iter().filter(|row| !row.is_empty()).count()
    }

    /// Rows in source-id order with entries sorted by target id, so dumps
    /// are reproducible across runs.
    pub fn sorted_rows(&self) -> impl Iterator<Item = (WordID, Vec<(WordID, f64)>)> + '_ {
        self.probs
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.is_empty())
            .map(|(e, row)| {
                let mut entries: Vec<(WordID, f64)> = row.iter().map(|(&f, &p)| (f, p)).collect();
                entries.sort_unstable_by_key(|&(f, _)| f);
                (e as WordID, entries)
            })
    }
}
