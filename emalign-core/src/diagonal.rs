//! Static alignment prior: uniform over source positions, or concentrated
//! around the sentence diagonal i/I = j/J.

/// Parameters of the alignment distribution for one training direction.
#[derive(Clone, Copy, Debug)]
pub struct AlignmentPrior {
    pub favor_diagonal: bool,
    pub use_null: bool,
    pub prob_align_null: f64,
    pub tension: f64,
}

impl AlignmentPrior {
    /// P(a = NULL); only meaningful when `use_null` is set.
    #[inline]
    pub fn null_prob(&self, src_len: usize) -> f64 {
        if self.favor_diagonal {
            self.prob_align_null
        } else {
            1.0 / (src_len as f64 + 1.0)
        }
    }

    /// Fills `weights[0..src_len]` with the unnormalized weight of every
    /// source position for target position `j` of `trg_len` and returns the
    /// normalizer Z, so P(a = i+1) = weights[i] / Z. With the diagonal
    /// feature off, the uniform probability is written directly and Z = 1.
    pub fn fill_weights(
        &self,
        j: usize,
        trg_len: usize,
        src_len: usize,
        weights: &mut [f64],
    ) -> f64 {
        if self.favor_diagonal {
            let j_over_t = j as f64 / trg_len as f64;
            let mut z = 0.0;
            for (i, w) in weights.iter_mut().enumerate().take(src_len) {
                *w = (-(i as f64 / src_len as f64 - j_over_t).abs() * self.tension).exp();
                z += *w;
            }
            if self.use_null {
                // The NULL word takes prob_align_null; the diagonal weights
                // share the remaining mass.
                z /= 1.0 - self.prob_align_null;
            }
            z
        } else {
            let uniform = 1.0 / (src_len + self.use_null as usize) as f64;
            for w in weights.iter_mut().take(src_len) {
                *w = uniform;
            }
            1.0
        }
    }
}
