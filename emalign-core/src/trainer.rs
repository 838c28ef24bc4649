use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use hashbrown::{HashMap, HashSet};
use log::{debug, info};

use crate::corpus::PairReader;
use crate::diagonal::AlignmentPrior;
use crate::error::{AlignError, Result};
use crate::math::log_poisson;
use crate::ttable::TTable;
use crate::types::{WordID, NULL_WORD};
use crate::vocab::Vocab;

/// Options controlling a training run.
#[derive(Clone, Debug)]
pub struct TrainerConfig {
    /// Swap source and target before training.
    pub reverse: bool,
    /// Number of EM passes over the corpus.
    pub iterations: u32,
    /// Concentrate the alignment prior near the sentence diagonal.
    pub favor_diagonal: bool,
    /// P(NULL alignment) when the diagonal is favored.
    pub prob_align_null: f64,
    /// Sharpness of the diagonal distribution (<1 flat, >1 sharp).
    pub diagonal_tension: f64,
    /// Re-estimate under a symmetric Dirichlet prior between passes.
    pub variational_bayes: bool,
    /// Dirichlet hyperparameter; must be > 0 when `variational_bayes`.
    pub alpha: f64,
    /// Generate target words from a synthetic NULL source word.
    pub use_null: bool,
    /// log10 pruning threshold of the parameter dump, relative to the
    /// per-source-word maximum.
    pub beam_threshold: f64,
    /// Emit Viterbi alignments on the final pass; off means the run ends
    /// with a parameter dump instead.
    pub write_alignments: bool,
    /// Suppress training alignments even when `write_alignments` is set.
    pub hide_training_alignments: bool,
    /// Rescue Viterbi-selected pairs from beam pruning in the dump.
    pub add_viterbi: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            reverse: false,
            iterations: 5,
            favor_diagonal: false,
            prob_align_null: 0.08,
            diagonal_tension: 4.0,
            variational_bayes: false,
            alpha: 0.01,
            use_null: true,
            beam_threshold: -4.0,
            write_alignments: true,
            hide_training_alignments: false,
            add_viterbi: true,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.variational_bayes && self.alpha <= 0.0 {
            return Err(AlignError::InvalidConfig(
                "alpha must be > 0 when variational Bayes is enabled".into(),
            ));
        }
        Ok(())
    }

    fn prior(&self) -> AlignmentPrior {
        AlignmentPrior {
            favor_diagonal: self.favor_diagonal,
            use_null: self.use_null,
            prob_align_null: self.prob_align_null,
            tension: self.diagonal_tension,
        }
    }
}

/// Likelihood statistics reported after each pass.
#[derive(Clone, Copy, Debug)]
pub struct IterationStats {
    /// Natural-log corpus likelihood.
    pub log_likelihood: f64,
    pub base2_likelihood: f64,
    pub cross_entropy: f64,
    pub perplexity: f64,
    /// Number of target tokens scored (the cross-entropy denominator).
    pub target_tokens: f64,
}

/// Batch EM trainer. State carried across passes: the lexical table, the
/// Viterbi edge set populated on the final pass, and the length-ratio
/// statistic fixed after the first pass.
pub struct Trainer {
    cfg: TrainerConfig,
    prior: AlignmentPrior,
    ttable: TTable,
    viterbi: HashMap<WordID, HashSet<WordID>>,
    mean_srclen_multiplier: f64,
    unnormed_a: Vec<f64>,
}

impl Trainer {
    pub fn new(cfg: TrainerConfig) -> Result<Self> {
        cfg.validate()?;
        let prior = cfg.prior();
        Ok(Trainer {
            cfg,
            prior,
            ttable: TTable::new(),
            viterbi: HashMap::new(),
            mean_srclen_multiplier: 0.0,
            unnormed_a: Vec::new(),
        })
    }

    pub fn ttable(&self) -> &TTable {
        &self.ttable
    }

    /// Expected target length per source token, fixed after the first pass.
    pub fn mean_srclen_multiplier(&self) -> f64 {
        self.mean_srclen_multiplier
    }

    /// Runs the full EM schedule over `corpus`, re-reading the file once per
    /// pass.
    ///
    /// Each pass:
    /// - streams the corpus, swapping sides first in reverse mode;
    /// - computes, for every target position, the posterior over the NULL
    ///   word and all source positions under the current table and the
    ///   alignment prior;
    /// - on non-final passes accumulates the posteriors into the table,
    ///   then renormalizes (variational Bayes when configured);
    /// - on the final pass takes the per-position argmax instead, writing
    ///   alignment lines to `alignments` (unless suppressed) and recording
    ///   every winning (source word, target word) pair for the dump.
    ///
    /// Returns the per-pass likelihood statistics, which are also reported
    /// through the `log` facade.
    pub fn train<W: Write>(
        &mut self,
        corpus: &Path,
        vocab: &mut Vocab,
        alignments: &mut W,
    ) -> Result<Vec<IterationStats>> {
        let emit = self.cfg.write_alignments && !self.cfg.hide_training_alignments;
        let mut stats = Vec::with_capacity(self.cfg.iterations as usize);
        let mut tot_len_ratio = 0.0;
        let mut probs: Vec<f64> = Vec::new();
        let mut line_out = String::new();

        for iter in 0..self.cfg.iterations {
            let final_iteration = iter + 1 == self.cfg.iterations;
            info!(
                "iteration {}{}",
                iter + 1,
                if final_iteration { " (final)" } else { "" }
            );
            let mut reader = PairReader::open(corpus)?;
            let mut likelihood = 0.0;
            let mut denom = 0.0;
            let mut n_pairs: u64 = 0;

            while let Some((mut src, mut trg)) = reader.next_pair(vocab)? {
                if self.cfg.reverse {
                    std::mem::swap(&mut src, &mut trg);
                }
                n_pairs += 1;
                if n_pairs % 10_000 == 0 {
                    debug!("{n_pairs} pairs");
                }
                if iter == 0 {
                    tot_len_ratio += trg.len() as f64 / src.len() as f64;
                }
                denom += trg.len() as f64;
                if src.len() > self.unnormed_a.len() {
                    self.unnormed_a.resize(src.len(), 0.0);
                }
                if probs.len() < src.len() + 1 {
                    probs.resize(src.len() + 1, 0.0);
                }
                line_out.clear();

                for (j, &f) in trg.iter().enumerate() {
                    let sum = self.position_probs(&src, f, j, trg.len(), &mut probs);
                    // The unseen floor keeps every candidate positive.
                    debug_assert!(sum > 0.0, "zero posterior mass at target position {j}");
                    likelihood += sum.ln();

                    if !final_iteration {
                        if self.cfg.use_null {
                            self.ttable.increment(NULL_WORD, f, probs[0] / sum);
                        }
                        for i in 1..=src.len() {
                            self.ttable.increment(src[i - 1], f, probs[i] / sum);
                        }
                    } else {
                        // Viterbi selection; NULL is the initial candidate
                        // when enabled, and the first index wins ties.
                        let mut max_index = 0;
                        let mut max_p = if self.cfg.use_null { probs[0] } else { -1.0 };
                        let mut max_e = NULL_WORD;
                        for i in 1..=src.len() {
                            if probs[i] > max_p {
                                max_index = i;
                                max_p = probs[i];
                                max_e = src[i - 1];
                            }
                        }
                        if emit && max_index > 0 {
                            if !line_out.is_empty() {
                                line_out.push(' ');
                            }
                            if self.cfg.reverse {
                                let _ = write!(line_out, "{}-{}", j, max_index - 1);
                            } else {
                                let _ = write!(line_out, "{}-{}", max_index - 1, j);
                            }
                        }
                        self.viterbi.entry(max_e).or_default().insert(f);
                    }
                }

                if emit && final_iteration {
                    writeln!(alignments, "{line_out}").map_err(|e| AlignError::io(e, None))?;
                    alignments.flush().map_err(|e| AlignError::io(e, None))?;
                }
            }

            if n_pairs == 0 {
                return Err(AlignError::InvalidConfig(format!(
                    "no sentence pairs found in {}",
                    corpus.display()
                )));
            }

            let base2_likelihood = likelihood / std::f64::consts::LN_2;
            let cross_entropy = -base2_likelihood / denom;
            let it = IterationStats {
                log_likelihood: likelihood,
                base2_likelihood,
                cross_entropy,
                perplexity: 2f64.powf(cross_entropy),
                target_tokens: denom,
            };
            if iter == 0 {
                self.mean_srclen_multiplier = tot_len_ratio / n_pairs as f64;
                info!(
                    "expected target length = source length * {}",
                    self.mean_srclen_multiplier
                );
            }
            info!("  log_e likelihood: {}", it.log_likelihood);
            info!("  log_2 likelihood: {}", it.base2_likelihood);
            info!("     cross entropy: {}", it.cross_entropy);
            info!("        perplexity: {}", it.perplexity);
            stats.push(it);

            if !final_iteration {
                if self.cfg.variational_bayes {
                    self.ttable.normalize_vb(self.cfg.alpha);
                } else {
                    self.ttable.normalize();
                }
            }
        }
        Ok(stats)
    }

    /// Scores a held-out corpus under the trained model. Every pair is
    /// echoed in file order with its Viterbi alignment (when alignments are
    /// being written) and its log probability, which combines a Poisson
    /// length model with the per-position translation mass. Returns the
    /// total over all pairs.
    pub fn score_testset<W: Write>(
        &mut self,
        testset: &Path,
        vocab: &mut Vocab,
        out: &mut W,
    ) -> Result<f64> {
        let mut reader = PairReader::open(testset)?;
        let mut total = 0.0;
        let mut probs: Vec<f64> = Vec::new();
        let mut line_out = String::new();

        while let Some((mut src, mut trg)) = reader.next_pair(vocab)? {
            line_out.clear();
            let _ = write!(
                line_out,
                "{} ||| {} |||",
                vocab.surface(&src),
                vocab.surface(&trg)
            );
            if self.cfg.reverse {
                std::mem::swap(&mut src, &mut trg);
            }
            if src.len() > self.unnormed_a.len() {
                self.unnormed_a.resize(src.len(), 0.0);
            }
            if probs.len() < src.len() + 1 {
                probs.resize(src.len() + 1, 0.0);
            }

            let lambda = 0.05 + src.len() as f64 * self.mean_srclen_multiplier;
            let mut log_prob = log_poisson(trg.len(), lambda);
            for (j, &f) in trg.iter().enumerate() {
                let sum = self.position_probs(&src, f, j, trg.len(), &mut probs);
                log_prob += sum.ln();
                if self.cfg.write_alignments {
                    // Argmax with NULL as the zero-index starting candidate.
                    let mut a_j = 0;
                    let mut max_pat = probs[0];
                    for i in 1..=src.len() {
                        if probs[i] > max_pat {
                            max_pat = probs[i];
                            a_j = i;
                        }
                    }
                    if a_j > 0 {
                        if self.cfg.reverse {
                            let _ = write!(line_out, " {}-{}", j, a_j - 1);
                        } else {
                            let _ = write!(line_out, " {}-{}", a_j - 1, j);
                        }
                    }
                }
            }
            total += log_prob;
            writeln!(out, "{line_out} ||| {log_prob}").map_err(|e| AlignError::io(e, None))?;
            out.flush().map_err(|e| AlignError::io(e, None))?;
        }
        info!("total log prob: {total}");
        Ok(total)
    }

    /// Writes the pruned lexical table: for every source word, the entries
    /// within `beam_threshold` (log10) of the row maximum, plus every
    /// Viterbi-selected pair when the rescue is enabled. One line per
    /// surviving pair: `<source> <target> <ln probability>`.
    pub fn dump_parameters<W: Write>(&self, vocab: &Vocab, out: &mut W) -> Result<()> {
        let beam = 10f64.powf(self.cfg.beam_threshold);
        for (e, entries) in self.ttable.sorted_rows() {
            let rescued = self.cfg.add_viterbi.then(|| self.viterbi.get(&e)).flatten();
            let max_p = entries.iter().fold(f64::MIN, |m, &(_, p)| m.max(p));
            let threshold = max_p * beam;
            let esym = vocab.word(e);
            for &(f, p) in &entries {
                if p > threshold || rescued.is_some_and(|set| set.contains(&f)) {
                    writeln!(out, "{} {} {}", esym, vocab.word(f), p.ln())
                        .map_err(|err| AlignError::io(err, None))?;
                }
            }
        }
        Ok(())
    }

    /// Fills `probs[0..=src_len]` with P(f, a = i) for every candidate
    /// alignment of target position `j` (index 0 is the NULL word) and
    /// returns the total mass.
    fn position_probs(
        &mut self,
        src: &[WordID],
        f: WordID,
        j: usize,
        trg_len: usize,
        probs: &mut [f64],
    ) -> f64 {
        let src_len = src.len();
        let z = self
            .prior
            .fill_weights(j, trg_len, src_len, &mut self.unnormed_a);
        probs[0] = if self.cfg.use_null {
            self.ttable.prob(NULL_WORD, f) * self.prior.null_prob(src_len)
        } else {
            0.0
        };
        let mut sum = probs[0];
        for i in 1..=src_len {
            probs[i] = self.ttable.prob(src[i - 1], f) * self.unnormed_a[i - 1] / z;
            sum += probs[i];
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_corpus(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).expect("write corpus");
        path
    }

    fn run(cfg: TrainerConfig, text: &str) -> (Trainer, Vocab, String, Vec<IterationStats>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(&dir, "corpus", text);
        let mut vocab = Vocab::new();
        let mut trainer = Trainer::new(cfg).expect("valid config");
        let mut out = Vec::new();
        let stats = trainer
            .train(&path, &mut vocab, &mut out)
            .expect("training succeeds");
        (trainer, vocab, String::from_utf8(out).unwrap(), stats)
    }

    #[test]
    fn cooccurrence_beats_chance() {
        let cfg = TrainerConfig {
            iterations: 2,
            ..TrainerConfig::default()
        };
        let (trainer, mut vocab, out, stats) = run(cfg, "a b ||| x y\nb ||| y\n");

        // (2/2 + 1/1) / 2
        assert!((trainer.mean_srclen_multiplier() - 1.0).abs() < 1e-12);
        let (a, b, y) = (vocab.intern("a"), vocab.intern("b"), vocab.intern("y"));
        assert!(trainer.ttable().prob(b, y) > trainer.ttable().prob(a, y));
        // x decisively aligns to a in the first pair.
        assert_eq!(out.lines().next(), Some("0-0"));
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn repeated_pair_converges_to_certainty() {
        let cfg = TrainerConfig {
            iterations: 3,
            use_null: false,
            ..TrainerConfig::default()
        };
        let (trainer, mut vocab, out, _) = run(cfg, "a ||| x\na ||| x\n");
        let (a, x) = (vocab.intern("a"), vocab.intern("x"));
        assert!((trainer.ttable().prob(a, x) - 1.0).abs() < 1e-12);
        assert_eq!(out, "0-0\n0-0\n");
    }

    #[test]
    fn reverse_swaps_emitted_indices() {
        let cfg = TrainerConfig {
            iterations: 1,
            reverse: true,
            use_null: false,
            ..TrainerConfig::default()
        };
        // Trained direction sees src = [x], trg = [a, b]; each target
        // position aligns to the only source word.
        let (_, _, out, _) = run(cfg, "a b ||| x\n");
        assert_eq!(out, "0-0 1-0\n");
    }

    #[test]
    fn reverse_equals_training_on_swapped_corpus() {
        let forward_text = "el gato ||| the cat\nel perro ||| the dog\nla casa grande ||| the big house\n";
        let swapped_text = "the cat ||| el gato\nthe dog ||| el perro\nthe big house ||| la casa grande\n";

        let cfg_rev = TrainerConfig {
            iterations: 3,
            reverse: true,
            favor_diagonal: true,
            ..TrainerConfig::default()
        };
        let cfg_fwd = TrainerConfig {
            iterations: 3,
            favor_diagonal: true,
            ..TrainerConfig::default()
        };
        let (_, _, out_rev, stats_rev) = run(cfg_rev, forward_text);
        let (_, _, out_fwd, stats_fwd) = run(cfg_fwd, swapped_text);

        for (r, f) in stats_rev.iter().zip(stats_fwd.iter()) {
            assert!((r.log_likelihood - f.log_likelihood).abs() < 1e-9);
        }
        for (line_rev, line_fwd) in out_rev.lines().zip(out_fwd.lines()) {
            let rev_tokens: Vec<&str> = line_rev.split_whitespace().collect();
            let fwd_tokens: Vec<&str> = line_fwd.split_whitespace().collect();
            assert_eq!(rev_tokens.len(), fwd_tokens.len());
            for (rt, ft) in rev_tokens.iter().zip(fwd_tokens.iter()) {
                let (rj, ri) = rt.split_once('-').unwrap();
                let (fi, fj) = ft.split_once('-').unwrap();
                assert_eq!((rj, ri), (fj, fi), "indices should be swapped");
            }
        }
    }

    #[test]
    fn likelihood_is_monotone_under_plain_em() {
        let cfg = TrainerConfig {
            iterations: 6,
            ..TrainerConfig::default()
        };
        let text = "the cat ||| le chat\nthe dog ||| le chien\nthe cat sleeps ||| le chat dort\n";
        let (_, _, _, stats) = run(cfg, text);
        for w in stats.windows(2) {
            assert!(
                w[1].log_likelihood >= w[0].log_likelihood - 1e-9,
                "likelihood decreased: {} -> {}",
                w[0].log_likelihood,
                w[1].log_likelihood
            );
        }
    }

    #[test]
    fn accumulation_is_order_independent() {
        // Disjoint vocabularies, so each table row is fed by exactly one
        // sentence and the scratch buffer is the only shared state.
        let text_a = "a ||| x\nb c d e f g h i j k ||| l m n o p q r s t u\n";
        let text_b = "b c d e f g h i j k ||| l m n o p q r s t u\na ||| x\n";
        let cfg = TrainerConfig {
            iterations: 2,
            favor_diagonal: true,
            use_null: false,
            ..TrainerConfig::default()
        };
        let (t1, mut v1, _, stats1) = run(cfg.clone(), text_a);
        let (t2, mut v2, _, stats2) = run(cfg, text_b);

        for (e, f) in [("a", "x"), ("b", "l"), ("k", "u"), ("f", "p")] {
            let p1 = t1.ttable().prob(v1.intern(e), v1.intern(f));
            let p2 = t2.ttable().prob(v2.intern(e), v2.intern(f));
            assert!((p1 - p2).abs() < 1e-15, "{e}->{f}: {p1} vs {p2}");
        }
        // Only the summation order of the per-position log terms differs.
        for (s1, s2) in stats1.iter().zip(stats2.iter()) {
            assert!((s1.log_likelihood - s2.log_likelihood).abs() < 1e-10);
        }
    }

    #[test]
    fn dump_respects_beam_and_viterbi_rescue() {
        let text = "a ||| x\na ||| x\na ||| y\n";
        let base = TrainerConfig {
            iterations: 2,
            use_null: false,
            write_alignments: false,
            ..TrainerConfig::default()
        };
        let dump = |cfg: TrainerConfig| {
            let (trainer, vocab, _, _) = run(cfg, text);
            let mut out = Vec::new();
            trainer.dump_parameters(&vocab, &mut out).expect("dump");
            String::from_utf8(out).unwrap()
        };

        // Everything survives an effectively disabled beam.
        let all = dump(TrainerConfig {
            beam_threshold: -10_000.0,
            ..base.clone()
        });
        assert!(all.lines().any(|l| l.starts_with("a x ")));
        assert!(all.lines().any(|l| l.starts_with("a y ")));
        let ax = all
            .lines()
            .find(|l| l.starts_with("a x "))
            .and_then(|l| l.rsplit(' ').next())
            .and_then(|v| v.parse::<f64>().ok())
            .expect("ln prob on the a-x line");
        assert!((ax - (2f64 / 3.0).ln()).abs() < 1e-9);

        // Strict threshold at the maximum excludes even the maximum itself
        // without the rescue.
        let none = dump(TrainerConfig {
            beam_threshold: 0.0,
            add_viterbi: false,
            ..base.clone()
        });
        assert_eq!(none, "");

        // A beam between the two probabilities keeps only the maximum.
        let top = dump(TrainerConfig {
            beam_threshold: -0.2,
            add_viterbi: false,
            ..base.clone()
        });
        assert!(top.lines().any(|l| l.starts_with("a x ")));
        assert!(!top.lines().any(|l| l.starts_with("a y ")));

        // The Viterbi rescue restores every selected pair.
        let rescued = dump(TrainerConfig {
            beam_threshold: 0.0,
            add_viterbi: true,
            ..base
        });
        assert!(rescued.lines().any(|l| l.starts_with("a x ")));
        assert!(rescued.lines().any(|l| l.starts_with("a y ")));
    }

    #[test]
    fn testset_scoring_reports_log_prob() {
        let cfg = TrainerConfig {
            iterations: 3,
            use_null: false,
            ..TrainerConfig::default()
        };
        let (mut trainer, mut vocab, _, _) = run(cfg, "a ||| x\na ||| x\n");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(&dir, "testset", "a ||| x\n");
        let mut out = Vec::new();
        let total = trainer
            .score_testset(&path, &mut vocab, &mut out)
            .expect("scoring succeeds");

        // T[a][x] = 1 and a single source word: the translation term is
        // ln 1 = 0 and only the Poisson length model remains.
        let expected = 1.05f64.ln() - 1.05;
        assert!((total - expected).abs() < 1e-9);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("a ||| x ||| 0-0 ||| "));
    }

    #[test]
    fn unknown_test_words_score_on_the_floor() {
        let cfg = TrainerConfig {
            iterations: 2,
            use_null: false,
            ..TrainerConfig::default()
        };
        let (mut trainer, mut vocab, _, _) = run(cfg, "a ||| x\n");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(&dir, "testset", "novel ||| word\n");
        let mut out = Vec::new();
        let total = trainer
            .score_testset(&path, &mut vocab, &mut out)
            .expect("scoring succeeds");
        assert!(total.is_finite());
        assert!(total < 0.0);
    }

    #[test]
    fn variational_bayes_training_stays_finite() {
        let cfg = TrainerConfig {
            iterations: 3,
            variational_bayes: true,
            ..TrainerConfig::default()
        };
        let (trainer, mut vocab, _, stats) = run(cfg, "a b ||| x y\nb ||| y\n");
        for s in &stats {
            assert!(s.log_likelihood.is_finite());
            assert!(s.perplexity.is_finite());
        }
        let (b, y) = (vocab.intern("b"), vocab.intern("y"));
        assert!(trainer.ttable().prob(b, y) > 0.0);
    }

    #[test]
    fn rejects_nonpositive_alpha_with_vb() {
        let cfg = TrainerConfig {
            variational_bayes: true,
            alpha: 0.0,
            ..TrainerConfig::default()
        };
        assert!(matches!(
            Trainer::new(cfg),
            Err(AlignError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(&dir, "corpus", "");
        let mut vocab = Vocab::new();
        let mut trainer = Trainer::new(TrainerConfig::default()).expect("valid config");
        let mut out = Vec::new();
        assert!(matches!(
            trainer.train(&path, &mut vocab, &mut out),
            Err(AlignError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_pair_aborts_with_line_number() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(&dir, "corpus", "a ||| x\nb c ||| \n");
        let mut vocab = Vocab::new();
        let mut trainer = Trainer::new(TrainerConfig::default()).expect("valid config");
        let mut out = Vec::new();
        match trainer.train(&path, &mut vocab, &mut out) {
            Err(AlignError::Corpus { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corpus error, got {other:?}"),
        }
    }
}
