use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use emalign_core::{AlignError, Result, Trainer, TrainerConfig, Vocab};

#[derive(Parser, Debug)]
#[command(author, about = "EM word aligner for ` ||| `-delimited parallel corpora")]
struct Args {
    /// Parallel corpus input file (plain text or .gz)
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// Reverse estimation (swap source and target during training)
    #[arg(short = 'r', long)]
    reverse: bool,

    /// Number of iterations of EM training [default: 5]
    #[arg(short = 'I', long)]
    iterations: Option<u32>,

    /// Use a static alignment distribution that favors the sentence diagonal
    #[arg(short = 'd', long)]
    favor_diagonal: bool,

    /// Probability of a null alignment when the diagonal is favored
    /// [default: 0.08]
    #[arg(long)]
    prob_align_null: Option<f64>,

    /// How sharp or flat around the diagonal the alignment distribution is
    /// (<1 = flat, >1 = sharp) [default: 4.0]
    #[arg(short = 'T', long)]
    diagonal_tension: Option<f64>,

    /// Infer a VB estimate of the parameters under a symmetric Dirichlet
    /// prior
    #[arg(short = 'v', long)]
    variational_bayes: bool,

    /// Hyperparameter of the optional Dirichlet prior [default: 0.01]
    #[arg(short = 'a', long)]
    alpha: Option<f64>,

    /// Do not generate from a null token
    #[arg(short = 'N', long)]
    no_null_word: bool,

    /// Write model parameters instead of alignments
    #[arg(short = 'p', long)]
    output_parameters: bool,

    /// When writing parameters, log10 of the beam threshold (-10000 to
    /// include everything, 0 for per-source maxima only) [default: -4]
    #[arg(short = 't', long, allow_hyphen_values = true)]
    beam_threshold: Option<f64>,

    /// Hide training alignments (useful together with --testset)
    #[arg(short = 'H', long)]
    hide_training_alignments: bool,

    /// After training, compute the log likelihood of this set of sentence
    /// pairs under the learned model
    #[arg(short = 'x', long)]
    testset: Option<PathBuf>,

    /// When writing parameters, do not add Viterbi alignment points (may
    /// leave some training pairs without a lexical edge)
    #[arg(short = 'V', long)]
    no_add_viterbi: bool,

    /// Read further options from this file, one key=value per line;
    /// command-line values take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    // Usage problems (including --help) exit with 1.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

fn run(mut args: Args) -> Result<()> {
    if let Some(path) = args.config.take() {
        apply_config(&mut args, &path)?;
    }
    let input = args
        .input
        .clone()
        .ok_or_else(|| AlignError::InvalidConfig("--input is required".into()))?;

    let defaults = TrainerConfig::default();
    let cfg = TrainerConfig {
        reverse: args.reverse,
        iterations: args.iterations.unwrap_or(defaults.iterations),
        favor_diagonal: args.favor_diagonal,
        prob_align_null: args.prob_align_null.unwrap_or(defaults.prob_align_null),
        diagonal_tension: args.diagonal_tension.unwrap_or(defaults.diagonal_tension),
        variational_bayes: args.variational_bayes,
        alpha: args.alpha.unwrap_or(defaults.alpha),
        use_null: !args.no_null_word,
        beam_threshold: args.beam_threshold.unwrap_or(defaults.beam_threshold),
        write_alignments: !args.output_parameters,
        hide_training_alignments: args.hide_training_alignments,
        add_viterbi: !args.no_add_viterbi,
    };

    let mut vocab = Vocab::new();
    let mut trainer = Trainer::new(cfg)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    trainer.train(&input, &mut vocab, &mut out)?;
    if let Some(testset) = &args.testset {
        trainer.score_testset(testset, &mut vocab, &mut out)?;
    }
    if args.output_parameters {
        trainer.dump_parameters(&vocab, &mut out)?;
    }
    Ok(())
}

/// Merges `key=value` options from a config file into `args`. Values already
/// set on the command line win; flags are additive.
fn apply_config(args: &mut Args, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AlignError::io(e, Some(path.to_path_buf())))?;
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(AlignError::InvalidConfig(format!(
                "{}:{}: expected key=value, got `{}`",
                path.display(),
                idx + 1,
                line
            )));
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "input" => {
                if args.input.is_none() {
                    args.input = Some(PathBuf::from(value));
                }
            }
            "reverse" => args.reverse |= parse_flag(key, value)?,
            "iterations" => merge(&mut args.iterations, key, value)?,
            "favor_diagonal" => args.favor_diagonal |= parse_flag(key, value)?,
            "prob_align_null" => merge(&mut args.prob_align_null, key, value)?,
            "diagonal_tension" => merge(&mut args.diagonal_tension, key, value)?,
            "variational_bayes" => args.variational_bayes |= parse_flag(key, value)?,
            "alpha" => merge(&mut args.alpha, key, value)?,
            "no_null_word" => args.no_null_word |= parse_flag(key, value)?,
            "output_parameters" => args.output_parameters |= parse_flag(key, value)?,
            "beam_threshold" => merge(&mut args.beam_threshold, key, value)?,
            "hide_training_alignments" => {
                args.hide_training_alignments |= parse_flag(key, value)?
            }
            "testset" => {
                if args.testset.is_none() {
                    args.testset = Some(PathBuf::from(value));
                }
            }
            "no_add_viterbi" => args.no_add_viterbi |= parse_flag(key, value)?,
            other => {
                return Err(AlignError::InvalidConfig(format!(
                    "unknown option `{other}` in {}",
                    path.display()
                )))
            }
        }
    }
    Ok(())
}

fn merge<T: std::str::FromStr>(slot: &mut Option<T>, key: &str, value: &str) -> Result<()> {
    if slot.is_none() {
        let parsed = value.parse().map_err(|_| {
            AlignError::InvalidConfig(format!("invalid value `{value}` for `{key}`"))
        })?;
        *slot = Some(parsed);
    }
    Ok(())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(AlignError::InvalidConfig(format!(
            "invalid value `{other}` for flag `{key}`"
        ))),
    }
}
