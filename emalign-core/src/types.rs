pub type WordID = u32;

/// Id reserved for the synthetic NULL source word.
pub const NULL_WORD: WordID = 0;

/// Surface form the vocabulary interns for [`NULL_WORD`].
pub const NULL_SURFACE: &str = "<eps>";

/// Probability floor returned for (e, f) pairs never observed together.
/// Keeps every per-position sum strictly positive on the first pass.
pub const UNSEEN_PROB: f64 = 1e-9;

/// Literal field separator of the pair format.
pub const PAIR_DELIMITER: &str = " ||| ";
