pub mod corpus;
pub mod diagonal;
pub mod error;
pub mod math;
pub mod trainer;
pub mod ttable;
pub mod types;
pub mod vocab;

pub use corpus::PairReader;
pub use diagonal::AlignmentPrior;
pub use error::{AlignError, Result};
pub use trainer::{IterationStats, Trainer, TrainerConfig};
pub use ttable::TTable;
pub use types::{WordID, NULL_WORD};
pub use vocab::Vocab;
