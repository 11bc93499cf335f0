pub mod diagnostics;
pub mod summary;
pub mod visualizer;

pub use diagnostics::convergence_warnings;
pub use summary::{PosteriorSummary, SignProbability, SummaryRow, hdi, sign_probabilities, summarize};
