pub mod nuts;
pub mod trace;

pub use nuts::{LogDensity, NutsConfig, NutsDraws, SamplingError, run_nuts_sampling};
pub use trace::{PosteriorModel, PosteriorTrace};
