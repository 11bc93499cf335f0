//! NUTS sampling through mini-mcmc
//!
//! # Design
//!
//! mini-mcmc's NUTS uses an identity mass matrix, so the target is sampled in
//! whitened coordinates. Every model supplies a rough location and posterior
//! scale per unconstrained parameter through [`LogDensity::reference_point`]:
//!
//! - Transform: q = center + scale ⊙ z
//! - Gradient: ∇_z = scale ⊙ ∇_q
//!
//! `unnorm_logp_and_grad` is overridden with the model's analytical gradient,
//! so burn's autodiff never runs. Chains run in parallel inside mini-mcmc; the
//! base seed fixes every chain's RNG and the jittered starting points.

use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use burn::tensor::TensorData;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mini_mcmc::distributions::GradientTarget;
use mini_mcmc::nuts::NUTS;
use ndarray::{Array1, Array3, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Backend type for NUTS - uses f64 for numerical precision
pub type NutsBackend = Autodiff<NdArray<f64>>;

/// Number of jittered starting points tried before giving up on a chain.
const MAX_INIT_ATTEMPTS: usize = 100;

/// Standard deviation of the first starting-point jitter, in whitened units.
const INIT_JITTER: f64 = 0.1;

/// A differentiable, unnormalised log density over an unconstrained vector.
pub trait LogDensity {
    fn dim(&self) -> usize;

    /// Returns `(log p(q), ∇ log p(q))`. Non-finite densities are allowed and
    /// end the trajectory that reached them.
    fn logp_and_grad(&self, position: ArrayView1<f64>) -> (f64, Array1<f64>);

    /// Location and per-coordinate scale used to whiten the sampling space.
    fn reference_point(&self) -> (Array1<f64>, Array1<f64>) {
        (Array1::zeros(self.dim()), Array1::ones(self.dim()))
    }
}

/// Configuration for NUTS sampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutsConfig {
    /// Number of samples to collect per chain (after warmup)
    pub n_samples: usize,
    /// Number of warmup iterations to discard
    pub n_warmup: usize,
    /// Number of parallel chains
    pub n_chains: usize,
    /// Target acceptance probability (0.6-0.9 recommended)
    pub target_accept: f64,
    /// Base seed for the starting points and every chain's RNG
    pub seed: u64,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self {
            n_samples: 2000,
            n_warmup: 1000,
            n_chains: 4,
            target_accept: 0.8,
            seed: 42,
        }
    }
}

impl NutsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.n_samples == 0 {
            return Err("n_samples must be at least 1".to_string());
        }
        if self.n_chains == 0 {
            return Err("n_chains must be at least 1".to_string());
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(format!(
                "target_accept must lie strictly between 0 and 1, got {}",
                self.target_accept
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid whitening reference: {0}")]
    InvalidReference(String),
    #[error(
        "Chain {chain} found no starting point with a finite log density after {attempts} attempts."
    )]
    NoFiniteStart { chain: usize, attempts: usize },
    #[error("Inconsistent trace dimensions: {0}")]
    InconsistentTrace(String),
}

/// Raw output of a sampling run, in the unconstrained space.
#[derive(Clone, Debug)]
pub struct NutsDraws {
    /// Shape: (chain, draw, dim).
    pub draws: Array3<f64>,
    /// Leapfrog evaluations that landed on a non-finite log density.
    pub non_finite_evaluations: usize,
}

/// Whitened target with analytical gradients.
///
/// Everything is behind `Arc`, so the clone mini-mcmc makes for every chain
/// shares the model, the reference point and the failure counter.
struct WhitenedTarget<T> {
    model: Arc<T>,
    center: Arc<Array1<f64>>,
    scale: Arc<Array1<f64>>,
    non_finite: Arc<AtomicUsize>,
}

impl<T> Clone for WhitenedTarget<T> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            center: Arc::clone(&self.center),
            scale: Arc::clone(&self.scale),
            non_finite: Arc::clone(&self.non_finite),
        }
    }
}

impl<T: LogDensity> WhitenedTarget<T> {
    fn new(model: T) -> Result<Self, SamplingError> {
        let dim = model.dim();
        let (center, scale) = model.reference_point();
        if center.len() != dim || scale.len() != dim {
            return Err(SamplingError::InvalidReference(format!(
                "expected {dim} coordinates, got center {} and scale {}",
                center.len(),
                scale.len()
            )));
        }
        if let Some(bad) = scale.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(SamplingError::InvalidReference(format!(
                "scale of coordinate {bad} is {}, it must be finite and positive",
                scale[bad]
            )));
        }
        if center.iter().any(|c| !c.is_finite()) {
            return Err(SamplingError::InvalidReference(
                "center has non-finite coordinates".to_string(),
            ));
        }
        Ok(Self {
            model: Arc::new(model),
            center: Arc::new(center),
            scale: Arc::new(scale),
            non_finite: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// q = center + scale ⊙ z
    fn to_model_space(&self, z: ArrayView1<f64>) -> Array1<f64> {
        self.center.as_ref() + &(&z * self.scale.as_ref())
    }

    /// Log density and its gradient with respect to the whitened coordinates.
    fn compute_logp_and_grad_z(&self, z: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let q = self.to_model_space(z);
        let (logp, grad_q) = self.model.logp_and_grad(q.view());
        if !logp.is_finite() {
            self.non_finite.fetch_add(1, Ordering::Relaxed);
        }
        (logp, grad_q * self.scale.as_ref())
    }

    fn evaluate(&self, z: Tensor<NutsBackend, 1>) -> (f64, Array1<f64>) {
        match z.into_data().to_vec::<f64>() {
            Ok(values) => self.compute_logp_and_grad_z(ArrayView1::from(&values)),
            Err(_) => {
                self.non_finite.fetch_add(1, Ordering::Relaxed);
                (f64::NAN, Array1::from_elem(self.scale.len(), f64::NAN))
            }
        }
    }

    /// A jittered whitened starting point with a finite density and gradient.
    /// The jitter widens with every failed attempt.
    fn initial_position(&self, rng: &mut StdRng) -> Option<Vec<f64>> {
        let dim = self.scale.len();
        for attempt in 0..MAX_INIT_ATTEMPTS {
            let spread = INIT_JITTER * (1 + attempt) as f64;
            let z: Array1<f64> = (0..dim)
                .map(|_| {
                    let draw: f64 = StandardNormal.sample(rng);
                    spread * draw
                })
                .collect();
            let (logp, grad) = self.model.logp_and_grad(self.to_model_space(z.view()).view());
            if logp.is_finite() && grad.iter().all(|g| g.is_finite()) {
                if attempt > 0 {
                    log::debug!("Found finite starting point after {} attempts", attempt + 1);
                }
                return Some(z.to_vec());
            }
        }
        None
    }
}

/// Implement GradientTarget for NUTS with analytical gradients.
impl<T: LogDensity> GradientTarget<f64, NutsBackend> for WhitenedTarget<T> {
    fn unnorm_logp(&self, z: Tensor<NutsBackend, 1>) -> Tensor<NutsBackend, 1> {
        let device = z.device();
        let (logp, _) = self.evaluate(z);
        Tensor::<NutsBackend, 1>::from_data(TensorData::new(vec![logp], [1]), &device)
    }

    fn unnorm_logp_and_grad(
        &self,
        z: Tensor<NutsBackend, 1>,
    ) -> (Tensor<NutsBackend, 1>, Tensor<NutsBackend, 1>) {
        let device = z.device();
        let (logp, grad_z) = self.evaluate(z);

        let logp_tensor =
            Tensor::<NutsBackend, 1>::from_data(TensorData::new(vec![logp], [1]), &device);
        let dim = grad_z.len();
        let grad_tensor =
            Tensor::<NutsBackend, 1>::from_data(TensorData::new(grad_z.to_vec(), [dim]), &device);

        (logp_tensor, grad_tensor)
    }
}

/// Runs `config.n_chains` NUTS chains against `target` and returns the draws
/// mapped back to the target's own coordinates.
pub fn run_nuts_sampling<T>(target: &T, config: &NutsConfig) -> Result<NutsDraws, SamplingError>
where
    T: LogDensity + Clone + Send + Sync + 'static,
{
    config.validate().map_err(SamplingError::InvalidConfig)?;
    let whitened = WhitenedTarget::new(target.clone())?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let initial_positions = (0..config.n_chains)
        .map(|chain| {
            whitened
                .initial_position(&mut rng)
                .ok_or(SamplingError::NoFiniteStart {
                    chain,
                    attempts: MAX_INIT_ATTEMPTS,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::info!(
        "Starting NUTS: {} chains, {} warmup and {} draws each, target_accept={}",
        config.n_chains,
        config.n_warmup,
        config.n_samples,
        config.target_accept
    );
    let progress = create_spinner(&format!(
        "Sampling {} chains ({} tune + {} draws)",
        config.n_chains, config.n_warmup, config.n_samples
    ));
    let start = Instant::now();

    let mut sampler = NUTS::<f64, NutsBackend, WhitenedTarget<T>>::new(
        whitened.clone(),
        initial_positions,
        config.target_accept,
    )
    .set_seed(config.seed);
    let samples_tensor = sampler.run(config.n_samples, config.n_warmup);
    progress.finish_and_clear();

    let [n_chains, n_draws, dim] = samples_tensor.dims();
    let data = samples_tensor
        .into_data()
        .to_vec::<f64>()
        .map_err(|e| SamplingError::InconsistentTrace(format!("{e:?}")))?;
    let mut draws = Array3::from_shape_vec((n_chains, n_draws, dim), data)
        .map_err(|e| SamplingError::InconsistentTrace(e.to_string()))?;

    // Un-whiten: q = center + scale ⊙ z
    for mut position in draws.rows_mut() {
        position *= whitened.scale.as_ref();
        position += whitened.center.as_ref();
    }

    let non_finite_evaluations = whitened.non_finite.load(Ordering::Relaxed);
    log::info!(
        "NUTS sampling complete in {:.2}s ({} non-finite evaluations)",
        start.elapsed().as_secs_f64(),
        non_finite_evaluations
    );

    Ok(NutsDraws {
        draws,
        non_finite_evaluations,
    })
}

fn create_spinner(message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(None, draw_target);
    if let Ok(style) = ProgressStyle::with_template("\n> [{elapsed_precise}] {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));

    pb
}
