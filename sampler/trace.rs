//! Posterior trace: constrained draws and pointwise log-likelihood, indexed
//! by chain and draw.

use ndarray::{Array1, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut1, Axis, s};

use crate::sampler::nuts::{LogDensity, NutsDraws, SamplingError};

/// A model that can be sampled and then reported on in its natural scale.
pub trait PosteriorModel: LogDensity {
    /// One name per constrained parameter, in the order [`Self::constrain`] returns them.
    fn parameter_names(&self) -> Vec<String>;

    /// Maps an unconstrained position to the reported parameter values.
    fn constrain(&self, position: ArrayView1<f64>) -> Array1<f64>;

    fn n_observations(&self) -> usize;

    /// Writes log p(y_i | θ) for every observation into `out`.
    fn pointwise_log_likelihood(&self, position: ArrayView1<f64>, out: ArrayViewMut1<f64>);
}

#[derive(Clone, Debug)]
pub struct PosteriorTrace {
    parameter_names: Vec<String>,
    /// Shape: (chain, draw, parameter).
    samples: Array3<f64>,
    /// Shape: (chain, draw, observation).
    log_likelihood: Array3<f64>,
    non_finite_evaluations: usize,
}

impl PosteriorTrace {
    pub fn new(
        parameter_names: Vec<String>,
        samples: Array3<f64>,
        log_likelihood: Array3<f64>,
        non_finite_evaluations: usize,
    ) -> Result<Self, SamplingError> {
        let (n_chains, n_draws, n_params) = samples.dim();
        if n_params != parameter_names.len() {
            return Err(SamplingError::InconsistentTrace(format!(
                "{} parameter names for {} parameter columns",
                parameter_names.len(),
                n_params
            )));
        }
        let (ll_chains, ll_draws, _) = log_likelihood.dim();
        if (ll_chains, ll_draws) != (n_chains, n_draws) {
            return Err(SamplingError::InconsistentTrace(format!(
                "log-likelihood has {ll_chains} chains x {ll_draws} draws, samples have {n_chains} x {n_draws}"
            )));
        }
        Ok(Self {
            parameter_names,
            samples,
            log_likelihood,
            non_finite_evaluations,
        })
    }

    /// Assembles the trace from raw sampler output, constraining every draw
    /// and evaluating the pointwise log-likelihood.
    pub fn from_draws<M: PosteriorModel>(
        model: &M,
        raw: &NutsDraws,
    ) -> Result<Self, SamplingError> {
        let names = model.parameter_names();
        let (n_chains, n_draws, dim) = raw.draws.dim();
        if dim != model.dim() {
            return Err(SamplingError::InconsistentTrace(format!(
                "draws have {dim} coordinates, the model has {}",
                model.dim()
            )));
        }

        let mut samples = Array3::<f64>::zeros((n_chains, n_draws, names.len()));
        let mut log_likelihood = Array3::<f64>::zeros((n_chains, n_draws, model.n_observations()));

        for (c, chain) in raw.draws.outer_iter().enumerate() {
            for (d, position) in chain.outer_iter().enumerate() {
                samples
                    .slice_mut(s![c, d, ..])
                    .assign(&model.constrain(position));
                model.pointwise_log_likelihood(position, log_likelihood.slice_mut(s![c, d, ..]));
            }
        }

        Self::new(names, samples, log_likelihood, raw.non_finite_evaluations)
    }

    pub fn n_chains(&self) -> usize {
        self.samples.len_of(Axis(0))
    }

    pub fn n_draws(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameter_names.iter().position(|n| n == name)
    }

    /// Draws of one parameter, shape (chain, draw).
    pub fn parameter(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.parameter_index(name)
            .map(|idx| self.samples.index_axis(Axis(2), idx))
    }

    pub fn parameter_at(&self, idx: usize) -> ArrayView2<'_, f64> {
        self.samples.index_axis(Axis(2), idx)
    }

    /// All draws of one parameter with chains concatenated.
    pub fn flat_samples(&self, name: &str) -> Option<Vec<f64>> {
        self.parameter(name).map(|view| view.iter().copied().collect())
    }

    pub fn log_likelihood(&self) -> ArrayView3<'_, f64> {
        self.log_likelihood.view()
    }

    /// Leapfrog evaluations during sampling that hit a non-finite log density.
    pub fn non_finite_evaluations(&self) -> usize {
        self.non_finite_evaluations
    }
}
