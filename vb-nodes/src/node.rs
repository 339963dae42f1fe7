use crate::backend::PrecomputeOptions;
use crate::error::NodeError;
use matrix_param::bundle::{Expectations, Parameters};
use ndarray::Array2;

/// Arguments of one `update_parameters` call
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateArgs<'a> {
    /// Sample indexes of the minibatch; all samples if `None`
    pub minibatch: Option<&'a [usize]>,
    /// Natural-gradient step size `ro` in `(0, 1]`; `1` if `None`
    pub step_size: Option<f64>,
    /// Columns of the inclusion matrix a sparsity node is responsible
    /// for; all columns if `None`
    pub factors_selection: Option<&'a [usize]>,
}

impl<'a> UpdateArgs<'a> {
    /// Deterministic full-batch update
    pub fn full() -> Self {
        Self::default()
    }

    /// Stochastic update on `minibatch` with step size `ro`
    pub fn stochastic(minibatch: &'a [usize], ro: f64) -> Self {
        Self {
            minibatch: Some(minibatch),
            step_size: Some(ro),
            factors_selection: None,
        }
    }

    pub fn with_factors(mut self, factors_selection: &'a [usize]) -> Self {
        self.factors_selection = Some(factors_selection);
        self
    }

    pub fn ro(&self) -> Result<f64, NodeError> {
        match self.step_size {
            None => Ok(1.),
            Some(ro) if ro > 0. && ro <= 1. => Ok(ro),
            Some(ro) => Err(NodeError::InvalidArgument(format!(
                "step size {} is outside (0, 1]",
                ro
            ))),
        }
    }
}

/// One latent node of the mean-field factorization
pub trait VariationalNode {
    /// Neighbours this node reads during update and ELBO evaluation
    type Blanket<'a>;

    /// (rows, columns) of the posterior
    fn dim(&self) -> (usize, usize);

    /// Axis indexing latent factors
    fn factors_axis(&self) -> usize;

    /// Bind axis conventions and the array backend before the first update
    fn precompute(&mut self, options: &PrecomputeOptions);

    /// Parameters of the variational posterior `Q`
    fn get_parameters(&self) -> Parameters;

    /// Replace the parameters of `Q`; expectations become stale
    fn set_parameters(&mut self, params: Parameters) -> anyhow::Result<()>;

    /// Posterior moments, broadcast to the dependent node's shape if `expand`
    fn get_expectations(&self, expand: bool) -> Expectations;

    /// First moment only
    fn get_expectation(&self, expand: bool) -> Array2<f64> {
        self.get_expectations(expand).into_primary()
    }

    fn update_parameters(
        &mut self,
        blanket: &Self::Blanket<'_>,
        args: &UpdateArgs<'_>,
    ) -> anyhow::Result<()>;

    /// This node's additive contribution to the evidence lower bound
    fn calculate_elbo(&self, blanket: &Self::Blanket<'_>) -> anyhow::Result<f64>;

    /// Drop factors and renumber the remaining ones
    fn remove_factors(&mut self, remove: &[usize]) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_size_defaults_and_bounds() {
        assert_eq!(UpdateArgs::full().ro().ok(), Some(1.));
        let ix = [0, 1];
        assert_eq!(UpdateArgs::stochastic(&ix, 0.25).ro().ok(), Some(0.25));
        assert!(UpdateArgs::stochastic(&ix, 0.).ro().is_err());
        assert!(UpdateArgs::stochastic(&ix, 1.5).ro().is_err());
    }
}
