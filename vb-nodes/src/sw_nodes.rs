//! Spike-and-slab factor loadings.
//!
//! ```text
//! s[d,k] ~ Bernoulli(θ[d,k])
//! w[d,k] | s = 1 ~ N(0, 1/α[d,k])
//! w[d,k] | s = 0 = 0
//! ```
//!
//! The posterior keeps, per loading, an inclusion probability and the
//! slab Gaussian conditioned on inclusion. Both are refreshed factor
//! by factor.

use crate::backend::{Backend, PrecomputeOptions};
use crate::error::{check_shape, NodeError};
use crate::markov_blanket::*;
use crate::node::{UpdateArgs, VariationalNode};
use log::{debug, info};
use matrix_param::bundle::{Expectations, Family, Parameters};
use matrix_param::ndarray_beta::BetaMoments;
use matrix_param::ndarray_spike_slab::{SpikeSlabMatrix, SpikeSlabParams};
use matrix_param::pair::PriorPosterior;
use matrix_param::traits::VariationalDistribution;
use matrix_util::traits::FiniteSumOps;
use ndarray::prelude::*;
use ndarray::Zip;

pub struct SWNode {
    pq: PriorPosterior<SpikeSlabMatrix>,
    factors_axis: usize,
    backend: Backend,
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let ex = x.exp();
        ex / (1. + ex)
    }
}

impl SWNode {
    /// * `pq` - prior and initial posterior, shaped `(D, K)`
    pub fn new(pq: PriorPosterior<SpikeSlabMatrix>) -> Self {
        Self {
            pq,
            factors_axis: 1,
            backend: Backend::default(),
        }
    }

    pub fn prior(&self) -> &SpikeSlabMatrix {
        &self.pq.p
    }

    pub fn posterior(&self) -> &SpikeSlabMatrix {
        &self.pq.q
    }

    fn sparsity_moments(&self, blanket: &LoadingBlanket<'_>) -> anyhow::Result<BetaMoments> {
        let theta = blanket.require_sparsity()?.expanded_moments();
        check_shape("sparsity ThetaW (log)", self.dim(), theta.ln_e.dim())?;
        check_shape("sparsity ThetaW (log inverse)", self.dim(), theta.ln_e_inv.dim())?;
        Ok(theta)
    }

    /// One factor's inclusion and slab update.
    ///
    /// `sw` holds the expected loadings `θ·mean_b1`. On entry its
    /// columns `< k` already carry this sweep's values and columns
    /// `> k` the previous sweep's; on return column `k` is refreshed.
    #[allow(clippy::too_many_arguments)]
    fn update_factor(
        &self,
        k: usize,
        data: &MinibatchData,
        alpha: &PrecisionMoments,
        theta: &BetaMoments,
        q: &mut SpikeSlabParams,
        sw: &mut Array2<f64>,
        ro: f64,
    ) {
        let kk = sw.ncols();
        let coeff = data.coeff;
        let z_k = data.z.e.column(k);

        let precision =
            &alpha.e.column(k) + &(self.backend.t_dot_vec(&data.tau.view(), &data.z.e2.column(k)) * coeff);

        let others: Vec<usize> = (0..kk).filter(|&j| j != k).collect();
        let z_rest = data.z.e.select(Axis(1), &others);
        let sw_rest = sw.select(Axis(1), &others);
        let fitted = self.backend.dot(&z_rest.view(), &sw_rest.t());
        let resid = (&data.y - &fitted) * &data.tau;
        let num = self.backend.t_dot_vec(&resid.view(), &z_k) * coeff;

        Zip::from(q.var_b1.column_mut(k))
            .and(q.mean_b1.column_mut(k))
            .and(&precision)
            .and(&num)
            .for_each(|var_dk, mean_dk, &prec, &num| {
                *var_dk = (1. - ro) * *var_dk + ro / prec;
                *mean_dk = (1. - ro) * *mean_dk + ro * num / prec;
            });

        // inclusion logit: prior log-odds plus the Gaussian evidence
        // (the quadratic term carries the minibatch rescaling once more)
        let mut logit = &theta.ln_e.column(k) - &theta.ln_e_inv.column(k);
        Zip::from(&mut logit)
            .and(alpha.ln_e.column(k))
            .and(&precision)
            .and(&num)
            .for_each(|logit, &ln_alpha, &prec, &num| {
                *logit += 0.5 * ln_alpha - 0.5 * prec.ln() + 0.5 * coeff * num * num / prec;
            });

        Zip::from(q.theta.column_mut(k))
            .and(&logit)
            .for_each(|theta_dk, &logit| {
                *theta_dk = (1. - ro) * *theta_dk + ro * sigmoid(logit);
            });

        let fresh = &q.theta.column(k) * &q.mean_b1.column(k);
        sw.column_mut(k).assign(&fresh);
    }
}

impl VariationalNode for SWNode {
    type Blanket<'a> = LoadingBlanket<'a>;

    fn dim(&self) -> (usize, usize) {
        self.pq.dim()
    }

    fn factors_axis(&self) -> usize {
        self.factors_axis
    }

    fn precompute(&mut self, options: &PrecomputeOptions) {
        self.factors_axis = 1;
        self.backend = options.backend;
        self.backend.announce("SW");
    }

    fn get_parameters(&self) -> Parameters {
        Parameters::SpikeSlab(self.pq.q.params().clone())
    }

    fn set_parameters(&mut self, params: Parameters) -> anyhow::Result<()> {
        match params {
            Parameters::SpikeSlab(par) => {
                self.pq.q.set_params(par).map_err(NodeError::from)?;
                Ok(())
            }
            other => Err(NodeError::WrongFamily {
                expected: Family::SpikeSlab,
                found: other.family(),
            }
            .into()),
        }
    }

    fn get_expectations(&self, _expand: bool) -> Expectations {
        Expectations::SpikeSlab(self.pq.q.moments().clone())
    }

    fn update_parameters(
        &mut self,
        blanket: &Self::Blanket<'_>,
        args: &UpdateArgs<'_>,
    ) -> anyhow::Result<()> {
        let ro = args.ro()?;
        let dim = self.dim();

        let theta = self.sparsity_moments(blanket)?;
        let data = blanket.gather(args.minibatch, dim)?;
        let alpha = prior_precision_or_fixed(blanket.prior_precision, dim, self.pq.p.var_b1())?;

        let mut q = self.pq.q.params().clone();
        let mut sw = &q.theta * &q.mean_b1;

        for k in 0..dim.1 {
            self.update_factor(k, &data, &alpha, &theta, &mut q, &mut sw, ro);
        }

        Zip::from(&mut q.var_b0)
            .and(&alpha.e)
            .for_each(|var, &alpha| *var = (1. - ro) * *var + ro / alpha);
        q.mean_b0.fill(0.);

        self.pq.q.set_params(q).map_err(NodeError::from)?;

        debug!(
            "SW: E[s] column means {:.4} (coeff {:.3}, ro {:.3})",
            self.pq.q.theta().mean_axis(Axis(0)).unwrap_or_default(),
            data.coeff,
            ro
        );
        Ok(())
    }

    /// Slab Gaussian part weighted by the inclusion probabilities plus
    /// the Bernoulli part against the sparsity log-odds
    fn calculate_elbo(&self, blanket: &Self::Blanket<'_>) -> anyhow::Result<f64> {
        let dim = self.dim();
        let theta = self.sparsity_moments(blanket)?;
        let alpha = prior_precision_or_fixed(blanket.prior_precision, dim, self.pq.p.var_b1())?;

        let q = self.pq.q.params();
        let m = self.pq.q.moments();

        // continuous part; the entropy constant counts every (d, k) cell
        let lb_pw = 0.5 * (alpha.ln_e.sum() - (&alpha.e * &m.e2).sum());

        let mut ent = Array2::<f64>::zeros(dim);
        Zip::from(&mut ent)
            .and(&m.eb)
            .and(&q.var_b1)
            .and(&alpha.e)
            .for_each(|ent, &eb, &var_b1, &alpha| {
                *ent = eb * var_b1.ln() + (1. - eb) * (1. / alpha).ln();
            });
        let lb_qw = -0.5 * (dim.0 * dim.1) as f64 - 0.5 * ent.sum();

        // discrete part, 0·ln 0 counted as 0
        let mut lb_ps = Array2::<f64>::zeros(dim);
        let mut lb_qs = Array2::<f64>::zeros(dim);
        Zip::from(&mut lb_ps)
            .and(&mut lb_qs)
            .and(&m.eb)
            .and(&theta.ln_e)
            .and(&theta.ln_e_inv)
            .for_each(|ps, qs, &eb, &ln_e, &ln_e_inv| {
                *ps = eb * ln_e + (1. - eb) * ln_e_inv;
                *qs = eb * eb.ln() + (1. - eb) * (1. - eb).ln();
            });

        Ok(lb_pw - lb_qw + lb_ps.sum_ignore_nan() - lb_qs.sum_ignore_nan())
    }

    fn remove_factors(&mut self, remove: &[usize]) -> anyhow::Result<()> {
        self.pq.remove_along(self.factors_axis, remove)?;
        info!("SW: removed factors {:?}, {} left", remove, self.dim().1);
        Ok(())
    }
}

impl InclusionSource for SWNode {
    fn expected_inclusion(&self) -> Array2<f64> {
        self.pq.q.moments().eb.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sigmoid_is_stable() {
        assert_abs_diff_eq!(sigmoid(0.), 0.5);
        assert_abs_diff_eq!(sigmoid(800.), 1.);
        assert_abs_diff_eq!(sigmoid(-800.), 0.);
        assert_abs_diff_eq!(sigmoid(2.) + sigmoid(-2.), 1., epsilon = 1e-15);
    }

    #[test]
    fn wrong_family_is_rejected() -> anyhow::Result<()> {
        let p = SpikeSlabMatrix::new((3, 2), 1., 0., 1., 0.5)?;
        let q = SpikeSlabMatrix::new((3, 2), 1., 0., 1., 0.5)?;
        let mut sw = SWNode::new(PriorPosterior::new(p, q)?);
        let beta = matrix_param::ndarray_beta::BetaMatrix::new((3, 2), 1., 1.)?;
        let err = match sw.set_parameters(Parameters::Beta(beta.params().clone())) {
            Err(err) => err,
            Ok(_) => anyhow::bail!("accepted Beta parameters"),
        };
        assert!(matches!(
            err.downcast_ref::<NodeError>(),
            Some(NodeError::WrongFamily { .. })
        ));
        Ok(())
    }
}
