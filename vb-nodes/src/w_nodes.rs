//! Gaussian factor loadings.
//!
//! ```text
//! w[d,k] ~ N(μ[d,k], 1/α[d,k])
//! ```
//!
//! The posterior is refreshed one factor at a time. Factor `k` sees
//! the loadings of factors `< k` already updated in the same sweep
//! (Gauss-Seidel order).

use crate::backend::{Backend, PrecomputeOptions};
use crate::error::{check_shape, NodeError};
use crate::markov_blanket::*;
use crate::node::{UpdateArgs, VariationalNode};
use log::{debug, info};
use matrix_param::bundle::{Expectations, Family, Parameters};
use matrix_param::ndarray_gaussian::{GaussianMatrix, GaussianMoments, GaussianParams};
use matrix_param::pair::PriorPosterior;
use matrix_param::traits::VariationalDistribution;
use matrix_util::utils::complement_indices;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;
use ndarray::prelude::*;
use ndarray::Zip;
use rand::Rng;
use rand_distr::StandardNormal;

/// Covariance of the loadings of one factor across features
#[derive(Debug, Clone)]
pub enum Covariance {
    Diagonal(Array1<f64>),
    Dense(Array2<f64>),
    /// accepted as a prior but cannot be sampled from
    Sparse(CscMatrix<f64>),
}

impl Covariance {
    fn dim(&self) -> (usize, usize) {
        match self {
            Covariance::Diagonal(var) => (var.len(), var.len()),
            Covariance::Dense(cov) => cov.dim(),
            Covariance::Sparse(cov) => (cov.nrows(), cov.ncols()),
        }
    }
}

/// Prior covariance shared by all factors or given per factor
#[derive(Debug, Clone)]
pub enum PriorCovariance {
    Fixed(Covariance),
    PerFactor(Vec<Covariance>),
}

impl PriorCovariance {
    fn factor(&self, k: usize) -> &Covariance {
        match self {
            PriorCovariance::Fixed(cov) => cov,
            PriorCovariance::PerFactor(covs) => &covs[k],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFrom {
    Prior,
    Posterior,
}

pub struct WNode {
    pq: PriorPosterior<GaussianMatrix>,
    covariates: Vec<bool>,
    prior_covariance: PriorCovariance,
    factors_axis: usize,
    backend: Backend,
}

impl WNode {
    /// * `pq` - prior and initial posterior, shaped `(D, K)`
    /// * `idx_covariates` - factors whose loadings are held fixed
    pub fn new(
        pq: PriorPosterior<GaussianMatrix>,
        idx_covariates: Option<&[usize]>,
    ) -> anyhow::Result<Self> {
        let (_, kk) = pq.dim();

        let mut covariates = vec![false; kk];
        for &k in idx_covariates.unwrap_or(&[]) {
            if k >= kk {
                return Err(NodeError::InvalidArgument(format!(
                    "covariate {} is not among the {} factors",
                    k, kk
                ))
                .into());
            }
            covariates[k] = true;
        }

        let prior_covariance = PriorCovariance::PerFactor(
            pq.p.var()
                .columns()
                .into_iter()
                .map(|var_k| Covariance::Diagonal(var_k.to_owned()))
                .collect(),
        );

        Ok(Self {
            pq,
            covariates,
            prior_covariance,
            factors_axis: 1,
            backend: Backend::default(),
        })
    }

    /// Replace the default (diagonal, from the prior variance) prior
    /// covariance used by `sample`
    pub fn with_prior_covariance(mut self, cov: PriorCovariance) -> anyhow::Result<Self> {
        let (dd, kk) = self.dim();
        match &cov {
            PriorCovariance::Fixed(c) => check_shape("prior covariance", (dd, dd), c.dim())?,
            PriorCovariance::PerFactor(covs) => {
                if covs.len() != kk {
                    return Err(NodeError::DimensionMismatch(format!(
                        "{} prior covariances for {} factors",
                        covs.len(),
                        kk
                    ))
                    .into());
                }
                for c in covs {
                    check_shape("prior covariance", (dd, dd), c.dim())?;
                }
            }
        }
        self.prior_covariance = cov;
        Ok(self)
    }

    pub fn prior(&self) -> &GaussianMatrix {
        &self.pq.p
    }

    pub fn posterior(&self) -> &GaussianMatrix {
        &self.pq.q
    }

    /// Factors that are not covariates
    pub fn latent_factor_indices(&self) -> Vec<usize> {
        self.covariates
            .iter()
            .enumerate()
            .filter_map(|(k, &cov)| if cov { None } else { Some(k) })
            .collect()
    }

    /// Draw a `(D, K)` matrix of loadings, one multivariate Gaussian per
    /// factor.
    ///
    /// Prior draws take the mean from `prior_mean` (else the fixed
    /// prior mean) and an isotropic covariance `1/E[α_k]` from
    /// `prior_precision` (else the stored prior covariance); each
    /// factor's draw is centred across features. The precision is
    /// inverted once, so the per-feature variance is `1/E[α_k]` and
    /// not `(1/E[α_k])²`.
    pub fn sample<R: Rng>(
        &self,
        from: SampleFrom,
        prior_mean: Option<&dyn PriorMeanSource>,
        prior_precision: Option<&dyn PriorPrecisionSource>,
        rng: &mut R,
    ) -> anyhow::Result<Array2<f64>> {
        let (dd, kk) = self.dim();
        let mut out = Array2::<f64>::zeros((dd, kk));
        if dd == 0 {
            return Ok(out);
        }

        match from {
            SampleFrom::Prior => {
                let mean = prior_mean_or_fixed(prior_mean, (dd, kk), self.pq.p.mean())?.e;
                let alpha = match prior_precision {
                    Some(src) => Some(prior_precision_or_fixed(Some(src), (dd, kk), self.pq.p.var())?.e),
                    None => None,
                };

                for k in 0..kk {
                    let isotropic;
                    let cov_k = match &alpha {
                        Some(alpha) => {
                            isotropic = Covariance::Diagonal(Array1::from_elem(dd, 1. / alpha[(0, k)]));
                            &isotropic
                        }
                        None => self.prior_covariance.factor(k),
                    };
                    let mut w_k = sample_mvn(mean.column(k), cov_k, rng)?;
                    let centre = w_k.mean().unwrap_or(0.);
                    w_k -= centre;
                    out.column_mut(k).assign(&w_k);
                }
            }
            SampleFrom::Posterior => {
                let q = self.pq.q.params();
                for k in 0..kk {
                    let cov_k = Covariance::Diagonal(q.var.column(k).to_owned());
                    out.column_mut(k)
                        .assign(&sample_mvn(q.mean.column(k), &cov_k, rng)?);
                }
            }
        }
        Ok(out)
    }

    /// Sequential sweep over the latent factors
    ///
    /// * `data` - masked minibatch inputs
    /// * `alpha` - prior precision `(D, K)`
    /// * `mu` - prior mean `(D, K)`
    /// * `q` - posterior parameters, updated in place
    /// * `ro` - step size
    fn update_factors(
        &self,
        data: &MinibatchData,
        alpha: &Array2<f64>,
        mu: &Array2<f64>,
        q: &mut GaussianParams,
        ro: f64,
    ) {
        let kk = q.mean.ncols();
        let coeff = data.coeff;

        for k in self.latent_factor_indices() {
            let z_k = data.z.e.column(k);

            let precision = self.backend.t_dot_vec(&data.tau.view(), &data.z.e2.column(k)) * coeff;

            // residual without factor k, using this sweep's loadings
            let others: Vec<usize> = (0..kk).filter(|&j| j != k).collect();
            let z_rest = data.z.e.select(Axis(1), &others);
            let w_rest = q.mean.select(Axis(1), &others);
            let fitted = self.backend.dot(&z_rest.view(), &w_rest.t());
            let resid = (&data.y - &fitted) * &data.tau;

            let numerator = self.backend.t_dot_vec(&resid.view(), &z_k) * coeff;

            let denom = &alpha.column(k) + &precision;

            Zip::from(q.var.column_mut(k))
                .and(&denom)
                .for_each(|var, &denom| {
                    *var = (1. - ro) * *var + ro / denom;
                });

            Zip::from(q.mean.column_mut(k))
                .and(&denom)
                .and(&numerator)
                .and(alpha.column(k))
                .and(mu.column(k))
                .for_each(|mean, &denom, &num, &alpha, &mu| {
                    *mean = (1. - ro) * *mean + ro * (num + alpha * mu) / denom;
                });
        }
    }
}

fn sample_mvn<R: Rng>(
    mean: ArrayView1<f64>,
    cov: &Covariance,
    rng: &mut R,
) -> anyhow::Result<Array1<f64>> {
    let dd = mean.len();
    check_shape("covariance", (dd, dd), cov.dim())?;

    match cov {
        Covariance::Diagonal(var) => {
            let mut out = Array1::<f64>::zeros(dd);
            for ((x, &m), &v) in out.iter_mut().zip(mean.iter()).zip(var.iter()) {
                let eps: f64 = rng.sample(StandardNormal);
                *x = m + v.sqrt() * eps;
            }
            Ok(out)
        }
        Covariance::Dense(cov) => {
            let cov = DMatrix::from_fn(dd, dd, |i, j| cov[(i, j)]);
            let chol = cov.cholesky().ok_or_else(|| {
                NodeError::InvalidArgument("covariance is not positive definite".into())
            })?;
            let eps: DVector<f64> = DVector::from_fn(dd, |_, _| rng.sample(StandardNormal));
            let x = chol.l() * eps;
            Ok(Array1::from_iter(
                mean.iter().zip(x.iter()).map(|(&m, &x)| m + x),
            ))
        }
        Covariance::Sparse(_) => Err(NodeError::UnsupportedConfiguration(
            "sampling with a sparse prior covariance is not implemented".into(),
        )
        .into()),
    }
}

impl VariationalNode for WNode {
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
        self.backend.announce("W");
    }

    fn get_parameters(&self) -> Parameters {
        Parameters::Gaussian(self.pq.q.params().clone())
    }

    fn set_parameters(&mut self, params: Parameters) -> anyhow::Result<()> {
        match params {
            Parameters::Gaussian(par) => {
                self.pq.q.set_params(par).map_err(NodeError::from)?;
                Ok(())
            }
            other => Err(NodeError::WrongFamily {
                expected: Family::Gaussian,
                found: other.family(),
            }
            .into()),
        }
    }

    fn get_expectations(&self, _expand: bool) -> Expectations {
        Expectations::Gaussian(self.pq.q.moments().clone())
    }

    fn update_parameters(
        &mut self,
        blanket: &Self::Blanket<'_>,
        args: &UpdateArgs<'_>,
    ) -> anyhow::Result<()> {
        let ro = args.ro()?;
        let dim = self.dim();
        let data = blanket.gather(args.minibatch, dim)?;

        let alpha = prior_precision_or_fixed(blanket.prior_precision, dim, self.pq.p.var())?.e;
        let mu = prior_mean_or_fixed(blanket.prior_mean, dim, self.pq.p.mean())?.e;

        let mut q = self.pq.q.params().clone();
        self.update_factors(&data, &alpha, &mu, &mut q, ro);
        self.pq.q.set_params(q).map_err(NodeError::from)?;

        debug!(
            "W: updated {} factors on {} samples (coeff {:.3}, ro {:.3})",
            self.latent_factor_indices().len(),
            data.y.nrows(),
            data.coeff,
            ro
        );
        Ok(())
    }

    /// Cross entropy of `Q` against the prior minus entropy of `Q` over
    /// the latent (non-covariate) factors
    fn calculate_elbo(&self, blanket: &Self::Blanket<'_>) -> anyhow::Result<f64> {
        let dim = self.dim();
        let lv = self.latent_factor_indices();

        let alpha = prior_precision_or_fixed(blanket.prior_precision, dim, self.pq.p.var())?;
        let prior: GaussianMoments = prior_mean_or_fixed(blanket.prior_mean, dim, self.pq.p.mean())?;
        let q = self.pq.q.params();
        let qm = self.pq.q.moments();

        let alpha_e = alpha.e.select(Axis(1), &lv);
        let alpha_ln_e = alpha.ln_e.select(Axis(1), &lv);
        let pe = prior.e.select(Axis(1), &lv);
        let pe2 = prior.e2.select(Axis(1), &lv);
        let qe = qm.e.select(Axis(1), &lv);
        let qe2 = qm.e2.select(Axis(1), &lv);
        let qvar = q.var.select(Axis(1), &lv);

        let quad = &qe2 * 0.5 - &pe * &qe + &pe2 * 0.5;
        let lb_p = -(&quad * &alpha_e).sum() + 0.5 * alpha_ln_e.sum();
        let lb_q = -(qvar.mapv(f64::ln).sum() + (dim.0 * lv.len()) as f64) / 2.;

        Ok(lb_p - lb_q)
    }

    fn remove_factors(&mut self, remove: &[usize]) -> anyhow::Result<()> {
        let kk = self.dim().1;
        self.pq.remove_along(self.factors_axis, remove)?;

        let keep = complement_indices(kk, remove);
        self.covariates = keep.iter().map(|&k| self.covariates[k]).collect();
        if let PriorCovariance::PerFactor(covs) = &self.prior_covariance {
            self.prior_covariance =
                PriorCovariance::PerFactor(keep.iter().map(|&k| covs[k].clone()).collect());
        }

        info!("W: removed factors {:?}, {} left", remove, self.dim().1);
        Ok(())
    }
}
