//! Neighbours a node reads from during its update.
//!
//! Each updating node names the roles it depends on as typed slots of
//! a blanket struct. The caller (the model graph) fills the slots with
//! borrowed neighbours; required roles are plain references and
//! optional roles are `Option`s that fall back to the node's own prior
//! when empty.

use crate::error::{check_shape, NodeError};
use log::debug;
use matrix_param::ndarray_beta::BetaMoments;
use matrix_param::ndarray_gaussian::GaussianMoments;
use matrix_util::traits::SubsetOps;
use ndarray::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Y,
    Z,
    Tau,
    W,
    AlphaW,
    MuW,
    ThetaW,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Y => "Y",
            Role::Z => "Z",
            Role::Tau => "Tau",
            Role::W => "W",
            Role::AlphaW => "AlphaW",
            Role::MuW => "MuW",
            Role::ThetaW => "ThetaW",
        };
        write!(f, "{}", name)
    }
}

/// Observed data matrix (samples x features) with missing entries
pub trait ObservationSource {
    /// Total number of samples `N`, not the minibatch size
    fn n_samples(&self) -> usize;

    /// Observations of the `rows` samples, or all samples if `None`
    fn get_mini_batch(&self, rows: Option<&[usize]>) -> Array2<f64>;

    /// `true` marks a missing entry; shape `(N, D)`
    fn get_mask(&self) -> Array2<bool>;
}

/// Factor scores (samples x factors)
pub trait ScoreSource {
    fn get_mini_batch(&self, rows: Option<&[usize]>) -> GaussianMoments;
}

/// Noise precision expanded to (samples x features)
pub trait NoisePrecisionSource {
    fn get_mini_batch(&self, rows: Option<&[usize]>) -> Array2<f64>;
}

/// `E[α]` and `E[ln α]` of an ARD-type prior precision
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionMoments {
    pub e: Array2<f64>,
    pub ln_e: Array2<f64>,
}

/// Prior precision of the loadings expanded to (features x factors)
pub trait PriorPrecisionSource {
    fn expanded_moments(&self) -> PrecisionMoments;
}

/// Prior mean of the loadings, (features x factors)
pub trait PriorMeanSource {
    fn moments(&self) -> GaussianMoments;
}

/// Sparsity log-odds expanded to the shape of the dependent node
pub trait SparsitySource {
    fn expanded_moments(&self) -> BetaMoments;
}

/// Expected inclusion indicator `E[s]` of a spike-and-slab node
pub trait InclusionSource {
    fn expected_inclusion(&self) -> Array2<f64>;
}

/// Blanket of a loading node (`W`)
#[derive(Clone, Copy)]
pub struct LoadingBlanket<'a> {
    pub observations: &'a dyn ObservationSource,
    pub scores: &'a dyn ScoreSource,
    pub noise_precision: &'a dyn NoisePrecisionSource,
    pub prior_mean: Option<&'a dyn PriorMeanSource>,
    pub prior_precision: Option<&'a dyn PriorPrecisionSource>,
    pub sparsity: Option<&'a dyn SparsitySource>,
}

/// Blanket of a sparsity node (`Theta`): the node whose inclusion
/// indicators it governs
#[derive(Clone, Copy)]
pub struct SparsityBlanket<'a> {
    pub inclusion: &'a dyn InclusionSource,
}

/// Likelihood-side inputs of a loading update restricted to a minibatch
pub struct MinibatchData {
    /// observations, zero at missing entries
    pub y: Array2<f64>,
    /// factor scores
    pub z: GaussianMoments,
    /// noise precision, zero at missing entries
    pub tau: Array2<f64>,
    /// `N / N_minibatch`
    pub coeff: f64,
}

impl<'a> LoadingBlanket<'a> {
    pub fn new(
        observations: &'a dyn ObservationSource,
        scores: &'a dyn ScoreSource,
        noise_precision: &'a dyn NoisePrecisionSource,
    ) -> Self {
        Self {
            observations,
            scores,
            noise_precision,
            prior_mean: None,
            prior_precision: None,
            sparsity: None,
        }
    }

    pub fn with_prior_mean(mut self, prior_mean: &'a dyn PriorMeanSource) -> Self {
        self.prior_mean = Some(prior_mean);
        self
    }

    pub fn with_prior_precision(mut self, prior_precision: &'a dyn PriorPrecisionSource) -> Self {
        self.prior_precision = Some(prior_precision);
        self
    }

    pub fn with_sparsity(mut self, sparsity: &'a dyn SparsitySource) -> Self {
        self.sparsity = Some(sparsity);
        self
    }

    pub fn require_sparsity(&self) -> Result<&'a dyn SparsitySource, NodeError> {
        self.sparsity
            .ok_or(NodeError::MissingCollaborator(Role::ThetaW))
    }

    /// Collect observations, scores and noise precision for the
    /// `minibatch` rows and mask out missing entries.
    ///
    /// * `minibatch` - sample indexes (all samples if `None`)
    /// * `dim` - (features, factors) of the loading node
    pub fn gather(
        &self,
        minibatch: Option<&[usize]>,
        dim: (usize, usize),
    ) -> anyhow::Result<MinibatchData> {
        let (dd, kk) = dim;
        let ntot = self.observations.n_samples();

        if let Some(rows) = minibatch {
            if rows.is_empty() {
                return Err(NodeError::InvalidArgument("empty minibatch".into()).into());
            }
            if let Some(&bad) = rows.iter().find(|&&i| i >= ntot) {
                return Err(NodeError::InvalidArgument(format!(
                    "minibatch index {} is out of range for {} samples",
                    bad, ntot
                ))
                .into());
            }
        }

        let mut y = self.observations.get_mini_batch(minibatch);
        let nn = y.nrows();
        if nn == 0 {
            return Err(NodeError::InvalidArgument("no samples to update from".into()).into());
        }
        check_shape("observations Y", (nn, dd), y.dim())?;

        let mask = self.observations.get_mask();
        check_shape("observation mask", (ntot, dd), mask.dim())?;
        let mask = mask.select_rows_opt(minibatch);

        let z = self.scores.get_mini_batch(minibatch);
        check_shape("scores Z", (nn, kk), z.e.dim())?;
        check_shape("scores Z (second moment)", (nn, kk), z.e2.dim())?;

        let mut tau = self.noise_precision.get_mini_batch(minibatch);
        check_shape("noise precision Tau", (nn, dd), tau.dim())?;

        let mut nmissing = 0_usize;
        ndarray::Zip::from(&mut y)
            .and(&mut tau)
            .and(&mask)
            .for_each(|y_ij, tau_ij, &missing| {
                if missing {
                    *y_ij = 0.;
                    *tau_ij = 0.;
                    nmissing += 1;
                }
            });
        if nmissing > 0 {
            debug!("masked {} missing entries out of {}", nmissing, nn * dd);
        }

        Ok(MinibatchData {
            y,
            z,
            tau,
            coeff: ntot as f64 / nn as f64,
        })
    }
}

/// `E[α]`, `E[ln α]` from the `AlphaW` collaborator, or from the
/// node's fixed prior variance when the role is empty
pub fn prior_precision_or_fixed(
    source: Option<&dyn PriorPrecisionSource>,
    dim: (usize, usize),
    prior_var: &Array2<f64>,
) -> anyhow::Result<PrecisionMoments> {
    match source {
        Some(source) => {
            let alpha = source.expanded_moments();
            check_shape("prior precision AlphaW", dim, alpha.e.dim())?;
            check_shape("prior precision AlphaW (log)", dim, alpha.ln_e.dim())?;
            Ok(alpha)
        }
        None => {
            debug!("no {} in the Markov blanket; using the fixed prior variance", Role::AlphaW);
            let e = prior_var.mapv(|v| 1. / v);
            Ok(PrecisionMoments {
                ln_e: e.mapv(f64::ln),
                e,
            })
        }
    }
}

/// `E[μ]`, `E[μ²]` from the `MuW` collaborator, or the node's fixed
/// prior mean when the role is empty. A fixed mean enters the bound
/// with a zero second moment, so the reported ELBO leaves out the
/// constant `0.5·α·μ²` terms.
pub fn prior_mean_or_fixed(
    source: Option<&dyn PriorMeanSource>,
    dim: (usize, usize),
    prior_mean: &Array2<f64>,
) -> anyhow::Result<GaussianMoments> {
    match source {
        Some(source) => {
            let mu = source.moments();
            check_shape("prior mean MuW", dim, mu.e.dim())?;
            check_shape("prior mean MuW (second moment)", dim, mu.e2.dim())?;
            Ok(mu)
        }
        None => Ok(GaussianMoments {
            e: prior_mean.clone(),
            e2: Array2::zeros(prior_mean.dim()),
        }),
    }
}
