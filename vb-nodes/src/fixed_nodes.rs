//! Collaborators whose values are held fixed.
//!
//! They fill the Markov blanket of a loading or sparsity node when the
//! neighbour is observed or clamped, and make single nodes easy to
//! drive on simulated data.

use crate::error::{check_shape, NodeError};
use crate::markov_blanket::*;
use log::debug;
use matrix_param::ndarray_gaussian::GaussianMoments;
use matrix_util::traits::SubsetOps;
use ndarray::prelude::*;
use ndarray::Zip;

/// Observed `(N, D)` data; `NaN` entries are always treated as missing
pub struct FixedObservations {
    y: Array2<f64>,
    mask: Array2<bool>,
}

impl FixedObservations {
    pub fn new(y: Array2<f64>) -> Self {
        let mask = y.mapv(f64::is_nan);
        let nmissing = mask.iter().filter(|&&m| m).count();
        if nmissing > 0 {
            debug!("{} of {} observations are missing", nmissing, y.len());
        }
        Self { y, mask }
    }

    /// Mark additional entries as missing
    pub fn with_mask(mut self, mask: Array2<bool>) -> anyhow::Result<Self> {
        check_shape("observation mask", self.y.dim(), mask.dim())?;
        Zip::from(&mut self.mask)
            .and(&mask)
            .for_each(|m, &extra| *m = *m || extra);
        Ok(self)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.y.dim()
    }

    /// `E_q[ln p(Y | Z, W, τ)]` summed over the observed entries
    ///
    /// * `z` - score moments `(N, K)`
    /// * `w` - loading moments `(E[w], E[w²])`, each `(D, K)`
    /// * `tau` - noise precision `(N, D)`
    pub fn expected_log_likelihood(
        &self,
        z: &GaussianMoments,
        w: (&Array2<f64>, &Array2<f64>),
        tau: &Array2<f64>,
    ) -> anyhow::Result<f64> {
        let (nn, dd) = self.dim();
        let (w_e, w_e2) = w;
        let kk = w_e.ncols();
        check_shape("scores Z", (nn, kk), z.e.dim())?;
        check_shape("scores Z (second moment)", (nn, kk), z.e2.dim())?;
        check_shape("loadings", (dd, kk), w_e.dim())?;
        check_shape("loadings (second moment)", (dd, kk), w_e2.dim())?;
        check_shape("noise precision", (nn, dd), tau.dim())?;

        let pred = z.e.dot(&w_e.t());
        let var = z.e2.dot(&w_e2.t()) - z.e.mapv(|x| x * x).dot(&w_e.mapv(|x| x * x).t());

        let ln_2pi = (2. * std::f64::consts::PI).ln();
        let mut llik = 0.;
        Zip::from(&self.y)
            .and(&self.mask)
            .and(&pred)
            .and(&var)
            .and(tau)
            .for_each(|&y, &missing, &pred, &var, &tau| {
                if !missing {
                    let sq = (y - pred) * (y - pred) + var;
                    llik += 0.5 * tau.ln() - 0.5 * ln_2pi - 0.5 * tau * sq;
                }
            });
        Ok(llik)
    }
}

impl ObservationSource for FixedObservations {
    fn n_samples(&self) -> usize {
        self.y.nrows()
    }

    fn get_mini_batch(&self, rows: Option<&[usize]>) -> Array2<f64> {
        self.y.select_rows_opt(rows)
    }

    fn get_mask(&self) -> Array2<bool> {
        self.mask.clone()
    }
}

/// Factor scores with known moments
pub struct FixedScores {
    moments: GaussianMoments,
}

impl FixedScores {
    pub fn new(e: Array2<f64>, e2: Array2<f64>) -> anyhow::Result<Self> {
        check_shape("scores (second moment)", e.dim(), e2.dim())?;
        Ok(Self {
            moments: GaussianMoments { e, e2 },
        })
    }

    /// Point estimates: `E[z²] = E[z]²`
    pub fn from_values(z: Array2<f64>) -> Self {
        let e2 = z.mapv(|x| x * x);
        Self {
            moments: GaussianMoments { e: z, e2 },
        }
    }

    pub fn moments(&self) -> &GaussianMoments {
        &self.moments
    }
}

impl ScoreSource for FixedScores {
    fn get_mini_batch(&self, rows: Option<&[usize]>) -> GaussianMoments {
        GaussianMoments {
            e: self.moments.e.select_rows_opt(rows),
            e2: self.moments.e2.select_rows_opt(rows),
        }
    }
}

/// Noise precision per feature, shared by all samples
pub struct FixedPrecision {
    tau: Array1<f64>,
    n_samples: usize,
}

impl FixedPrecision {
    pub fn new(tau: Array1<f64>, n_samples: usize) -> anyhow::Result<Self> {
        if let Some(&bad) = tau.iter().find(|&&t| !(t > 0.)) {
            return Err(NodeError::InvalidArgument(format!(
                "noise precision {} is not positive",
                bad
            ))
            .into());
        }
        Ok(Self { tau, n_samples })
    }

    /// Expanded `(N, D)` precision
    pub fn expanded(&self) -> Array2<f64> {
        self.get_mini_batch(None)
    }
}

impl NoisePrecisionSource for FixedPrecision {
    fn get_mini_batch(&self, rows: Option<&[usize]>) -> Array2<f64> {
        let nn = rows.map_or(self.n_samples, |r| r.len());
        self.tau
            .broadcast((nn, self.tau.len()))
            .map_or_else(|| Array2::zeros((nn, self.tau.len())), |t| t.to_owned())
    }
}

/// ARD-type prior precision per factor, shared by all features
pub struct FixedPriorPrecision {
    alpha: Array1<f64>,
    num_features: usize,
}

impl FixedPriorPrecision {
    pub fn new(alpha: Array1<f64>, num_features: usize) -> anyhow::Result<Self> {
        if let Some(&bad) = alpha.iter().find(|&&a| !(a > 0.)) {
            return Err(NodeError::InvalidArgument(format!(
                "prior precision {} is not positive",
                bad
            ))
            .into());
        }
        Ok(Self {
            alpha,
            num_features,
        })
    }
}

impl PriorPrecisionSource for FixedPriorPrecision {
    fn expanded_moments(&self) -> PrecisionMoments {
        let e = Array2::from_shape_fn((self.num_features, self.alpha.len()), |(_, k)| {
            self.alpha[k]
        });
        PrecisionMoments {
            ln_e: e.mapv(f64::ln),
            e,
        }
    }
}

/// Prior mean of the loadings
pub struct FixedPriorMean {
    moments: GaussianMoments,
}

impl FixedPriorMean {
    pub fn new(mean: Array2<f64>) -> Self {
        let e2 = mean.mapv(|m| m * m);
        Self {
            moments: GaussianMoments { e: mean, e2 },
        }
    }
}

impl PriorMeanSource for FixedPriorMean {
    fn moments(&self) -> GaussianMoments {
        self.moments.clone()
    }
}

/// Inclusion probabilities clamped to given values
pub struct FixedInclusion {
    eb: Array2<f64>,
}

impl FixedInclusion {
    pub fn new(eb: Array2<f64>) -> Self {
        Self { eb }
    }
}

impl InclusionSource for FixedInclusion {
    fn expected_inclusion(&self) -> Array2<f64> {
        self.eb.clone()
    }
}
