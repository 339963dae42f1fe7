use crate::traits::*;
use matrix_util::traits::SubsetOps;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;

/// Bernoulli-Gaussian parameters
///
/// ```text
/// s[i,k] ~ Bernoulli(theta[i,k])
/// w[i,k] | s = 0 ~ N(mean_b0 = 0, var_b0)
/// w[i,k] | s = 1 ~ N(mean_b1, var_b1)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeSlabParams {
    pub mean_b0: Array2<f64>,
    pub var_b0: Array2<f64>,
    pub mean_b1: Array2<f64>,
    pub var_b1: Array2<f64>,
    pub theta: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpikeSlabMoments {
    /// expected value `E[s·w] = theta · mean_b1`
    pub e: Array2<f64>,
    /// expected square `E[(s·w)²] = theta · (var_b1 + mean_b1²)`
    pub e2: Array2<f64>,
    /// expected inclusion `E[s] = theta`
    pub eb: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct SpikeSlabMatrix {
    params: SpikeSlabParams,
    moments: OnceCell<SpikeSlabMoments>,
}

impl SpikeSlabMatrix {
    /// New spike-and-slab matrix with a point mass at zero for the
    /// spike (`mean_b0 = 0`)
    ///
    /// #Arguments
    /// * `dims` - dimensions of the matrix (num of rows, num of columns)
    /// * `var_b0` - variance of the spike branch
    /// * `mean_b1` - slab mean
    /// * `var_b1` - slab variance
    /// * `theta` - inclusion probability
    ///
    pub fn new(
        dims: (usize, usize),
        var_b0: f64,
        mean_b1: f64,
        var_b1: f64,
        theta: f64,
    ) -> Result<Self, ParamError> {
        Self::from_params(SpikeSlabParams {
            mean_b0: Array2::zeros(dims),
            var_b0: Array2::from_elem(dims, var_b0),
            mean_b1: Array2::from_elem(dims, mean_b1),
            var_b1: Array2::from_elem(dims, var_b1),
            theta: Array2::from_elem(dims, theta),
        })
    }

    pub fn from_params(params: SpikeSlabParams) -> Result<Self, ParamError> {
        Self::validate(&params)?;
        Ok(Self {
            params,
            moments: OnceCell::new(),
        })
    }

    pub fn theta(&self) -> &Array2<f64> {
        &self.params.theta
    }

    pub fn var_b1(&self) -> &Array2<f64> {
        &self.params.var_b1
    }

    fn validate(params: &SpikeSlabParams) -> Result<(), ParamError> {
        let dim = params.theta.dim();
        check_dim("spike-slab mean_b0", dim, params.mean_b0.dim())?;
        check_dim("spike-slab var_b0", dim, params.var_b0.dim())?;
        check_dim("spike-slab mean_b1", dim, params.mean_b1.dim())?;
        check_dim("spike-slab var_b1", dim, params.var_b1.dim())?;
        check_all("spike-slab mean_b0", &params.mean_b0, |x| x == 0., "spike is fixed at zero")?;
        check_all("spike-slab var_b0", &params.var_b0, |x| x > 0., "must be positive")?;
        check_all("spike-slab mean_b1", &params.mean_b1, f64::is_finite, "must be finite")?;
        check_all("spike-slab var_b1", &params.var_b1, |x| x > 0., "must be positive")?;
        check_all(
            "spike-slab theta",
            &params.theta,
            |x| (0.0..=1.0).contains(&x),
            "must lie in [0, 1]",
        )?;
        Ok(())
    }
}

impl VariationalDistribution for SpikeSlabMatrix {
    type Params = SpikeSlabParams;
    type Moments = SpikeSlabMoments;

    fn dim(&self) -> (usize, usize) {
        self.params.theta.dim()
    }

    fn params(&self) -> &Self::Params {
        &self.params
    }

    fn set_params(&mut self, params: Self::Params) -> Result<(), ParamError> {
        check_dim("spike-slab theta", self.dim(), params.theta.dim())?;
        Self::validate(&params)?;
        self.params = params;
        self.moments = OnceCell::new();
        Ok(())
    }

    fn moments(&self) -> &Self::Moments {
        self.moments.get_or_init(|| {
            let p = &self.params;
            let slab_e2 = &p.var_b1 + &p.mean_b1.mapv(|m| m * m);
            SpikeSlabMoments {
                e: &p.theta * &p.mean_b1,
                e2: &p.theta * &slab_e2,
                eb: p.theta.clone(),
            }
        })
    }

    fn is_stale(&self) -> bool {
        self.moments.get().is_none()
    }

    fn remove_along(&mut self, axis: usize, remove: &[usize]) -> anyhow::Result<()> {
        let p = &self.params;
        self.params = SpikeSlabParams {
            mean_b0: p.mean_b0.remove_along(axis, remove)?,
            var_b0: p.var_b0.remove_along(axis, remove)?,
            mean_b1: p.mean_b1.remove_along(axis, remove)?,
            var_b1: p.var_b1.remove_along(axis, remove)?,
            theta: p.theta.remove_along(axis, remove)?,
        };
        self.moments = OnceCell::new();
        Ok(())
    }
}
