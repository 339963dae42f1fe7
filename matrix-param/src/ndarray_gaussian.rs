use crate::traits::*;
use matrix_util::traits::SubsetOps;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    pub mean: Array2<f64>,
    pub var: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMoments {
    /// `E[x]`
    pub e: Array2<f64>,
    /// `E[x²] = var + mean²`
    pub e2: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct GaussianMatrix {
    params: GaussianParams,
    moments: OnceCell<GaussianMoments>,
}

impl GaussianMatrix {
    /// New matrix of univariate Gaussian distributions
    ///
    /// x[i,k] ~ N(mean0, var0)
    ///
    /// #Arguments
    /// * `dims` - dimensions of the matrix (num of rows, num of columns)
    /// * `mean0` - mean
    /// * `var0` - variance
    ///
    pub fn new(dims: (usize, usize), mean0: f64, var0: f64) -> Result<Self, ParamError> {
        Self::from_params(GaussianParams {
            mean: Array2::from_elem(dims, mean0),
            var: Array2::from_elem(dims, var0),
        })
    }

    pub fn from_params(params: GaussianParams) -> Result<Self, ParamError> {
        Self::validate(&params)?;
        Ok(Self {
            params,
            moments: OnceCell::new(),
        })
    }

    pub fn mean(&self) -> &Array2<f64> {
        &self.params.mean
    }

    pub fn var(&self) -> &Array2<f64> {
        &self.params.var
    }

    fn validate(params: &GaussianParams) -> Result<(), ParamError> {
        check_dim("gaussian var", params.mean.dim(), params.var.dim())?;
        check_all("gaussian mean", &params.mean, f64::is_finite, "must be finite")?;
        check_all("gaussian var", &params.var, |x| x > 0., "must be positive")?;
        Ok(())
    }
}

impl VariationalDistribution for GaussianMatrix {
    type Params = GaussianParams;
    type Moments = GaussianMoments;

    fn dim(&self) -> (usize, usize) {
        self.params.mean.dim()
    }

    fn params(&self) -> &Self::Params {
        &self.params
    }

    fn set_params(&mut self, params: Self::Params) -> Result<(), ParamError> {
        check_dim("gaussian mean", self.dim(), params.mean.dim())?;
        Self::validate(&params)?;
        self.params = params;
        self.moments = OnceCell::new();
        Ok(())
    }

    fn moments(&self) -> &Self::Moments {
        self.moments.get_or_init(|| GaussianMoments {
            e: self.params.mean.clone(),
            e2: &self.params.var + &self.params.mean.mapv(|m| m * m),
        })
    }

    fn is_stale(&self) -> bool {
        self.moments.get().is_none()
    }

    fn remove_along(&mut self, axis: usize, remove: &[usize]) -> anyhow::Result<()> {
        self.params = GaussianParams {
            mean: self.params.mean.remove_along(axis, remove)?,
            var: self.params.var.remove_along(axis, remove)?,
        };
        self.moments = OnceCell::new();
        Ok(())
    }
}
