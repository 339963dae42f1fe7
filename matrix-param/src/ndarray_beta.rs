extern crate special;

use crate::traits::*;
use matrix_util::traits::SubsetOps;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;
use std::cell::OnceCell;

/// `ln B(a, b) = ln Γ(a) + ln Γ(b) - ln Γ(a + b)`
pub fn ln_beta(a: f64, b: f64) -> f64 {
    SpecialGamma::ln_gamma(a).0 + SpecialGamma::ln_gamma(b).0 - SpecialGamma::ln_gamma(a + b).0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    pub a: Array2<f64>,
    pub b: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetaMoments {
    /// `E[θ] = a / (a + b)`
    pub e: Array2<f64>,
    /// `E[ln θ] = ψ(a) - ψ(a + b)`
    pub ln_e: Array2<f64>,
    /// `E[ln (1 - θ)] = ψ(b) - ψ(a + b)`
    pub ln_e_inv: Array2<f64>,
}

impl BetaMoments {
    /// Repeat a single-row moment matrix `nrep` times
    pub fn repeat_rows(&self, nrep: usize) -> Self {
        let rep = |x: &Array2<f64>| {
            let idx = vec![0; nrep];
            x.select(Axis(0), &idx)
        };
        Self {
            e: rep(&self.e),
            ln_e: rep(&self.ln_e),
            ln_e_inv: rep(&self.ln_e_inv),
        }
    }

    /// Row `i` of the result is row `rows[i]` of `self`
    pub fn index_rows(&self, rows: &[usize]) -> Self {
        Self {
            e: self.e.select(Axis(0), rows),
            ln_e: self.ln_e.select(Axis(0), rows),
            ln_e_inv: self.ln_e_inv.select(Axis(0), rows),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BetaMatrix {
    params: BetaParams,
    moments: OnceCell<BetaMoments>,
}

impl BetaMatrix {
    /// New matrix of Beta distributions
    ///
    /// θ[i,k] ~ Beta(a0, b0)
    ///
    /// #Arguments
    /// * `dims` - dimensions of the matrix (num of rows, num of columns)
    /// * `a0` - shape a
    /// * `b0` - shape b
    ///
    pub fn new(dims: (usize, usize), a0: f64, b0: f64) -> Result<Self, ParamError> {
        Self::from_params(BetaParams {
            a: Array2::from_elem(dims, a0),
            b: Array2::from_elem(dims, b0),
        })
    }

    pub fn from_params(params: BetaParams) -> Result<Self, ParamError> {
        Self::validate(&params)?;
        Ok(Self {
            params,
            moments: OnceCell::new(),
        })
    }

    pub fn a(&self) -> &Array2<f64> {
        &self.params.a
    }

    pub fn b(&self) -> &Array2<f64> {
        &self.params.b
    }

    fn validate(params: &BetaParams) -> Result<(), ParamError> {
        check_dim("beta b", params.a.dim(), params.b.dim())?;
        check_all("beta a", &params.a, |x| x > 0., "must be positive")?;
        check_all("beta b", &params.b, |x| x > 0., "must be positive")?;
        Ok(())
    }

    fn calibrate(params: &BetaParams) -> BetaMoments {
        let ab = &params.a + &params.b;
        let digamma_ab = ab.mapv(SpecialGamma::digamma);
        BetaMoments {
            e: &params.a / &ab,
            ln_e: params.a.mapv(SpecialGamma::digamma) - &digamma_ab,
            ln_e_inv: params.b.mapv(SpecialGamma::digamma) - &digamma_ab,
        }
    }
}

impl VariationalDistribution for BetaMatrix {
    type Params = BetaParams;
    type Moments = BetaMoments;

    fn dim(&self) -> (usize, usize) {
        self.params.a.dim()
    }

    fn params(&self) -> &Self::Params {
        &self.params
    }

    fn set_params(&mut self, params: Self::Params) -> Result<(), ParamError> {
        check_dim("beta a", self.dim(), params.a.dim())?;
        Self::validate(&params)?;
        self.params = params;
        self.moments = OnceCell::new();
        Ok(())
    }

    fn moments(&self) -> &Self::Moments {
        self.moments.get_or_init(|| Self::calibrate(&self.params))
    }

    fn is_stale(&self) -> bool {
        self.moments.get().is_none()
    }

    fn remove_along(&mut self, axis: usize, remove: &[usize]) -> anyhow::Result<()> {
        self.params = BetaParams {
            a: self.params.a.remove_along(axis, remove)?,
            b: self.params.b.remove_along(axis, remove)?,
        };
        self.moments = OnceCell::new();
        Ok(())
    }
}
