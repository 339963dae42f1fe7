//! Closed sums over the distribution families a node can carry.

use crate::ndarray_beta::{BetaMoments, BetaParams};
use crate::ndarray_gaussian::{GaussianMoments, GaussianParams};
use crate::ndarray_spike_slab::{SpikeSlabMoments, SpikeSlabParams};
use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Beta,
    Gaussian,
    SpikeSlab,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Beta => write!(f, "beta"),
            Family::Gaussian => write!(f, "gaussian"),
            Family::SpikeSlab => write!(f, "spike-slab"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parameters {
    Beta(BetaParams),
    Gaussian(GaussianParams),
    SpikeSlab(SpikeSlabParams),
}

impl Parameters {
    pub fn family(&self) -> Family {
        match self {
            Parameters::Beta(_) => Family::Beta,
            Parameters::Gaussian(_) => Family::Gaussian,
            Parameters::SpikeSlab(_) => Family::SpikeSlab,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expectations {
    Beta(BetaMoments),
    Gaussian(GaussianMoments),
    SpikeSlab(SpikeSlabMoments),
}

impl Expectations {
    pub fn family(&self) -> Family {
        match self {
            Expectations::Beta(_) => Family::Beta,
            Expectations::Gaussian(_) => Family::Gaussian,
            Expectations::SpikeSlab(_) => Family::SpikeSlab,
        }
    }

    /// The first moment `E`
    pub fn primary(&self) -> &Array2<f64> {
        match self {
            Expectations::Beta(m) => &m.e,
            Expectations::Gaussian(m) => &m.e,
            Expectations::SpikeSlab(m) => &m.e,
        }
    }

    pub fn into_primary(self) -> Array2<f64> {
        match self {
            Expectations::Beta(m) => m.e,
            Expectations::Gaussian(m) => m.e,
            Expectations::SpikeSlab(m) => m.e,
        }
    }
}
