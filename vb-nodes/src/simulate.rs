use crate::error::NodeError;
use log::info;
use matrix_util::traits::SampleOps;
use ndarray::prelude::*;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution, Normal};

pub struct SimArgs {
    pub samples: usize,
    pub features: usize,
    pub factors: usize,
    pub groups: usize,
    /// probability that a loading is switched on
    pub active_prob: f64,
    pub noise_precision: f64,
    pub missing_rate: f64,
    pub rseed: u64,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            samples: 50,
            features: 10,
            factors: 3,
            groups: 1,
            active_prob: 0.5,
            noise_precision: 10.,
            missing_rate: 0.,
            rseed: 42,
        }
    }
}

pub struct SimOut {
    /// `(N, D)` observations, `NaN` where missing
    pub y: Array2<f64>,
    pub mask: Array2<bool>,
    /// `(N, K)` scores
    pub z: Array2<f64>,
    /// `(D, K)` loadings `s · b`
    pub w: Array2<f64>,
    /// `(D, K)` inclusion indicators
    pub inclusion: Array2<f64>,
    /// group of each sample
    pub groups: Vec<usize>,
}

/// Simulate a sparse factor model
///
/// ```text
/// Z(n,k) ~ N(0, 1)
/// s(d,k) ~ Bernoulli(active_prob), b(d,k) ~ N(0, 1)
/// Y(n,d) ~ N( sum_k Z(n,k) s(d,k) b(d,k), 1/tau )
/// ```
///
/// Samples are assigned to groups round-robin.
pub fn generate_sparse_factor_data(args: &SimArgs) -> anyhow::Result<SimOut> {
    let (nn, dd, kk) = (args.samples, args.features, args.factors);

    if args.groups == 0 || args.groups > nn.max(1) {
        return Err(NodeError::InvalidArgument(format!(
            "{} groups for {} samples",
            args.groups, nn
        ))
        .into());
    }
    if !(0.0..1.0).contains(&args.missing_rate) {
        return Err(NodeError::InvalidArgument(format!(
            "missing rate {} is outside [0, 1)",
            args.missing_rate
        ))
        .into());
    }
    if !(args.noise_precision > 0.) {
        return Err(NodeError::InvalidArgument(format!(
            "noise precision {} is not positive",
            args.noise_precision
        ))
        .into());
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(args.rseed);
    let active = Bernoulli::new(args.active_prob)?;
    let noise = Normal::new(0., 1. / args.noise_precision.sqrt())?;

    let z = Array2::<f64>::rnorm(nn, kk, &mut rng);

    let inclusion = Array2::<f64>::from_shape_simple_fn((dd, kk), || {
        if active.sample(&mut rng) {
            1.
        } else {
            0.
        }
    });
    let slab = Array2::<f64>::rnorm(dd, kk, &mut rng);
    let w = &inclusion * &slab;

    info!(
        "simulated {} x {} loadings with {} active entries",
        dd,
        kk,
        inclusion.sum()
    );

    let mut y = z.dot(&w.t());
    y.mapv_inplace(|x| x + noise.sample(&mut rng));

    let mask = Array2::<f64>::runif(nn, dd, &mut rng).mapv(|u| u < args.missing_rate);
    ndarray::Zip::from(&mut y).and(&mask).for_each(|y, &m| {
        if m {
            *y = f64::NAN;
        }
    });

    let groups: Vec<usize> = (0..nn).map(|i| i % args.groups).collect();

    info!(
        "simulated {} x {} observations, {} missing, {} groups",
        nn,
        dd,
        mask.iter().filter(|&&m| m).count(),
        args.groups
    );

    Ok(SimOut {
        y,
        mask,
        z,
        w,
        inclusion,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_simulation_is_reproducible() -> anyhow::Result<()> {
        let args = SimArgs {
            missing_rate: 0.1,
            groups: 2,
            ..Default::default()
        };
        let a = generate_sparse_factor_data(&args)?;
        let b = generate_sparse_factor_data(&args)?;
        assert_eq!(a.z, b.z);
        assert_eq!(a.mask, b.mask);
        assert_eq!(a.y.dim(), (50, 10));
        assert_eq!(a.groups[..3], [0, 1, 0]);
        for (&y, &m) in a.y.iter().zip(a.mask.iter()) {
            assert_eq!(y.is_nan(), m);
        }
        Ok(())
    }

    #[test]
    fn bad_probability_is_an_error() {
        let args = SimArgs {
            active_prob: 1.5,
            ..Default::default()
        };
        assert!(generate_sparse_factor_data(&args).is_err());
    }
}
