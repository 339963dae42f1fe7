pub use ndarray::prelude::*;

use crate::traits::*;
use crate::utils::complement_indices;
use num_traits::Float;
use rand::Rng;
use rand_distr::StandardNormal;

impl<T> SampleOps for ndarray::Array2<T>
where
    T: Float,
{
    type Mat = Self;
    type Scalar = T;

    fn runif<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat {
        Array2::from_shape_simple_fn((dd, nn), || {
            let x: f64 = rng.random();
            T::from(x).unwrap_or_else(T::zero)
        })
    }

    fn rnorm<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat {
        Array2::from_shape_simple_fn((dd, nn), || {
            let x: f64 = rng.sample(StandardNormal);
            T::from(x).unwrap_or_else(T::zero)
        })
    }
}

impl<T, D> FiniteSumOps for ndarray::Array<T, D>
where
    T: Float,
    D: Dimension,
{
    type Scalar = T;

    fn sum_ignore_nan(&self) -> Self::Scalar {
        self.iter()
            .filter(|x| !x.is_nan())
            .fold(T::zero(), |acc, &x| acc + x)
    }
}

impl<T> SubsetOps for ndarray::Array2<T>
where
    T: Clone,
{
    type Mat = Self;

    fn select_rows_opt(&self, rows: Option<&[usize]>) -> Self::Mat {
        match rows {
            Some(rows) => self.select(Axis(0), rows),
            None => self.clone(),
        }
    }

    fn remove_along(&self, axis: usize, remove: &[usize]) -> anyhow::Result<Self::Mat> {
        if axis > 1 {
            anyhow::bail!("axis {} is out of range for a matrix", axis);
        }
        let n = self.len_of(Axis(axis));
        if let Some(&bad) = remove.iter().find(|&&i| i >= n) {
            anyhow::bail!("index {} is out of range (axis {} has {} slices)", bad, axis, n);
        }
        let keep = complement_indices(n, remove);
        Ok(self.select(Axis(axis), &keep))
    }
}
