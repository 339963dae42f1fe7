use rand::Rng;

/// Operations to sample random matrices from a caller-provided
/// random number generator, so that a fixed seed reproduces the draw
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat;
}

/// Reductions that treat not-a-number entries as zero
pub trait FiniteSumOps {
    type Scalar;

    /// Sum of all entries where `NaN` contributes nothing
    fn sum_ignore_nan(&self) -> Self::Scalar;
}

/// Subsetting rows (samples) and removing slices along an axis
pub trait SubsetOps {
    type Mat;

    /// Take the rows listed in `rows`; all rows if `None`
    fn select_rows_opt(&self, rows: Option<&[usize]>) -> Self::Mat;

    /// Drop the slices listed in `remove` along `axis`, keeping the
    /// order of the remaining ones
    fn remove_along(&self, axis: usize, remove: &[usize]) -> anyhow::Result<Self::Mat>;
}
