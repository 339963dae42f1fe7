use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("{what}: expected shape {expected:?}, found {found:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("invalid parameter {what}: {reason}")]
    InvalidParameter { what: &'static str, reason: String },
}

/// A matrix of independent variational distributions of one family.
///
/// The parameter bundle is the state; the moment bundle is derived
/// from it. Setting parameters marks the moments stale, and the next
/// read recomputes and caches them, so a read never sees moments of
/// older parameters.
pub trait VariationalDistribution {
    type Params: Clone;
    type Moments: Clone;

    /// (num of rows, num of columns)
    fn dim(&self) -> (usize, usize);

    fn params(&self) -> &Self::Params;

    /// Replace all parameters after checking shapes and ranges
    fn set_params(&mut self, params: Self::Params) -> Result<(), ParamError>;

    /// Moments of the current parameters
    fn moments(&self) -> &Self::Moments;

    /// Whether the next `moments` call has to recompute
    fn is_stale(&self) -> bool;

    /// Drop rows (`axis = 0`) or columns (`axis = 1`)
    fn remove_along(&mut self, axis: usize, remove: &[usize]) -> anyhow::Result<()>;

    fn nrows(&self) -> usize {
        self.dim().0
    }

    fn ncols(&self) -> usize {
        self.dim().1
    }
}

pub(crate) fn check_dim(
    what: &'static str,
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<(), ParamError> {
    if expected != found {
        return Err(ParamError::DimensionMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}

pub(crate) fn check_all<F>(
    what: &'static str,
    xx: &ndarray::Array2<f64>,
    valid: F,
    reason: &str,
) -> Result<(), ParamError>
where
    F: Fn(f64) -> bool,
{
    if let Some(&bad) = xx.iter().find(|&&x| !valid(x)) {
        return Err(ParamError::InvalidParameter {
            what,
            reason: format!("{} (found {})", reason, bad),
        });
    }
    Ok(())
}
