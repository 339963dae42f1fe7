use crate::markov_blanket::Role;
use matrix_param::bundle::Family;
use matrix_param::traits::ParamError;
use thiserror::Error;

/// Failures a node reports to its caller. Numerically degenerate ELBO
/// terms are not errors; they are zeroed where they are computed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("required collaborator {0} is missing from the Markov blanket")]
    MissingCollaborator(Role),

    #[error("expected {expected} parameters, got {found}")]
    WrongFamily { expected: Family, found: Family },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Param(#[from] ParamError),
}

pub(crate) fn check_shape(
    what: &str,
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<(), NodeError> {
    if expected != found {
        return Err(NodeError::DimensionMismatch(format!(
            "{}: expected {:?}, found {:?}",
            what, expected, found
        )));
    }
    Ok(())
}
