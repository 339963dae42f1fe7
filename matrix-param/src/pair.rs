use crate::traits::*;

/// Prior `p` and variational posterior `q` of one node, both of the
/// same family and shape
#[derive(Debug, Clone)]
pub struct PriorPosterior<D> {
    pub p: D,
    pub q: D,
}

impl<D> PriorPosterior<D>
where
    D: VariationalDistribution,
{
    pub fn new(p: D, q: D) -> Result<Self, ParamError> {
        check_dim("posterior", p.dim(), q.dim())?;
        Ok(Self { p, q })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.q.dim()
    }

    /// Drop the same slices from both prior and posterior
    pub fn remove_along(&mut self, axis: usize, remove: &[usize]) -> anyhow::Result<()> {
        self.p.remove_along(axis, remove)?;
        self.q.remove_along(axis, remove)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndarray_beta::BetaMatrix;

    #[test]
    fn shapes_must_agree() -> anyhow::Result<()> {
        let p = BetaMatrix::new((1, 3), 1., 1.)?;
        let q = BetaMatrix::new((1, 2), 1., 1.)?;
        assert!(PriorPosterior::new(p, q).is_err());

        let p = BetaMatrix::new((1, 3), 1., 1.)?;
        let q = BetaMatrix::new((1, 3), 2., 1.)?;
        let mut pq = PriorPosterior::new(p, q)?;
        pq.remove_along(1, &[0])?;
        assert_eq!(pq.p.dim(), (1, 2));
        assert_eq!(pq.dim(), (1, 2));
        Ok(())
    }
}
