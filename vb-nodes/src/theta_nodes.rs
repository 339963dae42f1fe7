//! Beta-Bernoulli sparsity nodes.
//!
//! `θ[.,k] ~ Beta(a, b)` is the prior probability that a loading (or a
//! score) of factor `k` is switched on. The posterior is conjugate to
//! the expected inclusion indicators of the governed spike-and-slab
//! node:
//!
//! ```text
//! Qa = Pa + Σ E[s]
//! Qb = Pb + n - Σ E[s]
//! ```

use crate::backend::PrecomputeOptions;
use crate::error::{check_shape, NodeError};
use crate::markov_blanket::{SparsityBlanket, SparsitySource};
use crate::node::{UpdateArgs, VariationalNode};
use log::{debug, info};
use matrix_param::bundle::{Expectations, Family, Parameters};
use matrix_param::ndarray_beta::{ln_beta, BetaMatrix, BetaMoments, BetaParams};
use matrix_param::pair::PriorPosterior;
use matrix_param::traits::VariationalDistribution;
use matrix_util::traits::FiniteSumOps;
use matrix_util::utils::partition_by_membership;
use ndarray::prelude::*;

/// Sparsity shared by all features of a view: one Beta per factor,
/// stored as a `(1, K)` matrix
pub struct ThetaWNode {
    pq: PriorPosterior<BetaMatrix>,
    num_features: usize,
    factors_axis: usize,
}

/// Sparsity of the factor scores per group of samples: one Beta per
/// `(group, factor)`
pub struct ThetaZNode {
    pq: PriorPosterior<BetaMatrix>,
    groups: Vec<usize>,
    group_rows: Vec<Vec<usize>>,
    group_names: Option<Vec<Box<str>>>,
    factors_axis: usize,
}

impl ThetaWNode {
    /// * `num_features` - number of features `D` of the governed loading node
    /// * `num_factors` - number of factors `K`
    /// * `prior` - `(Pa, Pb)`
    /// * `init` - initial `(Qa, Qb)`
    pub fn new(
        num_features: usize,
        num_factors: usize,
        prior: (f64, f64),
        init: (f64, f64),
    ) -> anyhow::Result<Self> {
        let dims = (1, num_factors);
        let p = BetaMatrix::new(dims, prior.0, prior.1).map_err(NodeError::from)?;
        let q = BetaMatrix::new(dims, init.0, init.1).map_err(NodeError::from)?;
        Self::from_pair(num_features, PriorPosterior::new(p, q).map_err(NodeError::from)?)
    }

    pub fn from_pair(num_features: usize, pq: PriorPosterior<BetaMatrix>) -> anyhow::Result<Self> {
        if pq.dim().0 != 1 {
            return Err(NodeError::DimensionMismatch(format!(
                "ThetaW keeps one row of factor probabilities, found {} rows",
                pq.dim().0
            ))
            .into());
        }
        Ok(Self {
            pq,
            num_features,
            factors_axis: 1,
        })
    }

    pub fn num_factors(&self) -> usize {
        self.pq.dim().1
    }

    pub fn prior(&self) -> &BetaMatrix {
        &self.pq.p
    }

    pub fn posterior(&self) -> &BetaMatrix {
        &self.pq.q
    }

    fn expanded(&self) -> BetaMoments {
        self.pq.q.moments().repeat_rows(self.num_features)
    }
}

impl ThetaZNode {
    /// * `groups` - group index of each sample, in `0..G`
    /// * `pq` - prior and initial posterior shaped `(G, K)`
    pub fn new(groups: Vec<usize>, pq: PriorPosterior<BetaMatrix>) -> anyhow::Result<Self> {
        let n_groups = pq.dim().0;
        let partition = partition_by_membership(&groups);

        if partition.len() != n_groups {
            return Err(NodeError::DimensionMismatch(format!(
                "node dimension ({} groups) does not match number of groups ({})",
                n_groups,
                partition.len()
            ))
            .into());
        }

        let mut group_rows = vec![vec![]; n_groups];
        for (g, rows) in partition {
            if g >= n_groups {
                return Err(NodeError::DimensionMismatch(format!(
                    "group label {} is outside 0..{}",
                    g, n_groups
                ))
                .into());
            }
            group_rows[g] = rows;
        }

        Ok(Self {
            pq,
            groups,
            group_rows,
            group_names: None,
            factors_axis: 1,
        })
    }

    /// Attach names to the groups (used in log messages)
    pub fn with_group_names(mut self, names: Vec<Box<str>>) -> anyhow::Result<Self> {
        if names.len() != self.n_groups() {
            return Err(NodeError::DimensionMismatch(format!(
                "{} group names for {} groups",
                names.len(),
                self.n_groups()
            ))
            .into());
        }
        self.group_names = Some(names);
        Ok(self)
    }

    pub fn n_groups(&self) -> usize {
        self.group_rows.len()
    }

    pub fn n_samples(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[usize] {
        &self.groups
    }

    pub fn prior(&self) -> &BetaMatrix {
        &self.pq.p
    }

    pub fn posterior(&self) -> &BetaMatrix {
        &self.pq.q
    }

    fn group_name(&self, g: usize) -> String {
        match &self.group_names {
            Some(names) => names[g].to_string(),
            None => g.to_string(),
        }
    }

    fn expanded(&self) -> BetaMoments {
        self.pq.q.moments().index_rows(&self.groups)
    }
}

/// Restrict the inclusion matrix to the selected factors and check
/// that it is a matrix of probabilities
fn select_inclusion(
    s: Array2<f64>,
    factors_selection: Option<&[usize]>,
    expected: (usize, usize),
) -> anyhow::Result<Array2<f64>> {
    let s = match factors_selection {
        Some(sel) => {
            if let Some(&bad) = sel.iter().find(|&&k| k >= s.ncols()) {
                return Err(NodeError::InvalidArgument(format!(
                    "factor {} is not among the {} factors of the inclusion matrix",
                    bad,
                    s.ncols()
                ))
                .into());
            }
            s.select(Axis(1), sel)
        }
        None => s,
    };
    check_shape("expected inclusion", expected, s.dim())?;
    if let Some(&bad) = s.iter().find(|&&x| !(0.0..=1.0).contains(&x)) {
        return Err(NodeError::InvalidArgument(format!(
            "expected inclusion {} is not a probability",
            bad
        ))
        .into());
    }
    Ok(s)
}

/// `E_q[ln p(θ)] - E_q[ln q(θ)]`, each elementwise `NaN` (degenerate
/// Beta boundary) counted as zero
fn beta_elbo(pq: &PriorPosterior<BetaMatrix>) -> f64 {
    let m = pq.q.moments();

    let minus_cross_entropy = |par: &BetaParams| -> f64 {
        let mut lb = Array2::<f64>::zeros(par.a.dim());
        ndarray::Zip::from(&mut lb)
            .and(&par.a)
            .and(&par.b)
            .and(&m.ln_e)
            .and(&m.ln_e_inv)
            .for_each(|lb, &a, &b, &ln_e, &ln_e_inv| {
                *lb = (a - 1.) * ln_e + (b - 1.) * ln_e_inv - ln_beta(a, b);
            });
        lb.sum_ignore_nan()
    };

    let lb_p = minus_cross_entropy(pq.p.params());
    let lb_q = minus_cross_entropy(pq.q.params());
    lb_p - lb_q
}

fn beta_params(params: Parameters) -> Result<BetaParams, NodeError> {
    match params {
        Parameters::Beta(par) => Ok(par),
        other => Err(NodeError::WrongFamily {
            expected: Family::Beta,
            found: other.family(),
        }),
    }
}

impl VariationalNode for ThetaWNode {
    type Blanket<'a> = SparsityBlanket<'a>;

    fn dim(&self) -> (usize, usize) {
        self.pq.dim()
    }

    fn factors_axis(&self) -> usize {
        self.factors_axis
    }

    fn precompute(&mut self, options: &PrecomputeOptions) {
        self.factors_axis = 1;
        options.backend.announce("ThetaW");
    }

    fn get_parameters(&self) -> Parameters {
        Parameters::Beta(self.pq.q.params().clone())
    }

    fn set_parameters(&mut self, params: Parameters) -> anyhow::Result<()> {
        self.pq
            .q
            .set_params(beta_params(params)?)
            .map_err(NodeError::from)?;
        Ok(())
    }

    /// `expand` repeats the factor probabilities across the `D` features
    fn get_expectations(&self, expand: bool) -> Expectations {
        if expand {
            Expectations::Beta(self.expanded())
        } else {
            Expectations::Beta(self.pq.q.moments().clone())
        }
    }

    fn update_parameters(
        &mut self,
        blanket: &Self::Blanket<'_>,
        args: &UpdateArgs<'_>,
    ) -> anyhow::Result<()> {
        let s = select_inclusion(
            blanket.inclusion.expected_inclusion(),
            args.factors_selection,
            (self.num_features, self.num_factors()),
        )?;

        let nrows = s.nrows() as f64;
        let stat = s.sum_axis(Axis(0)).insert_axis(Axis(0));

        let p = self.pq.p.params();
        let qa = &p.a + &stat;
        let qb = &p.b + &stat.mapv(|x| nrows - x);

        self.pq
            .q
            .set_params(BetaParams { a: qa, b: qb })
            .map_err(NodeError::from)?;

        debug!("ThetaW: E[θ] = {:.4}", self.pq.q.moments().e);
        Ok(())
    }

    fn calculate_elbo(&self, _blanket: &Self::Blanket<'_>) -> anyhow::Result<f64> {
        Ok(beta_elbo(&self.pq))
    }

    fn remove_factors(&mut self, remove: &[usize]) -> anyhow::Result<()> {
        self.pq.remove_along(self.factors_axis, remove)?;
        info!("ThetaW: removed factors {:?}, {} left", remove, self.num_factors());
        Ok(())
    }
}

impl VariationalNode for ThetaZNode {
    type Blanket<'a> = SparsityBlanket<'a>;

    fn dim(&self) -> (usize, usize) {
        self.pq.dim()
    }

    fn factors_axis(&self) -> usize {
        self.factors_axis
    }

    fn precompute(&mut self, options: &PrecomputeOptions) {
        self.factors_axis = 1;
        options.backend.announce("ThetaZ");
    }

    fn get_parameters(&self) -> Parameters {
        Parameters::Beta(self.pq.q.params().clone())
    }

    fn set_parameters(&mut self, params: Parameters) -> anyhow::Result<()> {
        self.pq
            .q
            .set_params(beta_params(params)?)
            .map_err(NodeError::from)?;
        Ok(())
    }

    /// `expand` gives every sample the row of its group
    fn get_expectations(&self, expand: bool) -> Expectations {
        if expand {
            Expectations::Beta(self.expanded())
        } else {
            Expectations::Beta(self.pq.q.moments().clone())
        }
    }

    fn update_parameters(
        &mut self,
        blanket: &Self::Blanket<'_>,
        args: &UpdateArgs<'_>,
    ) -> anyhow::Result<()> {
        let kk = self.pq.dim().1;
        let s = select_inclusion(
            blanket.inclusion.expected_inclusion(),
            args.factors_selection,
            (self.n_samples(), kk),
        )?;

        let p = self.pq.p.params();
        let mut qa = Array2::<f64>::zeros(p.a.dim());
        let mut qb = Array2::<f64>::zeros(p.b.dim());

        for (g, rows) in self.group_rows.iter().enumerate() {
            let n_g = rows.len() as f64;
            let stat = s.select(Axis(0), rows).sum_axis(Axis(0));
            qa.row_mut(g).assign(&(&p.a.row(g) + &stat));
            qb.row_mut(g).assign(&(&p.b.row(g) + &stat.mapv(|x| n_g - x)));
            debug!(
                "ThetaZ[{}]: {} samples, Σ E[s] = {:.3}",
                self.group_name(g),
                rows.len(),
                stat
            );
        }

        self.pq
            .q
            .set_params(BetaParams { a: qa, b: qb })
            .map_err(NodeError::from)?;
        Ok(())
    }

    fn calculate_elbo(&self, _blanket: &Self::Blanket<'_>) -> anyhow::Result<f64> {
        Ok(beta_elbo(&self.pq))
    }

    fn remove_factors(&mut self, remove: &[usize]) -> anyhow::Result<()> {
        self.pq.remove_along(self.factors_axis, remove)?;
        info!("ThetaZ: removed factors {:?}, {} left", remove, self.pq.dim().1);
        Ok(())
    }
}

impl SparsitySource for ThetaWNode {
    fn expanded_moments(&self) -> BetaMoments {
        self.expanded()
    }
}

impl SparsitySource for ThetaZNode {
    fn expanded_moments(&self) -> BetaMoments {
        self.expanded()
    }
}
