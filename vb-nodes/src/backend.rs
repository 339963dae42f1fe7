use clap::ValueEnum;
use log::debug;
use ndarray::prelude::*;
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Array arithmetic used inside a single factor's update.
///
/// Both variants compute every output entry with the same per-row
/// (or per-column) dot product; `Rayon` only spreads those entries
/// across threads. The factor loop itself never runs in parallel.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Rayon,
}

/// Options bound once by `precompute`, before the first update
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecomputeOptions {
    pub backend: Backend,
}

impl Backend {
    /// `a · b`
    pub fn dot(&self, a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Array2<f64> {
        match self {
            Backend::Cpu => a.dot(b),
            Backend::Rayon => {
                let mut out = Array2::<f64>::zeros((a.nrows(), b.ncols()));
                Zip::from(out.rows_mut())
                    .and(a.rows())
                    .par_for_each(|mut out_i, a_i| out_i.assign(&a_i.dot(b)));
                out
            }
        }
    }

    /// `aᵀ · x`
    pub fn t_dot_vec(&self, a: &ArrayView2<f64>, x: &ArrayView1<f64>) -> Array1<f64> {
        match self {
            Backend::Cpu => a.t().dot(x),
            Backend::Rayon => {
                let mut out = Array1::<f64>::zeros(a.ncols());
                Zip::from(&mut out)
                    .and(a.columns())
                    .par_for_each(|out_j, a_j| *out_j = a_j.dot(x));
                out
            }
        }
    }

    /// `Σ_i a[i,j] · b[i,j]` for each column `j`
    pub fn column_dot(&self, a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(a.ncols());
        let zip = Zip::from(&mut out).and(a.columns()).and(b.columns());
        match self {
            Backend::Cpu => zip.for_each(|out_j, a_j, b_j| *out_j = a_j.dot(&b_j)),
            Backend::Rayon => zip.par_for_each(|out_j, a_j, b_j| *out_j = a_j.dot(&b_j)),
        }
        out
    }

    pub(crate) fn announce(&self, node: &str) {
        match self {
            Backend::Cpu => debug!("{}: cpu backend", node),
            Backend::Rayon => debug!(
                "{}: rayon backend with {} threads",
                node,
                rayon::current_num_threads()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn backends_agree() {
        let a = array![[1., 2., 3.], [4., 5., 6.]];
        let b = array![[1., 0.], [0., 1.], [2., -1.]];
        let x = array![0.5, -1.];

        let cpu = Backend::Cpu;
        let par = Backend::Rayon;

        let ab = cpu.dot(&a.view(), &b.view());
        assert_eq!(ab, array![[7., -1.], [16., -1.]]);
        assert_abs_diff_eq!(ab, par.dot(&a.view(), &b.view()), epsilon = 1e-12);

        let atx = cpu.t_dot_vec(&a.view(), &x.view());
        assert_eq!(atx, array![-3.5, -4., -4.5]);
        assert_abs_diff_eq!(atx, par.t_dot_vec(&a.view(), &x.view()), epsilon = 1e-12);

        let cd = cpu.column_dot(&a.view(), &a.view());
        assert_eq!(cd, array![17., 29., 45.]);
        assert_eq!(cd, par.column_dot(&a.view(), &a.view()));
    }
}
