use approx::assert_abs_diff_eq;
use matrix_param::bundle::{Expectations, Parameters};
use matrix_param::ndarray_gaussian::GaussianMatrix;
use matrix_param::pair::PriorPosterior;
use matrix_param::traits::VariationalDistribution;
use ndarray::prelude::*;
use vb_nodes::fixed_nodes::*;
use vb_nodes::markov_blanket::ObservationSource;
use vb_nodes::simulate::*;
use vb_nodes::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Data {
    obs: FixedObservations,
    scores: FixedScores,
    tau: FixedPrecision,
}

fn simulated(missing_rate: f64) -> anyhow::Result<Data> {
    let sim = generate_sparse_factor_data(&SimArgs {
        samples: 40,
        features: 8,
        factors: 3,
        missing_rate,
        rseed: 7,
        ..Default::default()
    })?;
    let (nn, dd) = sim.y.dim();
    Ok(Data {
        obs: FixedObservations::new(sim.y),
        scores: FixedScores::from_values(sim.z),
        tau: FixedPrecision::new(Array1::from_elem(dd, 10.), nn)?,
    })
}

fn loading_node(dd: usize, kk: usize) -> anyhow::Result<WNode> {
    let p = GaussianMatrix::new((dd, kk), 0., 1.)?;
    let mut q = GaussianMatrix::new((dd, kk), 0., 1.)?;
    let mut init = q.params().clone();
    init.mean = Array2::from_shape_fn((dd, kk), |(d, k)| 0.1 * (d + k) as f64);
    q.set_params(init)?;
    WNode::new(PriorPosterior::new(p, q)?, None)
}

fn total_elbo(w: &WNode, data: &Data) -> anyhow::Result<f64> {
    let blanket = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);
    let m = w.posterior().moments();
    let llik = data.obs.expected_log_likelihood(
        data.scores.moments(),
        (&m.e, &m.e2),
        &data.tau.expanded(),
    )?;
    Ok(llik + w.calculate_elbo(&blanket)?)
}

#[test]
fn full_sweeps_do_not_decrease_elbo() -> anyhow::Result<()> {
    init_logger();
    let data = simulated(0.)?;
    let mut w = loading_node(8, 3)?;
    w.precompute(&PrecomputeOptions::default());

    let mut elbo = vec![total_elbo(&w, &data)?];
    for _ in 0..5 {
        let blanket = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);
        w.update_parameters(&blanket, &UpdateArgs::full())?;
        elbo.push(total_elbo(&w, &data)?);
    }

    for t in 1..elbo.len() {
        let tol = 1e-8 * elbo[t - 1].abs().max(1.);
        assert!(
            elbo[t] >= elbo[t - 1] - tol,
            "ELBO decreased at sweep {}: {:?}",
            t,
            elbo
        );
    }
    assert!(elbo[elbo.len() - 1] > elbo[0]);
    Ok(())
}

#[test]
fn full_minibatch_matches_deterministic_update() -> anyhow::Result<()> {
    init_logger();
    let data = simulated(0.1)?;
    let all: Vec<usize> = (0..40).collect();

    let mut full = loading_node(8, 3)?;
    let mut stoch = loading_node(8, 3)?;
    let blanket = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);
    full.update_parameters(&blanket, &UpdateArgs::full())?;
    stoch.update_parameters(&blanket, &UpdateArgs::stochastic(&all, 1.))?;

    assert_abs_diff_eq!(full.posterior().mean(), stoch.posterior().mean(), epsilon = 1e-12);
    assert_abs_diff_eq!(full.posterior().var(), stoch.posterior().var(), epsilon = 1e-12);
    Ok(())
}

#[test]
fn minibatch_is_rescaled() -> anyhow::Result<()> {
    let data = simulated(0.)?;
    let half: Vec<usize> = (0..20).collect();

    let mut w = loading_node(8, 3)?;
    let blanket = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);
    w.update_parameters(&blanket, &UpdateArgs::stochastic(&half, 1.))?;

    // precision_k = alpha + coeff Σ_batch tau z²
    let z = data.scores.moments();
    let k = 1;
    let stat: f64 = half.iter().map(|&i| 10. * z.e2[(i, k)]).sum();
    assert_abs_diff_eq!(w.posterior().var()[(0, k)], 1. / (1. + 2. * stat), epsilon = 1e-12);
    Ok(())
}

#[test]
fn damped_step_interpolates() -> anyhow::Result<()> {
    let data = simulated(0.)?;
    let all: Vec<usize> = (0..40).collect();
    let blanket = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);

    let mut w = loading_node(8, 1)?;
    let before = w.posterior().var().clone();
    let mut full = loading_node(8, 1)?;
    full.update_parameters(&blanket, &UpdateArgs::full())?;
    w.update_parameters(&blanket, &UpdateArgs::stochastic(&all, 0.25))?;

    let expected = &before * 0.75 + full.posterior().var() * 0.25;
    assert_abs_diff_eq!(w.posterior().var(), &expected, epsilon = 1e-12);

    assert!(w
        .update_parameters(&blanket, &UpdateArgs::stochastic(&all, 0.))
        .is_err());
    Ok(())
}

#[test]
fn masked_entries_contribute_nothing() -> anyhow::Result<()> {
    let data = simulated(0.)?;
    let (nn, dd) = data.obs.dim();
    let y = data.obs.get_mini_batch(None);

    let mut mask = Array2::<bool>::from_elem((nn, dd), false);
    mask[(0, 0)] = true;
    mask[(5, 3)] = true;
    mask[(17, 7)] = true;

    let mut y_nan = y.clone();
    let mut y_junk = y.clone();
    for ((i, j), &m) in mask.indexed_iter() {
        if m {
            y_nan[(i, j)] = f64::NAN;
            y_junk[(i, j)] = 1e6;
        }
    }

    let obs_nan = FixedObservations::new(y_nan);
    let obs_junk = FixedObservations::new(y_junk).with_mask(mask)?;

    let mut w_nan = loading_node(dd, 3)?;
    let mut w_junk = loading_node(dd, 3)?;
    w_nan.update_parameters(
        &LoadingBlanket::new(&obs_nan, &data.scores, &data.tau),
        &UpdateArgs::full(),
    )?;
    w_junk.update_parameters(
        &LoadingBlanket::new(&obs_junk, &data.scores, &data.tau),
        &UpdateArgs::full(),
    )?;

    assert!(w_nan.posterior().mean().iter().all(|x| x.is_finite()));
    assert_eq!(w_nan.posterior().mean(), w_junk.posterior().mean());
    assert_eq!(w_nan.posterior().var(), w_junk.posterior().var());
    Ok(())
}

#[test]
fn covariates_are_held_fixed() -> anyhow::Result<()> {
    let data = simulated(0.)?;
    let p = GaussianMatrix::new((8, 3), 0., 1.)?;
    let q = GaussianMatrix::new((8, 3), 0.5, 2.)?;
    let mut w = WNode::new(PriorPosterior::new(p, q)?, Some(&[1]))?;

    let blanket = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);
    w.update_parameters(&blanket, &UpdateArgs::full())?;

    assert!(w.posterior().mean().column(1).iter().all(|&m| m == 0.5));
    assert!(w.posterior().var().column(1).iter().all(|&v| v == 2.));
    assert!(w.posterior().mean().column(0).iter().any(|&m| m != 0.5));
    Ok(())
}

#[test]
fn prior_precision_and_mean_collaborators() -> anyhow::Result<()> {
    let data = simulated(0.)?;
    let alpha = FixedPriorPrecision::new(array![1., 1., 1.], 8)?;
    let mu = FixedPriorMean::new(Array2::zeros((8, 3)));

    let mut with_nodes = loading_node(8, 3)?;
    let mut fixed = loading_node(8, 3)?;
    let base = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);
    let blanket = base.with_prior_precision(&alpha).with_prior_mean(&mu);

    with_nodes.update_parameters(&blanket, &UpdateArgs::full())?;
    fixed.update_parameters(&base, &UpdateArgs::full())?;

    // unit precision and zero mean are the fixed prior
    assert_abs_diff_eq!(with_nodes.posterior().mean(), fixed.posterior().mean(), epsilon = 1e-12);
    assert_abs_diff_eq!(
        with_nodes.calculate_elbo(&blanket)?,
        fixed.calculate_elbo(&base)?,
        epsilon = 1e-9
    );

    let bad = FixedPriorPrecision::new(array![1., 1.], 8)?;
    let err = match with_nodes.update_parameters(&base.with_prior_precision(&bad), &UpdateArgs::full()) {
        Err(err) => err,
        Ok(_) => anyhow::bail!("accepted a (8, 2) prior precision"),
    };
    assert!(matches!(
        err.downcast_ref::<NodeError>(),
        Some(NodeError::DimensionMismatch(_))
    ));
    Ok(())
}

#[test]
fn fixed_prior_mean_has_no_second_moment_in_the_bound() -> anyhow::Result<()> {
    let obs = FixedObservations::new(Array2::zeros((2, 1)));
    let scores = FixedScores::from_values(Array2::zeros((2, 1)));
    let tau = FixedPrecision::new(array![1.], 2)?;
    let base = LoadingBlanket::new(&obs, &scores, &tau);

    let p = GaussianMatrix::new((1, 1), 0.5, 1.)?;
    let q = GaussianMatrix::new((1, 1), 0.2, 0.5)?;
    let w = WNode::new(PriorPosterior::new(p, q)?, None)?;

    // E[w²] = 0.54, E[μ] = 0.5 and E[μ²] = 0 without a MuW node
    let quad = 0.5 * 0.54 - 0.5 * 0.2;
    let expected = -quad + 0.5 * (f64::ln(0.5) + 1.);
    assert_abs_diff_eq!(w.calculate_elbo(&base)?, expected, epsilon = 1e-12);

    // a MuW node carries E[μ²] = 0.25 into the quadratic term
    let mu = FixedPriorMean::new(array![[0.5]]);
    assert_abs_diff_eq!(
        w.calculate_elbo(&base.with_prior_mean(&mu))?,
        expected - 0.125,
        epsilon = 1e-12
    );
    Ok(())
}

#[test]
fn prior_precision_draws_have_inverse_precision_variance() -> anyhow::Result<()> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(19);
    let dd = 4000;
    let p = GaussianMatrix::new((dd, 1), 0., 1.)?;
    let q = GaussianMatrix::new((dd, 1), 0., 1.)?;
    let w = WNode::new(PriorPosterior::new(p, q)?, None)?;

    let alpha = FixedPriorPrecision::new(array![4.], dd)?;
    let draw = w.sample(SampleFrom::Prior, None, Some(&alpha), &mut rng)?;
    let var = draw.column(0).mapv(|x| x * x).sum() / (dd - 1) as f64;
    assert_abs_diff_eq!(var, 0.25, epsilon = 0.03);
    Ok(())
}

#[test]
fn removed_factor_is_not_read_again() -> anyhow::Result<()> {
    let data = simulated(0.)?;
    let mut w = loading_node(8, 3)?;
    let old_mean = w.posterior().mean().clone();

    w.remove_factors(&[1])?;
    assert_eq!(w.dim(), (8, 2));
    assert_eq!(w.posterior().mean().column(1), old_mean.column(2));
    assert_eq!(w.prior().mean().dim(), (8, 2));

    let z = data.scores.moments();
    let scores = FixedScores::new(z.e.select(Axis(1), &[0, 2]), z.e2.select(Axis(1), &[0, 2]))?;
    let blanket = LoadingBlanket::new(&data.obs, &scores, &data.tau);
    w.update_parameters(&blanket, &UpdateArgs::full())?;

    // a stale three-factor score matrix no longer fits
    let stale = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);
    assert!(w.update_parameters(&stale, &UpdateArgs::full()).is_err());
    Ok(())
}

#[test]
fn backends_give_the_same_update() -> anyhow::Result<()> {
    init_logger();
    let data = simulated(0.05)?;
    let blanket = LoadingBlanket::new(&data.obs, &data.scores, &data.tau);

    let mut cpu = loading_node(8, 3)?;
    let mut par = loading_node(8, 3)?;
    cpu.precompute(&PrecomputeOptions { backend: Backend::Cpu });
    par.precompute(&PrecomputeOptions { backend: Backend::Rayon });

    for _ in 0..3 {
        cpu.update_parameters(&blanket, &UpdateArgs::full())?;
        par.update_parameters(&blanket, &UpdateArgs::full())?;
    }
    assert_abs_diff_eq!(cpu.posterior().mean(), par.posterior().mean(), epsilon = 1e-10);
    assert_abs_diff_eq!(cpu.posterior().var(), par.posterior().var(), epsilon = 1e-10);
    Ok(())
}

#[test]
fn parameters_round_trip() -> anyhow::Result<()> {
    let data = simulated(0.)?;
    let mut w = loading_node(8, 3)?;
    w.update_parameters(
        &LoadingBlanket::new(&data.obs, &data.scores, &data.tau),
        &UpdateArgs::full(),
    )?;

    let before = w.get_expectations(false);
    w.set_parameters(w.get_parameters())?;
    assert_eq!(w.get_expectations(false), before);
    assert_eq!(w.get_expectation(true), *before.primary());

    let Expectations::Gaussian(m) = before else {
        anyhow::bail!("loading node returned non-Gaussian moments");
    };
    assert_eq!(m.e.dim(), (8, 3));

    let beta = matrix_param::ndarray_beta::BetaMatrix::new((8, 3), 1., 1.)?;
    assert!(w.set_parameters(Parameters::Beta(beta.params().clone())).is_err());
    Ok(())
}

#[test]
fn non_positive_definite_covariance_is_rejected() -> anyhow::Result<()> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let cov = array![[1., 2.], [2., 1.]];
    let p = GaussianMatrix::new((2, 1), 0., 1.)?;
    let q = GaussianMatrix::new((2, 1), 0., 1.)?;
    let w = WNode::new(PriorPosterior::new(p, q)?, None)?
        .with_prior_covariance(PriorCovariance::PerFactor(vec![Covariance::Dense(cov)]))?;

    let err = match w.sample(SampleFrom::Prior, None, None, &mut rng) {
        Err(err) => err,
        Ok(_) => anyhow::bail!("sampled from an indefinite covariance"),
    };
    assert!(matches!(
        err.downcast_ref::<NodeError>(),
        Some(NodeError::InvalidArgument(_))
    ));

    let alpha = FixedPriorPrecision::new(array![4.], 2)?;
    let draw = w.sample(SampleFrom::Prior, None, Some(&alpha), &mut rng)?;
    assert_abs_diff_eq!(draw.sum(), 0., epsilon = 1e-12);
    Ok(())
}
