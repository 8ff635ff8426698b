//! Reference samples on the topic simplex
//!
//! Each sampler returns an `f32` tensor (n x k) on the host whose rows sum
//! to one. Randomness always comes from the caller's `Rng`.

use crate::error::{Result, WaeError};
use crate::gaussian_mixture::{GaussianMixture, GmmArgs};
use candle_core::{DType, Device, Tensor};
use log::{debug, warn};
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal, StandardNormal};

pub const DEFAULT_DIRICHLET_ALPHA: f64 = 0.1;

/// `gmm_std` component means are `GMM_STD_SCALE * e_c`
pub const GMM_STD_SCALE: f64 = 20.0;

/// `gmm_std` per-dimension standard deviation
pub const GMM_STD_SIGMA: f64 = 0.2 * GMM_STD_SCALE;

pub const GMM_CTM_MAX_ITER: usize = 200;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PriorKind {
    /// symmetric Dirichlet(alpha)
    #[default]
    #[value(name = "dirichlet")]
    Dirichlet,
    /// softmax of a standard normal
    #[value(name = "gaussian")]
    Gaussian,
    /// softmax of a mixture with one spike per topic
    #[value(name = "gmm_std")]
    GmmStd,
    /// softmax of a mixture fitted to encoded data
    #[value(name = "gmm_ctm")]
    GmmCtm,
}

impl PriorKind {
    /// Parse a prior name (case-insensitive); anything unrecognized falls
    /// back to `Dirichlet`
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "dirichlet" => PriorKind::Dirichlet,
            "gaussian" => PriorKind::Gaussian,
            "gmm_std" => PriorKind::GmmStd,
            "gmm_ctm" => PriorKind::GmmCtm,
            _ => {
                warn!("unknown prior '{}', using dirichlet", name);
                PriorKind::Dirichlet
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PriorKind::Dirichlet => "dirichlet",
            PriorKind::Gaussian => "gaussian",
            PriorKind::GmmStd => "gmm_std",
            PriorKind::GmmCtm => "gmm_ctm",
        }
    }
}

fn check_sizes(nrow: usize, ntopics: usize) -> Result<()> {
    if nrow == 0 {
        return Err(WaeError::invalid("batch size must be positive"));
    }
    if ntopics == 0 {
        return Err(WaeError::invalid("number of topics must be positive"));
    }
    Ok(())
}

/// Row-wise softmax of a row-major n x k buffer
fn softmax_rows(data: Vec<f64>, nrow: usize, ntopics: usize) -> Result<Tensor> {
    let z_nk = Tensor::from_vec(data, (nrow, ntopics), &Device::Cpu)?;
    Ok(candle_nn::ops::softmax(&z_nk, 1)?.to_dtype(DType::F32)?)
}

/// Dirichlet(alpha, ..., alpha) rows via normalized Gamma(alpha, 1) draws
pub fn sample_dirichlet<R: Rng + ?Sized>(
    nrow: usize,
    ntopics: usize,
    alpha: f64,
    rng: &mut R,
) -> Result<Tensor> {
    check_sizes(nrow, ntopics)?;
    if !(alpha.is_finite() && alpha > 0.) {
        return Err(WaeError::invalid(format!(
            "dirichlet alpha must be positive, got {}",
            alpha
        )));
    }
    let gamma = Gamma::new(alpha, 1.0).map_err(|e| WaeError::invalid(e.to_string()))?;

    let mut data = Vec::with_capacity(nrow * ntopics);
    let mut row = vec![0_f64; ntopics];
    for _ in 0..nrow {
        // tiny alpha can underflow every coordinate; redraw such rows
        let tot = loop {
            row.iter_mut().for_each(|g| *g = gamma.sample(rng));
            let tot: f64 = row.iter().sum();
            if tot > 0. {
                break tot;
            }
        };
        data.extend(row.iter().map(|g| (g / tot) as f32));
    }
    Ok(Tensor::from_vec(data, (nrow, ntopics), &Device::Cpu)?)
}

/// softmax(z) with z ~ N(0, I)
pub fn sample_softmax_gaussian<R: Rng + ?Sized>(
    nrow: usize,
    ntopics: usize,
    rng: &mut R,
) -> Result<Tensor> {
    check_sizes(nrow, ntopics)?;
    let data: Vec<f64> = (0..(nrow * ntopics))
        .map(|_| StandardNormal.sample(rng))
        .collect();
    softmax_rows(data, nrow, ntopics)
}

/// softmax(z) with z ~ N(20 e_c, 4^2 I) and c ~ Uniform{0..k}
pub fn sample_gmm_std<R: Rng + ?Sized>(
    nrow: usize,
    ntopics: usize,
    rng: &mut R,
) -> Result<Tensor> {
    check_sizes(nrow, ntopics)?;
    let noise = Normal::new(0.0, GMM_STD_SIGMA).map_err(|e| WaeError::invalid(e.to_string()))?;

    let mut data = Vec::with_capacity(nrow * ntopics);
    for _ in 0..nrow {
        let c = rng.random_range(0..ntopics);
        data.extend((0..ntopics).map(|j| {
            let mu = if j == c { GMM_STD_SCALE } else { 0.0 };
            mu + noise.sample(rng)
        }));
    }
    softmax_rows(data, nrow, ntopics)
}

/// softmax(z) with z drawn from a full-covariance mixture fitted to the
/// rows of `logits_nk`; returns as many rows as `logits_nk` has.
pub fn sample_fitted_gmm<R: Rng + ?Sized>(logits_nk: &DMatrix<f64>, rng: &mut R) -> Result<Tensor> {
    let (nrow, ntopics) = logits_nk.shape();
    if nrow == 0 {
        return Err(WaeError::fit("empty source batch"));
    }
    if ntopics == 0 {
        return Err(WaeError::invalid("number of topics must be positive"));
    }

    let args = GmmArgs {
        num_components: ntopics,
        max_iter: GMM_CTM_MAX_ITER,
        ..Default::default()
    };
    let gmm = GaussianMixture::fit(logits_nk, &args)?;
    debug!(
        "gmm_ctm prior: {} components after {} EM iterations, lower bound {:.4}",
        gmm.num_components(),
        gmm.n_iter(),
        gmm.lower_bound()
    );
    let z_nk = gmm.sample(nrow, rng)?;

    // nalgebra is column-major
    let data: Vec<f64> = z_nk.transpose().iter().copied().collect();
    softmax_rows(data, nrow, ntopics)
}

/// Draw `nrow` reference rows from the `kind` prior
///
/// # Arguments
/// * `kind` - prior family
/// * `nrow` - number of rows (a `GmmCtm` fit returns one row per source row)
/// * `ntopics` - number of topics
/// * `dirichlet_alpha` - Dirichlet concentration
/// * `source_logits` - encoded documents (n x k) for the `GmmCtm` fit
/// * `rng` - random source
///
/// `GmmCtm` without source logits falls back to a Dirichlet prior with
/// the default concentration.
pub fn sample_prior<R: Rng + ?Sized>(
    kind: PriorKind,
    nrow: usize,
    ntopics: usize,
    dirichlet_alpha: f64,
    source_logits: Option<&DMatrix<f64>>,
    rng: &mut R,
) -> Result<Tensor> {
    check_sizes(nrow, ntopics)?;
    match kind {
        PriorKind::Dirichlet => sample_dirichlet(nrow, ntopics, dirichlet_alpha, rng),
        PriorKind::Gaussian => sample_softmax_gaussian(nrow, ntopics, rng),
        PriorKind::GmmStd => sample_gmm_std(nrow, ntopics, rng),
        PriorKind::GmmCtm => match source_logits {
            Some(logits_nk) => {
                if logits_nk.ncols() != ntopics {
                    return Err(WaeError::invalid(format!(
                        "source logits have {} columns, expected {}",
                        logits_nk.ncols(),
                        ntopics
                    )));
                }
                sample_fitted_gmm(logits_nk, rng)
            }
            None => {
                warn!("gmm_ctm prior without source data, using dirichlet");
                sample_dirichlet(nrow, ntopics, DEFAULT_DIRICHLET_ALPHA, rng)
            }
        },
    }
}

/// Copy a 2D tensor to host memory as `f64`
pub fn tensor_to_dmatrix(x_nk: &Tensor) -> Result<DMatrix<f64>> {
    let (nrow, ncol) = x_nk.dims2()?;
    let rows = x_nk
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .to_vec2::<f64>()?;
    Ok(DMatrix::from_row_iterator(
        nrow,
        ncol,
        rows.into_iter().flatten(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_on_simplex(z: &Tensor, nrow: usize, ntopics: usize) -> anyhow::Result<()> {
        assert_eq!(z.dims(), &[nrow, ntopics]);
        for row in z.to_vec2::<f32>()? {
            assert!(row.iter().all(|&v| (0.0..=1.0).contains(&v)));
            approx::assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn dirichlet_rows() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let z = sample_dirichlet(4, 3, DEFAULT_DIRICHLET_ALPHA, &mut rng)?;
        assert_on_simplex(&z, 4, 3)?;

        let z = sample_dirichlet(50, 10, 1e-3, &mut rng)?;
        assert_on_simplex(&z, 50, 10)
    }

    #[test]
    fn dirichlet_is_sparse_for_small_alpha() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(2);
        let z = sample_dirichlet(200, 5, 0.01, &mut rng)?;
        let peaked = z
            .to_vec2::<f32>()?
            .iter()
            .filter(|row| row.iter().cloned().fold(0_f32, f32::max) > 0.9)
            .count();
        assert!(peaked > 150);
        Ok(())
    }

    #[test]
    fn gaussian_and_gmm_std_rows() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        assert_on_simplex(&sample_softmax_gaussian(7, 4, &mut rng)?, 7, 4)?;
        assert_on_simplex(&sample_gmm_std(7, 4, &mut rng)?, 7, 4)
    }

    #[test]
    fn seeded_draws_repeat() -> anyhow::Result<()> {
        let a = sample_gmm_std(5, 3, &mut StdRng::seed_from_u64(11))?;
        let b = sample_gmm_std(5, 3, &mut StdRng::seed_from_u64(11))?;
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn rejects_empty_requests() {
        let mut rng = StdRng::seed_from_u64(4);
        assert!(matches!(
            sample_dirichlet(0, 3, 0.1, &mut rng),
            Err(WaeError::InvalidArgument(_))
        ));
        assert!(matches!(
            sample_softmax_gaussian(3, 0, &mut rng),
            Err(WaeError::InvalidArgument(_))
        ));
        assert!(matches!(
            sample_dirichlet(3, 3, -1.0, &mut rng),
            Err(WaeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn fitted_gmm_rows() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(5);
        let noise = Normal::new(0.0, 1.0)?;
        let logits = DMatrix::<f64>::from_fn(60, 3, |i, j| {
            let centre = if i % 3 == j { 6.0 } else { 0.0 };
            centre + noise.sample(&mut rng)
        });
        let z = sample_fitted_gmm(&logits, &mut rng)?;
        assert_on_simplex(&z, 60, 3)?;

        let empty = DMatrix::<f64>::zeros(0, 3);
        assert!(matches!(
            sample_fitted_gmm(&empty, &mut rng),
            Err(WaeError::FitFailure(_))
        ));
        Ok(())
    }

    #[test]
    fn unknown_prior_behaves_like_dirichlet() -> anyhow::Result<()> {
        let kind = PriorKind::from_name("foo");
        let z = sample_prior(kind, 6, 4, 0.1, None, &mut StdRng::seed_from_u64(8))?;
        let d = sample_dirichlet(6, 4, 0.1, &mut StdRng::seed_from_u64(8))?;
        assert_eq!(z.to_vec2::<f32>()?, d.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn prior_names() {
        assert_eq!(PriorKind::from_name("gmm_ctm"), PriorKind::GmmCtm);
        assert_eq!(PriorKind::from_name("Gaussian"), PriorKind::Gaussian);
        assert_eq!(PriorKind::from_name("GMM_STD"), PriorKind::GmmStd);
        assert_eq!(PriorKind::from_name("foo"), PriorKind::Dirichlet);
        assert_eq!(PriorKind::GmmStd.name(), "gmm_std");
    }
}
