//! Full-covariance Gaussian mixture fitted by expectation-maximization
//!
//! Used to build a data-dependent prior over topic logits. Components are
//! initialized from k-means labels, covariances carry a small ridge
//! (`reg_covar`) and convergence is declared when the average
//! log-likelihood changes by less than `tol` between iterations.

use crate::error::{Result, WaeError};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::weighted::WeightedIndex;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Arguments for the EM fit
#[derive(Debug, Clone)]
pub struct GmmArgs {
    /// Number of mixture components
    pub num_components: usize,
    /// Maximum number of EM iterations
    pub max_iter: usize,
    /// Convergence threshold on the average log-likelihood
    pub tol: f64,
    /// Ridge added to each covariance diagonal
    pub reg_covar: f64,
    /// Maximum number of k-means iterations for initialization
    pub kmeans_iter: usize,
}

impl Default for GmmArgs {
    fn default() -> Self {
        Self {
            num_components: 1,
            max_iter: 200,
            tol: 1e-3,
            reg_covar: 1e-6,
            kmeans_iter: 100,
        }
    }
}

impl GmmArgs {
    /// Create args with specified number of components
    pub fn with_components(num_components: usize) -> Self {
        Self {
            num_components,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct GaussianMixture {
    weights: DVector<f64>,
    means: Vec<DVector<f64>>,
    chol_lower: Vec<DMatrix<f64>>,
    n_iter: usize,
    lower_bound: f64,
}

impl GaussianMixture {
    /// Fit a mixture to the rows of `data_nd`
    ///
    /// # Arguments
    /// * `data_nd` - n samples x d dimensions
    /// * `args` - EM settings
    ///
    /// Fails with `FitFailure` if there are fewer rows than components,
    /// a covariance is not positive definite, or EM does not converge
    /// within `args.max_iter` iterations.
    pub fn fit(data_nd: &DMatrix<f64>, args: &GmmArgs) -> Result<Self> {
        let (nn, dd) = data_nd.shape();
        let kk = args.num_components;

        if kk == 0 || dd == 0 {
            return Err(WaeError::invalid(format!(
                "gmm: {} components on {} dimensions",
                kk, dd
            )));
        }
        if nn < kk {
            return Err(WaeError::fit(format!(
                "{} samples < {} components",
                nn, kk
            )));
        }
        if data_nd.iter().any(|x| !x.is_finite()) {
            return Err(WaeError::fit("non-finite values in the data"));
        }

        let labels = kmeans_labels(data_nd, kk, args.kmeans_iter);
        let mut resp_nk = DMatrix::<f64>::zeros(nn, kk);
        for (i, &k) in labels.iter().enumerate() {
            resp_nk[(i, k.min(kk - 1))] = 1.0;
        }

        let mut gmm = Self::m_step(data_nd, &resp_nk, args.reg_covar)?;
        let mut lower_bound = f64::NEG_INFINITY;

        for iter in 1..=args.max_iter {
            let prev_bound = lower_bound;
            let (log_prob_norm, log_resp_nk) = gmm.e_step(data_nd)?;
            lower_bound = log_prob_norm;

            gmm = Self::m_step(data_nd, &log_resp_nk.map(f64::exp), args.reg_covar)?;
            gmm.n_iter = iter;
            gmm.lower_bound = lower_bound;

            let change = lower_bound - prev_bound;
            debug!("[gmm {}] lower bound {:.6} (change {:.3e})", iter, lower_bound, change);

            if change.abs() < args.tol {
                info!(
                    "gmm with {} components converged after {} iterations",
                    kk, iter
                );
                return Ok(gmm);
            }
        }

        Err(WaeError::fit(format!(
            "EM did not converge in {} iterations (last lower bound {:.6})",
            args.max_iter, lower_bound
        )))
    }

    /// Component weights, means and covariances from responsibilities
    fn m_step(data_nd: &DMatrix<f64>, resp_nk: &DMatrix<f64>, reg_covar: f64) -> Result<Self> {
        let dd = data_nd.ncols();
        let kk = resp_nk.ncols();
        let tiny = 10.0 * f64::EPSILON;

        let nk: DVector<f64> = resp_nk.row_sum().transpose().add_scalar(tiny);
        let means_kd = (resp_nk.transpose() * data_nd).component_div(
            &DMatrix::from_fn(kk, dd, |k, _| nk[k]),
        );

        let fits = (0..kk)
            .into_par_iter()
            .map(|k| -> Result<(DVector<f64>, DMatrix<f64>)> {
                let mu_1d = means_kd.row(k).into_owned();
                let mut diff_nd = data_nd.clone();
                for mut row in diff_nd.row_iter_mut() {
                    row -= &mu_1d;
                }
                let mut weighted_nd = diff_nd.clone();
                for (i, mut row) in weighted_nd.row_iter_mut().enumerate() {
                    row *= resp_nk[(i, k)];
                }
                let mut cov_dd = (weighted_nd.transpose() * &diff_nd) / nk[k];
                for j in 0..dd {
                    cov_dd[(j, j)] += reg_covar;
                }
                let chol = cov_dd.cholesky().ok_or_else(|| {
                    WaeError::fit(format!(
                        "covariance of component {} is not positive definite; \
                         try more samples or a larger reg_covar",
                        k
                    ))
                })?;
                Ok((mu_1d.transpose(), chol.l()))
            })
            .collect::<Result<Vec<_>>>()?;

        let (means, chol_lower): (Vec<_>, Vec<_>) = fits.into_iter().unzip();
        let weights = &nk / nk.sum();

        Ok(Self {
            weights,
            means,
            chol_lower,
            n_iter: 0,
            lower_bound: f64::NEG_INFINITY,
        })
    }

    /// Average log-likelihood and log responsibilities (n x k)
    fn e_step(&self, data_nd: &DMatrix<f64>) -> Result<(f64, DMatrix<f64>)> {
        let log_prob_nk = self.weighted_log_prob(data_nd)?;
        let nn = log_prob_nk.nrows();

        let mut log_resp_nk = log_prob_nk;
        let mut tot = 0.0;
        for mut row in log_resp_nk.row_iter_mut() {
            let max = row.max();
            let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
            row.add_scalar_mut(-lse);
            tot += lse;
        }
        Ok((tot / nn as f64, log_resp_nk))
    }

    /// log w_k + log N(x_i | mu_k, Sigma_k)
    fn weighted_log_prob(&self, data_nd: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let (nn, dd) = data_nd.shape();
        let kk = self.weights.len();

        let cols = (0..kk)
            .into_par_iter()
            .map(|k| -> Result<DVector<f64>> {
                let chol = &self.chol_lower[k];
                let mut diff_dn = data_nd.transpose();
                for mut col in diff_dn.column_iter_mut() {
                    col -= &self.means[k];
                }
                let sol_dn = chol.solve_lower_triangular(&diff_dn).ok_or_else(|| {
                    WaeError::fit(format!("singular Cholesky factor in component {}", k))
                })?;
                let half_log_det: f64 = chol.diagonal().iter().map(|v| v.ln()).sum();
                let log_w = self.weights[k].ln();
                Ok(DVector::from_iterator(
                    nn,
                    sol_dn.column_iter().map(|z| {
                        -0.5 * (dd as f64 * LN_2PI + z.norm_squared()) - half_log_det + log_w
                    }),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DMatrix::from_columns(&cols))
    }

    /// Hard assignment of each row to its most responsible component
    pub fn predict(&self, data_nd: &DMatrix<f64>) -> Result<Vec<usize>> {
        let log_prob_nk = self.weighted_log_prob(data_nd)?;
        Ok(log_prob_nk.row_iter().map(|row| row.transpose().argmax().0).collect())
    }

    /// Draw `nsamples` rows from the fitted mixture
    pub fn sample<R: Rng + ?Sized>(&self, nsamples: usize, rng: &mut R) -> Result<DMatrix<f64>> {
        let dd = self.dim();
        let pick = WeightedIndex::new(self.weights.iter().copied())
            .map_err(|e| WaeError::fit(format!("invalid mixture weights: {}", e)))?;

        let mut ret_nd = DMatrix::<f64>::zeros(nsamples, dd);
        for i in 0..nsamples {
            let k = pick.sample(rng);
            let z_d = DVector::<f64>::from_fn(dd, |_, _| StandardNormal.sample(rng));
            let x_d = &self.means[k] + &self.chol_lower[k] * z_d;
            ret_nd.set_row(i, &x_d.transpose());
        }
        Ok(ret_nd)
    }

    pub fn num_components(&self) -> usize {
        self.weights.len()
    }

    pub fn dim(&self) -> usize {
        self.means.first().map(|m| m.len()).unwrap_or(0)
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    pub fn means(&self) -> &[DVector<f64>] {
        &self.means
    }

    /// Sigma_k = L_k L_k^T
    pub fn covariance(&self, k: usize) -> DMatrix<f64> {
        &self.chol_lower[k] * self.chol_lower[k].transpose()
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }
}

fn kmeans_labels(data_nd: &DMatrix<f64>, kk: usize, max_iter: usize) -> Vec<usize> {
    if kk <= 1 {
        return vec![0; data_nd.nrows()];
    }
    let rows: Vec<Vec<f64>> = data_nd
        .row_iter()
        .map(|x| x.iter().cloned().collect())
        .collect();
    clustering::kmeans(kk, &rows, max_iter).membership
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::Normal;

    fn two_blobs(n_each: usize, rng: &mut StdRng) -> DMatrix<f64> {
        let noise = Normal::new(0.0, 0.5).unwrap();
        DMatrix::from_fn(2 * n_each, 2, |i, _| {
            let centre = if i < n_each { -5.0 } else { 5.0 };
            centre + noise.sample(rng)
        })
    }

    #[test]
    fn recovers_two_blobs() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(42);
        let data = two_blobs(100, &mut rng);

        let gmm = GaussianMixture::fit(&data, &GmmArgs::with_components(2))?;
        assert_eq!(gmm.num_components(), 2);
        assert_eq!(gmm.dim(), 2);
        approx::assert_abs_diff_eq!(gmm.weights().sum(), 1.0, epsilon = 1e-9);
        assert!((1..=200).contains(&gmm.n_iter()));
        // two unit-weight blobs with sd 0.5 in 2D: about 2 * (-0.73) - ln 2
        assert!(gmm.lower_bound() > -3.0 && gmm.lower_bound() < -1.5);

        let mut centres: Vec<f64> = gmm.means().iter().map(|m| m[0]).collect();
        centres.sort_by(|a, b| a.partial_cmp(b).unwrap());
        approx::assert_abs_diff_eq!(centres[0], -5.0, epsilon = 0.3);
        approx::assert_abs_diff_eq!(centres[1], 5.0, epsilon = 0.3);

        for k in 0..2 {
            let cov = gmm.covariance(k);
            approx::assert_abs_diff_eq!(cov[(0, 0)], 0.25, epsilon = 0.1);
            approx::assert_abs_diff_eq!(cov[(0, 1)], 0.0, epsilon = 0.1);
        }

        let labels = gmm.predict(&data)?;
        assert!(labels[..100].iter().all(|&l| l == labels[0]));
        assert!(labels[100..].iter().all(|&l| l == labels[100]));
        assert_ne!(labels[0], labels[100]);
        Ok(())
    }

    #[test]
    fn samples_follow_the_fit() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let data = two_blobs(100, &mut rng);
        let gmm = GaussianMixture::fit(&data, &GmmArgs::with_components(2))?;

        let draws = gmm.sample(500, &mut rng)?;
        assert_eq!(draws.shape(), (500, 2));
        let near_a_centre = draws
            .row_iter()
            .filter(|r| (r[0].abs() - 5.0).abs() < 2.5)
            .count();
        assert!(near_a_centre > 450);
        Ok(())
    }

    #[test]
    fn too_few_samples() {
        let data = DMatrix::<f64>::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let res = GaussianMixture::fit(&data, &GmmArgs::with_components(3));
        assert!(matches!(res, Err(WaeError::FitFailure(_))));
    }

    #[test]
    fn iteration_cap_is_enforced() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = two_blobs(50, &mut rng);
        let args = GmmArgs {
            num_components: 2,
            max_iter: 1,
            ..Default::default()
        };
        // one iteration can never observe a change below tol
        let res = GaussianMixture::fit(&data, &args);
        assert!(matches!(res, Err(WaeError::FitFailure(_))));
    }
}
