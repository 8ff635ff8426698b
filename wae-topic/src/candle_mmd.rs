//! Maximum mean discrepancy between two batches of topic proportions.
//!
//! Rows of both batches live on the probability simplex. The default
//! diffusion kernel maps them to the positive orthant of the sphere by
//! `θ -> sqrt(θ)` and compares them by geodesic (arccos) distance; the
//! total-variation kernel uses plain pairwise L1 distances.

use crate::error::{Result, WaeError};
use candle_core::{CpuStorage, CustomOp1, DType, Device, Layout, Shape, Tensor};
use std::str::FromStr;

pub const MMD_EPS: f64 = 1e-6;
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MmdKernel {
    /// pairwise L1 distances
    #[value(name = "tv")]
    TotalVariation,
    /// information diffusion kernel on the sqrt-simplex
    #[default]
    #[value(name = "diffusion")]
    Diffusion,
}

impl FromStr for MmdKernel {
    type Err = WaeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tv" => Ok(MmdKernel::TotalVariation),
            "diffusion" => Ok(MmdKernel::Diffusion),
            _ => Err(WaeError::invalid(format!("unknown MMD kernel: {}", s))),
        }
    }
}

/// MMD between `x_nk` and `y_mk` (both n x k, m x k with n, m >= 2)
///
/// * `kernel` - `tv` or `diffusion`
/// * `temperature` - diffusion kernel temperature (ignored by `tv`)
///
/// Returns a scalar tensor on the device of `x_nk`.
pub fn mmd_distance(
    x_nk: &Tensor,
    y_mk: &Tensor,
    kernel: MmdKernel,
    temperature: f64,
) -> Result<Tensor> {
    let (n, k) = x_nk.dims2().map_err(|_| not_2d("x", x_nk))?;
    let (m, k_y) = y_mk.dims2().map_err(|_| not_2d("y", y_mk))?;

    if k != k_y {
        return Err(WaeError::invalid(format!(
            "mmd: {} vs. {} topic columns",
            k, k_y
        )));
    }
    if n < 2 || m < 2 {
        return Err(WaeError::invalid(format!(
            "mmd: need at least 2 rows per batch, got {} and {}",
            n, m
        )));
    }
    if !(temperature.is_finite() && temperature > 0.) {
        return Err(WaeError::invalid(format!(
            "mmd: temperature must be positive, got {}",
            temperature
        )));
    }

    let y_mk = y_mk.to_device(x_nk.device())?.to_dtype(x_nk.dtype())?;

    let mmd = match kernel {
        MmdKernel::TotalVariation => total_variation_mmd(x_nk, &y_mk)?,
        MmdKernel::Diffusion => diffusion_mmd(x_nk, &y_mk, temperature)?,
    };

    let value = mmd.to_dtype(DType::F64)?.to_scalar::<f64>()?;
    if !value.is_finite() {
        return Err(WaeError::NumericDomain(format!(
            "mmd ({:?}) evaluated to {}",
            kernel, value
        )));
    }
    Ok(mmd)
}

fn not_2d(what: &str, x: &Tensor) -> WaeError {
    WaeError::invalid(format!("mmd: {} must be 2D, got {:?}", what, x.dims()))
}

/// sum_{i≠j} k(x_i,x_j)/(n(n-1)) + sum_{i≠j} k(y_i,y_j)/(m(m-1))
///  - 2 sum_{i,j} k(x_i,y_j)/(nm)
fn diffusion_mmd(x_nk: &Tensor, y_mk: &Tensor, temperature: f64) -> Result<Tensor> {
    let n = x_nk.dim(0)?;
    let m = y_mk.dim(0)?;

    let qx = x_nk.clamp(MMD_EPS, 1.0)?.sqrt()?;
    let qy = y_mk.clamp(MMD_EPS, 1.0)?.sqrt()?;

    let xx = qx.matmul(&qx.t()?)?;
    let yy = qy.matmul(&qy.t()?)?;
    let xy = qx.matmul(&qy.t()?)?;

    let k_xx = diffusion_kernel(&xx, temperature)?;
    let k_yy = diffusion_kernel(&yy, temperature)?;
    let k_xy = diffusion_kernel(&xy, temperature)?;

    let sum_xx = off_diagonal_sum(&k_xx)?.affine(1.0 / (n * (n - 1)) as f64, 0.0)?;
    let sum_yy = off_diagonal_sum(&k_yy)?.affine(1.0 / (m * (m - 1)) as f64, 0.0)?;
    let sum_xy = k_xy.sum_all()?.affine(2.0 / (n * m) as f64, 0.0)?;

    Ok(((sum_xx + sum_yy)? - sum_xy)?)
}

/// exp(-arccos(a)^2) / t, after clamping a to [0, 1-eps]
fn diffusion_kernel(gram: &Tensor, temperature: f64) -> Result<Tensor> {
    let a = gram.clamp(0.0, 1.0 - MMD_EPS)?;
    Ok(arccos(&a)?
        .sqr()?
        .neg()?
        .exp()?
        .affine(1.0 / temperature, 0.0)?)
}

fn off_diagonal_sum(k_nn: &Tensor) -> Result<Tensor> {
    let n = k_nn.dim(0)?;
    let off_diag = Tensor::eye(n, k_nn.dtype(), k_nn.device())?.affine(-1.0, 1.0)?;
    Ok(k_nn.mul(&off_diag)?.sum_all()?)
}

/// sum_{i<j} |x_i-x_j|/(n(n-1)) + sum_{i<j} |y_i-y_j|/(m(m-1))
///  - sum_{i,j} |x_i-y_j|/(nm)
fn total_variation_mmd(x_nk: &Tensor, y_mk: &Tensor) -> Result<Tensor> {
    let n = x_nk.dim(0)?;
    let m = y_mk.dim(0)?;

    // each unordered pair shows up twice in the symmetric n x n grid
    let sum_xx = pairwise_l1(x_nk, x_nk)?
        .sum_all()?
        .affine(0.5 / (n * (n - 1)) as f64, 0.0)?;
    let sum_yy = pairwise_l1(y_mk, y_mk)?
        .sum_all()?
        .affine(0.5 / (m * (m - 1)) as f64, 0.0)?;
    let sum_xy = pairwise_l1(x_nk, y_mk)?
        .sum_all()?
        .affine(1.0 / (n * m) as f64, 0.0)?;

    Ok(((sum_xx + sum_yy)? - sum_xy)?)
}

/// n x m matrix of L1 distances between rows of `a_nk` and `b_mk`
fn pairwise_l1(a_nk: &Tensor, b_mk: &Tensor) -> candle_core::Result<Tensor> {
    a_nk.unsqueeze(1)?
        .broadcast_sub(&b_mk.unsqueeze(0)?)?
        .abs()?
        .sum(2)
}

/////////////////////////////
// differentiable arccos   //
/////////////////////////////

/// Elementwise arccos with gradient `-1/sqrt(1-a^2)`. Evaluated on the
/// host; tensors on other devices make a round trip.
pub fn arccos(a: &Tensor) -> candle_core::Result<Tensor> {
    if a.device().is_cpu() {
        a.contiguous()?.apply_op1(ArcCos)
    } else {
        a.to_device(&Device::Cpu)?
            .contiguous()?
            .apply_op1(ArcCos)?
            .to_device(a.device())
    }
}

struct ArcCos;

impl CustomOp1 for ArcCos {
    fn name(&self) -> &'static str {
        "arccos"
    }

    fn cpu_fwd(
        &self,
        storage: &CpuStorage,
        layout: &Layout,
    ) -> candle_core::Result<(CpuStorage, Shape)> {
        let (lb, ub) = layout
            .contiguous_offsets()
            .ok_or_else(|| candle_core::Error::Msg("arccos: non-contiguous input".into()))?;

        // out-of-domain inputs come back as NaN and are caught by the caller
        let out = match storage {
            CpuStorage::F32(vs) => CpuStorage::F32(vs[lb..ub].iter().map(|v| v.acos()).collect()),
            CpuStorage::F64(vs) => CpuStorage::F64(vs[lb..ub].iter().map(|v| v.acos()).collect()),
            _ => candle_core::bail!("arccos: only f32 and f64 are supported"),
        };
        Ok((out, layout.shape().clone()))
    }

    fn bwd(
        &self,
        arg: &Tensor,
        _res: &Tensor,
        grad_res: &Tensor,
    ) -> candle_core::Result<Option<Tensor>> {
        let dres_darg = arg.sqr()?.affine(-1.0, 1.0)?.sqrt()?.recip()?.neg()?;
        Ok(Some(grad_res.mul(&dres_darg)?))
    }
}
