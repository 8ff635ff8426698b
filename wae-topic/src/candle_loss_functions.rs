use crate::error::{Result, WaeError};
use candle_core::{DType, Tensor};
use candle_nn::ops;

/// Multinomial log-likelihood of bag-of-words data given logits
///
/// llik(i) = sum_w x(i,w) * log_softmax(logits(i,:))(w)
///
/// * `x_nd` - data tensor (observed counts or frequencies)
/// * `logits_nd` - unnormalized reconstruction
///
pub fn multinomial_log_likelihood(x_nd: &Tensor, logits_nd: &Tensor) -> candle_core::Result<Tensor> {
    let d = logits_nd.rank() - 1;
    x_nd.mul(&ops::log_softmax(logits_nd, d)?)?.sum(d)
}

/// Reconstruction loss summed over the whole batch (not averaged)
///
/// loss = - sum_i sum_w x(i,w) * log_softmax(recon(i,:))(w)
///
pub fn reconstruction_loss(x_nd: &Tensor, recon_nd: &Tensor) -> Result<Tensor> {
    if x_nd.dims() != recon_nd.dims() {
        return Err(WaeError::invalid(format!(
            "data {:?} vs. reconstruction {:?}",
            x_nd.dims(),
            recon_nd.dims()
        )));
    }
    Ok(multinomial_log_likelihood(x_nd, recon_nd)?.sum_all()?.neg()?)
}

/// Weight of the MMD penalty in bits-scaled units
///
/// λ = 5 * mean_i(sum_w x(i,w)) * ln(D) / ln(2)
///
pub fn mmd_weight(x_nd: &Tensor) -> Result<f64> {
    let (nrow, ncol) = x_nd.dims2()?;
    if nrow == 0 || ncol == 0 {
        return Err(WaeError::invalid(format!(
            "mmd weight needs a non-empty batch, got {:?}",
            x_nd.dims()
        )));
    }
    let tot = x_nd.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
    let mean_len = tot / nrow as f64;
    Ok(5.0 * mean_len * (ncol as f64).ln() / 2_f64.ln())
}
