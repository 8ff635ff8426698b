use crate::error::Result;
use candle_core::Tensor;

pub trait EncoderModuleT {
    /// An encoder that spits out unnormalized topic logits
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    ///
    /// # Returns `z_nk` - topic logits (n x k)
    fn forward(&self, x_nd: &Tensor) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction logits (n x d)
    fn forward(&self, theta_nk: &Tensor) -> Result<Tensor>;

    /// A decoder that spits out reconstruction and log-likelihood
    /// * `theta_nk` - topic proportions
    /// * `x_nd` - observed data to validate with
    /// * `llik` - fn (observed, reconstruction) -> log-likelihood
    fn forward_with_llik<LlikFn>(
        &self,
        theta_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
