use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use crate::error::{check_dims2, Result};
use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};

pub const DECODER_HIDDEN: usize = 512;

/////////////////////////////////
// Topic-simplex logit decoder //
/////////////////////////////////

pub struct LogitDecoder {
    n_features: usize,
    n_topics: usize,
    fc: StackLayers,
}

impl LogitDecoder {
    /// Will create a new decoder with the following parameters:
    /// * `dec.fc.0.{weight,bias}` (k -> 512)
    /// * `dec.fc.1.{weight,bias}` (512 -> d)
    pub fn new(
        n_features: usize,
        n_topics: usize,
        nonlin: Nonlinearity,
        vs: VarBuilder,
    ) -> Result<Self> {
        let dims = [n_topics, DECODER_HIDDEN, n_features];
        let fc = StackLayers::feed_forward(&dims, nonlin, "dec", vs)?;
        Ok(Self {
            n_features,
            n_topics,
            fc,
        })
    }
}

impl DecoderModuleT for LogitDecoder {
    /// Input theta_nk is already on the probability simplex
    fn forward(&self, theta_nk: &Tensor) -> Result<Tensor> {
        check_dims2(theta_nk, self.n_topics, "decoder input")?;
        Ok(self.fc.forward(theta_nk)?)
    }

    fn forward_with_llik<LlikFn>(
        &self,
        theta_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
    {
        let nrow = check_dims2(x_nd, self.n_features, "observed data")?;
        let logits_nd = self.forward(theta_nk)?;
        if logits_nd.dim(0)? != nrow {
            return Err(crate::error::WaeError::invalid(format!(
                "{} topic rows vs. {} observed rows",
                logits_nd.dim(0)?,
                nrow
            )));
        }
        let llik = llik(x_nd, &logits_nd)?;
        Ok((logits_nd, llik))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_topics
    }
}
