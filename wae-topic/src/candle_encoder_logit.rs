use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use crate::error::{check_dims2, Result};
use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};

pub const ENCODER_HIDDEN: [usize; 2] = [1024, 512];

/// Feed-forward encoder: d -> 1024 -> 512 -> k topic logits
pub struct LogitEncoder {
    n_features: usize,
    n_topics: usize,
    fc: StackLayers,
}

impl EncoderModuleT for LogitEncoder {
    fn forward(&self, x_nd: &Tensor) -> Result<Tensor> {
        check_dims2(x_nd, self.n_features, "encoder input")?;
        Ok(self.fc.forward(x_nd)?)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_topics
    }
}

impl LogitEncoder {
    /// Will create a new encoder module with these variables:
    ///
    /// * `enc.fc.{}.weight` where {} is the layer index
    /// * `enc.fc.{}.bias`
    ///
    /// # Arguments
    /// * `n_features` - vocabulary size
    /// * `n_topics` - the number of topics
    /// * `nonlin` - activation between hidden layers
    /// * `vs` - variable builder
    pub fn new(
        n_features: usize,
        n_topics: usize,
        nonlin: Nonlinearity,
        vs: VarBuilder,
    ) -> Result<Self> {
        let dims = [n_features, ENCODER_HIDDEN[0], ENCODER_HIDDEN[1], n_topics];
        let fc = StackLayers::feed_forward(&dims, nonlin, "enc", vs)?;

        Ok(Self {
            n_features,
            n_topics,
            fc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WaeError;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn encoder_logit_shape() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = LogitEncoder::new(20, 4, Nonlinearity::Relu, vs)?;

        let x = Tensor::rand(0_f32, 3_f32, (6, 20), &dev)?;
        assert_eq!(enc.forward(&x)?.dims(), &[6, 4]);

        let bad = Tensor::rand(0_f32, 3_f32, (6, 19), &dev)?;
        assert!(matches!(
            enc.forward(&bad),
            Err(WaeError::InvalidArgument(_))
        ));
        Ok(())
    }
}
