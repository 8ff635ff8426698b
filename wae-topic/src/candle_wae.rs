use crate::candle_decoder_logit::LogitDecoder;
use crate::candle_encoder_logit::LogitEncoder;
use crate::candle_loss_functions::{mmd_weight, multinomial_log_likelihood, reconstruction_loss};
use crate::candle_mmd::{mmd_distance, MmdKernel};
use crate::candle_model_traits::{DecoderModuleT, EncoderModuleT};
use crate::error::{Result, WaeError};
use crate::prior_sampler::*;
use crate::wae_config::WaeConfig;

use candle_core::Tensor;
use candle_nn::{ops, VarBuilder};
use log::debug;
use rand::Rng;

/// Wasserstein autoencoder topic model
///
/// x (n x d) -> encoder -> logits (n x k) -> softmax -> theta (n x k)
///   -> decoder -> reconstruction logits (n x d)
///
/// The latent theta is pulled toward a prior by an MMD penalty.
pub struct WaeModel {
    config: WaeConfig,
    encoder: LogitEncoder,
    decoder: LogitDecoder,
}

/// Per-batch loss terms
pub struct WaeLoss {
    /// - sum x * log_softmax(recon)
    pub reconstruction: Tensor,
    /// λ * mmd(theta, prior)
    pub mmd: Tensor,
    pub total: Tensor,
    pub theta: Tensor,
}

impl WaeModel {
    /// Will create the encoder (`enc.fc.*`) and decoder (`dec.fc.*`)
    /// variables in `vs`
    pub fn new(config: WaeConfig, vs: VarBuilder) -> Result<Self> {
        config.validate()?;

        let encoder = LogitEncoder::new(
            config.vocab_size,
            config.num_topics,
            config.nonlinearity,
            vs.clone(),
        )?;
        let decoder = LogitDecoder::new(
            config.vocab_size,
            config.num_topics,
            config.nonlinearity,
            vs,
        )?;

        if encoder.dim_latent() != decoder.dim_latent() || encoder.dim_obs() != decoder.dim_obs() {
            return Err(WaeError::invalid(format!(
                "encoder {}->{} does not match decoder {}->{}",
                encoder.dim_obs(),
                encoder.dim_latent(),
                decoder.dim_latent(),
                decoder.dim_obs()
            )));
        }

        Ok(Self {
            config,
            encoder,
            decoder,
        })
    }

    pub fn config(&self) -> &WaeConfig {
        &self.config
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    pub fn num_topics(&self) -> usize {
        self.config.num_topics
    }

    /// document vectors (n x d) -> topic logits (n x k)
    pub fn encode(&self, x_nd: &Tensor) -> Result<Tensor> {
        self.encoder.forward(x_nd)
    }

    /// topic proportions (n x k) -> reconstruction logits (n x d)
    pub fn decode(&self, theta_nk: &Tensor) -> Result<Tensor> {
        self.decoder.forward(theta_nk)
    }

    /// Returns `(x_reconst_nd, theta_nk)`
    pub fn forward(&self, x_nd: &Tensor) -> Result<(Tensor, Tensor)> {
        let theta_nk = ops::softmax(&self.encode(x_nd)?, 1)?;
        let recon_nd = self.decode(&theta_nk)?;
        Ok((recon_nd, theta_nk))
    }

    /// Draw reference topic proportions (host tensor, f32)
    ///
    /// # Arguments
    /// * `kind` - prior family
    /// * `batch_size` - number of rows (ignored by `GmmCtm` with a source)
    /// * `dirichlet_alpha` - Dirichlet concentration
    /// * `source_nd` - documents encoded for the `GmmCtm` fit
    /// * `rng` - random source
    ///
    /// `GmmCtm` without `source_nd` falls back to a Dirichlet prior with
    /// the default concentration; an empty `source_nd` is a fit failure.
    pub fn sample_prior<R: Rng + ?Sized>(
        &self,
        kind: PriorKind,
        batch_size: usize,
        dirichlet_alpha: f64,
        source_nd: Option<&Tensor>,
        rng: &mut R,
    ) -> Result<Tensor> {
        let source_logits = match (kind, source_nd) {
            (PriorKind::GmmCtm, Some(x_nd)) => {
                if x_nd.dims2()?.0 == 0 {
                    return Err(WaeError::fit("empty source batch"));
                }
                let logits_nk = self.encode(x_nd)?.detach();
                Some(tensor_to_dmatrix(&logits_nk)?)
            }
            _ => None,
        };
        sample_prior(
            kind,
            batch_size,
            self.num_topics(),
            dirichlet_alpha,
            source_logits.as_ref(),
            rng,
        )
    }

    /// Sum of the multinomial reconstruction loss over the batch
    pub fn reconstruction_loss(&self, x_nd: &Tensor, recon_nd: &Tensor) -> Result<Tensor> {
        reconstruction_loss(x_nd, recon_nd)
    }

    /// λ * mmd(theta_q, prior) with the diffusion kernel, where the prior
    /// batch matches `x_nd` in size and `x_nd` feeds the `GmmCtm` fit
    pub fn mmd_regularization_loss<R: Rng + ?Sized>(
        &self,
        x_nd: &Tensor,
        theta_nk: &Tensor,
        kind: PriorKind,
        rng: &mut R,
    ) -> Result<Tensor> {
        let nrow = x_nd.dims2()?.0;
        let prior_nk = self
            .sample_prior(kind, nrow, self.config.dirichlet_alpha, Some(x_nd), rng)?
            .to_device(x_nd.device())?
            .to_dtype(theta_nk.dtype())?;

        let mmd = mmd_distance(
            theta_nk,
            &prior_nk,
            MmdKernel::Diffusion,
            self.config.temperature,
        )?;
        let lambda = mmd_weight(x_nd)?;
        debug!("mmd weight λ = {:.4}", lambda);
        Ok(mmd.affine(lambda, 0.0)?)
    }

    /// Forward pass and both loss terms in one call
    pub fn loss<R: Rng + ?Sized>(
        &self,
        x_nd: &Tensor,
        kind: PriorKind,
        rng: &mut R,
    ) -> Result<WaeLoss> {
        let theta_nk = ops::softmax(&self.encode(x_nd)?, 1)?;
        let (_, llik_n) =
            self.decoder
                .forward_with_llik(&theta_nk, x_nd, &multinomial_log_likelihood)?;
        let reconstruction = llik_n.sum_all()?.neg()?;
        let mmd = self.mmd_regularization_loss(x_nd, &theta_nk, kind, rng)?;
        let total = (&reconstruction + &mmd)?;
        Ok(WaeLoss {
            reconstruction,
            mmd,
            total,
            theta: theta_nk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_aux_layers::Nonlinearity;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build(vocab: usize, topics: usize, varmap: &VarMap) -> Result<WaeModel> {
        let vs = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        WaeModel::new(WaeConfig::new(vocab, topics), vs)
    }

    #[test]
    fn variables_are_registered() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let _model = build(30, 4, &varmap)?;
        // 3 encoder + 2 decoder layers, weight and bias each
        assert_eq!(varmap.all_vars().len(), 10);

        let data = varmap.data().lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        assert_eq!(data["enc.fc.0.weight"].dims(), &[1024, 30]);
        assert_eq!(data["enc.fc.2.weight"].dims(), &[4, 512]);
        assert_eq!(data["dec.fc.0.weight"].dims(), &[512, 4]);
        assert_eq!(data["dec.fc.1.weight"].dims(), &[30, 512]);
        Ok(())
    }

    #[test]
    fn rejects_invalid_config() {
        let varmap = VarMap::new();
        assert!(matches!(build(0, 4, &varmap), Err(WaeError::InvalidArgument(_))));

        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cfg = WaeConfig::new(10, 3)
            .with_nonlinearity(Nonlinearity::Sigmoid)
            .with_dropout(-0.1);
        assert!(WaeModel::new(cfg, vs).is_err());
    }

    #[test]
    fn gmm_ctm_without_source_falls_back() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let model = build(12, 3, &varmap)?;
        let mut rng = StdRng::seed_from_u64(0);
        let z = model.sample_prior(PriorKind::GmmCtm, 5, 0.1, None, &mut rng)?;
        assert_eq!(z.dims(), &[5, 3]);
        Ok(())
    }

    #[test]
    fn gmm_ctm_with_empty_source_fails() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let model = build(12, 3, &varmap)?;
        let mut rng = StdRng::seed_from_u64(0);
        let empty = Tensor::zeros((0, 12), DType::F32, &Device::Cpu)?;
        let res = model.sample_prior(PriorKind::GmmCtm, 5, 0.1, Some(&empty), &mut rng);
        assert!(matches!(res, Err(WaeError::FitFailure(_))));
        Ok(())
    }

    #[test]
    fn loss_terms_add_up() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let model = build(20, 4, &varmap)?;
        let x = Tensor::rand(0_f32, 2_f32, (6, 20), &Device::Cpu)?;

        let mut rng = StdRng::seed_from_u64(9);
        let loss = model.loss(&x, PriorKind::Dirichlet, &mut rng)?;
        let rec = loss.reconstruction.to_scalar::<f32>()?;
        let mmd = loss.mmd.to_scalar::<f32>()?;
        approx::assert_abs_diff_eq!(loss.total.to_scalar::<f32>()?, rec + mmd, epsilon = 1e-3);

        let (recon, theta) = model.forward(&x)?;
        let rec2 = model.reconstruction_loss(&x, &recon)?.to_scalar::<f32>()?;
        approx::assert_abs_diff_eq!(rec, rec2, epsilon = 1e-3);

        let mut rng = StdRng::seed_from_u64(9);
        let mmd2 = model
            .mmd_regularization_loss(&x, &theta, PriorKind::Dirichlet, &mut rng)?
            .to_scalar::<f32>()?;
        approx::assert_abs_diff_eq!(mmd, mmd2, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn mmd_penalty_is_weighted_prior_distance() -> anyhow::Result<()> {
        let varmap = VarMap::new();
        let model = build(16, 3, &varmap)?;
        assert_eq!(model.config().temperature, crate::candle_mmd::DEFAULT_TEMPERATURE);

        // raw counts, so λ depends on the mean document length
        let x = Tensor::rand(0_f32, 4_f32, (7, 16), &Device::Cpu)?.round()?;
        let (_, theta) = model.forward(&x)?;

        let seed = 31;
        let prior = crate::prior_sampler::sample_prior(
            PriorKind::Dirichlet,
            7,
            3,
            model.config().dirichlet_alpha,
            None,
            &mut StdRng::seed_from_u64(seed),
        )?;
        let lambda = mmd_weight(&x)?;
        let mean_len = x.sum_all()?.to_scalar::<f32>()? as f64 / 7.0;
        approx::assert_relative_eq!(
            lambda,
            5.0 * mean_len * 16_f64.log2(),
            max_relative = 1e-5
        );
        assert!((lambda - 5.0 * 16_f64.log2()).abs() > 1.0);

        let expected = lambda
            * mmd_distance(
                &theta,
                &prior,
                MmdKernel::Diffusion,
                model.config().temperature,
            )?
            .to_scalar::<f32>()? as f64;

        let penalty = model
            .mmd_regularization_loss(
                &x,
                &theta,
                PriorKind::Dirichlet,
                &mut StdRng::seed_from_u64(seed),
            )?
            .to_scalar::<f32>()? as f64;

        approx::assert_relative_eq!(penalty, expected, epsilon = 1e-4, max_relative = 1e-4);
        Ok(())
    }
}
