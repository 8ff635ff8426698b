use crate::candle_aux_layers::Nonlinearity;
use crate::candle_wae::WaeModel;
use crate::prior_sampler::PriorKind;
use crate::wae_config::WaeConfig;

use anyhow::Result;
use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma, Poisson};

#[derive(Args, Debug)]
pub struct CheckModelArgs {
    #[arg(short, long, help = "Vocabulary size")]
    pub vocab: usize,

    #[arg(short, long, help = "Number of topics")]
    pub topics: usize,

    #[arg(short, long, default_value = "64")]
    pub batch: usize,

    #[arg(short, long, default_value = "relu")]
    pub nonlinearity: Nonlinearity,

    #[arg(short, long, default_value = "dirichlet")]
    pub prior: PriorKind,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(long, help = "Use an accelerator if one is available")]
    pub gpu: bool,
}

/// Counts x(i,w) ~ Poisson(rate(i,w)) with rate(i,w) ~ Gamma(1, 1)
fn simulate_counts(nrow: usize, ncol: usize, rng: &mut StdRng) -> Result<Vec<f32>> {
    let rate = Gamma::new(1.0_f64, 1.0)?;
    (0..(nrow * ncol))
        .map(|_| {
            let lambda = rate.sample(rng).max(1e-8);
            let count: f64 = Poisson::new(lambda)?.sample(rng);
            Ok(count as f32)
        })
        .collect()
}

pub fn run(args: &CheckModelArgs) -> Result<()> {
    let device = super::select_device(args.gpu);
    info!("Using device: {:?}", device);

    let mut rng = StdRng::seed_from_u64(args.seed);

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = WaeConfig::new(args.vocab, args.topics).with_nonlinearity(args.nonlinearity);
    let model = WaeModel::new(config, vs)?;
    info!(
        "model: {} -> {} topics ({}), {} variables",
        model.vocab_size(),
        model.num_topics(),
        model.config().nonlinearity.name(),
        varmap.all_vars().len()
    );

    let data = simulate_counts(args.batch, args.vocab, &mut rng)?;
    let x_nd = Tensor::from_vec(data, (args.batch, args.vocab), &device)?;

    let (recon_nd, theta_nk) = model.forward(&x_nd)?;
    let row_sums = theta_nk.sum(1)?.to_vec1::<f32>()?;
    let (lo, hi) = row_sums
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    info!(
        "theta {:?}, row sums in [{:.6}, {:.6}]; reconstruction {:?}",
        theta_nk.dims(),
        lo,
        hi,
        recon_nd.dims()
    );

    let loss = model.loss(&x_nd, args.prior, &mut rng)?;
    info!(
        "reconstruction {:.4}, mmd[{}] {:.4}, total {:.4}",
        loss.reconstruction.to_scalar::<f32>()?,
        args.prior.name(),
        loss.mmd.to_scalar::<f32>()?,
        loss.total.to_scalar::<f32>()?
    );
    Ok(())
}
