use crate::candle_mmd::{mmd_distance, MmdKernel, DEFAULT_TEMPERATURE};
use crate::prior_sampler::{sample_prior, PriorKind, DEFAULT_DIRICHLET_ALPHA};
use anyhow::Result;
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct PriorMmdArgs {
    #[arg(short, long, default_value = "dirichlet")]
    pub left: PriorKind,

    #[arg(short, long, default_value = "gaussian")]
    pub right: PriorKind,

    #[arg(short, long, help = "Number of topics")]
    pub topics: usize,

    #[arg(short, long, default_value = "256")]
    pub batch: usize,

    #[arg(short, long, default_value = "diffusion")]
    pub kernel: MmdKernel,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f64,

    #[arg(short, long, default_value_t = DEFAULT_DIRICHLET_ALPHA)]
    pub alpha: f64,

    #[arg(long, default_value = "42")]
    pub seed: u64,
}

pub fn run(args: &PriorMmdArgs) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);

    let x_nk = sample_prior(args.left, args.batch, args.topics, args.alpha, None, &mut rng)?;
    let y_nk = sample_prior(args.right, args.batch, args.topics, args.alpha, None, &mut rng)?;

    let mmd = mmd_distance(&x_nk, &y_nk, args.kernel, args.temperature)?
        .to_scalar::<f32>()?;

    info!(
        "mmd[{:?}]({}, {}) = {:.6}",
        args.kernel,
        args.left.name(),
        args.right.name(),
        mmd
    );
    println!("{}", mmd);
    Ok(())
}
