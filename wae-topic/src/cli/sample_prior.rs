use crate::prior_sampler::{sample_prior, PriorKind, DEFAULT_DIRICHLET_ALPHA};
use anyhow::Result;
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{BufWriter, Write};

#[derive(Args, Debug)]
pub struct SamplePriorArgs {
    #[arg(short, long, default_value = "dirichlet")]
    pub kind: PriorKind,

    #[arg(short, long, help = "Number of topics")]
    pub topics: usize,

    #[arg(short, long, default_value = "256")]
    pub batch: usize,

    #[arg(short, long, default_value_t = DEFAULT_DIRICHLET_ALPHA)]
    pub alpha: f64,

    #[arg(long, default_value = "42")]
    pub seed: u64,
}

pub fn run(args: &SamplePriorArgs) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let z_nk = sample_prior(args.kind, args.batch, args.topics, args.alpha, None, &mut rng)?;
    info!("sampled {:?} from the {} prior", z_nk.dims(), args.kind.name());

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for row in z_nk.to_vec2::<f32>()? {
        let line = row
            .iter()
            .map(|v| format!("{}", v))
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}
