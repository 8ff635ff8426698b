pub mod check_model;
pub mod prior_mmd;
pub mod sample_prior;

use clap::{Parser, Subcommand};

pub use check_model::CheckModelArgs;
pub use prior_mmd::PriorMmdArgs;
pub use sample_prior::SamplePriorArgs;

#[derive(Parser)]
#[command(name = "wae-topic")]
#[command(about = "Diagnostics for the Wasserstein autoencoder topic model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a batch sampled from a topic prior as TSV
    SamplePrior(SamplePriorArgs),
    /// MMD between two prior families
    PriorMmd(PriorMmdArgs),
    /// Build a fresh model and evaluate one simulated batch
    CheckModel(CheckModelArgs),
}

/// Pick an accelerator if asked for and available
pub(crate) fn select_device(gpu: bool) -> candle_core::Device {
    use candle_core::Device;
    if !gpu {
        return Device::Cpu;
    }
    if cfg!(target_os = "macos") {
        Device::new_metal(0).unwrap_or(Device::Cpu)
    } else {
        Device::new_cuda(0).unwrap_or(Device::Cpu)
    }
}
