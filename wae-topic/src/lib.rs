pub mod candle_aux_layers;
pub mod candle_decoder_logit;
pub mod candle_encoder_logit;
pub mod candle_loss_functions;
pub mod candle_mmd;
pub mod candle_model_traits;
pub mod candle_wae;
pub mod cli;
pub mod error;
pub mod gaussian_mixture;
pub mod prior_sampler;
pub mod wae_config;

pub use candle_aux_layers::Nonlinearity;
pub use candle_mmd::{mmd_distance, MmdKernel};
pub use candle_wae::{WaeLoss, WaeModel};
pub use error::{Result, WaeError};
pub use prior_sampler::PriorKind;
pub use wae_config::WaeConfig;

pub use candle_core;
pub use candle_nn;
