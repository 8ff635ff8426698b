use crate::error::{Result, WaeError};
use candle_core::Tensor;
use candle_nn::{Activation, Linear, Module, VarBuilder};
use std::str::FromStr;

/// Hidden-layer nonlinearity of the encoder/decoder stacks
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Nonlinearity {
    #[default]
    Relu,
    Sigmoid,
}

impl Nonlinearity {
    pub fn activation(&self) -> Activation {
        match self {
            Nonlinearity::Relu => Activation::Relu,
            Nonlinearity::Sigmoid => Activation::Sigmoid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Nonlinearity::Relu => "relu",
            Nonlinearity::Sigmoid => "sigmoid",
        }
    }
}

impl FromStr for Nonlinearity {
    type Err = WaeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "relu" => Ok(Nonlinearity::Relu),
            "sigmoid" => Ok(Nonlinearity::Sigmoid),
            _ => Err(WaeError::invalid(format!("unknown nonlinearity: {}", s))),
        }
    }
}

/// A stack of linear layers with a nonlinearity between consecutive
/// layers; the last layer stays linear.
pub struct StackLayers {
    layers: Vec<Linear>,
    activation: Activation,
    dims: Vec<usize>,
}

impl Module for StackLayers {
    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = input.clone();
        let last = self.layers.len().saturating_sub(1);
        for (j, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if j < last {
                x = self.activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl StackLayers {
    /// Will create `dims.len() - 1` linear layers with these variables:
    ///
    /// * `{prefix}.fc.{j}.weight`
    /// * `{prefix}.fc.{j}.bias`
    ///
    /// # Arguments
    /// * `dims` - input, hidden..., output dimensions
    /// * `nonlin` - activation applied between layers
    /// * `prefix` - variable name prefix
    /// * `vs` - variable builder
    pub fn feed_forward(
        dims: &[usize],
        nonlin: Nonlinearity,
        prefix: &str,
        vs: VarBuilder,
    ) -> Result<Self> {
        if dims.len() < 2 {
            return Err(WaeError::invalid(format!(
                "{}: need at least input and output dims, got {:?}",
                prefix, dims
            )));
        }
        if let Some(d) = dims.iter().find(|&&d| d == 0) {
            return Err(WaeError::invalid(format!(
                "{}: zero-sized layer {} in {:?}",
                prefix, d, dims
            )));
        }

        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(j, w)| candle_nn::linear(w[0], w[1], vs.pp(format!("{}.fc.{}", prefix, j))))
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            activation: nonlin.activation(),
            dims: dims.to_vec(),
        })
    }

    pub fn dim_in(&self) -> usize {
        self.dims[0]
    }

    pub fn dim_out(&self) -> usize {
        self.dims[self.dims.len() - 1]
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
