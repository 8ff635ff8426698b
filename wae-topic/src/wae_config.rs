use crate::candle_aux_layers::Nonlinearity;
use crate::candle_mmd::DEFAULT_TEMPERATURE;
use crate::error::{Result, WaeError};
use crate::prior_sampler::DEFAULT_DIRICHLET_ALPHA;

#[derive(Clone, Debug)]
pub struct WaeConfig {
    pub vocab_size: usize,
    pub num_topics: usize,
    /// validated but not applied; no dropout layer sits on the forward path
    pub dropout: f64,
    pub nonlinearity: Nonlinearity,
    /// concentration of the Dirichlet prior used by the MMD penalty
    pub dirichlet_alpha: f64,
    /// diffusion kernel temperature used by the MMD penalty
    pub temperature: f64,
}

impl WaeConfig {
    pub fn new(vocab_size: usize, num_topics: usize) -> Self {
        Self {
            vocab_size,
            num_topics,
            dropout: 0.0,
            nonlinearity: Nonlinearity::Relu,
            dirichlet_alpha: DEFAULT_DIRICHLET_ALPHA,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_nonlinearity(mut self, nonlinearity: Nonlinearity) -> Self {
        self.nonlinearity = nonlinearity;
        self
    }

    /// Select the nonlinearity by name (`relu` or `sigmoid`)
    pub fn with_nonlinearity_name(self, name: &str) -> Result<Self> {
        Ok(self.with_nonlinearity(name.parse()?))
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(WaeError::invalid("vocab_size must be positive"));
        }
        if self.num_topics == 0 {
            return Err(WaeError::invalid("num_topics must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(WaeError::invalid(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(self.dirichlet_alpha.is_finite() && self.dirichlet_alpha > 0.) {
            return Err(WaeError::invalid(format!(
                "dirichlet_alpha must be positive, got {}",
                self.dirichlet_alpha
            )));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.) {
            return Err(WaeError::invalid(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}
