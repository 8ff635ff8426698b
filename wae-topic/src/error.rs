use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("mixture fit failed: {0}")]
    FitFailure(String),

    /// `sqrt`/`arccos` left their domain after clamping; a bug, not a caller error
    #[error("numeric domain violation: {0}")]
    NumericDomain(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, WaeError>;

impl WaeError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn fit<S: Into<String>>(msg: S) -> Self {
        Self::FitFailure(msg.into())
    }
}

/// Check that `x` is a 2D tensor with `ncol` columns and return its rows.
pub fn check_dims2(x: &candle_core::Tensor, ncol: usize, what: &str) -> Result<usize> {
    match *x.dims() {
        [nrow, d] if d == ncol => Ok(nrow),
        [_, d] => Err(WaeError::invalid(format!(
            "{}: expected {} columns, got {}",
            what, ncol, d
        ))),
        _ => Err(WaeError::invalid(format!(
            "{}: expected a 2D tensor, got shape {:?}",
            what,
            x.dims()
        ))),
    }
}
