//! Error type of the core numeric helpers.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Failures the numeric layer can surface.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A computed quantity left the representable range (NaN or infinite).
    #[error("non-finite {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },
}
