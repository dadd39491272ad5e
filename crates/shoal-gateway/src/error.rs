//! Gateway start-up errors.
//!
//! Request handling never fails with these; the Data API reports every
//! request outcome as a [`DataApiResponse`](crate::api::DataApiResponse).

use thiserror::Error;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Schema or storage failure while building the application state.
    #[error(transparent)]
    Core(#[from] shoal_core::Error),
}
