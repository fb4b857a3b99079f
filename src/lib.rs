//! Extraction of labelled crop-type training instances from satellite
//! raster time series.

pub mod config;
pub mod data;
pub mod engineer;
pub mod error;
pub mod session;

pub use config::ExtractionConfig;
pub use error::{ExtractError, Result};
pub use session::{ExtractionSession, SessionSummary, Split};
