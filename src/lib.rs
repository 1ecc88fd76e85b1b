pub mod config;
pub mod data_loading;
pub mod eda_analysis;
pub mod error;
pub mod heart_analysis;
pub mod merger;
pub mod output;
pub mod plotting;
pub mod preprocessing;
pub mod session;

pub use error::{PipelineError, Result};
