use std::path::PathBuf;
use thiserror::Error;

/// Failures shared by the merger, EDA and PPG jobs.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("file not found: {}", path.display())]
    MissingFile { path: PathBuf },
    #[error("column '{column}' not found in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },
    #[error("empty signal: {0}")]
    EmptySignal(String),
    #[error("computation failed: {0}")]
    ComputationFailure(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to render plot: {0}")]
    Plot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),
}

impl PipelineError {
    pub fn is_missing_file(&self) -> bool {
        matches!(self, PipelineError::MissingFile { .. })
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for PipelineError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        PipelineError::Plot(format!("{value:?}"))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
