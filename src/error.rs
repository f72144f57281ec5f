// Typed errors with thiserror. Missing data is never an error; see DESIGN.md: Error taxonomy.

use thiserror::Error;

/// Pipeline error types.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid picture geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid scoring window: {0}")]
    InvalidWindow(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed session record{}: {message}", trial_suffix(.trial))]
    Format {
        trial: Option<usize>,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Table write error: {0}")]
    Csv(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export cancelled after {written} tables")]
    Cancelled { written: usize },
}

fn trial_suffix(trial: &Option<usize>) -> String {
    match trial {
        Some(index) => format!(" at trial {}", index),
        None => String::new(),
    }
}

impl PipelineError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        PipelineError::Format {
            trial: None,
            message: message.into(),
        }
    }

    pub(crate) fn trial_format(trial: usize, message: impl Into<String>) -> Self {
        PipelineError::Format {
            trial: Some(trial),
            message: message.into(),
        }
    }

    /// Configuration errors are fatal for one computation but not for a batch run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidGeometry(_)
                | PipelineError::InvalidWindow(_)
                | PipelineError::InvalidConfig(_)
        )
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Csv(err.to_string())
    }
}
