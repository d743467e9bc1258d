use common::domain::{DomainError, MessageCategory};
use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    /// Terminal: retrying cannot fix a configuration that selects nothing
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to create {category} consumer: {reason}")]
    ConsumerCreationFailed {
        category: MessageCategory,
        reason: String,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RelayError {
    pub(crate) fn no_category_selected() -> Self {
        RelayError::InvalidConfiguration(
            "no valid message category selected. Valid types are \"telemetry\", \"event\" or \"all\""
                .to_string(),
        )
    }

    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, RelayError::InvalidConfiguration(_))
    }
}
