use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ferrofeed_core::ValidationError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl From<ferrofeed_core::CoreError> for CliError {
    fn from(error: ferrofeed_core::CoreError) -> Self {
        match error {
            ferrofeed_core::CoreError::Validation(error) => Self::Validation(error),
            ferrofeed_core::CoreError::Serialization(error) => Self::Serialization(error),
            ferrofeed_core::CoreError::Io(error) => Self::Io(error),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
            Self::Logging(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_keep_their_exit_codes() {
        let invalid = CliError::from(ferrofeed_core::CoreError::Validation(
            ferrofeed_core::ValidationError::EmptySourceId,
        ));
        assert_eq!(invalid.exit_code(), 2);

        let missing = CliError::from(ferrofeed_core::CoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "sources.json",
        )));
        assert_eq!(missing.exit_code(), 10);
    }
}
