use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("audio error while {context}: {message}")]
    Audio {
        context: &'static str,
        message: String,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("configuration error: {message}")]
    Config { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("missing required feature `{name}`")]
    MissingFeature { name: String },
}

impl ScoringError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn audio(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Audio {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn missing_feature(name: impl Into<String>) -> Self {
        Self::MissingFeature { name: name.into() }
    }

    /// True for failures raised while loading models or configuration files.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Json { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = ScoringError::runtime("forward pass", "shape mismatch");
        assert_eq!(err.to_string(), "forward pass: shape mismatch");

        let err = ScoringError::missing_feature("PPG");
        assert_eq!(err.to_string(), "missing required feature `PPG`");
    }

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(ScoringError::config("no weights").is_configuration());
        assert!(!ScoringError::invalid_input("empty audio").is_configuration());
    }
}
