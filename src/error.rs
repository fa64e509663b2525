use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompassError {
    #[error("hook input is empty")]
    EmptyInput,

    #[error("hook input too large (more than {limit} bytes)")]
    InputTooLarge { limit: usize },

    #[error("hook input is not valid JSON: {0}")]
    MalformedInput(#[source] serde_json::Error),

    #[error("hook input must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("tool input field `{field}` must be {expected}")]
    InvalidToolInput {
        field: &'static str,
        expected: &'static str,
    },

    #[error("failed to read hook input: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize hook output: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl CompassError {
    /// Input errors are fatal for the invocation; everything else is recovered
    /// or converted into a decision before it reaches the process boundary.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CompassError::EmptyInput
                | CompassError::InputTooLarge { .. }
                | CompassError::MalformedInput(_)
                | CompassError::NotAnObject(_)
        )
    }
}
