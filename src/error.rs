/// Error types that can occur while running the reference recurrence
///
/// # Variants
///
/// - `InvalidShape` - An input, state, weight or gradient tensor does not have the shape the call requires
/// - `UnsupportedVariant` - A recurrence variant outside {ReLU, Tanh, LSTM, GRU} was requested, or
///   the supplied parameters belong to a different variant than the configuration
/// - `InvalidConfiguration` - A configuration value is out of range (zero sizes, dropout outside `[0, 1)`, ...)
#[derive(Debug, Clone, PartialEq)]
pub enum RnnError {
    InvalidShape(String),
    UnsupportedVariant(String),
    InvalidConfiguration(String),
}

impl std::fmt::Display for RnnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RnnError::InvalidShape(msg) => write!(f, "Invalid shape: {}", msg),
            RnnError::UnsupportedVariant(msg) => write!(f, "Unsupported variant: {}", msg),
            RnnError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

/// Implements the standard error trait for RnnError
impl std::error::Error for RnnError {}
