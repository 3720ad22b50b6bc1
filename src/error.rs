use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// A control input that cannot be mapped onto the vehicle, e.g. gear 7.
    InvalidInput(String),
    /// Configuration could not be read, parsed or validated.
    Config(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            SimError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SimError {}

pub type SimResult<T> = Result<T, SimError>;
