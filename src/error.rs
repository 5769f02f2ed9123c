use core::fmt;

use crate::config::ConfigError;
use crate::mesh::ShapeError;

/// Errors raised before any numerical work starts.
///
/// Numerical failures during a solve are not errors; they are captured in
/// [`SolveResult::error`](crate::SolveResult::error).
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Config(ConfigError),
    Shape(ShapeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid solver configuration: {err}"),
            Self::Shape(err) => write!(f, "invalid input shape: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Shape(err) => Some(err),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<ShapeError> for Error {
    fn from(err: ShapeError) -> Self {
        Self::Shape(err)
    }
}
