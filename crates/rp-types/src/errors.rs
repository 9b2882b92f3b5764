use thiserror::Error;
use uuid::Uuid;

/// Main error type for the RiskPilot system
#[derive(Error, Debug)]
pub enum RpError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Problems with a single feed record. Never fatal: the record is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("record {id:?} is missing field {field}")]
    MissingField { id: String, field: &'static str },

    #[error("record {id:?} has invalid {field}: {value}")]
    InvalidValue {
        id: String,
        field: &'static str,
        value: String,
    },
}

/// Rejected settings update. The previously active settings stay in effect.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} = {value} is outside the allowed range [{min}, {max}]")]
    OutOfBounds {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Invalid lifecycle transition requested on the monitor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("cannot {command} while {from}")]
    InvalidTransition { from: String, command: String },
}

/// Errors surfaced by operator commands against the query surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("suggestion not found: {0}")]
    SuggestionNotFound(Uuid),
}

/// Result type alias for RiskPilot operations
pub type RpResult<T> = Result<T, RpError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($field:expr, $($arg:tt)*) => {
        $crate::ConfigError::Invalid {
            field: $field,
            message: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::OutOfBounds {
            field: "risk_percent_per_trade",
            value: 12.0,
            min: 0.01,
            max: 10.0,
        };

        assert!(error.to_string().contains("risk_percent_per_trade"));
        assert!(error.to_string().contains("12"));
    }

    #[test]
    fn test_error_conversion() {
        let state_error = StateError::InvalidTransition {
            from: "INACTIVE".into(),
            command: "pause".into(),
        };
        let rp_error: RpError = state_error.into();

        match rp_error {
            RpError::State(_) => (),
            _ => panic!("Expected State error"),
        }
    }

    #[test]
    fn test_config_macro() {
        let err = config_error!("lot_step", "must be positive, got {}", 0);
        assert!(err.to_string().contains("lot_step"));
    }
}
