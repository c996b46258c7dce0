//! Service configuration errors

use thiserror::Error;

/// Errors raised while loading or validating the service configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_carries_reason() {
        let err = Error::Config("skew_secs must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: skew_secs must be greater than 0"
        );
    }

    #[test]
    fn io_error_converts_via_question_mark() {
        fn read_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/token-keeper.toml")?)
        }

        let err = read_missing().unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }

    #[test]
    fn toml_error_converts() {
        let parsed: std::result::Result<toml::Table, _> = toml::from_str("not = [valid");
        let err: Error = parsed.unwrap_err().into();
        let debug = format!("{err:?}");
        assert!(debug.contains("Toml"), "got: {debug}");
    }
}
