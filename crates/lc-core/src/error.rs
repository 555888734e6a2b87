//! Error types for lcdid

use thiserror::Error;

/// lcdid error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input (shapes, ranges, empty data)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure (singular or rank-deficient design, non-convergence)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Source table does not match its declared columns
    #[error("Schema error: {0}")]
    Schema(String),

    /// Spreadsheet or CSV could not be read or written
    #[error("Format error: {0}")]
    Format(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let e = Error::Schema("column 'pop_density' expected at position 8".into());
        assert!(e.to_string().starts_with("Schema error:"));
        let e = Error::Computation("X'X is singular".into());
        assert_eq!(e.to_string(), "Computation error: X'X is singular");
    }

    #[test]
    fn test_io_conversion() {
        fn open() -> Result<()> {
            std::fs::read("/definitely/not/here.xlsx")?;
            Ok(())
        }
        assert!(matches!(open(), Err(Error::Io(_))));
    }
}
