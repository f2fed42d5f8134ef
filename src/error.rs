use std::io;

/// All error types for the tile pager.
#[derive(thiserror::Error, Debug)]
pub enum PagerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Usage error: {0}")]
    Usage(String),
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_strings() {
        let e = PagerError::Config("max depth must be positive".into());
        assert_eq!(e.to_string(), "Configuration error: max depth must be positive");

        let e = PagerError::Usage("loader is terminated".into());
        assert_eq!(e.to_string(), "Usage error: loader is terminated");

        let e = PagerError::Fetch("timed out".into());
        assert_eq!(e.to_string(), "Fetch error: timed out");
    }

    #[test]
    fn from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let e: PagerError = io_err.into();
        assert!(matches!(e, PagerError::Io(_)));
        assert!(e.to_string().contains("file missing"));
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let e: PagerError = json_err.into();
        assert!(matches!(e, PagerError::Json(_)));
    }
}
