use thiserror::Error;

/// Crate-wide result type for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed backend errors. All variants are transient-external from the
/// relay's point of view: logged, backed off, and retried, never fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend response malformed: {0}")]
    Decode(#[from] serde_json::Error),
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display() {
        let err = Error::Status {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "backend returned 503: unavailable");
    }
}
