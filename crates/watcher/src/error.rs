use thiserror::Error;

/// Crate-wide result type for watcher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed watcher errors.
///
/// None of these are fatal to the process: launch and attach failures leave
/// the session retryable on the next reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("message container not found after {attempts} attempts")]
    ContainerNotFound { attempts: u32 },

    #[error("login required: manual login did not complete within {waited_secs}s")]
    LoginRequired { waited_secs: u64 },

    #[error("JavaScript evaluation failed: {0}")]
    JsEvalFailed(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("{0}")]
    Protocol(String),
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}

impl mirrelay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Protocol(message)
    }
}

mirrelay_common::impl_context!();
