use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("backend request failed: {0}")]
    Api(#[from] mirrelay_api::Error),

    /// The configured destination identifier cannot be turned into a
    /// Telegram recipient. Nothing is delivered or marked while this holds.
    #[error("destination not usable: {0}")]
    Destination(String),

    /// Delivery-blocking problem with the message itself; the message is
    /// marked failed instead of retried.
    #[error("{0}")]
    Undeliverable(String),
}
