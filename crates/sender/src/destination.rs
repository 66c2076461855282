//! Resolving the backend's destination identifier into a Telegram recipient.

use teloxide::types::{ChatId, Recipient};

use mirrelay_common::types::DestinationConfig;

use crate::error::{Error, Result};

/// A destination the sender can actually deliver to.
#[derive(Debug, Clone)]
pub struct ResolvedDestination {
    pub recipient: Recipient,
    /// Route sources carrying a topic hint into their own sub-thread.
    pub use_sub_threads: bool,
}

/// Turn the backend's identifier into a recipient.
///
/// `@username` addresses a public group or channel by name; anything else
/// must be a numeric chat id (supergroups are the negative `-100…` form).
pub fn resolve(config: &DestinationConfig) -> Result<ResolvedDestination> {
    let identifier = config.identifier.trim();
    if identifier.is_empty() {
        return Err(Error::Destination("empty destination identifier".into()));
    }

    let recipient = if identifier.starts_with('@') {
        Recipient::ChannelUsername(identifier.to_string())
    } else {
        let id: i64 = identifier.parse().map_err(|_| {
            Error::Destination(format!(
                "identifier {identifier:?} is neither @username nor a chat id"
            ))
        })?;
        Recipient::Id(ChatId(id))
    };

    Ok(ResolvedDestination {
        recipient,
        use_sub_threads: config.use_sub_threads,
    })
}
