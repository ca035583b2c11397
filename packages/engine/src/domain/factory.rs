//! Domain factories for creating domain entities and value objects.

use super::{MessageId, error::ValueObjectError};

const TEMPORARY_PREFIX: &str = "tmp-";

/// Factory for temporary message ids.
///
/// Optimistic local messages carry a temporary id until the server echoes
/// them back with the id it assigned.
pub struct MessageIdFactory;

impl MessageIdFactory {
    /// Generate a new temporary MessageId from a random UUID v4.
    ///
    /// # Errors
    ///
    /// This method should not fail in practice, but returns Result for consistency
    /// with the domain error handling pattern.
    pub fn temporary() -> Result<MessageId, ValueObjectError> {
        MessageId::new(format!("{}{}", TEMPORARY_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Whether the id was minted locally by [`MessageIdFactory::temporary`].
    pub fn is_temporary(id: &MessageId) -> bool {
        id.as_str().starts_with(TEMPORARY_PREFIX)
    }
}
