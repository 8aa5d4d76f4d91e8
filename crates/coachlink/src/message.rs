//! Outbound message validation.

use crate::error::ValidationError;
use crate::phone::PhonePlan;

/// Longest accepted body, in characters.
pub const MAX_BODY_CHARS: usize = 4096;

/// A message that passed local validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Recipient as given by the caller.
    pub recipient: String,
    /// Recipient in gateway form.
    pub normalized_recipient: String,
    /// Message body.
    pub body: String,
}

impl OutboundMessage {
    /// Validate and normalize a message.
    ///
    /// Checks run in order: recipient present, body present, body length,
    /// phone number shape.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails.
    pub fn new(recipient: &str, body: &str, plan: &PhonePlan) -> Result<Self, ValidationError> {
        if recipient.is_empty() {
            return Err(ValidationError::EmptyRecipient);
        }
        if body.is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        let len = body.chars().count();
        if len > MAX_BODY_CHARS {
            return Err(ValidationError::BodyTooLong {
                len,
                max: MAX_BODY_CHARS,
            });
        }
        let normalized_recipient = plan.normalize(recipient)?;
        Ok(Self {
            recipient: recipient.to_string(),
            normalized_recipient,
            body: body.to_string(),
        })
    }
}
