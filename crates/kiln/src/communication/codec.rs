//! JSON framing for messages crossing the boundary.

use serde_json::Value;

use super::message::{CorrelationId, Message};
use crate::error::ProtocolError;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<T> {
    /// A frame naming an action the receiver understands
    Message(T),

    /// A well-formed frame naming an action the receiver does not understand
    Unrecognized {
        action: String,
        correlation_id: Option<CorrelationId>,
    },
}

pub fn encode<T: Message>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Decodes one frame, routing unknown actions to [`Inbound::Unrecognized`]
/// before attempting the typed parse.
pub fn decode<T: Message>(frame: &str) -> Result<Inbound<T>, ProtocolError> {
    let value: Value = serde_json::from_str(frame).map_err(ProtocolError::Malformed)?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingAction)?
        .to_owned();

    if !T::ACTIONS.contains(&action.as_str()) {
        let correlation_id = value
            .get("correlationId")
            .cloned()
            .and_then(|id| serde_json::from_value(id).ok());
        return Ok(Inbound::Unrecognized { action, correlation_id });
    }

    serde_json::from_value(value)
        .map(Inbound::Message)
        .map_err(ProtocolError::Malformed)
}
