//! Application message boundary.

use crate::{envelope::Envelope, errors::Result};

/// Typed application message.
///
/// Implementors convert a decoded [`Envelope`] into their own representation
/// exactly once, at the codec boundary, so callbacks can `match` on a typed
/// value instead of re-parsing the payload per handler.
///
/// ```
/// use tickframe_proto::{Envelope, Message, ProtocolError};
///
/// enum GameMessage {
///     Ping,
///     Chat(String),
/// }
///
/// impl Message for GameMessage {
///     fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
///         match envelope.kind() {
///             "ping" => Ok(Self::Ping),
///             "chat" => Ok(Self::Chat(envelope.decode_json()?)),
///             other => Err(ProtocolError::UnknownKind(other.to_string())),
///         }
///     }
///
///     fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
///         match self {
///             Self::Ping => Ok(Envelope::empty("ping")),
///             Self::Chat(text) => Envelope::json("chat", text),
///         }
///     }
/// }
/// ```
pub trait Message: Sized + Send + 'static {
    /// Build the typed message from a decoded envelope.
    fn from_envelope(envelope: Envelope) -> Result<Self>;

    /// Produce the envelope that represents this message on the wire.
    fn to_envelope(&self) -> Result<Envelope>;
}

impl Message for Envelope {
    fn from_envelope(envelope: Envelope) -> Result<Self> {
        Ok(envelope)
    }

    fn to_envelope(&self) -> Result<Envelope> {
        Ok(self.clone())
    }
}
