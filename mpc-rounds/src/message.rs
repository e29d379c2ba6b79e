//! Messages exchanged between parties and their payload codec

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{InvalidMessage, ProtocolError};
use crate::party::PartyId;

/// Sequential number of a round, starting from 1
pub type RoundNumber = u16;

/// Message exchanged between parties of a session
///
/// `round` is the number of the round that consumes the message: messages produced when
/// round `r` is finalized are tagged with `r + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier of the session the message belongs to
    pub ssid: SessionId,
    /// Identifier of the protocol, e.g. `"frost/keygen"`
    pub protocol: String,
    /// Sender of the message
    pub from: PartyId,
    /// Message destination
    pub to: Destination,
    /// Round the message is addressed to
    pub round: RoundNumber,
    /// Message body, opaque to the driver
    pub payload: Vec<u8>,
}

impl Message {
    /// Checks whether message is addressed to party `id`
    pub fn is_for(&self, id: &PartyId) -> bool {
        match &self.to {
            Destination::All => true,
            Destination::AllExceptSender => self.from != *id,
            Destination::Party(recipient) => recipient == id,
        }
    }

    /// Kind of the message (broadcast or p2p)
    pub fn kind(&self) -> MessageKind {
        self.to.kind()
    }

    /// Checks whether it's broadcast message
    pub fn is_broadcast(&self) -> bool {
        self.to.is_broadcast()
    }

    /// Serializes message so it can be sent over the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserializes message received from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidMessage> {
        bincode::deserialize(bytes).map_err(|e| InvalidMessage::Malformed(e.to_string()))
    }
}

/// Destination of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Broadcast message delivered to every party, including the sender
    All,
    /// Broadcast message delivered to every party but the sender
    AllExceptSender,
    /// P2P message
    Party(PartyId),
}

impl Destination {
    /// Returns `true` if it's p2p message
    pub fn is_p2p(&self) -> bool {
        matches!(self, Destination::Party(_))
    }
    /// Returns `true` if it's broadcast message
    pub fn is_broadcast(&self) -> bool {
        !self.is_p2p()
    }
    /// Message kind implied by the destination
    pub fn kind(&self) -> MessageKind {
        if self.is_p2p() {
            MessageKind::P2P
        } else {
            MessageKind::Broadcast
        }
    }
}

/// Message type (broadcast or p2p)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Message is sent to all parties
    Broadcast,
    /// Private message sent to one party
    P2P,
}

/// Session identifier
///
/// Digest binding the protocol, its parameters and the party set. Messages carrying another
/// identifier belong to another session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 32]);

impl SessionId {
    /// Returns identifier bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Encodes round content into message payload
pub fn encode<T: Serialize>(content: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(content).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes round content from message payload
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, InvalidMessage> {
    bincode::deserialize(payload).map_err(|e| InvalidMessage::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, to: Destination) -> Message {
        Message {
            ssid: SessionId([0; 32]),
            protocol: "test".into(),
            from: from.into(),
            to,
            round: 2,
            payload: vec![],
        }
    }

    #[test]
    fn routing() {
        let a = PartyId::from("a");
        let b = PartyId::from("b");

        let msg = message("a", Destination::All);
        assert!(msg.is_for(&a) && msg.is_for(&b));
        assert!(msg.is_broadcast());

        let msg = message("a", Destination::AllExceptSender);
        assert!(!msg.is_for(&a) && msg.is_for(&b));
        assert_eq!(msg.kind(), MessageKind::Broadcast);

        let msg = message("a", Destination::Party(b.clone()));
        assert!(!msg.is_for(&a) && msg.is_for(&b));
        assert_eq!(msg.kind(), MessageKind::P2P);
    }

    #[test]
    fn wire_format_is_reversible() {
        let mut msg = message("a", Destination::Party("c".into()));
        msg.payload = encode(&(7u32, [1u8; 4])).unwrap();
        let bytes = msg.to_bytes().unwrap();
        let received = Message::from_bytes(&bytes).unwrap();
        assert_eq!(received, msg);
        assert_eq!(decode::<(u32, [u8; 4])>(&received.payload).unwrap(), (7, [1; 4]));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode::<(u64, u64)>(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, InvalidMessage::Malformed(_)));
    }
}
