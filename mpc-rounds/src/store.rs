//! Containers convenient for implementing [`Round`](crate::Round)
//!
//! Rounds need to store contributions somewhere until every expected party has sent one, and
//! contributions need to be pre-validated (haven't we received a message from this party at
//! this round already? is this party expected to send anything?). [`MessageStore`]
//! encapsulates this boilerplate.

use std::collections::btree_map::{self, BTreeMap};

use thiserror::Error;

use crate::error::{InvalidMessage, ProtocolError};
use crate::party::PartyId;

/// Accumulates contributions received from other parties at one round
#[derive(Debug, Clone)]
pub struct MessageStore<M> {
    slots: BTreeMap<PartyId, Option<M>>,
    left: usize,
}

impl<M> MessageStore<M> {
    /// Constructs a store waiting for one message from every party in `expected`
    pub fn new(expected: impl IntoIterator<Item = PartyId>) -> Self {
        let slots: BTreeMap<_, _> = expected.into_iter().map(|id| (id, None)).collect();
        Self {
            left: slots.len(),
            slots,
        }
    }

    /// Stores message received from `sender`
    ///
    /// Fails if `sender` is not expected or has already contributed. Failure doesn't prevent
    /// the store from accepting further messages.
    pub fn push(&mut self, sender: &PartyId, msg: M) -> Result<(), StoreErr> {
        match self.slots.get_mut(sender) {
            None => Err(StoreErr::UnknownSender {
                sender: sender.clone(),
            }),
            Some(Some(_)) => Err(StoreErr::MsgOverwrite {
                sender: sender.clone(),
            }),
            Some(slot @ None) => {
                *slot = Some(msg);
                self.left -= 1;
                Ok(())
            }
        }
    }

    /// Indicates whether the store contains a message from `sender`
    pub fn contains_msg_from(&self, sender: &PartyId) -> bool {
        matches!(self.slots.get(sender), Some(Some(_)))
    }

    /// Indicates whether the store needs more messages
    pub fn wants_more(&self) -> bool {
        self.left > 0
    }

    /// Amount of received messages so far
    pub fn messages_received(&self) -> usize {
        self.slots.len() - self.left
    }

    /// Total amount of wanted messages
    pub fn messages_total(&self) -> usize {
        self.slots.len()
    }

    /// Parties that haven't sent a message yet
    pub fn missing(&self) -> Vec<PartyId> {
        self.slots
            .iter()
            .filter(|(_, m)| m.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Returns received messages
    ///
    /// Returns error if store needs more messages (see [wants_more](Self::wants_more)).
    pub fn finish(self) -> Result<RoundMsgs<M>, StoreErr> {
        if self.left > 0 {
            return Err(StoreErr::WantsMoreMessages {
                missing: self.missing(),
            });
        }
        Ok(RoundMsgs {
            msgs: self
                .slots
                .into_iter()
                .filter_map(|(id, m)| Some((id, m?)))
                .collect(),
        })
    }
}

/// Messages received at one round, one per sender
#[derive(Debug, Clone)]
pub struct RoundMsgs<M> {
    msgs: BTreeMap<PartyId, M>,
}

impl<M> RoundMsgs<M> {
    /// Message received from `sender`
    pub fn get(&self, sender: &PartyId) -> Option<&M> {
        self.msgs.get(sender)
    }

    /// Amount of messages
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    /// Indicates that no messages were expected at this round
    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Iterates over `(sender, message)` in ascending order of senders
    pub fn iter(&self) -> btree_map::Iter<'_, PartyId, M> {
        self.msgs.iter()
    }

    /// Adds party's own message, so every member of the session is represented
    pub fn including_me(mut self, me: PartyId, my_msg: M) -> BTreeMap<PartyId, M> {
        self.msgs.insert(me, my_msg);
        self.msgs
    }

    /// Returns messages in ascending order of senders
    pub fn into_vec(self) -> Vec<M> {
        self.msgs.into_values().collect()
    }
}

impl<M> IntoIterator for RoundMsgs<M> {
    type Item = (PartyId, M);
    type IntoIter = btree_map::IntoIter<PartyId, M>;

    /// Returns messages in ascending order of senders
    fn into_iter(self) -> Self::IntoIter {
        self.msgs.into_iter()
    }
}

/// Error returned by [`MessageStore`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StoreErr {
    /// Got message which was already received (no matter how similar they are)
    #[error("got message from {sender} which was already received")]
    MsgOverwrite {
        /// Sender of the message
        sender: PartyId,
    },
    /// Got message from a party that isn't expected to send one
    #[error("unexpected message sender: {sender}")]
    UnknownSender {
        /// Sender of the message
        sender: PartyId,
    },
    /// Called [finish](MessageStore::finish), but more messages are wanted
    #[error("more messages are expected to receive from {missing:?}")]
    WantsMoreMessages {
        /// Parties that didn't send a message
        missing: Vec<PartyId>,
    },
}

impl From<StoreErr> for InvalidMessage {
    fn from(err: StoreErr) -> Self {
        match err {
            StoreErr::MsgOverwrite { .. } => InvalidMessage::Duplicate,
            StoreErr::UnknownSender { .. } => InvalidMessage::UnexpectedSender,
            StoreErr::WantsMoreMessages { .. } => InvalidMessage::UnexpectedMessage,
        }
    }
}

impl From<StoreErr> for ProtocolError {
    fn from(err: StoreErr) -> Self {
        match err {
            StoreErr::WantsMoreMessages { missing } => ProtocolError::MissingContributions {
                missing: missing.len(),
            },
            err => ProtocolError::Inconsistent(err.to_string()),
        }
    }
}
