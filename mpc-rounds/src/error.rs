//! Errors that can occur while constructing and executing a session
//!
//! Errors are `Clone`: terminal outcome of a session is observed by every caller of
//! [`Handler::result`](crate::Handler::result).

use thiserror::Error;

use crate::message::{MessageKind, RoundNumber};
use crate::party::PartyId;

/// Terminal error of a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// Session couldn't be started
    #[error("construct session")]
    Construction(#[source] ConstructionError),
    /// Party sent a message that didn't pass validation
    ///
    /// Any invalid contribution aborts the session.
    #[error("invalid message from {from} at round {round}")]
    InvalidMessage {
        /// Sender of the message
        from: PartyId,
        /// Round the message was addressed to
        round: RoundNumber,
        /// What's wrong with the message
        #[source]
        reason: InvalidMessage,
    },
    /// Round logic detected an unrecoverable inconsistency
    #[error("round {round} failed")]
    Protocol {
        /// Round that failed to finalize
        round: RoundNumber,
        /// Reported error
        #[source]
        reason: ProtocolError,
    },
    /// Party left the network while the session still waited for its contribution
    #[error("party {party} quit before contributing to round {round}")]
    PartyQuit {
        /// Party that quit
        party: PartyId,
        /// Round that waited for it
        round: RoundNumber,
    },
    /// Session was stopped before it completed
    #[error("session was stopped before completion")]
    Stopped,
}

/// Session parameters are invalid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConstructionError {
    /// Party set contains no parties
    #[error("party set is empty")]
    EmptyPartySet,
    /// Party identity is an empty string
    #[error("party identity is empty")]
    EmptyPartyId,
    /// The same party is listed twice
    #[error("party {0} appears more than once")]
    DuplicateParty(PartyId),
    /// Local party doesn't belong to the party set
    #[error("local party {0} is not in the party set")]
    NotInPartySet(PartyId),
    /// Threshold is not in range `[0; n)`
    #[error("threshold {threshold} is invalid for {parties} parties")]
    InvalidThreshold {
        /// Requested threshold
        threshold: usize,
        /// Amount of parties
        parties: usize,
    },
    /// Not enough signers to meet the threshold
    #[error("{signers} signers can't produce a signature, at least {required} are required")]
    InsufficientSigners {
        /// Amount of given signers
        signers: usize,
        /// `threshold + 1`
        required: usize,
    },
    /// Signer doesn't hold a share of the key
    #[error("signer {0} doesn't hold a key share")]
    UnknownSigner(PartyId),
    /// Input key material is inconsistent
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Received message didn't pass validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum InvalidMessage {
    /// Sender doesn't belong to the party set
    #[error("sender is not a member of the session")]
    UnknownSender,
    /// Sender is a member, but its contribution is not expected at this round
    #[error("sender is not expected to contribute to this round")]
    UnexpectedSender,
    /// Sender already contributed to the round
    #[error("sender already contributed to this round")]
    Duplicate,
    /// Round number is outside of the protocol
    #[error("round {round} doesn't exist (protocol has rounds 2..={last} that receive messages)")]
    UnknownRound {
        /// Round number of the message
        round: RoundNumber,
        /// Last round of the protocol
        last: RoundNumber,
    },
    /// Round doesn't receive messages at all
    #[error("round doesn't receive messages")]
    UnexpectedMessage,
    /// Broadcast message received where p2p is expected (or vice versa)
    #[error("expected {expected:?} message, got {actual:?}")]
    WrongKind {
        /// Kind of messages the round expects
        expected: MessageKind,
        /// Kind of received message
        actual: MessageKind,
    },
    /// Payload couldn't be decoded
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Payload was decoded, but failed protocol-specific verification
    #[error("verification failed: {0}")]
    Verification(String),
    /// Worker pool failed while verifying the message
    #[error("worker pool")]
    Pool(#[source] PoolError),
}

/// Round couldn't be finalized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Protocol detected inconsistency in received data
    #[error("{0}")]
    Inconsistent(String),
    /// Outgoing message couldn't be encoded
    #[error("encode message: {0}")]
    Encode(String),
    /// Round was finalized before it received every expected message
    #[error("round finalized with {missing} contribution(s) missing")]
    MissingContributions {
        /// Amount of missing contributions
        missing: usize,
    },
    /// Worker pool failed
    #[error("worker pool")]
    Pool(#[source] PoolError),
}

/// Worker pool error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Pool was torn down
    #[error("pool is closed")]
    Closed,
    /// A task of the batch panicked
    #[error("task {index} panicked")]
    TaskPanicked {
        /// Position of the task in the batch
        index: usize,
    },
}

impl From<ConstructionError> for Error {
    fn from(err: ConstructionError) -> Self {
        Error::Construction(err)
    }
}

impl From<PoolError> for ProtocolError {
    fn from(err: PoolError) -> Self {
        ProtocolError::Pool(err)
    }
}

impl From<PoolError> for InvalidMessage {
    fn from(err: PoolError) -> Self {
        InvalidMessage::Pool(err)
    }
}
