//! Engine for round-based multi-party protocols
//!
//! Threshold key generation, threshold signing, random beacons and alike are carried out by
//! mutually distrusting parties in rounds: at every round a party receives contributions of other
//! parties, does some local computation, and sends messages for the next round. This crate drives
//! such protocols without knowing anything about their algebra.
//!
//! ## Overview
//!
//! * A protocol is a chain of [`Round`]s. Protocol implementations expose start functions
//!   ([`StartFunc`]) that construct the first round of a session.
//! * [`Handler`] drives one session of one party: it validates incoming messages, buffers messages
//!   that arrived ahead of time, finalizes rounds and exposes the outcome via
//!   [`Handler::result`].
//! * [`Pool`] executes computationally-heavy batches (e.g. verification of proofs received from
//!   every party) on a bounded set of worker threads.
//! * Networking is up to the caller: outgoing messages are taken from [`Handler::listen`],
//!   incoming ones are fed into [`Handler::accept`].
//!
//! ## Networking
//!
//! Message delivery should meet certain criterias that differ from protocol to protocol, but
//! usually they are:
//!
//! * Messages should be authenticated \
//!   The handler trusts the `from` field of a message.
//! * P2P messages should be encrypted \
//!   Only recipient should be able to learn the content of p2p message
//!
//! Any message that doesn't pass validation aborts the session.
//!
//! ## Features
//!
//! * `dev` enables development tools such as in-process [network](dev::Network) and a ready-to-use
//!   [driving loop](dev::handler_loop)

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![forbid(unused_crate_dependencies)]

/// Fixes false-positive of `unused_crate_dependencies` lint that only occure in the tests
#[cfg(test)]
mod false_positives {
    use futures as _;
}

pub mod error;
pub mod handler;
pub mod message;
pub mod party;
pub mod pool;
pub mod round;
pub mod store;

#[cfg(feature = "dev")]
#[cfg_attr(docsrs, doc(cfg(feature = "dev")))]
pub mod dev;

#[doc(no_inline)]
pub use self::{
    error::{ConstructionError, Error, InvalidMessage, PoolError, ProtocolError},
    handler::Handler,
    message::{Destination, Message, MessageKind, RoundNumber, SessionId},
    party::{PartyId, PartyIdSlice},
    pool::{Pool, PoolConfig, Task},
    round::{BoxedRound, Round, SessionContext, SessionInfo, StartFunc, Transition},
    store::{MessageStore, RoundMsgs, StoreErr},
};
