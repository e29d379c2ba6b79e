//! Rounds of a protocol and the session context they share

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{ConstructionError, InvalidMessage, ProtocolError};
use crate::message::{self, Destination, Message, MessageKind, RoundNumber, SessionId};
use crate::party::{validate_threshold, PartyId, PartyIdSlice};
use crate::pool::Pool;

/// One step of a protocol state machine
///
/// Protocol is a chain of rounds `Round1 → Round2 → … → output`. A round receives contributions
/// of other parties, and once every [expected sender](Self::expected_senders) has contributed, it
/// is [finalized](Self::finalize): it performs the round computation, sends messages, and turns
/// into the next round or into protocol output.
///
/// The first round of a protocol doesn't receive any messages: it's finalized right after the
/// session is started.
///
/// Rounds are driven by [`Handler`](crate::Handler) which does sender-level validation (sender
/// belongs to the session, hasn't contributed to this round yet, message kind is right) before
/// passing a message to [`store_message`](Self::store_message).
pub trait Round<O>: Send {
    /// Session this round belongs to
    fn context(&self) -> &SessionContext;

    /// Sequential number of the round
    ///
    /// Messages tagged with this number are routed to this round.
    fn number(&self) -> RoundNumber;

    /// Kind of messages this round receives, `None` if it doesn't receive any
    fn message_kind(&self) -> Option<MessageKind>;

    /// Parties that must contribute before the round can be finalized
    ///
    /// Every other party of the session by default.
    fn expected_senders(&self) -> Vec<PartyId> {
        self.context().other_party_ids()
    }

    /// Processes contribution of `from`
    ///
    /// Decodes and validates the payload and stores it. Computationally-heavy validation should be
    /// carried out on the [pool](SessionContext::pool).
    ///
    /// ## Errors
    /// Returns [`InvalidMessage`] if the payload is malformed or doesn't pass verification. Any
    /// invalid contribution aborts the session.
    fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), InvalidMessage>;

    /// Performs the round computation
    ///
    /// Called once every expected sender has contributed. Outgoing messages are appended to `out`.
    /// Returns either the next round or the protocol output.
    fn finalize(self: Box<Self>, out: &mut Vec<Message>) -> Result<Transition<O>, ProtocolError>;
}

/// Type-erased round of a protocol with output `O`
pub type BoxedRound<O> = Box<dyn Round<O>>;

/// Result of finalizing a round
pub enum Transition<O> {
    /// Protocol continues with the next round
    Next(BoxedRound<O>),
    /// Protocol is completed
    Done(O),
}

impl<O> fmt::Debug for Transition<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Next(round) => write!(f, "Next(round {})", round.number()),
            Transition::Done(_) => f.write_str("Done"),
        }
    }
}

/// Starts a protocol
///
/// Takes the worker pool that rounds will use and returns the first round, or error if the
/// protocol parameters are invalid. Every protocol exposes functions that return a
/// `StartFunc` with parameters baked in.
pub type StartFunc<O> =
    Box<dyn FnOnce(&Pool) -> Result<BoxedRound<O>, ConstructionError> + Send + 'static>;

/// Public parameters of a session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Protocol identifier
    pub protocol: &'static str,
    /// Number of the last round
    pub final_round: RoundNumber,
    /// Local party
    pub self_id: PartyId,
    /// Parties taking part in the session
    pub party_ids: PartyIdSlice,
    /// Threshold `t`; protocols that don't need it use `0`
    pub threshold: usize,
}

/// Everything that rounds of one session share
///
/// Holds session parameters, the session identifier and a handle to the worker pool.
pub struct SessionContext {
    info: SessionInfo,
    ssid: SessionId,
    pool: Pool,
}

impl SessionContext {
    /// Validates session parameters and derives the session identifier
    ///
    /// `aux` is protocol-specific public input bound to the session identifier (e.g. a group
    /// public key and a message to sign).
    pub fn new(info: SessionInfo, aux: &[&[u8]], pool: &Pool) -> Result<Arc<Self>, ConstructionError> {
        if !info.party_ids.contains(&info.self_id) {
            return Err(ConstructionError::NotInPartySet(info.self_id));
        }
        validate_threshold(info.threshold, info.party_ids.len())?;

        let mut hash = Sha256::new()
            .chain_update(b"mpc-rounds/ssid")
            .chain_update(length_prefixed(info.protocol.as_bytes()))
            .chain_update(info.final_round.to_be_bytes())
            .chain_update((info.threshold as u64).to_be_bytes())
            .chain_update((info.party_ids.len() as u64).to_be_bytes());
        for id in &info.party_ids {
            hash.update(length_prefixed(id.as_bytes()));
        }
        for data in aux {
            hash.update(length_prefixed(data));
        }

        Ok(Arc::new(Self {
            info,
            ssid: SessionId(hash.finalize().into()),
            pool: pool.clone(),
        }))
    }

    /// Session parameters
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }
    /// Protocol identifier
    pub fn protocol(&self) -> &'static str {
        self.info.protocol
    }
    /// Local party
    pub fn self_id(&self) -> &PartyId {
        &self.info.self_id
    }
    /// All parties of the session
    pub fn party_ids(&self) -> &PartyIdSlice {
        &self.info.party_ids
    }
    /// All parties of the session but the local one
    pub fn other_party_ids(&self) -> Vec<PartyId> {
        self.info.party_ids.without(&self.info.self_id)
    }
    /// Threshold `t`
    pub fn threshold(&self) -> usize {
        self.info.threshold
    }
    /// Number of the last round
    pub fn final_round(&self) -> RoundNumber {
        self.info.final_round
    }
    /// Session identifier
    pub fn ssid(&self) -> &SessionId {
        &self.ssid
    }
    /// Worker pool for heavy computations
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Hasher already bound to the session identifier
    ///
    /// Protocols use it for challenges so they can't be replayed in another session.
    pub fn hash(&self) -> Sha256 {
        Sha256::new().chain_update(self.ssid.as_bytes())
    }

    /// Appends a broadcast message addressed to round `round` to the outgoing queue
    pub fn broadcast<T: Serialize>(
        &self,
        out: &mut Vec<Message>,
        round: RoundNumber,
        content: &T,
    ) -> Result<(), ProtocolError> {
        out.push(self.message(Destination::AllExceptSender, round, content)?);
        Ok(())
    }

    /// Appends a p2p message for `to` addressed to round `round` to the outgoing queue
    pub fn send_to<T: Serialize>(
        &self,
        out: &mut Vec<Message>,
        round: RoundNumber,
        to: &PartyId,
        content: &T,
    ) -> Result<(), ProtocolError> {
        out.push(self.message(Destination::Party(to.clone()), round, content)?);
        Ok(())
    }

    fn message<T: Serialize>(
        &self,
        to: Destination,
        round: RoundNumber,
        content: &T,
    ) -> Result<Message, ProtocolError> {
        Ok(Message {
            ssid: self.ssid,
            protocol: self.info.protocol.to_owned(),
            from: self.info.self_id.clone(),
            to,
            round,
            payload: message::encode(content)?,
        })
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("protocol", &self.info.protocol)
            .field("self_id", &self.info.self_id)
            .field("party_ids", &self.info.party_ids)
            .field("threshold", &self.info.threshold)
            .field("ssid", &self.ssid)
            .finish()
    }
}

fn length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len());
    out.extend_from_slice(&(data.len() as u64).to_be_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use super::*;

    fn info(self_id: &str, ids: &[&str], threshold: usize) -> SessionInfo {
        SessionInfo {
            protocol: "test/protocol",
            final_round: 2,
            self_id: self_id.into(),
            party_ids: PartyIdSlice::new(ids.iter().copied()).unwrap(),
            threshold,
        }
    }

    #[test]
    fn session_id_is_shared_by_parties() {
        let pool = Pool::synchronous();
        let a = SessionContext::new(info("a", &["a", "b", "c"], 1), &[b"aux"], &pool).unwrap();
        let b = SessionContext::new(info("b", &["c", "b", "a"], 1), &[b"aux"], &pool).unwrap();
        assert_eq!(a.ssid(), b.ssid());
        assert_eq!(a.other_party_ids(), [PartyId::from("b"), PartyId::from("c")]);

        let other_aux = SessionContext::new(info("a", &["a", "b", "c"], 1), &[b"xua"], &pool).unwrap();
        assert_ne!(a.ssid(), other_aux.ssid());
        let other_threshold = SessionContext::new(info("a", &["a", "b", "c"], 2), &[b"aux"], &pool).unwrap();
        assert_ne!(a.ssid(), other_threshold.ssid());
    }

    #[test]
    fn invalid_sessions_are_rejected() {
        let pool = Pool::synchronous();
        assert_matches!(
            SessionContext::new(info("z", &["a", "b"], 1), &[], &pool),
            Err(ConstructionError::NotInPartySet(_))
        );
        assert_matches!(
            SessionContext::new(info("a", &["a", "b"], 2), &[], &pool),
            Err(ConstructionError::InvalidThreshold { .. })
        );
    }

    #[test]
    fn outgoing_messages_are_tagged() {
        let pool = Pool::synchronous();
        let ctx = SessionContext::new(info("a", &["a", "b"], 0), &[], &pool).unwrap();
        let mut out = vec![];
        ctx.broadcast(&mut out, 2, &1u8).unwrap();
        ctx.send_to(&mut out, 2, &"b".into(), &2u8).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to, Destination::AllExceptSender);
        assert_eq!(out[1].to, Destination::Party("b".into()));
        for msg in &out {
            assert_eq!(msg.ssid, *ctx.ssid());
            assert_eq!(msg.protocol, "test/protocol");
            assert_eq!(msg.from, PartyId::from("a"));
            assert_eq!(msg.round, 2);
        }
        assert_eq!(message::decode::<u8>(&out[1].payload).unwrap(), 2);
    }
}
