//! Toy protocol: agreement on XOR of random contributions
//!
//! 1. Every party samples a 32 bytes seed and broadcasts commitment to it
//! 2. Once commitments of everyone are received, parties open their seeds
//! 3. Every party checks that opened seeds match commitments, and outputs XOR of all seeds
//!
//! Commitments prevent the last party from choosing its seed after seeing the others.

use std::sync::Arc;

use mpc_rounds::{
    message, BoxedRound, InvalidMessage, Message, MessageKind, MessageStore, PartyId, PartyIdSlice,
    Pool, ProtocolError, Round, RoundNumber, SessionContext, SessionInfo, StartFunc, Transition,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tracing::debug;

/// Protocol identifier
pub const PROTOCOL: &str = "example/xor";

/// Agreed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Output(pub [u8; 32]);

impl Output {
    /// Returns value bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Starts the protocol with a freshly sampled seed
pub fn start(id: PartyId, ids: PartyIdSlice) -> StartFunc<Output> {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    start_with_seed(id, ids, seed)
}

/// Starts the protocol with given seed
///
/// Output of the protocol is a XOR of parties' seeds, so it's deterministic when every party uses
/// a fixed seed. Useful for tests.
pub fn start_with_seed(id: PartyId, ids: PartyIdSlice, seed: [u8; 32]) -> StartFunc<Output> {
    Box::new(move |pool: &Pool| {
        let ctx = SessionContext::new(
            SessionInfo {
                protocol: PROTOCOL,
                final_round: 3,
                self_id: id,
                party_ids: ids,
                threshold: 0,
            },
            &[],
            pool,
        )?;
        Ok(Box::new(Round1 { ctx, seed }) as BoxedRound<Output>)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitMsg {
    commitment: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecommitMsg {
    seed: [u8; 32],
}

fn commit(ctx: &SessionContext, sender: &PartyId, seed: &[u8; 32]) -> [u8; 32] {
    ctx.hash()
        .chain_update((sender.as_bytes().len() as u64).to_be_bytes())
        .chain_update(sender.as_bytes())
        .chain_update(seed)
        .finalize()
        .into()
}

struct Round1 {
    ctx: Arc<SessionContext>,
    seed: [u8; 32],
}

impl Round<Output> for Round1 {
    fn context(&self) -> &SessionContext {
        &self.ctx
    }
    fn number(&self) -> RoundNumber {
        1
    }
    fn message_kind(&self) -> Option<MessageKind> {
        None
    }
    fn store_message(&mut self, _from: &PartyId, _payload: &[u8]) -> Result<(), InvalidMessage> {
        Err(InvalidMessage::UnexpectedMessage)
    }

    fn finalize(self: Box<Self>, out: &mut Vec<Message>) -> Result<Transition<Output>, ProtocolError> {
        let commitment = commit(&self.ctx, self.ctx.self_id(), &self.seed);
        self.ctx.broadcast(out, 2, &CommitMsg { commitment })?;
        Ok(Transition::Next(Box::new(Round2 {
            commitments: MessageStore::new(self.ctx.other_party_ids()),
            ctx: self.ctx,
            seed: self.seed,
        })))
    }
}

struct Round2 {
    ctx: Arc<SessionContext>,
    seed: [u8; 32],
    commitments: MessageStore<[u8; 32]>,
}

impl Round<Output> for Round2 {
    fn context(&self) -> &SessionContext {
        &self.ctx
    }
    fn number(&self) -> RoundNumber {
        2
    }
    fn message_kind(&self) -> Option<MessageKind> {
        Some(MessageKind::Broadcast)
    }

    fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), InvalidMessage> {
        let msg: CommitMsg = message::decode(payload)?;
        self.commitments.push(from, msg.commitment)?;
        Ok(())
    }

    fn finalize(self: Box<Self>, out: &mut Vec<Message>) -> Result<Transition<Output>, ProtocolError> {
        let commitments = self.commitments.finish()?;
        self.ctx.broadcast(out, 3, &DecommitMsg { seed: self.seed })?;
        Ok(Transition::Next(Box::new(Round3 {
            seeds: MessageStore::new(self.ctx.other_party_ids()),
            ctx: self.ctx,
            seed: self.seed,
            commitments: commitments.into_iter().collect(),
        })))
    }
}

struct Round3 {
    ctx: Arc<SessionContext>,
    seed: [u8; 32],
    commitments: std::collections::BTreeMap<PartyId, [u8; 32]>,
    seeds: MessageStore<[u8; 32]>,
}

impl Round<Output> for Round3 {
    fn context(&self) -> &SessionContext {
        &self.ctx
    }
    fn number(&self) -> RoundNumber {
        3
    }
    fn message_kind(&self) -> Option<MessageKind> {
        Some(MessageKind::Broadcast)
    }

    fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), InvalidMessage> {
        let msg: DecommitMsg = message::decode(payload)?;
        let expected = self
            .commitments
            .get(from)
            .ok_or(InvalidMessage::UnexpectedSender)?;
        if commit(&self.ctx, from, &msg.seed) != *expected {
            return Err(InvalidMessage::Verification(
                "opened seed doesn't match commitment".into(),
            ));
        }
        self.seeds.push(from, msg.seed)?;
        Ok(())
    }

    fn finalize(self: Box<Self>, _out: &mut Vec<Message>) -> Result<Transition<Output>, ProtocolError> {
        let mut output = self.seed;
        for (_, seed) in self.seeds.finish()? {
            output.iter_mut().zip(seed).for_each(|(x, r)| *x ^= r);
        }
        let output = Output(output);
        debug!(%output, "parties agreed on xor");
        Ok(Transition::Done(output))
    }
}
