//! Protocol driver
//!
//! [`Handler`] owns the round chain of one session. It validates incoming messages, routes them to
//! the current round, buffers messages of future rounds, finalizes rounds once they've heard from
//! every expected sender, and exposes the terminal outcome asynchronously.
//!
//! Handler does no network I/O. The caller relays messages between the handler and a transport:
//! outgoing messages are taken from [`Handler::listen`], incoming ones are fed into
//! [`Handler::accept`]. See [`dev::handler_loop`](crate::dev::handler_loop) for a complete loop.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, InvalidMessage};
use crate::message::{Message, RoundNumber, SessionId};
use crate::party::PartyId;
use crate::pool::Pool;
use crate::round::{BoxedRound, SessionInfo, StartFunc, Transition};

/// Drives a single session of a protocol
///
/// Cheap to clone: clones refer to the same session, so messages can be accepted on one task while
/// the outcome is awaited on another.
pub struct Handler<O> {
    inner: Arc<Inner<O>>,
}

struct Inner<O> {
    info: SessionInfo,
    ssid: SessionId,
    span: tracing::Span,
    session: Mutex<Session<O>>,
    outcome: watch::Sender<Option<Result<O, Error>>>,
    listener: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

struct Session<O> {
    /// `None` once session is terminated
    round: Option<BoxedRound<O>>,
    /// Senders the current round still waits for
    pending: BTreeSet<PartyId>,
    /// Senders we've heard from, per round
    received: BTreeMap<RoundNumber, BTreeSet<PartyId>>,
    /// Messages of rounds that haven't started yet
    queue: BTreeMap<RoundNumber, Vec<Message>>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
}

impl<O> Clone for Handler<O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<O> Handler<O>
where
    O: Clone + Send + Sync + 'static,
{
    /// Starts a session
    ///
    /// Runs the start function with `pool` (or with a synchronous pool if `None`) and immediately
    /// finalizes the first round, so its messages are available via [`listen`](Self::listen)
    /// right after construction.
    ///
    /// Returns [`Error::Construction`] if the start function rejects the parameters. Failures that
    /// happen after the start (including failure of the first round) are reported by
    /// [`result`](Self::result).
    pub fn new(start: StartFunc<O>, pool: Option<&Pool>) -> Result<Self, Error> {
        let pool = pool.cloned().unwrap_or_else(Pool::synchronous);
        let first = start(&pool)?;

        let info = first.context().info().clone();
        let ssid = *first.context().ssid();
        let span = tracing::debug_span!(
            "session",
            protocol = info.protocol,
            party = %info.self_id,
            ssid = %ssid,
        );
        let (outgoing, listener) = mpsc::unbounded_channel();
        let (outcome, _) = watch::channel(None);

        let handler = Self {
            inner: Arc::new(Inner {
                info,
                ssid,
                span,
                session: Mutex::new(Session {
                    round: None,
                    pending: BTreeSet::new(),
                    received: BTreeMap::new(),
                    queue: BTreeMap::new(),
                    outgoing: Some(outgoing),
                }),
                outcome,
                listener: Mutex::new(Some(listener)),
            }),
        };

        {
            let _guard = handler.inner.span.enter();
            debug!(parties = %handler.inner.info.party_ids, "session started");
            let mut session = handler.inner.session.lock();
            let started = session.enter(first).and_then(|()| session.progress());
            // Failure of the first round is reported by `result()`
            let _ = handler.settle(&mut session, started);
        }

        Ok(handler)
    }

    /// Processes incoming message
    ///
    /// Messages that aren't addressed to the local party, are sent by the local party, or belong
    /// to another session are ignored. Messages of future rounds are buffered until the round
    /// starts. Returns error if the message is invalid: in that case the session is aborted, and
    /// the same error is reported by [`result`](Self::result).
    ///
    /// Once the session has terminated, every message is ignored.
    pub fn accept(&self, msg: Message) -> Result<(), Error> {
        let _guard = self.inner.span.enter();
        if !self.is_relevant(&msg) {
            return Ok(());
        }

        let mut session = self.inner.session.lock();
        if session.round.is_none() {
            trace!(from = %msg.from, round = msg.round, "session is terminated, message ignored");
            return Ok(());
        }

        let from = msg.from.clone();
        let round = msg.round;
        let outcome = match self.inner.validate(&mut session, &msg) {
            Err(reason) => Err(Error::InvalidMessage { from, round, reason }),
            Ok(Routing::Buffer) => {
                trace!(%from, round, "message of future round is buffered");
                session.queue.entry(round).or_default().push(msg);
                return Ok(());
            }
            Ok(Routing::Deliver) => session.deliver(msg).and_then(|()| session.progress()),
        };

        self.settle(&mut session, outcome)
    }

    /// Checks whether [`accept`](Self::accept) would process the message
    ///
    /// Performs routing and session checks without changing the session.
    pub fn can_accept(&self, msg: &Message) -> bool {
        msg.is_for(&self.inner.info.self_id)
            && msg.from != self.inner.info.self_id
            && msg.ssid == self.inner.ssid
            && msg.protocol == self.inner.info.protocol
            && self.inner.info.party_ids.contains(&msg.from)
            && (2..=self.inner.info.final_round).contains(&msg.round)
            && self.inner.session.lock().round.is_some()
    }

    /// Takes receiving side of outgoing messages
    ///
    /// Returns `None` if it was already taken. The channel is closed once the session terminates,
    /// after every message produced by the session has been queued.
    pub fn listen(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.inner.listener.lock().take()
    }

    /// Waits until the session terminates and returns its outcome
    ///
    /// Can be called any number of times, from any number of tasks: every call returns the same
    /// outcome.
    pub async fn result(&self) -> Result<O, Error> {
        let mut outcome = self.inner.outcome.subscribe();
        loop {
            let current = outcome.borrow_and_update().clone();
            if let Some(current) = current {
                return current;
            }
            if outcome.changed().await.is_err() {
                return Err(Error::Stopped);
            }
        }
    }

    /// Returns the outcome if session has terminated
    pub fn try_result(&self) -> Option<Result<O, Error>> {
        self.inner.outcome.borrow().clone()
    }

    /// Checks whether session has terminated
    pub fn is_terminated(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    /// Aborts the session
    ///
    /// If session is still running, it terminates with [`Error::Stopped`]. Does nothing otherwise.
    pub fn stop(&self) {
        let _guard = self.inner.span.enter();
        let mut session = self.inner.session.lock();
        if session.round.is_some() {
            debug!("session is stopped");
            self.terminate(&mut session, Err(Error::Stopped));
        }
    }

    /// Tells the session that `party` won't send anything anymore
    ///
    /// If the current round still waits for a contribution of `party`, the session terminates
    /// with [`Error::PartyQuit`]. Does nothing otherwise.
    pub fn abandon(&self, party: &PartyId) {
        let _guard = self.inner.span.enter();
        let mut session = self.inner.session.lock();
        let round = match &session.round {
            Some(round) if session.pending.contains(party) => round.number(),
            _ => return,
        };
        let quit = Error::PartyQuit {
            party: party.clone(),
            round,
        };
        // Outcome is reported by `result()`
        let _ = self.settle(&mut session, Err(quit));
    }

    /// Local party
    pub fn self_id(&self) -> &PartyId {
        &self.inner.info.self_id
    }

    /// Session parameters
    pub fn info(&self) -> &SessionInfo {
        &self.inner.info
    }

    /// Session identifier
    pub fn ssid(&self) -> &SessionId {
        &self.inner.ssid
    }

    fn is_relevant(&self, msg: &Message) -> bool {
        let me = &self.inner.info.self_id;
        if !msg.is_for(me) {
            trace!(from = %msg.from, to = ?msg.to, "message is not addressed to us, ignored");
            false
        } else if msg.from == *me {
            trace!(round = msg.round, "own message ignored");
            false
        } else if msg.ssid != self.inner.ssid || msg.protocol != self.inner.info.protocol {
            warn!(
                from = %msg.from,
                protocol = %msg.protocol,
                ssid = %msg.ssid,
                "message of another session ignored"
            );
            false
        } else {
            true
        }
    }

    /// Terminates the session if `outcome` is terminal
    fn settle(&self, session: &mut Session<O>, outcome: Result<Option<O>, Error>) -> Result<(), Error> {
        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(output)) => {
                debug!("session completed");
                self.terminate(session, Ok(output));
                Ok(())
            }
            Err(err) => {
                error!(%err, "session aborted");
                self.terminate(session, Err(err.clone()));
                Err(err)
            }
        }
    }

    fn terminate(&self, session: &mut Session<O>, outcome: Result<O, Error>) {
        session.round = None;
        session.pending.clear();
        session.queue.clear();
        // Closes the outgoing channel, messages that were already queued are still delivered
        session.outgoing = None;
        self.inner.outcome.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        });
    }
}

enum Routing {
    Deliver,
    Buffer,
}

impl<O> Inner<O> {
    /// Sender-level validation of a message that belongs to the session
    fn validate(&self, session: &mut Session<O>, msg: &Message) -> Result<Routing, InvalidMessage> {
        if !self.info.party_ids.contains(&msg.from) {
            return Err(InvalidMessage::UnknownSender);
        }
        if msg.round < 2 || msg.round > self.info.final_round {
            return Err(InvalidMessage::UnknownRound {
                round: msg.round,
                last: self.info.final_round,
            });
        }
        if !session
            .received
            .entry(msg.round)
            .or_default()
            .insert(msg.from.clone())
        {
            return Err(InvalidMessage::Duplicate);
        }

        let current = match &session.round {
            Some(round) => round.number(),
            None => return Err(InvalidMessage::UnexpectedMessage),
        };
        if msg.round > current {
            Ok(Routing::Buffer)
        } else if msg.round < current {
            // Every sender expected at a past round had been heard from before it was finalized
            Err(InvalidMessage::UnexpectedSender)
        } else {
            Ok(Routing::Deliver)
        }
    }
}

impl<O> Session<O> {
    /// Makes `round` current and replays messages buffered for it
    fn enter(&mut self, round: BoxedRound<O>) -> Result<(), Error> {
        let number = round.number();
        self.pending = match round.message_kind() {
            Some(_) => round.expected_senders().into_iter().collect(),
            None => BTreeSet::new(),
        };
        debug!(round = number, expects = self.pending.len(), "round started");
        self.round = Some(round);

        let later = self.queue.split_off(&number);
        let stale = std::mem::replace(&mut self.queue, later);
        if let Some(msg) = stale.into_values().flatten().next() {
            return Err(Error::InvalidMessage {
                from: msg.from,
                round: msg.round,
                reason: InvalidMessage::UnexpectedMessage,
            });
        }

        for msg in self.queue.remove(&number).unwrap_or_default() {
            self.deliver(msg)?;
        }
        Ok(())
    }

    /// Hands message to the current round
    ///
    /// Message must be addressed to the current round.
    fn deliver(&mut self, msg: Message) -> Result<(), Error> {
        let invalid = |reason| Error::InvalidMessage {
            from: msg.from.clone(),
            round: msg.round,
            reason,
        };
        let round = match &mut self.round {
            Some(round) => round,
            None => return Err(invalid(InvalidMessage::UnexpectedMessage)),
        };

        match round.message_kind() {
            None => return Err(invalid(InvalidMessage::UnexpectedMessage)),
            Some(expected) if expected != msg.kind() => {
                return Err(invalid(InvalidMessage::WrongKind {
                    expected,
                    actual: msg.kind(),
                }))
            }
            Some(_) => (),
        }
        if !self.pending.remove(&msg.from) {
            return Err(invalid(InvalidMessage::UnexpectedSender));
        }

        round
            .store_message(&msg.from, &msg.payload)
            .map_err(invalid)?;
        trace!(from = %msg.from, round = msg.round, left = self.pending.len(), "message stored");
        Ok(())
    }

    /// Finalizes rounds while they have every expected contribution
    ///
    /// Returns the output once the final round is finalized.
    fn progress(&mut self) -> Result<Option<O>, Error> {
        while self.pending.is_empty() {
            let round = match self.round.take() {
                Some(round) => round,
                None => return Ok(None),
            };
            let number = round.number();

            let mut out = vec![];
            let transition = round
                .finalize(&mut out)
                .map_err(|reason| Error::Protocol { round: number, reason })?;
            debug!(round = number, sent = out.len(), "round finalized");
            self.send(out);

            match transition {
                Transition::Done(output) => return Ok(Some(output)),
                Transition::Next(next) => self.enter(next)?,
            }
        }
        Ok(None)
    }

    fn send(&self, messages: Vec<Message>) {
        let Some(outgoing) = &self.outgoing else {
            return;
        };
        for msg in messages {
            if outgoing.send(msg).is_err() {
                trace!("outgoing channel is dropped, message discarded");
            }
        }
    }
}

impl<O> fmt::Debug for Handler<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("protocol", &self.inner.info.protocol)
            .field("self_id", &self.inner.info.self_id)
            .field("ssid", &self.inner.ssid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::error::{ConstructionError, ProtocolError};
    use crate::message::{self, Destination, MessageKind};
    use crate::party::PartyIdSlice;
    use crate::round::{Round, SessionContext};
    use crate::store::MessageStore;

    // Toy protocol: parties broadcast their values, then send the sum to each other privately.
    // Output is the sum of received sums plus own sum.

    struct Round1 {
        ctx: Arc<SessionContext>,
        value: u32,
    }

    struct Round2 {
        ctx: Arc<SessionContext>,
        value: u32,
        values: MessageStore<u32>,
    }

    struct Round3 {
        ctx: Arc<SessionContext>,
        sum: u32,
        sums: MessageStore<u32>,
    }

    impl Round<u32> for Round1 {
        fn context(&self) -> &SessionContext {
            &self.ctx
        }
        fn number(&self) -> RoundNumber {
            1
        }
        fn message_kind(&self) -> Option<MessageKind> {
            None
        }
        fn store_message(&mut self, _: &PartyId, _: &[u8]) -> Result<(), InvalidMessage> {
            Err(InvalidMessage::UnexpectedMessage)
        }
        fn finalize(self: Box<Self>, out: &mut Vec<Message>) -> Result<Transition<u32>, ProtocolError> {
            self.ctx.broadcast(out, 2, &self.value)?;
            Ok(Transition::Next(Box::new(Round2 {
                values: MessageStore::new(self.ctx.other_party_ids()),
                ctx: self.ctx,
                value: self.value,
            })))
        }
    }

    impl Round<u32> for Round2 {
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
            let value = message::decode(payload)?;
            self.values.push(from, value)?;
            Ok(())
        }
        fn finalize(self: Box<Self>, out: &mut Vec<Message>) -> Result<Transition<u32>, ProtocolError> {
            let sum = self.values.finish()?.into_vec().into_iter().sum::<u32>() + self.value;
            for id in self.ctx.other_party_ids() {
                self.ctx.send_to(out, 3, &id, &sum)?;
            }
            Ok(Transition::Next(Box::new(Round3 {
                sums: MessageStore::new(self.ctx.other_party_ids()),
                ctx: self.ctx,
                sum,
            })))
        }
    }

    impl Round<u32> for Round3 {
        fn context(&self) -> &SessionContext {
            &self.ctx
        }
        fn number(&self) -> RoundNumber {
            3
        }
        fn message_kind(&self) -> Option<MessageKind> {
            Some(MessageKind::P2P)
        }
        fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), InvalidMessage> {
            let sum: u32 = message::decode(payload)?;
            if sum == 0 {
                return Err(InvalidMessage::Verification("sum can't be zero".into()));
            }
            self.sums.push(from, sum)?;
            Ok(())
        }
        fn finalize(self: Box<Self>, _: &mut Vec<Message>) -> Result<Transition<u32>, ProtocolError> {
            let sums = self.sums.finish()?.into_vec();
            if sums.iter().any(|s| *s != self.sum) {
                return Err(ProtocolError::Inconsistent("parties disagree on sum".into()));
            }
            Ok(Transition::Done(sums.into_iter().sum::<u32>() + self.sum))
        }
    }

    const IDS: [&str; 3] = ["a", "b", "c"];

    fn start(id: &str, value: u32) -> StartFunc<u32> {
        let id = PartyId::from(id);
        Box::new(move |pool: &Pool| {
            let ctx = SessionContext::new(
                SessionInfo {
                    protocol: "test/sum",
                    final_round: 3,
                    self_id: id,
                    party_ids: PartyIdSlice::new(IDS)?,
                    threshold: 0,
                },
                &[],
                pool,
            )?;
            Ok(Box::new(Round1 { ctx, value }) as BoxedRound<u32>)
        })
    }

    struct Parties {
        handlers: BTreeMap<PartyId, Handler<u32>>,
        outboxes: BTreeMap<PartyId, mpsc::UnboundedReceiver<Message>>,
    }

    impl Parties {
        fn new() -> Self {
            let mut handlers = BTreeMap::new();
            let mut outboxes = BTreeMap::new();
            for (i, id) in IDS.iter().enumerate() {
                let handler = Handler::new(start(id, i as u32 + 1), None).unwrap();
                outboxes.insert(PartyId::from(*id), handler.listen().unwrap());
                handlers.insert(PartyId::from(*id), handler);
            }
            Self { handlers, outboxes }
        }

        fn drain(&mut self) -> Vec<Message> {
            let mut msgs = vec![];
            for outbox in self.outboxes.values_mut() {
                while let Ok(msg) = outbox.try_recv() {
                    msgs.push(msg)
                }
            }
            msgs
        }

        fn deliver(&self, msgs: impl IntoIterator<Item = Message>) {
            self.deliver_to(msgs, |_| true)
        }

        fn deliver_to(&self, msgs: impl IntoIterator<Item = Message>, recipient: impl Fn(&PartyId) -> bool) {
            for msg in msgs {
                for (id, handler) in &self.handlers {
                    if msg.is_for(id) && recipient(id) {
                        handler.accept(msg.clone()).unwrap();
                    }
                }
            }
        }

        fn handler(&self, id: &str) -> &Handler<u32> {
            &self.handlers[id]
        }
    }

    #[test]
    fn honest_parties_agree() {
        let mut parties = Parties::new();
        loop {
            let msgs = parties.drain();
            if msgs.is_empty() {
                break;
            }
            parties.deliver(msgs.into_iter().rev());
        }
        for handler in parties.handlers.values() {
            // (1 + 2 + 3) * 3
            assert_eq!(handler.try_result(), Some(Ok(18)));
        }
        // Outgoing channels are closed once sessions are completed
        for outbox in parties.outboxes.values_mut() {
            assert_eq!(outbox.try_recv().unwrap_err(), TryRecvError::Disconnected);
        }
    }

    #[test]
    fn future_round_messages_are_buffered() {
        let mut parties = Parties::new();
        let round2 = parties.drain();

        // "a" falls behind: it gets round 3 messages before round 2 ones
        parties.deliver_to(round2.clone(), |id| id.as_str() != "a");
        let round3 = parties.drain();
        assert!(!round3.is_empty());
        assert!(round3.iter().all(|m| m.round == 3));
        parties.deliver_to(round3, |id| id.as_str() == "a");
        assert!(parties.handler("a").try_result().is_none());

        parties.deliver_to(round2, |id| id.as_str() == "a");
        assert_eq!(parties.handler("a").try_result(), Some(Ok(18)));
    }

    #[test]
    fn duplicate_message_aborts_session() {
        let mut parties = Parties::new();
        let msg = parties
            .drain()
            .into_iter()
            .find(|m| m.from == PartyId::from("b"))
            .unwrap();
        let a = parties.handler("a");
        a.accept(msg.clone()).unwrap();
        let err = a.accept(msg).unwrap_err();
        assert_matches!(
            err,
            Error::InvalidMessage {
                round: 2,
                reason: InvalidMessage::Duplicate,
                ..
            }
        );
        assert_eq!(a.try_result(), Some(Err(err)));
        assert!(a.is_terminated());
    }

    #[test]
    fn foreign_sender_aborts_session() {
        let mut parties = Parties::new();
        let mut msg = parties.drain().remove(0);
        msg.from = "z".into();
        let a = parties.handler("a");
        assert!(!a.can_accept(&msg));
        assert_matches!(
            a.accept(msg),
            Err(Error::InvalidMessage {
                reason: InvalidMessage::UnknownSender,
                ..
            })
        );
        assert_matches!(a.try_result(), Some(Err(_)));
    }

    #[test]
    fn invalid_round_and_kind_abort_session() {
        let mut parties = Parties::new();
        let template = parties
            .drain()
            .into_iter()
            .find(|m| m.from == PartyId::from("b"))
            .unwrap();

        let mut msg = template.clone();
        msg.round = 4;
        assert_matches!(
            parties.handler("a").accept(msg),
            Err(Error::InvalidMessage {
                reason: InvalidMessage::UnknownRound { round: 4, last: 3 },
                ..
            })
        );

        let mut msg = template;
        msg.to = Destination::Party("c".into());
        assert_matches!(
            parties.handler("c").accept(msg),
            Err(Error::InvalidMessage {
                reason: InvalidMessage::WrongKind {
                    expected: MessageKind::Broadcast,
                    actual: MessageKind::P2P
                },
                ..
            })
        );
    }

    #[test]
    fn failed_verification_aborts_session() {
        let mut parties = Parties::new();
        let round2 = parties.drain();
        parties.deliver(round2);
        let mut msg = parties
            .drain()
            .into_iter()
            .find(|m| m.from == PartyId::from("b") && m.is_for(&"a".into()))
            .unwrap();
        msg.payload = message::encode(&0u32).unwrap();
        assert_matches!(
            parties.handler("a").accept(msg),
            Err(Error::InvalidMessage {
                from,
                round: 3,
                reason: InvalidMessage::Verification(_),
            }) if from == PartyId::from("b")
        );
    }

    #[test]
    fn messages_of_other_sessions_are_ignored() {
        let mut parties = Parties::new();
        let mut msgs = parties.drain();
        let a = parties.handler("a");

        // msgs[0] is sent by "a" itself
        let mut msg = msgs.remove(1);
        assert!(a.can_accept(&msg));
        msg.ssid = SessionId([0xff; 32]);
        assert!(!a.can_accept(&msg));
        a.accept(msg).unwrap();

        let mut msg = msgs.remove(1);
        msg.protocol = "test/other".into();
        a.accept(msg).unwrap();
        assert!(!a.is_terminated());
    }

    #[test]
    fn stop_terminates_session() {
        let parties = Parties::new();
        let a = parties.handler("a").clone();
        a.stop();
        // Stopping twice keeps the first outcome
        a.stop();
        let results = futures::executor::block_on(async { (a.result().await, a.result().await) });
        assert_eq!(results, (Err(Error::Stopped), Err(Error::Stopped)));
    }

    #[test]
    fn abandoned_sender_fails_waiting_session() {
        let mut parties = Parties::new();
        let round2 = parties.drain();
        let a = parties.handler("a");

        // Round 2 of "a" got contribution of "b" only
        parties.deliver_to(
            round2.into_iter().filter(|m| m.from == PartyId::from("b")),
            |id| id.as_str() == "a",
        );
        a.abandon(&"b".into());
        a.abandon(&"z".into());
        assert!(!a.is_terminated());

        a.abandon(&"c".into());
        assert_eq!(
            a.try_result(),
            Some(Err(Error::PartyQuit {
                party: "c".into(),
                round: 2
            }))
        );
    }

    #[tokio::test]
    async fn result_is_observed_by_every_caller() {
        let mut parties = Parties::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let b = parties.handler("b").clone();
                tokio::spawn(async move { b.result().await })
            })
            .collect();

        loop {
            let msgs = parties.drain();
            if msgs.is_empty() {
                break;
            }
            parties.deliver(msgs);
        }
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(18));
        }
        assert_eq!(parties.handler("b").result().await, Ok(18));
    }

    #[test]
    fn construction_errors_are_returned_immediately() {
        let start: StartFunc<u32> = Box::new(|_: &Pool| Err(ConstructionError::EmptyPartySet));
        assert_matches!(
            Handler::new(start, None),
            Err(Error::Construction(ConstructionError::EmptyPartySet))
        );
    }

    #[test]
    fn listener_is_taken_once() {
        let handler = Handler::new(start("a", 1), None).unwrap();
        let mut outbox = handler.listen().unwrap();
        assert!(handler.listen().is_none());
        // Round 1 is finalized during construction
        let sent: Vec<_> = std::iter::from_fn(|| outbox.try_recv().ok()).collect();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, Destination::AllExceptSender);
        assert_eq!(sent[0].round, 2);
    }
}
