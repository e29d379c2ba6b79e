use std::collections::{BTreeMap, BTreeSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use crate::message::Message;
use crate::party::PartyId;

/// In-process network connecting parties of a simulation
///
/// Every party has an inbound queue. [`send`](Self::send) puts a copy of the message into the queue
/// of every party it's addressed to.
///
/// The network can be reused for several protocol runs (epochs) in a row: once a party completes
/// its session, it calls [`done`](Self::done) which waits until every active party is done, and
/// then queues are recreated for the next run. A party that isn't needed anymore
/// [quits](Self::quit) the network; peers learn about it from [`departures`](Self::departures).
///
/// Cheap to clone: clones refer to the same network.
#[derive(Clone)]
pub struct Network {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    epoch: watch::Sender<u64>,
    departed: watch::Sender<BTreeSet<PartyId>>,
}

struct State {
    active: BTreeSet<PartyId>,
    finished: BTreeSet<PartyId>,
    queues: BTreeMap<PartyId, Queue>,
    epoch: u64,
}

struct Queue {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Option<mpsc::UnboundedReceiver<Message>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

impl Network {
    /// Connects `parties`
    pub fn new<I, P>(parties: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PartyId>,
    {
        let active: BTreeSet<PartyId> = parties.into_iter().map(Into::into).collect();
        let queues = active.iter().map(|id| (id.clone(), Queue::new())).collect();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    active,
                    finished: BTreeSet::new(),
                    queues,
                    epoch: 0,
                }),
                epoch: watch::channel(0).0,
                departed: watch::channel(BTreeSet::new()).0,
            }),
        }
    }

    /// Delivers message to every connected party it's addressed to
    ///
    /// Messages addressed to parties that have quit are dropped.
    pub fn send(&self, msg: Message) {
        let state = self.shared.state.lock();
        for (id, queue) in &state.queues {
            if msg.is_for(id) && queue.sender.send(msg.clone()).is_err() {
                trace!(to = %id, "party's inbound queue is closed");
            }
        }
    }

    /// Returns stream of messages addressed to `party` in the current epoch
    ///
    /// Stream ends immediately if party is unknown, has quit, or has already taken its stream in
    /// this epoch. Stream ends once the party quits or the epoch is over.
    pub fn receive(&self, party: &PartyId) -> Receive {
        let mut state = self.shared.state.lock();
        let receiver = state
            .queues
            .get_mut(party)
            .and_then(|queue| queue.receiver.take());
        if receiver.is_none() {
            debug!(%party, "party has no inbound queue, returning closed stream");
        }
        Receive {
            inner: receiver.map(UnboundedReceiverStream::new),
        }
    }

    /// Withdraws `party` from the network
    ///
    /// Party's inbound queue is dropped, it doesn't take part in later epochs. Parties waiting at
    /// [`done`](Self::done) for it are released, and subscribers of
    /// [`departures`](Self::departures) are notified.
    pub fn quit(&self, party: &PartyId) {
        let mut state = self.shared.state.lock();
        if !state.active.remove(party) {
            return;
        }
        debug!(%party, epoch = state.epoch, "party quits");
        state.finished.remove(party);
        state.queues.remove(party);
        self.shared.departed.send_modify(|departed| {
            departed.insert(party.clone());
        });
        self.try_advance(&mut state);
    }

    /// Parties that have quit the network
    ///
    /// Returned receiver is notified every time a party quits.
    pub fn departures(&self) -> watch::Receiver<BTreeSet<PartyId>> {
        self.shared.departed.subscribe()
    }

    /// Waits until every active party is done with the current epoch
    ///
    /// Returns immediately if `party` isn't active.
    pub async fn done(&self, party: &PartyId) {
        let target = {
            let mut state = self.shared.state.lock();
            if !state.active.contains(party) {
                return;
            }
            state.finished.insert(party.clone());
            let target = state.epoch + 1;
            self.try_advance(&mut state);
            target
        };

        let mut epoch = self.shared.epoch.subscribe();
        loop {
            if *epoch.borrow_and_update() >= target {
                return;
            }
            if epoch.changed().await.is_err() {
                return;
            }
        }
    }

    /// Parties that haven't quit
    pub fn parties(&self) -> Vec<PartyId> {
        self.shared.state.lock().active.iter().cloned().collect()
    }

    /// Number of completed epochs
    pub fn epoch(&self) -> u64 {
        self.shared.state.lock().epoch
    }

    fn try_advance(&self, state: &mut State) {
        if !state.active.is_subset(&state.finished) {
            return;
        }
        state.epoch += 1;
        state.finished.clear();
        state.queues = state
            .active
            .iter()
            .map(|id| (id.clone(), Queue::new()))
            .collect();
        debug!(epoch = state.epoch, parties = state.active.len(), "network epoch started");
        self.shared.epoch.send_replace(state.epoch);
    }
}

/// Stream of messages addressed to a party, returned by [`Network::receive`]
pub struct Receive {
    inner: Option<UnboundedReceiverStream<Message>>,
}

impl Stream for Receive {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        match &mut self.inner {
            Some(inner) => Pin::new(inner).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}
