use std::collections::BTreeSet;

use futures_util::StreamExt;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::handler::Handler;
use crate::party::PartyId;

use super::Network;

/// Drives a session over the [`Network`] until it terminates
///
/// Relays messages produced by the handler to the network, and feeds messages received from the
/// network into the handler. Messages are accepted on a blocking thread as rounds may do heavy
/// computations. If the inbound stream ends before the session is completed (e.g. the party
/// [quit](Network::quit)), the handler is [stopped](Handler::stop).
///
/// Peers that quit the network are [abandoned](Handler::abandon): if the session still waits for
/// one of them, it fails with [`Error::PartyQuit`].
///
/// Once the session completes, waits at the [epoch barrier](Network::done) and returns the
/// output. A party whose session failed [quits](Network::quit) the network instead, so peers
/// waiting for it are released.
pub async fn handler_loop<O>(handler: &Handler<O>, network: &Network) -> Result<O, Error>
where
    O: Clone + Send + Sync + 'static,
{
    let id = handler.self_id().clone();
    let mut incoming = network.receive(&id);
    let mut departures = network.departures();

    match handler.listen() {
        Some(mut outgoing) => {
            abandon(handler, &departures.borrow_and_update());
            let mut incoming_closed = false;
            let mut departures_closed = false;
            loop {
                tokio::select! {
                    msg = outgoing.recv() => match msg {
                        Some(msg) => network.send(msg),
                        // Session is terminated and every message is sent
                        None => break,
                    },
                    msg = incoming.next(), if !incoming_closed => match msg {
                        Some(msg) => {
                            let session = handler.clone();
                            match tokio::task::spawn_blocking(move || session.accept(msg)).await {
                                Ok(Ok(())) => (),
                                Ok(Err(err)) => debug!(%err, "message aborted the session"),
                                Err(err) => {
                                    error!(%err, "accepting message panicked");
                                    handler.stop();
                                }
                            }
                            // The next round may wait for a party that has already left
                            abandon(handler, &departures.borrow());
                        }
                        None => {
                            debug!(party = %id, "inbound stream ended");
                            incoming_closed = true;
                            handler.stop();
                        }
                    },
                    changed = departures.changed(), if !departures_closed => match changed {
                        Ok(()) => abandon(handler, &departures.borrow_and_update()),
                        Err(_) => departures_closed = true,
                    },
                }
            }
        }
        None => warn!(party = %id, "outgoing messages are taken by someone else"),
    }

    let outcome = handler.result().await;
    match &outcome {
        Ok(_) => network.done(&id).await,
        Err(err) => {
            debug!(party = %id, %err, "session failed, leaving the network");
            network.quit(&id);
        }
    }
    outcome
}

fn abandon<O>(handler: &Handler<O>, departed: &BTreeSet<PartyId>)
where
    O: Clone + Send + Sync + 'static,
{
    for party in departed {
        handler.abandon(party);
    }
}
