use hex_literal::hex;
use matches::assert_matches;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use mpc_protocols::{frost, xor};
use mpc_rounds::{
    Destination, Error, Handler, InvalidMessage, Message, PartyId, PartyIdSlice, StartFunc,
};

const SEEDS: [[u8; 32]; 3] = [
    hex!("6772d079d5c984b3936a291e36b0d3dc6c474e36ed4afdfc973ef79a431ca870"),
    hex!("12a595f4893fdb4ab9cc38caeec5f7456acb3002ca58457c5056977ce59136a6"),
    hex!("6fc78a926c7eebfad4e98e796cd53b771ac5947b460567c7ea441abb957c89c7"),
];
const PROTOCOL_OUTPUT: [u8; 32] =
    hex!("1a10cf1f3088b403fe4f9fadb4a01fee1c49ea4f6117df472d2c7a5d33f11711");

fn ids(ids: &[&str]) -> PartyIdSlice {
    PartyIdSlice::new(ids.iter().copied()).unwrap()
}

fn seeded_xor() -> Vec<StartFunc<xor::Output>> {
    let parties = ids(&["a", "b", "c"]);
    parties
        .iter()
        .zip(SEEDS)
        .map(|(id, seed)| xor::start_with_seed(id.clone(), parties.clone(), seed))
        .collect()
}

/// Runs sessions delivering in-flight messages in random order
fn run_shuffled<O, R>(starts: Vec<StartFunc<O>>, rng: &mut R) -> Vec<Result<O, Error>>
where
    O: Clone + Send + Sync + 'static,
    R: Rng,
{
    let handlers: Vec<Handler<O>> = starts
        .into_iter()
        .map(|start| Handler::new(start, None).unwrap())
        .collect();
    let mut outboxes: Vec<_> = handlers.iter().map(|h| h.listen().unwrap()).collect();

    let mut in_flight: Vec<Message> = vec![];
    loop {
        for outbox in &mut outboxes {
            while let Ok(msg) = outbox.try_recv() {
                in_flight.push(msg);
            }
        }
        if in_flight.is_empty() {
            break;
        }
        let msg = in_flight.swap_remove(rng.gen_range(0..in_flight.len()));
        for handler in &handlers {
            if msg.is_for(handler.self_id()) {
                handler.accept(msg.clone()).unwrap();
            }
        }
    }

    handlers
        .iter()
        .map(|h| h.try_result().unwrap_or(Err(Error::Stopped)))
        .collect()
}

/// Sessions of local parties relaying messages by hand
struct Parties<O> {
    handlers: Vec<Handler<O>>,
    outboxes: Vec<mpsc::UnboundedReceiver<Message>>,
}

impl<O> Parties<O>
where
    O: Clone + Send + Sync + 'static,
{
    fn start(starts: Vec<StartFunc<O>>) -> Self {
        let handlers: Vec<Handler<O>> = starts
            .into_iter()
            .map(|start| Handler::new(start, None).unwrap())
            .collect();
        let outboxes = handlers.iter().map(|h| h.listen().unwrap()).collect();
        Self { handlers, outboxes }
    }

    /// Messages sent since the last call
    fn sent(&mut self) -> Vec<Message> {
        let mut sent = vec![];
        for outbox in &mut self.outboxes {
            while let Ok(msg) = outbox.try_recv() {
                sent.push(msg);
            }
        }
        sent
    }

    fn deliver(&self, msgs: Vec<Message>) {
        for msg in msgs {
            for handler in &self.handlers {
                if msg.is_for(handler.self_id()) {
                    handler.accept(msg.clone()).unwrap();
                }
            }
        }
    }
}

#[test]
fn xor_output_is_xor_of_seeds() {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
    for output in run_shuffled(seeded_xor(), &mut rng) {
        assert_eq!(output.unwrap(), xor::Output(PROTOCOL_OUTPUT));
    }
}

#[test]
fn delivery_order_doesnt_matter() {
    for seed in 0..20 {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        for output in run_shuffled(seeded_xor(), &mut rng) {
            assert_eq!(output.unwrap(), xor::Output(PROTOCOL_OUTPUT));
        }
    }
}

#[test]
fn frost_under_shuffled_delivery() {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
    let parties = ids(&["a", "b", "c", "d", "e"]);
    let configs: Vec<frost::Config> = run_shuffled(
        parties
            .iter()
            .map(|id| frost::keygen(b"shuffled", id.clone(), parties.clone(), 2))
            .collect(),
        &mut rng,
    )
    .into_iter()
    .collect::<Result<_, _>>()
    .unwrap();
    assert!(configs.iter().all(|c| c.public_key == configs[0].public_key));

    let signers = ids(&["a", "c", "e"]);
    let signatures = run_shuffled(
        configs
            .iter()
            .filter(|c| signers.contains(&c.id))
            .map(|c| frost::sign(c, signers.clone(), b"shuffled"))
            .collect(),
        &mut rng,
    );
    for signature in signatures {
        assert!(signature
            .unwrap()
            .verify(&configs[0].public_key, b"shuffled"));
    }
}

#[test]
fn duplicate_message_aborts_session() {
    let mut parties = Parties::start(seeded_xor());
    let sent = parties.sent();
    let handlers = &parties.handlers;
    let from_b = sent
        .iter()
        .find(|m| m.from == PartyId::from("b"))
        .unwrap()
        .clone();

    handlers[0].accept(from_b.clone()).unwrap();
    assert_matches!(
        handlers[0].accept(from_b),
        Err(Error::InvalidMessage {
            round: 2,
            reason: InvalidMessage::Duplicate,
            ..
        })
    );
    assert_matches!(
        handlers[0].try_result(),
        Some(Err(Error::InvalidMessage {
            reason: InvalidMessage::Duplicate,
            ..
        }))
    );
}

#[test]
fn foreign_sender_aborts_session() {
    let mut parties = Parties::start(seeded_xor());
    let sent = parties.sent();
    let handlers = &parties.handlers;
    let mut forged = sent[1].clone();
    forged.from = PartyId::from("mallory");

    assert_matches!(
        handlers[0].accept(forged),
        Err(Error::InvalidMessage {
            reason: InvalidMessage::UnknownSender,
            ..
        })
    );
    assert!(handlers[0].is_terminated());

    // Later messages are ignored
    handlers[0].accept(sent[2].clone()).unwrap();
    assert_matches!(
        handlers[0].try_result(),
        Some(Err(Error::InvalidMessage {
            reason: InvalidMessage::UnknownSender,
            ..
        }))
    );
}

#[test]
fn p2p_message_to_broadcast_round_aborts_session() {
    let mut parties = Parties::start(seeded_xor());
    let sent = parties.sent();
    let handlers = &parties.handlers;
    let mut p2p = sent[1].clone();
    p2p.to = Destination::Party(PartyId::from("a"));

    assert_matches!(
        handlers[0].accept(p2p),
        Err(Error::InvalidMessage {
            reason: InvalidMessage::WrongKind { .. },
            ..
        })
    );
}

#[test]
fn messages_of_another_session_are_ignored() {
    let parties = Parties::start(seeded_xor());
    let handlers = &parties.handlers;

    // Same parties running the protocol with different party set
    let other = ids(&["a", "b"]);
    let sent = Parties::start(vec![xor::start(PartyId::from("b"), other)]).sent();
    for msg in sent {
        handlers[0].accept(msg).unwrap();
    }
    assert!(!handlers[0].is_terminated());
}

#[tokio::test]
async fn result_is_same_for_every_caller() {
    let mut parties = Parties::start(seeded_xor());
    let sent = parties.sent();
    let handlers = &parties.handlers;
    let a = handlers[0].clone();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let a = a.clone();
            tokio::spawn(async move { a.result().await })
        })
        .collect();

    parties.deliver(sent);
    // Round 3 messages are produced while accepting round 2 ones
    let sent = parties.sent();
    parties.deliver(sent);

    for output in futures::future::join_all(waiters).await {
        assert_eq!(output.unwrap(), Ok(xor::Output(PROTOCOL_OUTPUT)));
    }
    assert_eq!(a.result().await, Ok(xor::Output(PROTOCOL_OUTPUT)));
    assert_eq!(a.try_result(), Some(Ok(xor::Output(PROTOCOL_OUTPUT))));
}

#[test]
fn stopped_session_reports_stopped() {
    let parties = Parties::start(seeded_xor());
    let handlers = &parties.handlers;
    handlers[1].stop();
    assert_eq!(
        futures::executor::block_on(handlers[1].result()),
        Err(Error::Stopped)
    );
    // Stopping twice changes nothing
    handlers[1].stop();
    assert_eq!(handlers[1].try_result(), Some(Err(Error::Stopped)));
}
