//! Runs sessions of local parties in straight order, without async runtime

use mpc_rounds::{Error, Handler, Message, StartFunc};

/// Executes a protocol between local parties
///
/// Messages are delivered in order they were sent, optionally passing through `tamper` which can
/// modify or drop them. Returns outcome of every party, in the order of `starts`.
pub fn run_with<O, F>(starts: Vec<StartFunc<O>>, mut tamper: F) -> Vec<Result<O, Error>>
where
    O: Clone + Send + Sync + 'static,
    F: FnMut(Message) -> Option<Message>,
{
    let handlers: Vec<Handler<O>> = starts
        .into_iter()
        .map(|start| Handler::new(start, None).unwrap())
        .collect();
    let mut outboxes: Vec<_> = handlers.iter().map(|h| h.listen().unwrap()).collect();

    loop {
        let mut sent = vec![];
        for outbox in &mut outboxes {
            while let Ok(msg) = outbox.try_recv() {
                sent.push(msg);
            }
        }
        if sent.is_empty() {
            break;
        }
        for msg in sent.into_iter().filter_map(&mut tamper) {
            for handler in &handlers {
                if msg.is_for(handler.self_id()) {
                    // Errors are reported by `try_result`
                    let _ = handler.accept(msg.clone());
                }
            }
        }
    }

    handlers
        .iter()
        .map(|h| h.try_result().unwrap_or(Err(Error::Stopped)))
        .collect()
}

/// Executes a protocol between honest local parties
pub fn run<O>(starts: Vec<StartFunc<O>>) -> Vec<Result<O, Error>>
where
    O: Clone + Send + Sync + 'static,
{
    run_with(starts, Some)
}
