//! Threshold signing between local parties
//!
//! Every party runs, one after another, over a shared in-process [`Network`]:
//! 1. [`xor`] agreement on a random value, used as execution identifier of key generation
//! 2. FROST [key generation](frost::keygen) and [Taproot key generation](frost::keygen_taproot)
//! 3. Signing of the message by the first `threshold + 1` parties, plain and Taproot
//!
//! Parties that don't sign [quit](Network::quit) the network after key generation.

use anyhow::{ensure, Context};
use mpc_protocols::{frost, taproot, xor};
use mpc_rounds::dev::{handler_loop, Network};
use mpc_rounds::{Error, Handler, PartyId, PartyIdSlice, Pool, StartFunc};
use tracing::{info, info_span, Instrument};

/// What a party ends up with
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Local party
    pub id: PartyId,
    /// Output of XOR agreement
    pub random: xor::Output,
    /// Key share
    pub config: frost::Config,
    /// Taproot key share
    pub taproot_config: frost::TaprootConfig,
    /// Signatures, if the party was among signers
    pub signatures: Option<Signatures>,
}

/// Signatures of the message
#[derive(Debug, Clone)]
pub struct Signatures {
    /// Plain FROST signature
    pub frost: frost::Signature,
    /// BIP-340 signature
    pub taproot: taproot::Signature,
}

/// Signers of the message: the first `threshold + 1` parties
pub fn signers(ids: &PartyIdSlice, threshold: usize) -> anyhow::Result<PartyIdSlice> {
    ids.take(threshold + 1)
        .with_context(|| format!("{} parties can't meet threshold {threshold}", ids.len()))
}

/// Executes all protocols on behalf of party `id`
///
/// Signatures are verified before being returned. On any failure the party quits the network,
/// so peers don't wait for it.
pub async fn run_party(
    id: PartyId,
    ids: PartyIdSlice,
    threshold: usize,
    message: &[u8],
    network: &Network,
    pool: &Pool,
) -> anyhow::Result<Outcome> {
    let span = info_span!("party", %id);
    let me = id.clone();
    let outcome = async {
        let random = run(&id, xor::start(id.clone(), ids.clone()), network, pool)
            .await
            .context("xor")?;
        info!(%random, "agreed on random value");

        let config = run(
            &id,
            frost::keygen(&random.0, id.clone(), ids.clone(), threshold),
            network,
            pool,
        )
        .await
        .context("keygen")?;
        let taproot_config = run(
            &id,
            frost::keygen_taproot(&random.0, id.clone(), ids.clone(), threshold),
            network,
            pool,
        )
        .await
        .context("taproot keygen")?;
        info!(public_key = %taproot_config.public_key, "keys generated");

        let signers = signers(&ids, threshold)?;
        if !signers.contains(&id) {
            info!("not a signer, quitting");
            network.quit(&id);
            return Ok(Outcome {
                id,
                random,
                config,
                taproot_config,
                signatures: None,
            });
        }

        let signature = run(&id, frost::sign(&config, signers.clone(), message), network, pool)
            .await
            .context("sign")?;
        ensure!(
            signature.verify(&config.public_key, message),
            "frost signature doesn't verify"
        );
        let taproot_signature = run(
            &id,
            frost::sign_taproot(&taproot_config, signers, message),
            network,
            pool,
        )
        .await
        .context("taproot sign")?;
        ensure!(
            taproot_config.public_key.verify(&taproot_signature, message),
            "taproot signature doesn't verify"
        );
        info!(signature = %taproot_signature, "message signed");

        Ok(Outcome {
            id,
            random,
            config,
            taproot_config,
            signatures: Some(Signatures {
                frost: signature,
                taproot: taproot_signature,
            }),
        })
    }
    .instrument(span)
    .await;
    if outcome.is_err() {
        network.quit(&me);
    }
    outcome
}

/// Runs one session over the network
///
/// If the session can't be started, the party quits the network so others don't wait for it.
pub async fn run<O>(
    id: &PartyId,
    start: StartFunc<O>,
    network: &Network,
    pool: &Pool,
) -> Result<O, Error>
where
    O: Clone + Send + Sync + 'static,
{
    let handler = match Handler::new(start, Some(pool)) {
        Ok(handler) => handler,
        Err(err) => {
            network.quit(id);
            return Err(err);
        }
    };
    handler_loop(&handler, network).await
}
