use anyhow::{bail, Context, Result};
use clap::Parser;
use mpc_rounds::dev::Network;
use mpc_rounds::{PartyId, PartyIdSlice, Pool, PoolConfig};
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use threshold_demo::{run_party, Outcome};

/// Runs XOR agreement, FROST keygen and signing between local parties
#[derive(Parser, Debug)]
#[command(name = "threshold-demo")]
struct Args {
    /// Identities of parties
    #[arg(long, value_delimiter = ',', default_value = "a,b,c,d,e")]
    parties: Vec<String>,

    /// Any `threshold + 1` parties can sign
    #[arg(short, long, default_value_t = 4)]
    threshold: usize,

    /// Message to sign
    #[arg(short, long, default_value = "hello")]
    message: String,

    /// Worker threads per party: a number, `0` for one per CPU, or `sync`
    #[arg(short, long, default_value = "0")]
    workers: PoolConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let ids = PartyIdSlice::new(args.parties.iter().map(String::as_str))?;
    let network = Network::new(ids.iter().cloned());
    let message = args.message.into_bytes();

    let mut pools = vec![];
    let mut parties = JoinSet::new();
    for id in ids.iter() {
        let pool = Pool::new(args.workers);
        pools.push(pool.clone());

        let (id, ids, network, message) = (id.clone(), ids.clone(), network.clone(), message.clone());
        let threshold = args.threshold;
        parties.spawn(async move {
            let outcome = run_party(id.clone(), ids, threshold, &message, &network, &pool).await;
            (id, outcome)
        });
    }

    let mut outcomes: Vec<Outcome> = vec![];
    let mut failed = 0;
    while let Some(joined) = parties.join_next().await {
        let (id, outcome): (PartyId, _) = joined.context("party task panicked")?;
        match outcome {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                error!(%id, "party failed: {err:#}");
                failed += 1;
            }
        }
    }
    for pool in pools {
        pool.tear_down()?;
    }
    if failed > 0 {
        bail!("{failed} parties failed");
    }

    outcomes.sort_by(|a, b| a.id.cmp(&b.id));
    for outcome in &outcomes {
        info!(
            party = %outcome.id,
            random = %outcome.random,
            public_key = %outcome.taproot_config.public_key,
            signed = outcome.signatures.is_some(),
            "party finished"
        );
    }
    if let Some(signer) = outcomes.iter().find(|o| o.signatures.is_some()) {
        let public_key = signer.taproot_config.public_key;
        if let Some(signatures) = &signer.signatures {
            println!("public key: {public_key}");
            println!("signature:  {}", signatures.taproot);
            println!(
                "verifies {:?}: {}",
                String::from_utf8_lossy(&message),
                public_key.verify(&signatures.taproot, &message)
            );
            println!(
                "verifies \"goodbye\": {}",
                public_key.verify(&signatures.taproot, b"goodbye")
            );
        }
    }
    Ok(())
}
