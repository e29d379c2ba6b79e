//! Threshold protocols for the [`mpc_rounds`] engine
//!
//! Every protocol is exposed as a set of start functions returning
//! [`StartFunc`](mpc_rounds::StartFunc) which is passed to [`Handler::new`](mpc_rounds::Handler::new):
//!
//! * [`xor`]: toy protocol, parties agree on XOR of their random contributions
//! * [`frost::keygen`], [`frost::sign`]: FROST threshold Schnorr signatures over secp256k1
//! * [`frost::keygen_taproot`], [`frost::sign_taproot`]: FROST producing [BIP-340](taproot)
//!   compatible signatures
//!
//! ```rust,no_run
//! use mpc_protocols::frost;
//! use mpc_rounds::{Handler, PartyIdSlice, Pool, PoolConfig};
//!
//! # async fn run() -> Result<(), mpc_rounds::Error> {
//! let ids = PartyIdSlice::new(["a", "b", "c"])?;
//! let pool = Pool::new(PoolConfig::default());
//! let handler = Handler::new(frost::keygen(b"execution #1", "a".into(), ids, 1), Some(&pool))?;
//! // relay messages between `handler` and other parties...
//! let config = handler.result().await?;
//! # Ok(()) }
//! ```

#![deny(missing_docs)]

pub mod frost;
pub mod taproot;
pub mod xor;

#[cfg(test)]
mod simulation;
