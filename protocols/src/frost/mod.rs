//! FROST threshold Schnorr signatures over secp256k1
//!
//! ## Key generation
//! [`keygen`] is a Pedersen DKG: every party shares a random secret with a degree-`t` polynomial,
//! commits to the polynomial and proves knowledge of the secret. Resulting key can be used by any
//! `t + 1` parties to sign. Output is [`Config`] holding party's secret share, the group public
//! key and public verification shares of all parties.
//!
//! ## Signing
//! [`sign`] takes a key share, the set of signers and the message. Signing is carried out in
//! two rounds: parties commit to a pair of nonces, then issue signature shares which are verified
//! and aggregated by every signer.
//!
//! ## Taproot
//! [`keygen_taproot`] and [`sign_taproot`] are the same protocols producing [BIP-340](crate::taproot)
//! compatible keys and signatures: the group key is normalized to have even Y coordinate, and the
//! challenge is computed as defined by BIP-340.

use std::collections::BTreeMap;
use std::fmt;

use k256::{ProjectivePoint, Scalar};
use mpc_rounds::{ConstructionError, PartyId, PartyIdSlice, StartFunc};

use crate::taproot;

mod keygen;
pub(crate) mod math;
mod sign;

/// Protocol identifier of [`keygen`]
pub const KEYGEN: &str = "frost/keygen";
/// Protocol identifier of [`keygen_taproot`]
pub const KEYGEN_TAPROOT: &str = "frost/keygen-taproot";
/// Protocol identifier of [`sign`]
pub const SIGN: &str = "frost/sign";
/// Protocol identifier of [`sign_taproot`]
pub const SIGN_TAPROOT: &str = "frost/sign-taproot";

/// Starts distributed key generation
///
/// `threshold` is `t`: any `t + 1` parties out of `ids` will be able to sign.
///
/// `eid` identifies this execution of the protocol: every party must use the same value, and it
/// must never be reused for another key generation among the same parties, otherwise messages of
/// one execution could be replayed in another.
pub fn keygen(eid: &[u8], id: PartyId, ids: PartyIdSlice, threshold: usize) -> StartFunc<Config> {
    keygen::start::<Schnorr>(eid, id, ids, threshold)
}

/// Starts distributed key generation of a BIP-340 key
///
/// `eid` is the execution identifier, see [`keygen`].
pub fn keygen_taproot(
    eid: &[u8],
    id: PartyId,
    ids: PartyIdSlice,
    threshold: usize,
) -> StartFunc<TaprootConfig> {
    keygen::start::<Taproot>(eid, id, ids, threshold)
}

/// Starts signing of `message`
///
/// Local party is `config.id`, it must be one of the `signers`. At least `threshold + 1` signers
/// are required, each of them must hold a share of the key.
pub fn sign(config: &Config, signers: PartyIdSlice, message: &[u8]) -> StartFunc<Signature> {
    sign::start::<Schnorr>(config, signers, message)
}

/// Starts BIP-340 signing of `message`
///
/// Same requirements as for [`sign`] apply.
pub fn sign_taproot(
    config: &TaprootConfig,
    signers: PartyIdSlice,
    message: &[u8],
) -> StartFunc<taproot::Signature> {
    sign::start::<Taproot>(config, signers, message)
}

/// Key share obtained by [`keygen`]
#[derive(Clone)]
pub struct Config {
    /// Local party
    pub id: PartyId,
    /// Threshold `t`
    pub threshold: usize,
    /// Secret share of the key `s_i`
    pub private_share: Scalar,
    /// Group public key `Y`
    pub public_key: ProjectivePoint,
    /// Public shares `Y_j = s_j G` of every party
    pub verification_shares: BTreeMap<PartyId, ProjectivePoint>,
}

impl Config {
    /// Parties holding shares of the key
    pub fn party_ids(&self) -> Vec<PartyId> {
        self.verification_shares.keys().cloned().collect()
    }

    /// Compressed group public key
    pub fn public_key_bytes(&self) -> Vec<u8> {
        math::encode_point(&self.public_key)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("id", &self.id)
            .field("threshold", &self.threshold)
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .field("parties", &self.verification_shares.len())
            .finish_non_exhaustive()
    }
}

/// Key share obtained by [`keygen_taproot`]
///
/// Group public key has even Y coordinate, shares are adjusted accordingly.
#[derive(Clone)]
pub struct TaprootConfig {
    /// Local party
    pub id: PartyId,
    /// Threshold `t`
    pub threshold: usize,
    /// Secret share of the key `s_i`
    pub private_share: Scalar,
    /// X-only group public key
    pub public_key: taproot::PublicKey,
    /// Public shares `Y_j = s_j G` of every party
    pub verification_shares: BTreeMap<PartyId, ProjectivePoint>,
}

impl TaprootConfig {
    /// Parties holding shares of the key
    pub fn party_ids(&self) -> Vec<PartyId> {
        self.verification_shares.keys().cloned().collect()
    }
}

impl fmt::Debug for TaprootConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaprootConfig")
            .field("id", &self.id)
            .field("threshold", &self.threshold)
            .field("public_key", &self.public_key)
            .field("parties", &self.verification_shares.len())
            .finish_non_exhaustive()
    }
}

/// Schnorr signature `(R, z)` produced by [`sign`]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Nonce commitment `R`
    pub r: ProjectivePoint,
    /// `z = k + c x`
    pub z: Scalar,
}

impl Signature {
    /// Checks that `z G = R + c Y`
    pub fn verify(&self, public_key: &ProjectivePoint, msg: &[u8]) -> bool {
        match Schnorr::challenge(&self.r, public_key, msg) {
            Some(challenge) => ProjectivePoint::GENERATOR * self.z == self.r + *public_key * challenge,
            None => false,
        }
    }

    /// Serializes signature as compressed `R` followed by `z`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = math::encode_point(&self.r);
        bytes.extend_from_slice(&math::encode_scalar(&self.z));
        bytes
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

/// Differences between plain and BIP-340 flavours of the protocols
pub(crate) trait Variant: Send + Sync + 'static {
    const KEYGEN: &'static str;
    const SIGN: &'static str;

    type Config: Clone + Send + Sync + 'static;
    type Signature: Clone + Send + Sync + 'static;

    fn finish_keygen(config: Config) -> Self::Config;
    fn key_material(config: &Self::Config) -> Result<Config, ConstructionError>;

    /// Returns nonce commitment to use, and whether nonces must be negated to match it
    fn normalize_nonce(r: ProjectivePoint) -> (ProjectivePoint, bool);
    /// `None` if the challenge can't be derived
    fn challenge(r: &ProjectivePoint, public_key: &ProjectivePoint, msg: &[u8]) -> Option<Scalar>;
    fn signature(r: ProjectivePoint, z: Scalar) -> Self::Signature;
}

pub(crate) struct Schnorr;

impl Variant for Schnorr {
    const KEYGEN: &'static str = KEYGEN;
    const SIGN: &'static str = SIGN;

    type Config = Config;
    type Signature = Signature;

    fn finish_keygen(config: Config) -> Config {
        config
    }

    fn key_material(config: &Config) -> Result<Config, ConstructionError> {
        Ok(config.clone())
    }

    fn normalize_nonce(r: ProjectivePoint) -> (ProjectivePoint, bool) {
        (r, false)
    }

    fn challenge(r: &ProjectivePoint, public_key: &ProjectivePoint, msg: &[u8]) -> Option<Scalar> {
        math::h2(&[&math::encode_point(r)[..], &math::encode_point(public_key)[..], msg])
    }

    fn signature(r: ProjectivePoint, z: Scalar) -> Signature {
        Signature { r, z }
    }
}

pub(crate) struct Taproot;

impl Variant for Taproot {
    const KEYGEN: &'static str = KEYGEN_TAPROOT;
    const SIGN: &'static str = SIGN_TAPROOT;

    type Config = TaprootConfig;
    type Signature = taproot::Signature;

    fn finish_keygen(mut config: Config) -> TaprootConfig {
        if !math::has_even_y(&config.public_key) {
            config.private_share = -config.private_share;
            config.public_key = -config.public_key;
            for share in config.verification_shares.values_mut() {
                *share = -*share;
            }
        }
        TaprootConfig {
            id: config.id,
            threshold: config.threshold,
            private_share: config.private_share,
            public_key: taproot::PublicKey::from_point(&config.public_key),
            verification_shares: config.verification_shares,
        }
    }

    fn key_material(config: &TaprootConfig) -> Result<Config, ConstructionError> {
        let public_key = config
            .public_key
            .to_point()
            .ok_or_else(|| ConstructionError::InvalidKey("public key is not on curve".into()))?;
        Ok(Config {
            id: config.id.clone(),
            threshold: config.threshold,
            private_share: config.private_share,
            public_key,
            verification_shares: config.verification_shares.clone(),
        })
    }

    fn normalize_nonce(r: ProjectivePoint) -> (ProjectivePoint, bool) {
        if math::has_even_y(&r) {
            (r, false)
        } else {
            (-r, true)
        }
    }

    fn challenge(r: &ProjectivePoint, public_key: &ProjectivePoint, msg: &[u8]) -> Option<Scalar> {
        Some(taproot::challenge(
            &math::x_only(r),
            &math::x_only(public_key),
            msg,
        ))
    }

    fn signature(r: ProjectivePoint, z: Scalar) -> taproot::Signature {
        taproot::Signature::new(&r, &z)
    }
}

/// Length-prefixed party identity, for hashing
fn id_bytes(id: &PartyId) -> Vec<u8> {
    let mut out = (id.as_bytes().len() as u64).to_be_bytes().to_vec();
    out.extend_from_slice(id.as_bytes());
    out
}
