//! [BIP-340] Schnorr signatures
//!
//! Types of keys and signatures produced by [`frost::keygen_taproot`](crate::frost::keygen_taproot)
//! and [`frost::sign_taproot`](crate::frost::sign_taproot), and signature verification.
//!
//! [BIP-340]: https://github.com/bitcoin/bips/blob/master/bip-0340.mediawiki

use std::fmt;

use k256::{ProjectivePoint, Scalar};
use sha2::{Digest, Sha256};

use crate::frost::math;

/// Size of serialized [`Signature`]
pub const SIGNATURE_LEN: usize = 64;

/// X-only public key
///
/// Refers to the point with given X coordinate and even Y coordinate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Constructs a key from X coordinate
    ///
    /// Returns `None` if it's not an X coordinate of a curve point.
    pub fn from_bytes(x: [u8; 32]) -> Option<Self> {
        math::lift_x(&x).map(|_| Self(x))
    }

    /// X coordinate of the key
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Public key point, with even Y coordinate
    pub fn to_point(&self) -> Option<ProjectivePoint> {
        math::lift_x(&self.0)
    }

    pub(crate) fn from_point(point: &ProjectivePoint) -> Self {
        Self(math::x_only(point))
    }

    /// Verifies BIP-340 signature of `msg`
    pub fn verify(&self, signature: &Signature, msg: &[u8]) -> bool {
        let Some(public_key) = self.to_point() else {
            return false;
        };
        let Some(r) = signature.r() else {
            return false;
        };
        let Some(s) = signature.s() else {
            return false;
        };
        if math::lift_x(&r).is_none() {
            return false;
        }

        let e = challenge(&r, &self.0, msg);
        let expected_r = ProjectivePoint::GENERATOR * s - public_key * e;
        expected_r != ProjectivePoint::IDENTITY
            && math::has_even_y(&expected_r)
            && math::x_only(&expected_r) == r
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// BIP-340 signature `(R.x, s)`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub(crate) fn new(r: &ProjectivePoint, s: &Scalar) -> Self {
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..32].copy_from_slice(&math::x_only(r));
        bytes[32..].copy_from_slice(&math::encode_scalar(s));
        Self(bytes)
    }

    /// Parses serialized signature
    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Serializes signature
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0
    }

    fn r(&self) -> Option<[u8; 32]> {
        self.0[..32].try_into().ok()
    }

    fn s(&self) -> Option<Scalar> {
        let bytes: [u8; 32] = self.0[32..].try_into().ok()?;
        math::decode_scalar(&bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Tagged hash `SHA256(SHA256(tag) || SHA256(tag) || ...)`
pub fn tagged_hash(tag: &str) -> Sha256 {
    let tag = Sha256::digest(tag.as_bytes());
    Sha256::new().chain_update(tag).chain_update(tag)
}

/// BIP-340 challenge `e = H_challenge(R.x || P.x || m)`
pub(crate) fn challenge(r: &[u8; 32], public_key: &[u8; 32], msg: &[u8]) -> Scalar {
    math::hash_to_scalar(
        tagged_hash("BIP0340/challenge")
            .chain_update(r)
            .chain_update(public_key)
            .chain_update(msg),
    )
}
