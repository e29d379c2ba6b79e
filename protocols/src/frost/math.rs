//! Secp256k1 arithmetic shared by keygen and signing
//!
//! Hash functions `H1`, `H2`, `H4` and `H5` are the ones of the FROST(secp256k1, SHA-256)
//! ciphersuite of RFC 9591.

use k256::elliptic_curve::hash2curve::{ExpandMsgXmd, GroupDigest};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::point::AffineCoordinates;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256};
use mpc_rounds::PartyId;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

/// Compressed point, 33 bytes
pub type PointBytes = Vec<u8>;
/// Big-endian scalar
pub type ScalarBytes = [u8; 32];

/// Maps party identity to a non-zero scalar used as its evaluation point
pub fn party_scalar(id: &PartyId) -> Scalar {
    let digest = Sha256::new()
        .chain_update(b"frost/party-id")
        .chain_update(id.as_bytes())
        .finalize();
    <Scalar as Reduce<U256>>::reduce_bytes(&digest)
}

/// Context string of the ciphersuite
pub const CONTEXT: &str = "FROST-secp256k1-SHA256-v1";

/// `hash_to_field` with `expand_message_xmd`, domain-separated by `CONTEXT || tag`
///
/// Returns `None` only if the domain separation tag is empty.
fn hash_to_field(msgs: &[&[u8]], tag: &[u8]) -> Option<Scalar> {
    k256::Secp256k1::hash_to_scalar::<ExpandMsgXmd<Sha256>>(msgs, &[CONTEXT.as_bytes(), tag]).ok()
}

/// Binding factor hash
pub fn h1(msgs: &[&[u8]]) -> Option<Scalar> {
    hash_to_field(msgs, b"rho")
}

/// Challenge hash
pub fn h2(msgs: &[&[u8]]) -> Option<Scalar> {
    hash_to_field(msgs, b"chal")
}

/// Message hash
pub fn h4() -> Sha256 {
    Sha256::new().chain_update(CONTEXT).chain_update(b"msg")
}

/// Commitment list hash
pub fn h5() -> Sha256 {
    Sha256::new().chain_update(CONTEXT).chain_update(b"com")
}

/// Reduces digest of the hasher modulo curve order
pub fn hash_to_scalar(hash: Sha256) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&hash.finalize())
}

pub fn encode_point(point: &ProjectivePoint) -> PointBytes {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Decodes a compressed or uncompressed point
///
/// Returns `None` if bytes are invalid or encode the identity.
pub fn decode_point(bytes: &[u8]) -> Option<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).ok()?;
    let point = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))?;
    let point = ProjectivePoint::from(point);
    if point == ProjectivePoint::IDENTITY {
        None
    } else {
        Some(point)
    }
}

pub fn encode_scalar(scalar: &Scalar) -> ScalarBytes {
    scalar.to_bytes().into()
}

/// Decodes a scalar, rejecting non-canonical encodings
pub fn decode_scalar(bytes: &ScalarBytes) -> Option<Scalar> {
    Option::from(Scalar::from_repr(FieldBytes::from(*bytes)))
}

/// X coordinate of a point
pub fn x_only(point: &ProjectivePoint) -> [u8; 32] {
    point.to_affine().x().into()
}

pub fn has_even_y(point: &ProjectivePoint) -> bool {
    !bool::from(point.to_affine().y_is_odd())
}

/// Lifts x coordinate to the point with even Y
pub fn lift_x(x: &[u8; 32]) -> Option<ProjectivePoint> {
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(x);
    decode_point(&compressed)
}

/// Polynomial `f(x) = a_0 + a_1 x + ... + a_t x^t` with secret coefficients
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    /// Samples random polynomial of degree `t`
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R, t: usize) -> Self {
        Self {
            coefficients: (0..=t).map(|_| Scalar::random(&mut *rng)).collect(),
        }
    }

    /// Free term `f(0)`
    pub fn secret(&self) -> &Scalar {
        &self.coefficients[0]
    }

    pub fn evaluate(&self, x: &Scalar) -> Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, a| acc * x + a)
    }

    /// Commitments to coefficients `a_k G`
    pub fn commit(&self) -> Vec<ProjectivePoint> {
        self.coefficients
            .iter()
            .map(|a| ProjectivePoint::GENERATOR * a)
            .collect()
    }
}

/// Evaluates committed polynomial at `x`, i.e. computes `f(x) G` given `a_k G`
pub fn evaluate_commitments(commitments: &[ProjectivePoint], x: &Scalar) -> ProjectivePoint {
    commitments
        .iter()
        .rev()
        .fold(ProjectivePoint::IDENTITY, |acc, c| acc * x + c)
}

/// Lagrange coefficient of `x_i` for interpolation at zero over points `xs`
///
/// Returns `None` if `x_i` doesn't appear in `xs` exactly once.
pub fn lagrange_at_zero(x_i: &Scalar, xs: &[Scalar]) -> Option<Scalar> {
    let mut num = Scalar::ONE;
    let mut denom = Scalar::ONE;
    let mut x_i_observed = false;
    for x_j in xs {
        if x_j == x_i {
            if x_i_observed {
                return None;
            }
            x_i_observed = true;
            continue;
        }
        num *= x_j;
        denom *= x_j - x_i;
    }
    if !x_i_observed {
        return None;
    }
    Option::from(denom.invert()).map(|inv: Scalar| num * inv)
}
